use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use behavior_points::models::StudentPointsSummary;
use behavior_points::{db, report, Actor, ChangeNotifier, Config, PgPointsStore, PointsCoordinator};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "behavior-points")]
#[command(about = "Behavior points ledger for classrooms", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Award realistic demo points to a sample class
    Seed,
    /// List the behaviors that can be awarded
    Behaviors,
    /// Award a behavior to one student
    Award {
        #[arg(long)]
        student: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        behavior: String,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        by: String,
        #[arg(long)]
        by_name: String,
        #[arg(long)]
        json: bool,
    },
    /// Award a behavior to several students at once
    AwardBulk {
        #[arg(long, value_delimiter = ',', required = true)]
        students: Vec<String>,
        #[arg(long)]
        class: String,
        #[arg(long)]
        behavior: String,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        by: String,
        #[arg(long)]
        by_name: String,
    },
    /// Delete one award and take its points back
    Delete {
        #[arg(long)]
        record: Uuid,
    },
    /// Remove every award for a student in a class
    Reset {
        #[arg(long)]
        student: String,
        #[arg(long)]
        class: String,
    },
    /// Show recent awards for a student or a class
    #[command(group(
        ArgGroup::new("scope")
            .args(["student", "class"])
            .required(true)
            .multiple(false)
    ))]
    History {
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show the running total for a student in a class
    Summary {
        #[arg(long)]
        student: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        json: bool,
    },
    /// Rank the students of a class by total points
    Leaderboard {
        #[arg(long)]
        class: String,
        #[arg(long)]
        json: bool,
    },
    /// Recompute summaries from the ledger and repair any drift
    Reconcile {
        #[arg(long)]
        class: String,
        /// Only this student; defaults to every student in the class
        #[arg(long)]
        student: Option<String>,
    },
    /// Generate a markdown report for a class
    Report {
        #[arg(long)]
        class: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let catalog = config.load_catalog()?;

    if let Commands::Behaviors = cli.command {
        for behavior in catalog.iter() {
            println!(
                "{:<16} {:+3}  {:<8} {}",
                behavior.id, behavior.point_value, behavior.polarity, behavior.display_name
            );
        }
        return Ok(());
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")?;

    if let Commands::InitDb = cli.command {
        db::init_db(&pool).await?;
        println!("Schema ready.");
        return Ok(());
    }

    let coordinator = PointsCoordinator::new(Arc::new(PgPointsStore::new(pool)), catalog)
        .with_retry(config.retry)
        .with_notifier(ChangeNotifier::new(config.notify_capacity));

    match cli.command {
        Commands::InitDb | Commands::Behaviors => {}
        Commands::Seed => {
            let awarded = seed(&coordinator).await?;
            println!("Seeded {awarded} awards into demo-class.");
        }
        Commands::Award {
            student,
            class,
            behavior,
            note,
            by,
            by_name,
            json,
        } => {
            let receipt = coordinator
                .award_points(&student, &class, &behavior, note.as_deref(), &Actor::new(by, by_name))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            } else {
                println!(
                    "Recorded {} ({:+}) for {} as {}.",
                    receipt.record.behavior_name, receipt.record.points, student, receipt.record.id
                );
                print_summary(&receipt.summary);
            }
        }
        Commands::AwardBulk {
            students,
            class,
            behavior,
            note,
            by,
            by_name,
        } => {
            let report = coordinator
                .award_points_to_multiple(
                    &students,
                    &class,
                    &behavior,
                    note.as_deref(),
                    &Actor::new(by, by_name),
                )
                .await?;
            for receipt in report.succeeded() {
                println!(
                    "- {}: recorded {} (total {})",
                    receipt.record.student_id, receipt.record.id, receipt.summary.total_points
                );
            }
            for (student, err) in report.failed() {
                println!("- {student}: FAILED {err}");
            }
            if report.failure_count() > 0 {
                anyhow::bail!("{} of {} awards failed", report.failure_count(), report.outcomes.len());
            }
        }
        Commands::Delete { record } => {
            let existing = coordinator.find_record(record).await?;
            let summary = coordinator
                .delete_point_record(
                    record,
                    &existing.student_id,
                    &existing.class_id,
                    existing.points,
                    existing.is_positive,
                )
                .await?;
            println!("Deleted {} ({:+}).", existing.behavior_name, existing.points);
            print_summary(&summary);
        }
        Commands::Reset { student, class } => {
            let report = coordinator.reset_student_points(&student, &class).await?;
            println!("Removed {} awards.", report.removed_records);
            print_summary(&report.summary);
        }
        Commands::History {
            student,
            class,
            limit,
            json,
        } => {
            let records = match (student, class) {
                (Some(student), _) => coordinator.get_points_history(&student, limit).await?,
                (None, Some(class)) => coordinator.get_class_points_history(&class, limit).await?,
                (None, None) => unreachable!("clap requires --student or --class"),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No awards recorded.");
            } else {
                for record in &records {
                    println!(
                        "{} {} {:<10} {:<24} {:+3} by {}{}",
                        record.created_at.format("%Y-%m-%d %H:%M"),
                        record.id,
                        record.student_id,
                        record.behavior_name,
                        record.points,
                        record.awarded_by_name,
                        record
                            .note
                            .as_deref()
                            .map(|n| format!(" ({n})"))
                            .unwrap_or_default()
                    );
                }
            }
        }
        Commands::Summary {
            student,
            class,
            json,
        } => {
            let summary = coordinator.get_student_summary(&student, &class).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::Leaderboard { class, json } => {
            let summaries = coordinator.get_class_summaries(&class).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("No points awarded in {class} yet.");
            } else {
                for (rank, summary) in summaries.iter().enumerate() {
                    println!(
                        "{:>3}. {:<16} {:>5}  (+{} / -{})",
                        rank + 1,
                        summary.student_id,
                        summary.total_points,
                        summary.positive_count,
                        summary.negative_count
                    );
                }
            }
        }
        Commands::Reconcile { class, student } => {
            let students = match student {
                Some(student) => vec![student],
                None => coordinator
                    .get_class_summaries(&class)
                    .await?
                    .into_iter()
                    .map(|s| s.student_id)
                    .collect(),
            };
            let mut repaired = 0usize;
            for student in &students {
                let report = coordinator.reconcile(student, &class).await?;
                if report.drifted {
                    repaired += 1;
                    println!(
                        "- {student}: {:?} -> {:?}",
                        report.before.counts(),
                        report.after.counts()
                    );
                }
            }
            println!("Checked {} summaries, repaired {repaired}.", students.len());
        }
        Commands::Report { class, limit, out } => {
            let summaries = coordinator.get_class_summaries(&class).await?;
            let recent = coordinator.get_class_points_history(&class, limit).await?;
            let markdown = report::build_report(&class, chrono::Utc::now(), &summaries, &recent);
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn print_summary(summary: &StudentPointsSummary) {
    println!(
        "{} in {}: {} points ({} positive, {} negative)",
        summary.student_id,
        summary.class_id,
        summary.total_points,
        summary.positive_count,
        summary.negative_count
    );
}

async fn seed(coordinator: &PointsCoordinator) -> anyhow::Result<usize> {
    let teacher = Actor::new("teacher-rivera", "Ms. Rivera");
    let awards = [
        ("avery-lee", "helping", Some("Helped a classmate with fractions")),
        ("avery-lee", "participating", None),
        ("jules-moreno", "on-task", None),
        ("jules-moreno", "talking-out", Some("During silent reading")),
        ("kiara-patel", "kindness", Some("Welcomed the new student")),
        ("kiara-patel", "teamwork", None),
        ("kiara-patel", "off-task", None),
    ];

    for (student, behavior_id, note) in awards {
        coordinator
            .award_points(student, "demo-class", behavior_id, note, &teacher)
            .await?;
    }

    let everyone = vec![
        "avery-lee".to_string(),
        "jules-moreno".to_string(),
        "kiara-patel".to_string(),
    ];
    let report = coordinator
        .award_points_to_multiple(
            &everyone,
            "demo-class",
            "teamwork",
            Some("Group project finished"),
            &teacher,
        )
        .await?;

    Ok(awards.len() + report.success_count())
}
