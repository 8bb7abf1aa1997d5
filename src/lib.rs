//! Behavior points ledger: signed point awards per student and class, with
//! running summaries kept consistent with the award log.

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod notify;
pub mod report;
pub mod retry;
pub mod store;

pub use catalog::BehaviorCatalog;
pub use config::Config;
pub use coordinator::PointsCoordinator;
pub use db::PgPointsStore;
pub use error::{PointsError, StoreError};
pub use ledger::Actor;
pub use memory::MemoryStore;
pub use notify::{ChangeNotifier, PointsChange};
pub use retry::RetryPolicy;
pub use store::{PointsStore, PointsTx};
