//! Lazily built persistence stack over SQLite.
//!
//! A `PersistenceStack` owns a schema descriptor, a store coordinator and a
//! unit-of-work context, builds them on first access and tears them down
//! together with the store file.

pub mod config;
pub mod context;
pub mod logging;
pub mod model;
pub mod stack;
pub mod store;

pub use config::{
    ConfigError, RecoveryPolicy, StackConfig, StackConfigBuilder, StoreLocation, StoreType,
};
pub use context::{ContextError, ContextResult, ObjectContext, PendingCounts, SaveOutcome};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::object::{AttributeValue, ManagedObject, ObjectId};
pub use model::schema::{
    model_path_from_url, AttributeDescription, AttributeType, EntityDescription, ModelError,
    ModelResult, ModelValidationError, ObjectModel,
};
pub use stack::{PersistenceStack, StackError, StackPhase, StackResult};
pub use store::{StoreCoordinator, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
