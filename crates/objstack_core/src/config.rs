//! Stack configuration and builder.
//!
//! # Responsibility
//! - Collect every tunable of a persistence stack in one place.
//! - Derive the store location from an explicit directory and filename.
//!
//! # Invariants
//! - `store_name` is a bare filename: non-empty, no path separators, not
//!   `.` or `..`.
//! - Configuration is immutable once built; a stack never re-reads it.

use crate::model::schema::{model_path_from_url, ModelError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const STORE_FILE_EXTENSION: &str = "sqlite";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Backing store flavor attached by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    /// SQLite database file inside the store directory.
    #[default]
    Sqlite,
    /// Private in-memory SQLite database; nothing touches disk.
    InMemory,
}

/// What the coordinator does when attaching the store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Report the attach error unchanged.
    Never,
    /// Delete the store file and retry once, but only for corrupt,
    /// unsupported or model-incompatible stores.
    #[default]
    RecreateOnIncompatible,
    /// Delete the store file and retry once for any attach error.
    RecreateOnAnyError,
}

/// Resolved place where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

impl StoreLocation {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path.as_path()),
            Self::InMemory => None,
        }
    }
}

/// Immutable persistence stack configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    model_path: PathBuf,
    store_directory: PathBuf,
    store_name: String,
    store_type: StoreType,
    recovery: RecoveryPolicy,
    busy_timeout: Duration,
}

impl StackConfig {
    /// Starts a builder for a model file and a store directory.
    pub fn builder(
        model_path: impl Into<PathBuf>,
        store_directory: impl Into<PathBuf>,
    ) -> StackConfigBuilder {
        StackConfigBuilder::new(model_path.into(), store_directory.into())
    }

    /// Starts a builder from a model path or `file://` URL.
    pub fn builder_from_url(
        model_url: &str,
        store_directory: impl Into<PathBuf>,
    ) -> Result<StackConfigBuilder, ConfigError> {
        let model_path = model_path_from_url(model_url)?;
        Ok(StackConfigBuilder::new(model_path, store_directory.into()))
    }

    /// Configuration whose store file is named `<app_name>.sqlite`.
    pub fn for_app(
        app_name: &str,
        model_path: impl Into<PathBuf>,
        store_directory: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        Self::builder(model_path, store_directory)
            .store_name(store_name_for_app(app_name))
            .build()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn store_directory(&self) -> &Path {
        &self.store_directory
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    pub fn recovery(&self) -> RecoveryPolicy {
        self.recovery
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Where the coordinator attaches its store.
    pub fn store_location(&self) -> StoreLocation {
        match self.store_type {
            StoreType::Sqlite => StoreLocation::File(self.store_directory.join(&self.store_name)),
            StoreType::InMemory => StoreLocation::InMemory,
        }
    }
}

/// Builder for `StackConfig`.
#[derive(Debug, Clone)]
pub struct StackConfigBuilder {
    model_path: PathBuf,
    store_directory: PathBuf,
    store_name: Option<String>,
    store_type: StoreType,
    recovery: RecoveryPolicy,
    busy_timeout: Duration,
}

impl StackConfigBuilder {
    fn new(model_path: PathBuf, store_directory: PathBuf) -> Self {
        Self {
            model_path,
            store_directory,
            store_name: None,
            store_type: StoreType::default(),
            recovery: RecoveryPolicy::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Store filename. Defaults to the model file stem plus `.sqlite`.
    pub fn store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = Some(name.into());
        self
    }

    pub fn store_type(mut self, store_type: StoreType) -> Self {
        self.store_type = store_type;
        self
    }

    pub fn recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<StackConfig, ConfigError> {
        let store_name = match self.store_name {
            Some(name) => name,
            None => default_store_name(&self.model_path)?,
        };
        validate_store_name(&store_name)?;

        Ok(StackConfig {
            model_path: self.model_path,
            store_directory: self.store_directory,
            store_name,
            store_type: self.store_type,
            recovery: self.recovery,
            busy_timeout: self.busy_timeout,
        })
    }
}

/// `<app_name>.sqlite` with surrounding whitespace removed.
pub fn store_name_for_app(app_name: &str) -> String {
    format!("{}.{STORE_FILE_EXTENSION}", app_name.trim())
}

fn default_store_name(model_path: &Path) -> Result<String, ConfigError> {
    model_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.trim().is_empty())
        .map(store_name_for_app)
        .ok_or_else(|| ConfigError::InvalidStoreName(String::new()))
}

fn validate_store_name(name: &str) -> Result<(), ConfigError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyStoreName);
    }
    if trimmed != name
        || trimmed == "."
        || trimmed == ".."
        || trimmed.starts_with('.')
        || trimmed.contains(['/', '\\'])
        || trimmed.contains('\0')
    {
        return Err(ConfigError::InvalidStoreName(name.to_string()));
    }
    Ok(())
}

/// Invalid stack configuration.
#[derive(Debug)]
pub enum ConfigError {
    EmptyStoreName,
    InvalidStoreName(String),
    ModelLocation(ModelError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyStoreName => write!(f, "store name cannot be empty"),
            Self::InvalidStoreName(name) => write!(
                f,
                "store name `{name}` must be a plain file name without path separators"
            ),
            Self::ModelLocation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::EmptyStoreName | Self::InvalidStoreName(_) => None,
            Self::ModelLocation(err) => Some(err),
        }
    }
}

impl From<ModelError> for ConfigError {
    fn from(value: ModelError) -> Self {
        Self::ModelLocation(value)
    }
}
