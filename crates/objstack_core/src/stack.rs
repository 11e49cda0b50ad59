//! Persistence stack manager.
//!
//! # Responsibility
//! - Lazily build the model, coordinator and context in dependency order.
//! - Forward save requests and report their failures as values.
//! - Delete the store file and reset every handle on request.
//!
//! # Invariants
//! - At most one model, coordinator and context exist per `Ready` phase;
//!   repeated accesses return the same instances.
//! - Handles are rebuilt only after `delete_stack`.
//! - A failed build leaves the phase unchanged.

use crate::config::{ConfigError, StackConfig, StoreLocation};
use crate::context::{ContextError, ObjectContext, SaveOutcome};
use crate::model::schema::{ModelError, ObjectModel};
use crate::store::files::remove_store_files;
use crate::store::{StoreCoordinator, StoreError};
use log::{error, info, warn};
use once_cell::unsync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

pub type StackResult<T> = Result<T, StackError>;

/// Observable lifecycle phase of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    /// Constructed; nothing loaded yet.
    Uninitialized,
    /// Model loaded; coordinator and context are built on demand.
    Ready,
    /// Store deleted; the next access rebuilds everything.
    Deleted,
}

enum StackState {
    Uninitialized,
    Ready(StackHandles),
    Deleted,
}

struct StackHandles {
    model: Arc<ObjectModel>,
    coordinator: OnceCell<Rc<StoreCoordinator>>,
    context: OnceCell<Rc<ObjectContext>>,
}

impl StackHandles {
    fn load(config: &StackConfig) -> StackResult<Self> {
        let model = ObjectModel::load(config.model_path())?;
        Ok(Self {
            model: Arc::new(model),
            coordinator: OnceCell::new(),
            context: OnceCell::new(),
        })
    }

    fn coordinator(&self, config: &StackConfig) -> StackResult<&Rc<StoreCoordinator>> {
        self.coordinator.get_or_try_init(|| {
            StoreCoordinator::attach(Arc::clone(&self.model), config)
                .map(Rc::new)
                .map_err(StackError::from)
        })
    }

    fn context(&self, config: &StackConfig) -> StackResult<&Rc<ObjectContext>> {
        self.context.get_or_try_init(|| {
            let coordinator = self.coordinator(config)?;
            Ok(Rc::new(ObjectContext::new(Rc::clone(coordinator))))
        })
    }
}

/// Owns the model, store coordinator and context of one store.
pub struct PersistenceStack {
    config: StackConfig,
    state: StackState,
    generation: u64,
}

impl PersistenceStack {
    /// Stores the configuration; builds no handles.
    pub fn new(config: StackConfig) -> Self {
        Self {
            config,
            state: StackState::Uninitialized,
            generation: 0,
        }
    }

    /// Stack for a model path or `file://` URL, storing `store_name`
    /// inside `store_directory`.
    pub fn open(
        model_url: &str,
        store_directory: impl Into<PathBuf>,
        store_name: &str,
    ) -> StackResult<Self> {
        let config = StackConfig::builder_from_url(model_url, store_directory)?
            .store_name(store_name)
            .build()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn phase(&self) -> StackPhase {
        match self.state {
            StackState::Uninitialized => StackPhase::Uninitialized,
            StackState::Ready(_) => StackPhase::Ready,
            StackState::Deleted => StackPhase::Deleted,
        }
    }

    /// Number of times handles were built, counting the first build.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolved store file path; `None` for in-memory stores.
    pub fn store_path(&self) -> Option<PathBuf> {
        self.config.store_location().path().map(Path::to_path_buf)
    }

    /// Model descriptor, loaded on first access.
    pub fn model(&mut self) -> StackResult<Arc<ObjectModel>> {
        let handles = self.handles()?;
        Ok(Arc::clone(&handles.model))
    }

    /// Store coordinator, attached on first access.
    pub fn coordinator(&mut self) -> StackResult<Rc<StoreCoordinator>> {
        let handles = ensure_ready(&mut self.state, &mut self.generation, &self.config)?;
        Ok(Rc::clone(handles.coordinator(&self.config)?))
    }

    /// Unit-of-work context, created on first access without undo tracking.
    pub fn context(&mut self) -> StackResult<Rc<ObjectContext>> {
        let handles = ensure_ready(&mut self.state, &mut self.generation, &self.config)?;
        Ok(Rc::clone(handles.context(&self.config)?))
    }

    /// Saves `context` if it has pending changes.
    ///
    /// Failures are logged and returned; pending changes stay in the context
    /// so the caller can retry, roll back or delete the stack.
    pub fn save_context(&self, context: &ObjectContext) -> StackResult<SaveOutcome> {
        match context.save() {
            Ok(outcome) => {
                if let SaveOutcome::Saved(counts) = outcome {
                    info!(
                        "event=context_save module=stack status=ok inserted={} updated={} deleted={}",
                        counts.inserted, counts.updated, counts.deleted
                    );
                }
                Ok(outcome)
            }
            Err(err) => {
                error!(
                    "event=context_save module=stack status=error error_code={} error={}",
                    err.code(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Removes the store file and clears every handle.
    ///
    /// Unsaved changes are discarded. Handles still held by callers are
    /// detached and fail with `StoreError::Detached` afterwards. Deleting a
    /// missing store succeeds.
    pub fn delete_stack(&mut self) -> StackResult<()> {
        let previous = std::mem::replace(&mut self.state, StackState::Deleted);
        if let StackState::Ready(handles) = previous {
            if let Some(context) = handles.context.get() {
                if context.has_changes() {
                    warn!(
                        "event=stack_delete module=stack status=discarding pending={}",
                        context.pending_counts().total()
                    );
                }
                context.rollback();
            }
            if let Some(coordinator) = handles.coordinator.get() {
                coordinator.detach()?;
            }
        }

        let existed = match self.config.store_location() {
            StoreLocation::File(path) => remove_store_files(&path)?,
            StoreLocation::InMemory => false,
        };
        info!("event=stack_delete module=stack status=ok existed={existed}");
        Ok(())
    }

    fn handles(&mut self) -> StackResult<&StackHandles> {
        ensure_ready(&mut self.state, &mut self.generation, &self.config)
    }
}

fn ensure_ready<'a>(
    state: &'a mut StackState,
    generation: &mut u64,
    config: &StackConfig,
) -> StackResult<&'a StackHandles> {
    match state {
        StackState::Ready(handles) => Ok(handles),
        StackState::Uninitialized | StackState::Deleted => {
            let handles = StackHandles::load(config)?;
            *generation += 1;
            info!("event=stack_build module=stack status=ok generation={generation}");
            *state = StackState::Ready(handles);
            ensure_ready(state, generation, config)
        }
    }
}

/// Any failure surfaced by a persistence stack.
#[derive(Debug)]
pub enum StackError {
    Config(ConfigError),
    Model(ModelError),
    Store(StoreError),
    Context(ContextError),
}

impl Display for StackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Model(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Context(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Model(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Context(err) => Some(err),
        }
    }
}

impl From<ConfigError> for StackError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ModelError> for StackError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

impl From<StoreError> for StackError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ContextError> for StackError {
    fn from(value: ContextError) -> Self {
        Self::Context(value)
    }
}
