use std::any::{self, Any};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;
use snafu::Backtrace;
use tracing::{debug, warn};

use crate::component::{BoxError, Component};
use crate::registry::{Registry, RegistryError};
use crate::util::any::AsAny;

/// The construction function of a lazily built component.
///
/// A builder receives the registry it is registered in, so that it can
/// resolve its own dependencies by name.
pub type BuildFn<T> = Box<dyn Fn(&Registry) -> Result<T, BoxError> + Send + Sync + 'static>;

/// A type-erased view of a [`Factory`], as stored by the registry.
pub(crate) trait ErasedFactory: AsAny + Send + Sync {
    fn name(&self) -> &str;

    fn value_type(&self) -> &'static str;

    fn is_built(&self) -> bool;

    fn close(&self) -> Result<(), BoxError>;

    fn stop(&self) -> Result<(), BoxError>;
}

/// The build-once holder of one named component.
pub struct Factory<T>
where
    T: Component + Clone,
{
    name: String,
    state: Mutex<FactoryState<T>>,
    started: Mutex<bool>,
}

enum FactoryState<T> {
    Pending(BuildFn<T>),
    Built(T),
}

impl<T> Factory<T>
where
    T: Component + Clone,
{
    /// Creates a factory which is already built from `value`.
    pub fn with_value(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FactoryState::Built(value)),
            started: Mutex::new(false),
        }
    }

    /// Creates a factory which runs `builder` on first request.
    pub fn with_builder(name: impl Into<String>, builder: BuildFn<T>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FactoryState::Pending(builder)),
            started: Mutex::new(false),
        }
    }

    /// Returns the component, building it first if needed.
    ///
    /// Concurrent callers block until the single build completes. On success
    /// the builder is dropped and the name is recorded for reverse-order
    /// closing. A failed build leaves the factory pending so the next call
    /// retries.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Build`] if the builder fails and
    /// [`RegistryError::BuildPanic`] if it panics.
    pub fn get_instance(&self, registry: &Registry) -> Result<T, RegistryError> {
        let mut state = self.state.lock();

        let instance = match &*state {
            FactoryState::Built(instance) => return Ok(instance.clone()),
            FactoryState::Pending(builder) => self.build(builder, registry)?,
        };

        *state = FactoryState::Built(instance.clone());
        registry.core().record_built(&self.name);
        debug!(name = %self.name, "component built");

        Ok(instance)
    }

    /// Runs `start` unless the component is already started, and reports
    /// whether it ran. Callers for the same component are serialized, so
    /// concurrent starts run the hook once.
    pub fn start_once<F>(&self, start: F) -> Result<bool, BoxError>
    where
        F: FnOnce() -> Result<(), BoxError>,
    {
        let mut started = self.started.lock();
        if *started {
            return Ok(false);
        }

        start()?;
        *started = true;
        Ok(true)
    }

    fn build(&self, builder: &BuildFn<T>, registry: &Registry) -> Result<T, RegistryError> {
        debug!(name = %self.name, "building component");

        match panic::catch_unwind(AssertUnwindSafe(|| builder(registry))) {
            Ok(Ok(instance)) => Ok(instance),
            Ok(Err(source)) => {
                warn!(name = %self.name, error = %source, "failed to build component");
                Err(RegistryError::Build {
                    name: self.name.clone(),
                    source,
                })
            }
            Err(payload) => {
                let payload = describe_panic(payload.as_ref());
                warn!(name = %self.name, %payload, "component builder panicked");
                Err(RegistryError::BuildPanic {
                    name: self.name.clone(),
                    payload,
                    backtrace: Backtrace::force_capture(),
                })
            }
        }
    }
}

impl<T> ErasedFactory for Factory<T>
where
    T: Component + Clone,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn value_type(&self) -> &'static str {
        any::type_name::<T>()
    }

    fn is_built(&self) -> bool {
        matches!(*self.state.lock(), FactoryState::Built(_))
    }

    fn close(&self) -> Result<(), BoxError> {
        let state = self.state.lock();
        let FactoryState::Built(instance) = &*state else {
            return Ok(());
        };

        match instance.as_closable() {
            Some(closable) => {
                debug!(name = %self.name, "closing component");
                closable.close()
            }
            None => Ok(()),
        }
    }

    fn stop(&self) -> Result<(), BoxError> {
        *self.started.lock() = false;

        let state = self.state.lock();
        let FactoryState::Built(instance) = &*state else {
            return Ok(());
        };

        match instance.as_stoppable() {
            Some(stoppable) => {
                debug!(name = %self.name, "stopping component");
                stoppable.stop()
            }
            None => Ok(()),
        }
    }
}

impl<T> Debug for Factory<T>
where
    T: Component + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Factory")
            .field("name", &self.name)
            .field("type", &any::type_name::<T>())
            .field("built", &self.is_built())
            .finish()
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(err) = payload.downcast_ref::<BoxError>() {
        err.to_string()
    } else {
        String::from("non-textual panic payload")
    }
}
