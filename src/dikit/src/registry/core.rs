use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::factory::ErasedFactory;
use crate::registry::error::{self, RegistryError};

pub struct RegistryCore {
    factories: RwLock<HashMap<String, Arc<dyn ErasedFactory>>>,
    close_order: Mutex<Vec<String>>,
    stop_order: Mutex<Vec<String>>,
}

impl RegistryCore {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            close_order: Mutex::new(Vec::new()),
            stop_order: Mutex::new(Vec::new()),
        }
    }

    /// Inserts `factory` under its name. A factory which is already built is
    /// recorded for closing at once.
    pub fn insert(&self, factory: Arc<dyn ErasedFactory>) -> Result<(), RegistryError> {
        let name = factory.name().to_owned();
        let built = factory.is_built();
        let mut factories = self.factories.write();

        match factories.entry(name) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateName {
                name: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                debug!(name = %entry.key(), built, "component registered");
                if built {
                    self.record_built(entry.key());
                }
                entry.insert(factory);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ErasedFactory>> {
        self.factories.read().get(name).map(Arc::clone)
    }

    pub fn factory(&self, name: &str) -> Result<Arc<dyn ErasedFactory>, RegistryError> {
        self.lookup(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_owned(),
        })
    }

    pub fn names_matching<P>(&self, predicate: P) -> Vec<String>
    where
        P: Fn(&str) -> bool,
    {
        let names = self.factories.read().keys().cloned().collect::<Vec<_>>();
        names.into_iter().filter(|name| predicate(name)).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn record_built(&self, name: &str) {
        self.close_order.lock().push(name.to_owned());
    }

    pub fn record_started(&self, name: &str) {
        let mut stop_order = self.stop_order.lock();
        if !stop_order.iter().any(|started| started == name) {
            stop_order.push(name.to_owned());
        }
    }

    #[cfg(test)]
    pub fn close_order(&self) -> Vec<String> {
        self.close_order.lock().clone()
    }

    #[cfg(test)]
    pub fn stop_order(&self) -> Vec<String> {
        self.stop_order.lock().clone()
    }

    /// Stops every started component, last started first.
    pub fn stop_all(&self) -> Result<(), RegistryError> {
        let order = mem::take(&mut *self.stop_order.lock());
        let errors = order
            .into_iter()
            .rev()
            .filter_map(|name| {
                let source = self.recorded(&name)?.stop().err()?;
                warn!(name = %name, error = %source, "failed to stop component");
                Some(RegistryError::StopFailure { name, source })
            })
            .collect();

        error::aggregate("stop", errors)
    }

    /// Closes every built component, last built first.
    pub fn close_all(&self) -> Result<(), RegistryError> {
        let order = mem::take(&mut *self.close_order.lock());
        let errors = order
            .into_iter()
            .rev()
            .filter_map(|name| {
                let source = self.recorded(&name)?.close().err()?;
                warn!(name = %name, error = %source, "failed to close component");
                Some(RegistryError::CloseFailure { name, source })
            })
            .collect();

        error::aggregate("close", errors)
    }

    fn recorded(&self, name: &str) -> Option<Arc<dyn ErasedFactory>> {
        let factory = self.lookup(name);
        if factory.is_none() {
            warn!(name = %name, "skipping a component that is not registered");
        }
        factory
    }
}
