use crate::registry::{Registry, RegistryError};

/// A unit of registrations, applied to a [`Registry`] during initialization.
pub trait Module: 'static {
    /// Registers the module's components on `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if any registration fails.
    fn configure(&self, registry: &Registry) -> Result<(), RegistryError>;
}

/// An ordered group of modules which is itself a [`Module`].
#[derive(Default)]
pub struct Configuration {
    modules: Vec<Box<dyn Module>>,
}

impl Configuration {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with<M: Module>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn compose(mut self, mut other: Configuration) -> Self {
        self.modules.append(&mut other.modules);
        self
    }
}

impl Module for Configuration {
    fn configure(&self, registry: &Registry) -> Result<(), RegistryError> {
        self.modules
            .iter()
            .try_for_each(|module| module.configure(registry))
    }
}
