#![allow(clippy::new_without_default)]

pub mod component;
mod factory;
pub mod module;
pub mod registry;
mod util;

pub mod prelude {
    pub use crate::component::{BoxError, Closable, Component, Startable, Stoppable};
    pub use crate::module::{Configuration, Module};
    pub use crate::registry::{Registry, RegistryError};
}
