mod core;
mod error;
mod handle;

pub use error::RegistryError;
pub use handle::Registry;
