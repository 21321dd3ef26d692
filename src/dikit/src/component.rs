//! Runtime lifecycle capabilities of registered components.
//!
//! A component never has to declare lifecycle hooks up front. Instead, each
//! stored value implements [`Component`], whose accessors tell the registry
//! at the point of use whether the value can be closed, started or stopped.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The error type returned by lifecycle hooks and builders.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// A component that holds resources which must be released at shutdown.
#[cfg_attr(test, mockall::automock)]
pub trait Closable: Send + Sync {
    /// Releases the resources held by the component.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing any resource fails.
    fn close(&self) -> Result<(), BoxError>;
}

/// A component with an explicit start step, e.g. a background worker.
#[cfg_attr(test, mockall::automock)]
pub trait Startable: Send + Sync {
    /// Starts the component.
    ///
    /// # Errors
    ///
    /// Returns an error if the component could not be started.
    fn start(&self) -> Result<(), BoxError>;
}

/// A started component that must be stopped before it is closed.
#[cfg_attr(test, mockall::automock)]
pub trait Stoppable: Send + Sync {
    /// Stops the component.
    ///
    /// # Errors
    ///
    /// Returns an error if the component did not stop cleanly.
    fn stop(&self) -> Result<(), BoxError>;
}

/// A value that can be managed by a [`Registry`].
///
/// Every accessor defaults to [`None`], so plain values only need an empty
/// `impl Component for MyType {}`. Components with lifecycle hooks return
/// `Some(self)` from the matching accessor:
///
/// ```rust
/// use dikit::prelude::*;
///
/// struct Pool;
///
/// impl Closable for Pool {
///     fn close(&self) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// impl Component for Pool {
///     fn as_closable(&self) -> Option<&dyn Closable> {
///         Some(self)
///     }
/// }
/// ```
///
/// Shared components are usually registered as `Arc<T>` or `Arc<dyn Trait>`;
/// both forward the accessors to the pointee.
///
/// [`Registry`]: crate::registry::Registry
pub trait Component: Send + Sync + 'static {
    fn as_closable(&self) -> Option<&dyn Closable> {
        None
    }

    fn as_startable(&self) -> Option<&dyn Startable> {
        None
    }

    fn as_stoppable(&self) -> Option<&dyn Stoppable> {
        None
    }
}

impl<T> Component for Arc<T>
where
    T: Component + ?Sized,
{
    fn as_closable(&self) -> Option<&dyn Closable> {
        (**self).as_closable()
    }

    fn as_startable(&self) -> Option<&dyn Startable> {
        (**self).as_startable()
    }

    fn as_stoppable(&self) -> Option<&dyn Stoppable> {
        (**self).as_stoppable()
    }
}

impl<T> Component for Box<T>
where
    T: Component + ?Sized,
{
    fn as_closable(&self) -> Option<&dyn Closable> {
        (**self).as_closable()
    }

    fn as_startable(&self) -> Option<&dyn Startable> {
        (**self).as_startable()
    }

    fn as_stoppable(&self) -> Option<&dyn Stoppable> {
        (**self).as_stoppable()
    }
}

macro_rules! impl_component_for_plain_values {
    ($($ty:ty),* $(,)?) => {
        $(impl Component for $ty {})*
    };
}

impl_component_for_plain_values!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    &'static str,
    String,
    Cow<'static, str>,
    PathBuf,
    Duration,
);

impl<T: Send + Sync + 'static> Component for Vec<T> {}

impl<T: Send + Sync + 'static> Component for VecDeque<T> {}

impl<T: Send + Sync + 'static> Component for Option<T> {}

impl<T: Send + Sync + 'static, S: Send + Sync + 'static> Component for HashSet<T, S> {}

impl<K, V, S> Component for HashMap<K, V, S>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: Send + Sync + 'static,
{
}

impl<K: Send + Sync + 'static, V: Send + Sync + 'static> Component for BTreeMap<K, V> {}
