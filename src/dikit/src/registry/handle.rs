use std::any;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use tracing::debug;

use crate::component::{BoxError, Component};
use crate::factory::Factory;
use crate::module::Module;
use crate::registry::core::RegistryCore;
use crate::registry::error::{self, RegistryError};
use crate::util::any::DowncastRef;

/// A registry of named, lazily built components.
///
/// A [`Registry`] is a cheap handle: clones share the same components, so it
/// can be handed to other threads as is. Builders receive the registry they
/// are registered in and resolve their own dependencies through it.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use dikit::prelude::*;
///
/// struct Service {
///     dsn: String,
/// }
///
/// impl Component for Service {}
///
/// let registry = Registry::new();
/// registry.add_value("dsn", String::from("postgres://localhost/app"))?;
/// registry.add("service", |registry| {
///     Ok(Arc::new(Service {
///         dsn: registry.get("dsn")?,
///     }))
/// })?;
///
/// let service: Arc<Service> = registry.get("service")?;
/// assert_eq!(service.dsn, "postgres://localhost/app");
/// registry.close()?;
/// # Ok::<(), RegistryError>(())
/// ```
#[derive(Clone)]
pub struct Registry {
    core: Arc<RegistryCore>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            core: Arc::new(RegistryCore::new()),
        }
    }

    /// Creates a registry populated by `module`.
    ///
    /// # Errors
    ///
    /// Returns the first error reported while configuring the module.
    pub fn init<M>(module: M) -> Result<Self, RegistryError>
    where
        M: Module,
    {
        let registry = Self::new();
        module.configure(&registry)?;
        debug!(components = registry.len(), "registry initialized");
        Ok(registry)
    }

    pub(crate) fn core(&self) -> &RegistryCore {
        &self.core
    }

    /// Registers a component built by `builder` on its first request.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if `name` is taken.
    pub fn add<T, F>(&self, name: impl Into<String>, builder: F) -> Result<(), RegistryError>
    where
        T: Component + Clone,
        F: Fn(&Registry) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let factory = Factory::with_builder(name, Box::new(builder));
        self.core.insert(Arc::new(factory))
    }

    /// Registers an already constructed component.
    ///
    /// The value takes its place in the close order right away.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if `name` is taken.
    pub fn add_value<T>(&self, name: impl Into<String>, value: T) -> Result<(), RegistryError>
    where
        T: Component + Clone,
    {
        self.core.insert(Arc::new(Factory::with_value(name, value)))
    }

    /// Returns the component registered as `name`, building it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown name,
    /// [`RegistryError::TypeMismatch`] if the component is not a `T`, or the
    /// build error if the component could not be constructed.
    pub fn get<T>(&self, name: &str) -> Result<T, RegistryError>
    where
        T: Component + Clone,
    {
        self.with_factory(name, |factory: &Factory<T>| factory.get_instance(self))
    }

    fn with_factory<T, R, F>(&self, name: &str, f: F) -> Result<R, RegistryError>
    where
        T: Component + Clone,
        F: FnOnce(&Factory<T>) -> Result<R, RegistryError>,
    {
        let erased = self.core.factory(name)?;
        let Some(factory) = erased.downcast_ref::<Factory<T>>() else {
            return Err(RegistryError::TypeMismatch {
                name: name.to_owned(),
                expected: any::type_name::<T>(),
                found: erased.value_type(),
            });
        };
        f(factory)
    }

    /// Resolves every component whose name satisfies `predicate`.
    ///
    /// The order of the returned components is unspecified.
    ///
    /// # Errors
    ///
    /// Returns the first error met while resolving a matching component.
    pub fn find<T, P>(&self, predicate: P) -> Result<Vec<T>, RegistryError>
    where
        T: Component + Clone,
        P: Fn(&str) -> bool,
    {
        self.core
            .names_matching(predicate)
            .iter()
            .map(|name| self.get(name))
            .collect()
    }

    /// Starts the component registered as `name` and records it for
    /// stopping. A component which is already started is left alone, and
    /// concurrent starts of one component run its hook once.
    ///
    /// Dependencies are not started; start components in the order they
    /// depend on each other.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotStartable`] if the component has no start
    /// hook, [`RegistryError::Start`] if the hook fails, or any error of
    /// [`Registry::get`].
    pub fn start<T>(&self, name: &str) -> Result<(), RegistryError>
    where
        T: Component + Clone,
    {
        self.with_factory(name, |factory: &Factory<T>| {
            let instance = factory.get_instance(self)?;
            let Some(startable) = instance.as_startable() else {
                return Err(RegistryError::NotStartable {
                    name: name.to_owned(),
                });
            };

            let started = factory
                .start_once(|| {
                    debug!(name = %name, "starting component");
                    startable.start()?;
                    self.core.record_started(name);
                    Ok(())
                })
                .map_err(|source| RegistryError::Start {
                    name: name.to_owned(),
                    source,
                })?;
            if !started {
                debug!(name = %name, "component already started");
            }
            Ok(())
        })
    }

    /// Stops every started component in reverse start order.
    ///
    /// Every component is attempted even if some of them fail.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError::Teardown`] listing each failure.
    pub fn stop(&self) -> Result<(), RegistryError> {
        self.core.stop_all()
    }

    /// Closes every built component in reverse construction order.
    ///
    /// Every component is attempted even if some of them fail.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError::Teardown`] listing each failure.
    pub fn close(&self) -> Result<(), RegistryError> {
        self.core.close_all()
    }

    /// Stops, then closes, every component.
    ///
    /// # Errors
    ///
    /// Returns a single [`RegistryError::Teardown`] holding the failures of
    /// both passes.
    pub fn shutdown(&self) -> Result<(), RegistryError> {
        let errors = [self.stop(), self.close()]
            .into_iter()
            .filter_map(Result::err)
            .flat_map(|err| match err {
                RegistryError::Teardown { errors, .. } => errors,
                other => vec![other],
            })
            .collect();

        error::aggregate("shutdown", errors)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.core.lookup(name).is_some()
    }

    /// Returns the names of all registered components, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names = self.core.names_matching(|_| true);
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the component registered as `name` has been constructed.
    pub fn is_built(&self, name: &str) -> bool {
        self.core
            .lookup(name)
            .is_some_and(|factory| factory.is_built())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Registry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Registry")
            .field("components", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use mockall::Sequence;
    use parking_lot::Mutex;

    use crate::component::{
        Closable, MockClosable, MockStartable, MockStoppable, Startable, Stoppable,
    };

    use super::*;

    struct Db {
        url: String,
        close: MockClosable,
    }

    impl Component for Db {
        fn as_closable(&self) -> Option<&dyn Closable> {
            Some(&self.close)
        }
    }

    struct Svc {
        db: Arc<Db>,
        close: MockClosable,
    }

    impl Component for Svc {
        fn as_closable(&self) -> Option<&dyn Closable> {
            Some(&self.close)
        }
    }

    struct Worker {
        start: MockStartable,
        stop: MockStoppable,
    }

    impl Component for Worker {
        fn as_startable(&self) -> Option<&dyn Startable> {
            Some(&self.start)
        }

        fn as_stoppable(&self) -> Option<&dyn Stoppable> {
            Some(&self.stop)
        }
    }

    fn worker(start: MockStartable, stop: MockStoppable) -> Arc<Worker> {
        Arc::new(Worker { start, stop })
    }

    fn started_ok() -> MockStartable {
        let mut start = MockStartable::new();
        start.expect_start().times(1).returning(|| Ok(()));
        start
    }

    #[test]
    fn registry_closes_dependents_before_dependencies() {
        let mut seq = Sequence::new();
        let mut db_close = MockClosable::new();
        let mut svc_close = MockClosable::new();
        svc_close
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        db_close
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let registry = Registry::new();
        registry
            .add_value(
                "db",
                Arc::new(Db {
                    url: String::from("sqlite::memory:"),
                    close: db_close,
                }),
            )
            .unwrap();

        let svc_close = Mutex::new(Some(svc_close));
        registry
            .add("svc", move |registry| {
                let close = svc_close.lock().take().ok_or("svc built twice")?;
                Ok(Arc::new(Svc {
                    db: registry.get("db")?,
                    close,
                }))
            })
            .unwrap();

        let svc: Arc<Svc> = registry.get("svc").unwrap();
        assert_eq!(svc.db.url, "sqlite::memory:");
        assert_eq!(
            registry.core().close_order(),
            vec![String::from("db"), String::from("svc")]
        );

        registry.close().unwrap();
    }

    #[test]
    fn dependency_built_inside_a_builder_is_closed_last() {
        let registry = Registry::new();
        registry.add("config", |_| Ok(String::from("debug"))).unwrap();
        registry
            .add("logger", |registry| {
                let level: String = registry.get("config")?;
                Ok(Arc::new(level))
            })
            .unwrap();

        let _: Arc<String> = registry.get("logger").unwrap();
        assert_eq!(
            registry.core().close_order(),
            vec![String::from("config"), String::from("logger")]
        );
    }

    #[test]
    fn registry_get_fails_when_name_not_found() {
        let registry = Registry::new();
        assert!(matches!(
            registry.get::<i32>("missing"),
            Err(RegistryError::NotFound { ref name }) if name == "missing"
        ));
    }

    #[test]
    fn registry_get_fails_on_type_mismatch_without_building() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Registry::new();
        registry
            .add("port", {
                let calls = Arc::clone(&calls);
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(8080u16)
                }
            })
            .unwrap();

        let err = registry.get::<String>("port").unwrap_err();
        match err {
            RegistryError::TypeMismatch {
                name,
                expected,
                found,
            } => {
                assert_eq!(name, "port");
                assert_eq!(expected, any::type_name::<String>());
                assert_eq!(found, "u16");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.is_built("port"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(registry.get::<u16>("port").unwrap(), 8080);
        assert!(registry.is_built("port"));
    }

    #[test]
    fn registry_add_fails_when_name_is_duplicated() {
        let registry = Registry::new();
        registry.add("x", |_| Ok(1i32)).unwrap();

        assert!(matches!(
            registry.add_value("x", 2i32),
            Err(RegistryError::DuplicateName { .. })
        ));
        assert!(matches!(
            registry.add("x", |_| Ok(3i32)),
            Err(RegistryError::DuplicateName { .. })
        ));
        assert_eq!(registry.get::<i32>("x").unwrap(), 1);
    }

    #[test]
    fn registry_start_fails_when_component_is_not_startable() {
        let registry = Registry::new();
        registry.add_value("worker", 1u32).unwrap();

        assert!(matches!(
            registry.start::<u32>("worker"),
            Err(RegistryError::NotStartable { .. })
        ));
        assert!(registry.core().stop_order().is_empty());
    }

    #[test]
    fn registry_start_failure_is_not_recorded() {
        let mut start = MockStartable::new();
        start
            .expect_start()
            .times(1)
            .returning(|| Err("port in use".into()));
        let mut stop = MockStoppable::new();
        stop.expect_stop().never();

        let registry = Registry::new();
        registry.add_value("http", worker(start, stop)).unwrap();

        let err = registry.start::<Arc<Worker>>("http").unwrap_err();
        assert!(matches!(err, RegistryError::Start { .. }));
        assert!(err.to_string().contains("port in use"));
        assert!(registry.core().stop_order().is_empty());
        assert!(registry.stop().is_ok());
    }

    #[test]
    fn registry_start_runs_the_hook_once() {
        let mut stop = MockStoppable::new();
        stop.expect_stop().times(1).returning(|| Ok(()));

        let registry = Registry::new();
        registry
            .add_value("worker", worker(started_ok(), stop))
            .unwrap();

        registry.start::<Arc<Worker>>("worker").unwrap();
        registry.start::<Arc<Worker>>("worker").unwrap();
        assert_eq!(registry.core().stop_order(), vec![String::from("worker")]);

        registry.stop().unwrap();
    }

    #[test]
    fn registry_stop_runs_in_reverse_start_order_and_reports_failures() {
        let mut seq = Sequence::new();
        let mut stops = [
            MockStoppable::new(),
            MockStoppable::new(),
            MockStoppable::new(),
        ];
        stops[2]
            .expect_stop()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        stops[1]
            .expect_stop()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err("flush failed".into()));
        stops[0]
            .expect_stop()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let registry = Registry::new();
        for (name, stop) in ["a", "b", "c"].into_iter().zip(stops) {
            registry
                .add_value(name, worker(started_ok(), stop))
                .unwrap();
        }
        for name in ["a", "b", "c"] {
            registry.start::<Arc<Worker>>(name).unwrap();
        }

        let err = registry.stop().unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].name(), Some("b"));
        assert!(err.to_string().contains("flush failed"));
    }

    #[test]
    fn registry_shutdown_merges_stop_and_close_failures() {
        let mut stop = MockStoppable::new();
        stop.expect_stop()
            .times(1)
            .returning(|| Err("stuck".into()));
        let mut close = MockClosable::new();
        close
            .expect_close()
            .times(1)
            .returning(|| Err("leaked".into()));

        let registry = Registry::new();
        registry
            .add_value("worker", worker(started_ok(), stop))
            .unwrap();
        registry
            .add_value(
                "db",
                Arc::new(Db {
                    url: String::new(),
                    close,
                }),
            )
            .unwrap();
        registry.start::<Arc<Worker>>("worker").unwrap();

        let err = registry.shutdown().unwrap_err();
        let names = err
            .failures()
            .iter()
            .map(|failure| failure.name().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["worker", "db"]);
        assert!(registry.shutdown().is_ok());
    }

    #[test]
    fn registry_find_resolves_matching_names_only() {
        let registry = Registry::new();
        registry
            .add_value("route.users", String::from("/users"))
            .unwrap();
        registry
            .add("route.orders", |_| Ok(String::from("/orders")))
            .unwrap();
        registry.add_value("banner", String::from("hi")).unwrap();

        let mut routes: Vec<String> = registry.find(|name| name.starts_with("route.")).unwrap();
        routes.sort();
        assert_eq!(routes, vec!["/orders", "/users"]);
        assert!(registry.is_built("route.orders"));
    }

    #[test]
    fn registry_find_propagates_resolution_errors() {
        let registry = Registry::new();
        registry
            .add_value("route.users", String::from("/users"))
            .unwrap();
        registry.add_value("route.count", 3usize).unwrap();

        assert!(matches!(
            registry.find::<String, _>(|name| name.starts_with("route.")),
            Err(RegistryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn registry_builds_once_under_concurrent_access() {
        const THREADS: usize = 32;

        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Registry::new();
        registry
            .add("shared", {
                let calls = Arc::clone(&calls);
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::yield_now();
                    Ok(Arc::new(String::from("pool")))
                }
            })
            .unwrap();

        let handles = (0..THREADS)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get::<Arc<String>>("shared").unwrap())
            })
            .collect::<Vec<_>>();
        let objects = handles
            .into_iter()
            .map(|h| h.join().expect("Each thread should not `panic!()`"))
            .collect::<Vec<_>>();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(objects.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.core().close_order(), vec![String::from("shared")]);
    }

    #[test]
    fn registry_reports_its_contents() {
        let registry = Registry::default();
        assert!(registry.is_empty());

        registry.add_value("b", 2i32).unwrap();
        registry.add("a", |_| Ok(1i32)).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.is_built("b"));
        assert!(!registry.is_built("a"));
        assert!(!registry.is_built("c"));
    }
}
