use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dikit::prelude::*;

fn main() -> Result<(), RegistryError> {
    let registry = Registry::init(AppModule::new("greeter"))?;

    registry.start::<Arc<App>>("app")?;
    registry.get::<Arc<App>>("app")?.run();

    registry.shutdown()
}

struct AppModule {
    app_name: &'static str,
}

impl AppModule {
    fn new(app_name: &'static str) -> Self {
        Self { app_name }
    }
}

impl Module for AppModule {
    fn configure(&self, registry: &Registry) -> Result<(), RegistryError> {
        registry.add_value("app_name", self.app_name)?;

        registry.add("logger", |registry| {
            let logger: Arc<dyn Logger> = Arc::new(ConsoleLogger {
                app_name: registry.get("app_name")?,
            });
            Ok(logger)
        })?;

        registry.add("greeter.english", |registry| {
            let greeter: Arc<dyn Greeter> = Arc::new(EnglishGreeter {
                logger: registry.get("logger")?,
            });
            Ok(greeter)
        })?;

        registry.add("greeter.chinese", |registry| {
            let greeter: Arc<dyn Greeter> = Arc::new(ChineseGreeter {
                logger: registry.get("logger")?,
            });
            Ok(greeter)
        })?;

        registry.add("app", |registry| {
            Ok(Arc::new(App {
                logger: registry.get("logger")?,
                greeters: registry.find(|name| name.starts_with("greeter."))?,
                running: AtomicBool::new(false),
            }))
        })
    }
}

trait Logger: Component {
    fn log(&self, message: &str);
}

struct ConsoleLogger {
    app_name: &'static str,
}

impl Logger for ConsoleLogger {
    fn log(&self, message: &str) {
        eprintln!("[{}] {}", self.app_name, message);
    }
}

impl Closable for ConsoleLogger {
    fn close(&self) -> Result<(), BoxError> {
        self.log("logger closed");
        Ok(())
    }
}

impl Component for ConsoleLogger {
    fn as_closable(&self) -> Option<&dyn Closable> {
        Some(self)
    }
}

trait Greeter: Component {
    fn greet(&self);
}

struct EnglishGreeter {
    logger: Arc<dyn Logger>,
}

impl Greeter for EnglishGreeter {
    fn greet(&self) {
        self.logger.log("Hello World!");
    }
}

impl Component for EnglishGreeter {}

struct ChineseGreeter {
    logger: Arc<dyn Logger>,
}

impl Greeter for ChineseGreeter {
    fn greet(&self) {
        self.logger.log("你好世界!");
    }
}

impl Component for ChineseGreeter {}

struct App {
    logger: Arc<dyn Logger>,
    greeters: Vec<Arc<dyn Greeter>>,
    running: AtomicBool,
}

impl App {
    fn run(&self) {
        if !self.running.load(Ordering::SeqCst) {
            self.logger.log("not started");
            return;
        }
        self.logger.log("Greeting from registry managed components:");
        for greeter in &self.greeters {
            greeter.greet();
        }
    }
}

impl Startable for App {
    fn start(&self) -> Result<(), BoxError> {
        self.running.store(true, Ordering::SeqCst);
        self.logger.log("app started");
        Ok(())
    }
}

impl Stoppable for App {
    fn stop(&self) -> Result<(), BoxError> {
        self.running.store(false, Ordering::SeqCst);
        self.logger.log("app stopped");
        Ok(())
    }
}

impl Component for App {
    fn as_startable(&self) -> Option<&dyn Startable> {
        Some(self)
    }

    fn as_stoppable(&self) -> Option<&dyn Stoppable> {
        Some(self)
    }
}
