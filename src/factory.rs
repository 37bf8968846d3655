//! Application factory descriptors and their resolution.
//!
//! A worker process cannot receive a live application object from the
//! supervisor. Instead the supervisor sends an [`AppFactory`], a plain
//! `{module, symbol}` pair, and the worker looks that pair up in its own
//! [`Registry`] to obtain a zero-argument [`Constructor`].
//!
//! Both processes run the same executable and build the same registry, so a
//! descriptor produced in the supervisor always names something the worker
//! can find. Names come from [`std::any::type_name`], which is stable within a
//! single build of a binary.
//!
//! ```ignore
//! let mut registry = Registry::new();
//! registry.register_type::<Server>()?;
//!
//! let factory = get_app_factory(&AppRef::of_type::<Server>())?;
//! let app = factory.invoke(&registry)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app::Application;
use crate::error::ResolutionError;

/// Serializable reference to an application constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppFactory {
    module: String,
    symbol: String,
}

impl AppFactory {
    /// Create a descriptor from explicit module and symbol names.
    pub fn new(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    /// Module path, e.g. `demo::server`.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Symbol within the module, e.g. `Server` or `create_app`.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Split a fully qualified Rust path into module and symbol.
    ///
    /// Generic arguments stay part of the symbol (`Server<u8>`). Closures and
    /// top-level names without a module are rejected.
    pub(crate) fn from_type_name(name: &str) -> Result<Self, ResolutionError> {
        if name.contains("{{") {
            return Err(ResolutionError::Anonymous {
                name: name.to_string(),
            });
        }

        let head = name.find('<').map_or(name, |generic| &name[..generic]);
        match head.rfind("::") {
            Some(split) if split > 0 => Ok(Self::new(&name[..split], &name[split + 2..])),
            _ => Err(ResolutionError::Anonymous {
                name: name.to_string(),
            }),
        }
    }

    /// Resolve this descriptor and invoke the constructor.
    pub fn invoke(&self, resolver: &impl Resolve) -> Result<Box<dyn Application>, ResolutionError> {
        Ok(resolver.resolve(self)?.construct())
    }
}

impl fmt::Display for AppFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.symbol)
    }
}

impl FromStr for AppFactory {
    type Err = ResolutionError;

    /// Parse `module::path:symbol`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ResolutionError::InvalidDescriptor {
            descriptor: s.to_string(),
        };

        let split = s.rfind(':').ok_or_else(invalid)?;
        let (module, symbol) = (&s[..split], &s[split + 1..]);
        if module.is_empty() || symbol.is_empty() || module.ends_with(':') {
            return Err(invalid());
        }

        Ok(Self::new(module, symbol))
    }
}

/// What the caller handed to [`crate::run`]: something that names an
/// application constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRef {
    /// A type constructed through `Default`.
    Type(&'static str),
    /// An existing instance; only its type is recorded.
    Instance(&'static str),
    /// A plain function returning an application.
    Function(&'static str),
    /// An async function. Recorded so it can be rejected with a clear error.
    AsyncFunction(&'static str),
}

impl AppRef {
    /// Reference an application type.
    pub fn of_type<T: Application + 'static>() -> Self {
        Self::Type(std::any::type_name::<T>())
    }

    /// Reference the type of an already constructed application.
    ///
    /// The instance itself never leaves this process; the worker builds a
    /// fresh one with `Default`.
    pub fn of_instance<T: Application + 'static>(_app: &T) -> Self {
        Self::Instance(std::any::type_name::<T>())
    }

    /// Reference a factory function.
    pub fn of_fn<F, A>(_factory: F) -> Self
    where
        F: Fn() -> A + 'static,
        A: Application + 'static,
    {
        Self::Function(std::any::type_name::<F>())
    }

    /// Reference an async factory function.
    pub fn of_async_fn<F, Fut>(_factory: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future + 'static,
    {
        Self::AsyncFunction(std::any::type_name::<F>())
    }

    /// The fully qualified name this reference was created from.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Type(name) | Self::Instance(name) | Self::Function(name) | Self::AsyncFunction(name) => name,
        }
    }
}

/// Turn an [`AppRef`] into a descriptor that can be sent to a worker.
pub fn get_app_factory(app: &AppRef) -> Result<AppFactory, ResolutionError> {
    match app {
        AppRef::AsyncFunction(name) => Err(ResolutionError::AsyncFactory {
            name: (*name).to_string(),
        }),
        AppRef::Type(name) | AppRef::Instance(name) | AppRef::Function(name) => {
            AppFactory::from_type_name(name)
        },
    }
}

type MakeFn = dyn Fn() -> Box<dyn Application> + Send + Sync;

/// Zero-argument application constructor produced by resolution.
#[derive(Clone)]
pub struct Constructor {
    factory: AppFactory,
    make: Arc<MakeFn>,
}

impl Constructor {
    /// Build a fresh application instance.
    pub fn construct(&self) -> Box<dyn Application> {
        (self.make)()
    }

    /// The descriptor this constructor was resolved from.
    pub fn factory(&self) -> &AppFactory {
        &self.factory
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

/// Capability to resolve descriptors into constructors.
pub trait Resolve {
    /// Look up the constructor named by `factory`.
    fn resolve(&self, factory: &AppFactory) -> Result<Constructor, ResolutionError>;
}

/// Table of constructors, keyed by module then symbol.
///
/// Resolution only reads the table, so resolving the same descriptor any
/// number of times, in any process built from the same registrations, yields
/// the same constructor.
#[derive(Clone, Default)]
pub struct Registry {
    modules: HashMap<String, HashMap<String, Arc<MakeFn>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application type constructed with `Default`.
    pub fn register_type<T>(&mut self) -> Result<AppFactory, ResolutionError>
    where
        T: Application + Default + 'static,
    {
        let factory = AppFactory::from_type_name(std::any::type_name::<T>())?;
        self.insert(
            factory.clone(),
            Arc::new(|| Box::new(T::default()) as Box<dyn Application>),
        );
        Ok(factory)
    }

    /// Register a factory function.
    pub fn register_fn<F, A>(&mut self, factory_fn: F) -> Result<AppFactory, ResolutionError>
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: Application + 'static,
    {
        let factory = AppFactory::from_type_name(std::any::type_name::<F>())?;
        self.insert(
            factory.clone(),
            Arc::new(move || Box::new(factory_fn()) as Box<dyn Application>),
        );
        Ok(factory)
    }

    /// Register a constructor under an explicit descriptor.
    pub fn register<F, A>(&mut self, factory: AppFactory, make: F)
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: Application + 'static,
    {
        self.insert(factory, Arc::new(move || Box::new(make()) as Box<dyn Application>));
    }

    /// Number of registered constructors.
    pub fn len(&self) -> usize {
        self.modules.values().map(HashMap::len).sum()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, factory: AppFactory, make: Arc<MakeFn>) {
        self.modules
            .entry(factory.module)
            .or_default()
            .insert(factory.symbol, make);
    }
}

impl Resolve for Registry {
    fn resolve(&self, factory: &AppFactory) -> Result<Constructor, ResolutionError> {
        let module = self
            .modules
            .get(factory.module())
            .ok_or_else(|| ResolutionError::module_not_found(factory.module()))?;

        let make = module
            .get(factory.symbol())
            .ok_or_else(|| ResolutionError::symbol_not_found(factory.module(), factory.symbol()))?;

        Ok(Constructor {
            factory: factory.clone(),
            make: Arc::clone(make),
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .modules
            .iter()
            .flat_map(|(module, symbols)| symbols.keys().map(move |symbol| format!("{module}:{symbol}")))
            .collect();
        names.sort();
        f.debug_struct("Registry").field("entries", &names).finish()
    }
}
