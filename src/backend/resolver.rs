use std::collections::BTreeMap;
use std::fmt;
use std::io;

use log::{debug, info, warn};

use super::capability::{validate, Exports, FeatureGroup, Features};
use super::Backend;
use crate::config::{AdapterConfig, AdapterSpec, Config};
use crate::error::CbmError;
use crate::xum1541::Xum1541Backend;

/// Creates a fresh, unopened backend instance.
pub type Factory = Box<dyn Fn(&AdapterConfig) -> Box<dyn Backend> + Send + Sync>;

/// The backends known to this process, by name.
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Registry {
    /// A registry containing the built-in backends.
    pub fn new() -> Registry {
        let mut registry = Registry::empty();
        registry.register(crate::xum1541::NAME, |settings| {
            Box::new(Xum1541Backend::new(settings))
        });
        registry
    }

    pub fn empty() -> Registry {
        Registry {
            factories: BTreeMap::new(),
        }
    }

    /// Add or replace a backend.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&AdapterConfig) -> Box<dyn Backend> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    fn create(&self, name: &str, settings: &AdapterConfig) -> Option<Box<dyn Backend>> {
        self.factories.get(name).map(|factory| factory(settings))
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Selects, validates, and opens one backend per request.
#[derive(Debug)]
pub struct Resolver {
    registry: Registry,
    config: Config,
}

impl Resolver {
    pub fn new(registry: Registry, config: Config) -> Resolver {
        Resolver { registry, config }
    }

    /// Built-in backends, configured from the environment.
    pub fn from_env() -> io::Result<Resolver> {
        Ok(Resolver::new(Registry::new(), Config::from_env()?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Create and validate a backend without opening it.
    fn instantiate(&self, spec: &AdapterSpec) -> io::Result<(AdapterSpec, Box<dyn Backend>, Features)> {
        let spec = self.config.complete(spec)?;
        let name = spec.name.as_deref().unwrap_or_default();
        let settings = self.config.adapter(name);
        if !settings.active {
            warn!("adapter {} is disabled", name);
            return Err(CbmError::BackendDisabled.into());
        }
        let mut backend = match self.registry.create(name, &settings) {
            Some(backend) => backend,
            None => {
                warn!("no backend named {:?}", name);
                return Err(CbmError::UnknownBackend.into());
            }
        };
        let features = validate(backend.exports())?;
        check_accessors(backend.as_mut(), features)?;
        Ok((spec, backend, features))
    }

    /// Name the device that `resolve` would open for `spec`.
    pub fn driver_name(&self, spec: &AdapterSpec) -> io::Result<String> {
        let (spec, mut backend, _) = self.instantiate(spec)?;
        backend.driver_name(spec.port.as_deref())
    }

    /// Produce an initialized, opened backend for `spec`.  Nothing is kept
    /// when any step fails.
    pub fn resolve(&self, spec: &AdapterSpec) -> io::Result<Resolved> {
        let (spec, mut backend, features) = self.instantiate(spec)?;
        let exports = backend.exports();

        if exports.contains(Exports::INIT) {
            if let Err(e) = backend.init() {
                warn!("initializing {} failed: {}", spec, e);
                uninit(backend.as_mut(), exports);
                return Err(CbmError::BackendInitFailed.into());
            }
        }
        if let Err(e) = backend.driver_open(spec.port.as_deref()) {
            uninit(backend.as_mut(), exports);
            return Err(e);
        }

        info!("opened adapter {} ({})", spec, features);
        Ok(Resolved {
            backend,
            exports,
            features,
            spec,
        })
    }
}

/// Call the uninit hook, if the backend has one.
fn uninit(backend: &mut dyn Backend, exports: Exports) {
    if exports.contains(Exports::UNINIT) {
        backend.uninit();
    }
}

/// Every group named in the export set must also be reachable.
fn check_accessors(backend: &mut dyn Backend, features: Features) -> Result<(), CbmError> {
    for group in features.groups() {
        let reachable = match group {
            FeatureGroup::ParallelBurst => backend.parallel_burst().is_some(),
            FeatureGroup::ParallelPort => backend.parallel_port().is_some(),
            FeatureGroup::SrqBurst => backend.srq_burst().is_some(),
            FeatureGroup::Tape => backend.tape().is_some(),
        };
        if !reachable {
            warn!("backend exports the {} group but does not implement it", group);
            return Err(CbmError::BackendInconsistent);
        }
    }
    Ok(())
}

/// An opened backend together with its validated feature set.  Dropping it
/// closes the driver.
pub struct Resolved {
    backend: Box<dyn Backend>,
    exports: Exports,
    features: Features,
    spec: AdapterSpec,
}

impl Resolved {
    pub fn features(&self) -> Features {
        self.features
    }

    pub fn spec(&self) -> &AdapterSpec {
        &self.spec
    }

    pub fn backend(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }
}

impl Drop for Resolved {
    fn drop(&mut self) {
        debug!("closing adapter {}", self.spec);
        self.backend.driver_close();
        uninit(self.backend.as_mut(), self.exports);
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("spec", &self.spec)
            .field("features", &self.features)
            .finish()
    }
}
