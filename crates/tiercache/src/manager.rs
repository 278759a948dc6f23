//! Region registry.
//!
//! A [`CacheManager`] is an explicit object owned by the embedding
//! application. Regions are created on first use under a single mutex, so
//! two callers racing on the same name always get the same region.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tiercache_config::{CacheConfig, RegionConfig};
use tracing::{info, warn};

use crate::auxiliary::AuxiliaryRef;
use crate::error::Result;
use crate::event::{EventSink, TracingSink};
use crate::key::CacheKey;
use crate::region::{DisposeReport, Region};

/// Builds the auxiliary list for a newly created region.
pub trait AuxiliaryFactory<K, V>: Send + Sync
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    fn create(&self, region: &str, config: &RegionConfig) -> Vec<AuxiliaryRef<K, V>>;
}

impl<K, V, F> AuxiliaryFactory<K, V> for F
where
    K: CacheKey,
    V: Send + Sync + 'static,
    F: Fn(&str, &RegionConfig) -> Vec<AuxiliaryRef<K, V>> + Send + Sync,
{
    fn create(&self, region: &str, config: &RegionConfig) -> Vec<AuxiliaryRef<K, V>> {
        self(region, config)
    }
}

/// Registry of named regions sharing one configuration, sink and
/// auxiliary factory.
pub struct CacheManager<K: CacheKey, V: Send + Sync + 'static> {
    config: CacheConfig,
    sink: Arc<dyn EventSink>,
    factory: Option<Arc<dyn AuxiliaryFactory<K, V>>>,
    regions: Mutex<HashMap<String, Arc<Region<K, V>>>>,
}

impl<K, V> CacheManager<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            sink: Arc::new(TracingSink),
            factory: None,
            regions: Mutex::new(HashMap::new()),
        }
    }

    /// Event sink handed to every region created from now on.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_auxiliary_factory(mut self, factory: Arc<dyn AuxiliaryFactory<K, V>>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the named region, creating it from the manager's configuration.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<Region<K, V>>> {
        self.get_or_create_with(name, self.config.region(name))
    }

    /// Return the named region, creating it from `config` if it does not
    /// exist yet. An existing region keeps its original configuration.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_or_create_with(&self, name: &str, config: RegionConfig) -> Result<Arc<Region<K, V>>> {
        let mut regions = self.regions.lock();
        if let Some(region) = regions.get(name) {
            return Ok(region.clone());
        }

        let auxiliaries = self
            .factory
            .as_ref()
            .map(|factory| factory.create(name, &config))
            .unwrap_or_default();
        let start_sweeper = config.use_memory_shrinker;
        let region = Region::builder(name, config)
            .with_auxiliaries(auxiliaries)
            .with_sink(self.sink.clone())
            .build()?;
        if start_sweeper {
            region.start_sweeper();
        }

        regions.insert(name.to_string(), region.clone());
        Ok(region)
    }

    pub fn region(&self, name: &str) -> Option<Arc<Region<K, V>>> {
        self.regions.lock().get(name).cloned()
    }

    /// Names of live regions, sorted.
    pub fn region_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.regions.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Unregister and dispose a region. `None` if it was not registered.
    pub async fn dispose_region(&self, name: &str) -> Result<Option<DisposeReport>> {
        let region = self.regions.lock().remove(name);
        match region {
            Some(region) => region.dispose().await.map(Some),
            None => Ok(None),
        }
    }

    /// Dispose every region. Every region is attempted; the first error is
    /// returned.
    pub async fn shutdown(&self) -> Result<()> {
        let regions: Vec<_> = self.regions.lock().drain().collect();
        info!(regions = regions.len(), "Shutting down cache manager");

        let mut first_error = None;
        for (name, region) in regions {
            if let Err(e) = region.dispose().await {
                warn!(region = %name, error = %e, "Region dispose failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
