//! Dispatcher Registry
//!
//! Keeps one dispatcher per map name so the HTTP layer can route exchanges by
//! name. A dispatcher is created the first time its map is addressed and
//! reused afterwards, keeping each dispatcher bound to a single map for its lifetime.

use super::map::MapDispatcher;
use crate::config::DispatcherConfig;
use crate::exchange::propagation::{HeaderPropagator, StripControlHeaders};
use crate::storage::handle::MapProvider;

use dashmap::DashMap;
use std::sync::Arc;

pub struct DispatcherRegistry<P: MapProvider> {
    provider: Arc<P>,
    config: DispatcherConfig,
    propagator: Arc<dyn HeaderPropagator>,
    dispatchers: DashMap<String, Arc<MapDispatcher<P::Map>>>,
}

impl<P: MapProvider> DispatcherRegistry<P> {
    pub fn new(provider: Arc<P>, config: DispatcherConfig) -> Arc<Self> {
        Self::with_propagator(provider, config, Arc::new(StripControlHeaders))
    }

    pub fn with_propagator(
        provider: Arc<P>,
        config: DispatcherConfig,
        propagator: Arc<dyn HeaderPropagator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            config,
            propagator,
            dispatchers: DashMap::new(),
        })
    }

    /// Returns the dispatcher for `map_name`, creating it on first use.
    pub fn dispatcher_for(&self, map_name: &str) -> Arc<MapDispatcher<P::Map>> {
        if let Some(dispatcher) = self.dispatchers.get(map_name) {
            return dispatcher.clone();
        }

        self.dispatchers
            .entry(map_name.to_string())
            .or_insert_with(|| {
                let map = self.provider.get_map(map_name);
                Arc::new(MapDispatcher::with_propagator(
                    map,
                    &self.config,
                    self.propagator.clone(),
                ))
            })
            .clone()
    }

    /// Names of the maps with a dispatcher, sorted.
    pub fn list_maps(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .dispatchers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_dispatcher(&self, map_name: &str) -> bool {
        self.dispatchers.contains_key(map_name)
    }

    pub fn dispatcher_count(&self) -> usize {
        self.dispatchers.len()
    }
}
