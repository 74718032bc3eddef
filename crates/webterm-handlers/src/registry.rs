use crate::handler::BackendHandler;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;

/// Backends by route name
///
/// Filled once at startup; lookups during sessions take no locks.
pub struct BackendRegistry {
    handlers: DashMap<String, Arc<dyn BackendHandler>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler under its own name.
    pub fn register<H: BackendHandler + 'static>(&self, handler: H) {
        let name = handler.name().to_string();
        debug!("Registering backend handler: {}", name);
        if self.handlers.insert(name.clone(), Arc::new(handler)).is_some() {
            warn!("Backend handler {} replaced an earlier registration", name);
        }
    }

    /// Register a shared handler under a route name of the caller's choosing.
    pub fn register_as(&self, route: &str, handler: Arc<dyn BackendHandler>) {
        debug!("Registering backend handler {} as {}", handler.name(), route);
        if self.handlers.insert(route.to_string(), handler).is_some() {
            warn!("Route {} replaced an earlier registration", route);
        }
    }

    pub fn get(&self, route: &str) -> Option<Arc<dyn BackendHandler>> {
        self.handlers
            .get(route)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn list(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
