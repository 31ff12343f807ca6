//! Named registry of running servers.
//!
//! Lets a process run several listeners and address them by name, with
//! one designated default for components that do not care which.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::info;

use crate::server::dispatcher::StopMode;
use crate::server::listener::ServerHandle;

#[derive(Default)]
pub struct ServerRegistry {
    servers: DashMap<String, Arc<ServerHandle>>,
    default_name: Mutex<Option<String>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server under a name. The first registration becomes the
    /// default.
    pub fn add(&self, name: impl Into<String>, server: Arc<ServerHandle>) {
        let name = name.into();
        let mut default = self.default_name.lock().unwrap();
        if default.is_none() {
            *default = Some(name.clone());
        }
        info!(server = %name, "server registered");
        self.servers.insert(name, server);
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServerHandle>> {
        self.servers.get(name).map(|entry| entry.value().clone())
    }

    pub fn default_server(&self) -> Option<Arc<ServerHandle>> {
        let name = self.default_name.lock().unwrap().clone()?;
        self.get(&name)
    }

    pub fn set_default(&self, name: &str) -> bool {
        if !self.servers.contains_key(name) {
            return false;
        }
        *self.default_name.lock().unwrap() = Some(name.to_string());
        true
    }

    /// Remove a server without stopping it. The default falls back to any
    /// remaining server.
    pub fn remove(&self, name: &str) -> Option<Arc<ServerHandle>> {
        let removed = self.servers.remove(name).map(|(_, v)| v);
        let mut default = self.default_name.lock().unwrap();
        if default.as_deref() == Some(name) {
            *default = self.servers.iter().next().map(|e| e.key().clone());
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        self.servers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stop_all(&self, mode: StopMode) {
        for entry in self.servers.iter() {
            entry.value().stop(mode);
        }
        self.servers.clear();
        *self.default_name.lock().unwrap() = None;
    }
}
