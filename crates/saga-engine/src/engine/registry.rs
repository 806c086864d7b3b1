//! Plugin registry: a mapping from plugin type string to plugin instance.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Anything identifiable by a plugin type string. `WorkflowPlugin` and
/// `ActivityPlugin` both extend this so one registry implementation
/// serves both plugin kinds.
pub trait Plugin: Send + Sync {
    fn plugin_type(&self) -> &str;
}

/// `register` overwrites any existing entry with the same key
/// (last-writer-wins). Registration is expected to happen once at boot,
/// before the executor starts, but the map is still lock-guarded so the
/// registry can be shared behind an `Arc` across executor tasks.
pub struct PluginRegistry<P: ?Sized + Plugin> {
    plugins: RwLock<HashMap<String, Arc<P>>>,
}

impl<P: ?Sized + Plugin> Default for PluginRegistry<P> {
    fn default() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
        }
    }
}

impl<P: ?Sized + Plugin> PluginRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: Arc<P>) {
        let key = plugin.plugin_type().to_string();
        self.plugins.write().insert(key, plugin);
    }

    pub fn lookup(&self, plugin_type: &str) -> Option<Arc<P>> {
        self.plugins.read().get(plugin_type).cloned()
    }

    pub fn contains(&self, plugin_type: &str) -> bool {
        self.plugins.read().contains_key(plugin_type)
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    pub fn plugin_types(&self) -> Vec<String> {
        self.plugins.read().keys().cloned().collect()
    }
}

pub type WorkflowPluginRegistry = PluginRegistry<dyn crate::workflow::plugin::WorkflowPlugin>;
pub type ActivityPluginRegistry = PluginRegistry<dyn crate::activity::plugin::ActivityPlugin>;
