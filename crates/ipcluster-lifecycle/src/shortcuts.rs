//! Session-scoped interactive shortcuts.
//!
//! While a cluster is Ready the control surface offers parallel-execution
//! shortcuts bound to its engines. Registration hands back a
//! [`ShortcutScope`]; dropping the scope removes exactly the names it
//! added, so leaving Ready (stop or rollback) can never strand them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// Shortcuts offered while a session is Ready.
pub const SESSION_SHORTCUTS: [(&str, &str); 4] = [
    ("px", "run a statement on every engine"),
    ("autopx", "toggle running every statement on every engine"),
    ("pxconfig", "configure default targets and blocking mode"),
    ("pxresult", "show the output of the last parallel call"),
];

/// Registry of currently available shortcuts: name → description.
#[derive(Debug, Clone, Default)]
pub struct ShortcutRegistry {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ShortcutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `shortcuts` for as long as the returned scope lives.
    ///
    /// Names already present are left alone and not owned by the scope.
    pub fn register_scope(&self, shortcuts: &[(&str, &str)]) -> ShortcutScope {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut owned = Vec::with_capacity(shortcuts.len());
        for (name, description) in shortcuts {
            if !entries.contains_key(*name) {
                entries.insert(name.to_string(), description.to_string());
                owned.push(name.to_string());
            }
        }
        debug!(shortcuts = ?owned, "shortcuts registered");
        ShortcutScope {
            registry: self.clone(),
            names: owned,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn describe(&self, name: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// Owns a set of registered shortcuts; removes them on drop.
#[derive(Debug)]
pub struct ShortcutScope {
    registry: ShortcutRegistry,
    names: Vec<String>,
}

impl ShortcutScope {
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Drop for ShortcutScope {
    fn drop(&mut self) {
        let mut entries = self
            .registry
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for name in &self.names {
            entries.remove(name);
        }
        debug!(shortcuts = ?self.names, "shortcuts released");
    }
}
