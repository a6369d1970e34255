//! The process-wide map from notebook to its [`SessionController`] — the only mutable
//! process-wide state this crate keeps, per the spec's concurrency model.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::SessionController;

/// Maps `notebook_key → SessionController`, created at `install` and torn down at `detach`.
/// Uses `parking_lot::Mutex`, which doesn't poison on panic — a panicking session leaves the
/// registry itself usable, unlike the `std::sync::Mutex` guarded by [`crate::error::acquire_lock`]
/// elsewhere in this crate.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionController>>>>,
}

impl SessionRegistry {
    /// Builds an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `controller` under `notebook_key`, replacing any prior session there.
    pub fn install(&self, notebook_key: String, controller: SessionController) -> Arc<Mutex<SessionController>> {
        let handle = Arc::new(Mutex::new(controller));
        self.sessions.lock().insert(notebook_key, handle.clone());
        handle
    }

    /// Looks up the session for `notebook_key`.
    pub fn get(&self, notebook_key: &str) -> Option<Arc<Mutex<SessionController>>> {
        self.sessions.lock().get(notebook_key).cloned()
    }

    /// Removes and returns the session for `notebook_key`, if any.
    pub fn detach(&self, notebook_key: &str) -> Option<Arc<Mutex<SessionController>>> {
        self.sessions.lock().remove(notebook_key)
    }

    /// Every currently installed notebook key.
    pub fn keys(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::path::PathLayout;

    #[test]
    fn install_then_detach_round_trips() {
        let registry = SessionRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let layout = PathLayout::new(dir.path(), "nb");
        let controller = SessionController::install(layout, "nb", Config::default()).unwrap();
        registry.install("nb".to_string(), controller);

        assert!(registry.get("nb").is_some());
        assert_eq!(registry.keys(), vec!["nb".to_string()]);

        assert!(registry.detach("nb").is_some());
        assert!(registry.get("nb").is_none());
    }
}
