use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use stratocore::Action;
use tracing::info;

/// Registry of available actions, keyed by action name.
///
/// Populated at process start, before the engine begins polling, and
/// read-mostly afterwards. Constructor-injected into the engine rather than
/// living as hidden process-wide state.
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<dyn Action>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
        }
    }

    /// Register an action, overwriting any previous entry under the same name
    pub fn register(&self, action: Arc<dyn Action>) {
        let name = action.name().to_string();
        info!("registering action: {}", name);
        self.actions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, action);
    }

    /// Look up the implementation registered under `name`
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Names of all registered actions
    pub fn action_names(&self) -> Vec<String> {
        self.actions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stratocore::{ActionContext, ActionError};

    struct Named(&'static str);

    #[async_trait]
    impl Action for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
            Ok(())
        }
    }

    #[test]
    fn resolve_returns_registered_action() {
        let registry = ActionRegistry::new();
        registry.register(Arc::new(Named("compute.create")));

        assert!(registry.resolve("compute.create").is_some());
        assert!(registry.resolve("compute.delete").is_none());
    }

    #[test]
    fn register_overwrites_same_name() {
        let registry = ActionRegistry::new();
        registry.register(Arc::new(Named("net.attach")));
        registry.register(Arc::new(Named("net.attach")));

        assert_eq!(registry.action_names(), vec!["net.attach".to_string()]);
    }
}
