//! Contexts and the components they own.

use std::sync::Arc;

use dashmap::DashMap;

use crate::component::{Component, LifecycleState};

/// One controller session.
pub struct Context {
    id: String,
    components: DashMap<String, Arc<Component>>,
}

impl Context {
    fn new(id: String) -> Self {
        Self {
            id,
            components: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Look up a live component. A component that failed is dropped from
    /// the context here, so later commands see it as unknown.
    pub fn component(&self, component_id: &str) -> Option<Arc<Component>> {
        let component = self
            .components
            .get(component_id)
            .map(|c| Arc::clone(c.value()))?;
        if component.state() == LifecycleState::Failed {
            self.components
                .remove_if(component_id, |_, c| Arc::ptr_eq(c, &component));
            tracing::debug!(context_id = %self.id, %component_id, "Dropped failed component");
            return None;
        }
        Some(component)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Add a component, destroying any previous one with the same id.
    pub fn insert(&self, component: Arc<Component>) {
        self.components
            .retain(|_, c| c.state() != LifecycleState::Failed);
        let id = component.id().to_string();
        if let Some(previous) = self.components.insert(id.clone(), component) {
            tracing::warn!(context_id = %self.id, component_id = %id, "Replacing existing component");
            previous.request(LifecycleState::Destroyed);
        }
    }

    /// Remove a component and ask its worker to destroy it.
    pub fn destroy_component(&self, component_id: &str) -> bool {
        match self.components.remove(component_id) {
            Some((_, component)) => {
                component.request(LifecycleState::Destroyed);
                true
            }
            None => false,
        }
    }

    fn destroy_all(&self) -> usize {
        let ids: Vec<String> = self.components.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.destroy_component(id))
            .count()
    }
}

#[derive(Default)]
pub struct ContextRegistry {
    contexts: DashMap<String, Arc<Context>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn get(&self, context_id: &str) -> Option<Arc<Context>> {
        self.contexts.get(context_id).map(|c| Arc::clone(c.value()))
    }

    /// Create a context. An existing context with the same id is destroyed
    /// first.
    pub fn create(&self, context_id: &str) -> Arc<Context> {
        let context = Arc::new(Context::new(context_id.to_string()));
        if let Some(previous) = self
            .contexts
            .insert(context_id.to_string(), Arc::clone(&context))
        {
            tracing::warn!(%context_id, "Context already existed, replacing it");
            previous.destroy_all();
        }
        context
    }

    /// Destroy a context and every component it owns.
    pub fn destroy(&self, context_id: &str) -> Option<usize> {
        let (_, context) = self.contexts.remove(context_id)?;
        let destroyed = context.destroy_all();
        tracing::debug!(%context_id, destroyed, "Context destroyed");
        Some(destroyed)
    }

    /// Destroy everything. Used at shutdown.
    pub fn destroy_all(&self) -> usize {
        let ids: Vec<String> = self.contexts.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.destroy(id)).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::bridge::protocol::ComponentRequest;
    use crate::bridge::transport::Outbound;
    use crate::builtin::NativeLoader;
    use crate::component::ComponentSpec;
    use crate::config::BridgeConfig;
    use crate::services::HostServices;

    fn spec(component_id: &str) -> ComponentSpec {
        ComponentSpec::from_request(ComponentRequest {
            context_id: "c1".into(),
            component_id: component_id.into(),
            name: String::new(),
            class_name: "missing.Class".into(),
            base_url: String::new(),
            user: String::new(),
            password: String::new(),
            auth_realm: String::new(),
            code_base: String::new(),
            archives: String::new(),
            width: "0".into(),
            height: "0".into(),
            title: String::new(),
            params: Vec::new(),
        })
    }

    fn wait_for(component: &Component, state: LifecycleState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while component.state() != state {
            assert!(Instant::now() < deadline, "component never reached {state}");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn failed_component_is_dropped_on_lookup() {
        let (outbound, _rx) = Outbound::channel();
        let services = HostServices::new(
            outbound,
            Arc::new(NativeLoader::new()),
            BridgeConfig::default(),
        );
        let context = ContextRegistry::new().create("c1");

        let component = Component::spawn(spec("a1"), services).unwrap();
        context.insert(Arc::clone(&component));
        wait_for(&component, LifecycleState::Failed);

        assert!(context.component("a1").is_none());
        assert!(context.is_empty());
    }

    #[test]
    fn insert_sweeps_failed_components() {
        let (outbound, _rx) = Outbound::channel();
        let services = HostServices::new(
            outbound,
            Arc::new(NativeLoader::new()),
            BridgeConfig::default(),
        );
        let context = ContextRegistry::new().create("c1");

        let first = Component::spawn(spec("a1"), services.clone()).unwrap();
        wait_for(&first, LifecycleState::Failed);
        context.insert(first);
        let second = Component::spawn(spec("a2"), services).unwrap();
        wait_for(&second, LifecycleState::Failed);
        context.insert(second);

        assert_eq!(context.len(), 1);
    }
}
