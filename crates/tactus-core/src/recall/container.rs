//! Recall containers: the templates of one mapping plus the ports they share.

use super::RecallParams;
use crate::port::{PortSet, PortSnapshot};
use crate::{AudioId, ContainerId, RecallKey};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RecallContainer {
    id: ContainerId,
    name: String,
    audio: AudioId,
    params: RecallParams,
    templates: Vec<RecallKey>,
    ports: Arc<PortSet>,
}

impl RecallContainer {
    pub fn new(name: impl Into<String>, audio: AudioId, params: RecallParams, ports: Arc<PortSet>) -> Self {
        Self {
            id: ContainerId::next(),
            name: name.into(),
            audio,
            params,
            templates: Vec::new(),
            ports,
        }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// Recall type the container was mapped from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn audio(&self) -> AudioId {
        self.audio
    }

    pub fn params(&self) -> &RecallParams {
        &self.params
    }

    pub fn templates(&self) -> &[RecallKey] {
        &self.templates
    }

    pub fn ports(&self) -> &Arc<PortSet> {
        &self.ports
    }
}

/// All containers of an engine.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    containers: DashMap<ContainerId, RecallContainer>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, container: RecallContainer) -> ContainerId {
        let id = container.id;
        self.containers.insert(id, container);
        id
    }

    pub fn get(&self, id: ContainerId) -> Option<RecallContainer> {
        self.containers.get(&id).map(|c| c.clone())
    }

    pub fn ports(&self, id: ContainerId) -> Option<Arc<PortSet>> {
        self.containers.get(&id).map(|c| Arc::clone(&c.ports))
    }

    pub fn add_template(&self, id: ContainerId, template: RecallKey) -> bool {
        match self.containers.get_mut(&id) {
            Some(mut container) => {
                container.templates.push(template);
                true
            }
            None => false,
        }
    }

    /// Forget a template; a container left without templates is dropped.
    pub fn remove_template(&self, id: ContainerId, template: RecallKey) {
        let empty = match self.containers.get_mut(&id) {
            Some(mut container) => {
                container.templates.retain(|t| *t != template);
                container.templates.is_empty()
            }
            None => false,
        };
        if empty {
            self.containers.remove_if(&id, |_, c| c.templates.is_empty());
        }
    }

    pub fn of_audio(&self, audio: AudioId) -> Vec<ContainerId> {
        let mut ids: Vec<ContainerId> = self
            .containers
            .iter()
            .filter(|c| c.audio == audio)
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids
    }

    /// Port values of every container, for persisting between tics.
    pub fn snapshot(&self) -> Vec<(ContainerId, String, Vec<PortSnapshot>)> {
        let mut all: Vec<_> = self
            .containers
            .iter()
            .map(|c| (c.id, c.name.clone(), c.ports.snapshot()))
            .collect();
        all.sort_by_key(|(id, ..)| *id);
        all
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Port;
    use crate::params;

    #[test]
    fn test_templates_share_container_ports() {
        let registry = ContainerRegistry::new();
        let ports = Arc::new(PortSet::new(vec![Port::float("volume", 1.0)]));
        let id = registry.insert(RecallContainer::new(
            "volume",
            AudioId::next(),
            params! { "volume" => 1.0 },
            Arc::clone(&ports),
        ));

        let (a, b) = (RecallKey::next(), RecallKey::next());
        assert!(registry.add_template(id, a));
        assert!(registry.add_template(id, b));
        assert_eq!(registry.get(id).unwrap().templates(), &[a, b]);

        ports.get("volume").unwrap().set(0.5);
        assert_eq!(registry.ports(id).unwrap().get("volume").unwrap().get(), 0.5);

        registry.remove_template(id, a);
        assert!(registry.get(id).is_some());
        registry.remove_template(id, b);
        assert!(registry.get(id).is_none());
    }
}
