use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::{Integration, ServiceType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unsupported service type: '{0}'")]
    Unsupported(String),
}

/// Immutable service-type → capability table.
///
/// Built once before serving traffic and shared through `Arc`; lookups
/// never lock.
#[derive(Clone, Default)]
pub struct IntegrationRegistry {
    entries: HashMap<ServiceType, Arc<dyn Integration>>,
}

impl IntegrationRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Request-time lookup from user-supplied input.
    pub fn get(&self, tag: &str) -> Result<Arc<dyn Integration>, RegistryError> {
        let service_type: ServiceType = tag.parse()?;
        self.get_type(service_type)
    }

    pub fn get_type(&self, service_type: ServiceType) -> Result<Arc<dyn Integration>, RegistryError> {
        self.entries
            .get(&service_type)
            .cloned()
            .ok_or_else(|| RegistryError::Unsupported(service_type.to_string()))
    }

    /// Startup check: every listed service type must be registered.
    pub fn require(&self, service_types: &[ServiceType]) -> anyhow::Result<()> {
        for st in service_types {
            if !self.entries.contains_key(st) {
                anyhow::bail!("integration registry is missing required service type {}", st);
            }
        }
        Ok(())
    }

    pub fn service_types(&self) -> Vec<ServiceType> {
        let mut types: Vec<ServiceType> = self.entries.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<ServiceType, Arc<dyn Integration>>,
}

impl RegistryBuilder {
    pub fn register(mut self, integration: impl Integration + 'static) -> Self {
        let service_type = integration.service_type();
        if self.entries.insert(service_type, Arc::new(integration)).is_some() {
            tracing::warn!(service_type = %service_type, "integration registered twice, keeping the latest");
        } else {
            tracing::info!(service_type = %service_type, "registered integration");
        }
        self
    }

    pub fn build(self) -> IntegrationRegistry {
        IntegrationRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::SlackIntegration;

    fn registry() -> IntegrationRegistry {
        IntegrationRegistry::builder()
            .register(SlackIntegration::new(reqwest::Client::new(), "http://127.0.0.1:9"))
            .build()
    }

    #[test]
    fn lookup_of_registered_type() {
        let reg = registry();
        assert_eq!(reg.get("SLACK").unwrap().service_type(), ServiceType::Slack);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let reg = registry();
        assert_eq!(
            reg.get("TEAMS").err(),
            Some(RegistryError::Unsupported("TEAMS".into()))
        );
    }

    #[test]
    fn known_but_unregistered_type_is_unsupported() {
        let reg = registry();
        assert!(matches!(reg.get("NOTION"), Err(RegistryError::Unsupported(_))));
        assert!(reg.require(&[ServiceType::Notion]).is_err());
        assert!(reg.require(&[ServiceType::Slack]).is_ok());
    }
}
