use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::middleware::AppError;
use crate::models::ResourceDescriptor;
use crate::validation::DescriptorValidator;

/// What `register` does when the name is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPolicy {
    /// Refuse to overwrite
    Create,
    /// Last writer wins; the overwrite is logged
    Replace,
}

/// Logical table name -> descriptor
pub struct ResourceRegistry {
    resources: RwLock<HashMap<String, Arc<ResourceDescriptor>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Register a descriptor, returning the one it replaced
    pub async fn register(
        &self,
        descriptor: ResourceDescriptor,
        policy: RegistrationPolicy,
    ) -> Result<Option<Arc<ResourceDescriptor>>, AppError> {
        DescriptorValidator::validate(&descriptor)?;

        let mut resources = self.resources.write().await;
        let name = descriptor.name.clone();

        if resources.contains_key(&name) && policy == RegistrationPolicy::Create {
            return Err(AppError::Validation(format!(
                "Resource '{}' is already registered; register with replace to overwrite it",
                name
            )));
        }

        let previous = resources.insert(name.clone(), Arc::new(descriptor));
        match &previous {
            Some(old) => tracing::warn!(
                "Replaced descriptor of resource '{}' (was bound to integration '{}')",
                name,
                old.integration
            ),
            None => tracing::info!("Registered resource '{}'", name),
        }

        Ok(previous)
    }

    pub async fn get(&self, name: &str) -> Result<Arc<ResourceDescriptor>, AppError> {
        self.resources
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Resource '{}' not found", name)))
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<ResourceDescriptor>> {
        let removed = self.resources.write().await.remove(name);
        if removed.is_some() {
            tracing::info!("Removed resource '{}'", name);
        }
        removed
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn list(&self) -> Vec<Arc<ResourceDescriptor>> {
        let mut descriptors: Vec<_> = self.resources.read().await.values().cloned().collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnMapping, ColumnType, Endpoint, HttpMethod, Operations};

    fn descriptor(name: &str, integration: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(
            name,
            integration,
            Operations::list_only(Endpoint::new(HttpMethod::Get, "/items")),
            vec![ColumnMapping::new("id", ColumnType::Integer)],
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ResourceRegistry::new();
        let previous = registry
            .register(descriptor("items", "shop"), RegistrationPolicy::Create)
            .await
            .unwrap();
        assert!(previous.is_none());
        assert_eq!(registry.get("items").await.unwrap().integration, "shop");
        assert_eq!(registry.names().await, vec!["items"]);
    }

    #[tokio::test]
    async fn test_lookup_is_exact() {
        let registry = ResourceRegistry::new();
        registry
            .register(descriptor("items", "shop"), RegistrationPolicy::Create)
            .await
            .unwrap();
        assert!(matches!(registry.get("Items").await, Err(AppError::NotFound(_))));
        assert!(matches!(registry.get("item").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_overwrite_requires_replace() {
        let registry = ResourceRegistry::new();
        registry
            .register(descriptor("items", "shop"), RegistrationPolicy::Create)
            .await
            .unwrap();

        let refused = registry
            .register(descriptor("items", "warehouse"), RegistrationPolicy::Create)
            .await;
        assert!(matches!(refused, Err(AppError::Validation(_))));
        assert_eq!(registry.get("items").await.unwrap().integration, "shop");

        let previous = registry
            .register(descriptor("items", "warehouse"), RegistrationPolicy::Replace)
            .await
            .unwrap();
        assert_eq!(previous.unwrap().integration, "shop");
        assert_eq!(registry.get("items").await.unwrap().integration, "warehouse");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_descriptor_rejected() {
        let registry = ResourceRegistry::new();
        let mut bad = descriptor("items", "shop");
        bad.columns.clear();
        assert!(registry.register(bad, RegistrationPolicy::Create).await.is_err());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = ResourceRegistry::new();
        registry
            .register(descriptor("items", "shop"), RegistrationPolicy::Create)
            .await
            .unwrap();
        assert!(registry.remove("items").await.is_some());
        assert!(registry.remove("items").await.is_none());
    }
}
