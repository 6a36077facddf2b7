use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::middleware::AppError;
use crate::config::RemoteConfig;
use crate::models::{ConnectionStatusReport, Integration, ResourceDescriptor};
use crate::services::remote::{create_remote, Connectable, HttpRemote, Queryable};
use crate::services::{ConnectionManager, RegistrationPolicy, ResourceRegistry, ResourceTable, TableSettings};
use crate::storage::SqliteStorage;

/// One integration: its definition, its shared session and its backend
pub struct IntegrationHandle {
    pub integration: Integration,
    pub connection: Arc<ConnectionManager>,
    remote: Arc<dyn Queryable>,
}

/// Process-wide set of integrations and the tables registered on them
///
/// Built once at startup by [`TableCatalog::bootstrap`] and torn down by
/// [`TableCatalog::shutdown`].
pub struct TableCatalog {
    integrations: RwLock<HashMap<String, Arc<IntegrationHandle>>>,
    registry: ResourceRegistry,
    tables: RwLock<HashMap<String, Arc<ResourceTable>>>,
    settings: TableSettings,
    default_page_size: usize,
    store: Option<Arc<SqliteStorage>>,
}

impl TableCatalog {
    pub fn new(settings: TableSettings, default_page_size: usize, store: Option<Arc<SqliteStorage>>) -> Self {
        Self {
            integrations: RwLock::new(HashMap::new()),
            registry: ResourceRegistry::new(),
            tables: RwLock::new(HashMap::new()),
            settings,
            default_page_size: default_page_size.max(1),
            store,
        }
    }

    /// Load every stored integration and resource, connecting them if configured to
    pub async fn bootstrap(remote: &RemoteConfig, store: Arc<SqliteStorage>) -> Result<Arc<Self>, AppError> {
        let catalog = Arc::new(Self::new(remote.table_settings(), remote.page_size, Some(store.clone())));

        for integration in store.list_integrations().await? {
            let name = integration.name.clone();
            if let Err(e) = catalog.install_integration(integration).await {
                tracing::error!("Skipping stored integration '{}': {}", name, e);
            }
        }

        for descriptor in store.list_resources().await? {
            let name = descriptor.name.clone();
            if let Err(e) = catalog.install_resource(descriptor, RegistrationPolicy::Replace).await {
                tracing::error!("Skipping stored resource '{}': {}", name, e);
            }
        }

        if remote.connect_on_startup {
            for name in catalog.integration_names().await {
                let report = catalog.connect_integration(&name).await?;
                if !report.connected {
                    tracing::warn!("Integration '{}' is offline at startup: {}", name, report.message);
                }
            }
        }

        tracing::info!(
            "Catalog ready: {} integration(s), {} resource(s)",
            catalog.integrations.read().await.len(),
            catalog.registry.len().await
        );
        Ok(catalog)
    }

    // ---- integrations ----

    /// Add an HTTP integration and persist it
    pub async fn add_integration(&self, integration: Integration) -> Result<Arc<IntegrationHandle>, AppError> {
        let handle = self.install_integration(integration).await?;
        if let Some(store) = &self.store {
            if let Err(e) = store.save_integration(&handle.integration).await {
                self.integrations.write().await.remove(&handle.integration.name);
                return Err(e.into());
            }
        }
        Ok(handle)
    }

    /// Add an integration served by a caller-supplied backend; not persisted
    pub async fn add_integration_with<R>(&self, integration: Integration, remote: Arc<R>) -> Result<Arc<IntegrationHandle>, AppError>
    where
        R: Connectable + Queryable + 'static,
    {
        let connector: Arc<dyn Connectable> = remote.clone();
        let queryable: Arc<dyn Queryable> = remote;
        self.insert_handle(integration, connector, queryable).await
    }

    async fn install_integration(&self, integration: Integration) -> Result<Arc<IntegrationHandle>, AppError> {
        let remote = create_remote(&integration, self.settings.call_timeout)?;
        let connector: Arc<dyn Connectable> = remote.clone();
        let queryable: Arc<dyn Queryable> = remote;
        self.insert_handle(integration, connector, queryable).await
    }

    async fn insert_handle(
        &self,
        integration: Integration,
        connector: Arc<dyn Connectable>,
        remote: Arc<dyn Queryable>,
    ) -> Result<Arc<IntegrationHandle>, AppError> {
        if integration.name.trim().is_empty() {
            return Err(AppError::Validation("Integration name cannot be empty".to_string()));
        }

        let mut integrations = self.integrations.write().await;
        if integrations.contains_key(&integration.name) {
            return Err(AppError::Validation(format!(
                "Integration '{}' already exists",
                integration.name
            )));
        }

        let handle = Arc::new(IntegrationHandle {
            connection: Arc::new(ConnectionManager::new(integration.name.clone(), connector)),
            integration,
            remote,
        });
        integrations.insert(handle.integration.name.clone(), handle.clone());
        tracing::info!(
            "Added integration '{}' ({}, auth {:?})",
            handle.integration.name,
            HttpRemote::mask_credentials(&handle.integration.base_url),
            handle.integration.auth
        );
        Ok(handle)
    }

    pub async fn integration(&self, name: &str) -> Result<Arc<IntegrationHandle>, AppError> {
        self.integrations
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Integration '{}' not found", name)))
    }

    pub async fn integrations(&self) -> Vec<Integration> {
        let mut integrations: Vec<Integration> = self
            .integrations
            .read()
            .await
            .values()
            .map(|h| h.integration.clone())
            .collect();
        integrations.sort_by(|a, b| a.name.cmp(&b.name));
        integrations
    }

    async fn integration_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.integrations.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Authenticate the integration and bring its registered tables to serving
    pub async fn connect_integration(&self, name: &str) -> Result<ConnectionStatusReport, AppError> {
        let handle = self.integration(name).await?;
        let report = handle.connection.connect().await;
        if report.connected {
            for table in self.tables_of(name).await {
                Self::activate(&table).await;
            }
        }
        Ok(report)
    }

    pub async fn check_integration(&self, name: &str) -> Result<ConnectionStatusReport, AppError> {
        Ok(self.integration(name).await?.connection.check_connection().await)
    }

    /// Drop an integration along with every resource served through it
    pub async fn remove_integration(&self, name: &str) -> Result<usize, AppError> {
        let handle = self
            .integrations
            .write()
            .await
            .remove(name)
            .ok_or_else(|| AppError::NotFound(format!("Integration '{}' not found", name)))?;

        let tables = self.tables_of(name).await;
        for table in &tables {
            self.registry.remove(table.name()).await;
            self.tables.write().await.remove(table.name());
            table.teardown().await;
        }
        handle.connection.disconnect().await;

        if let Some(store) = &self.store {
            store.delete_integration(name).await?;
        }
        tracing::info!("Removed integration '{}' and {} resource(s)", name, tables.len());
        Ok(tables.len())
    }

    // ---- resources ----

    /// Register a descriptor, persist it and start serving it if its integration is up
    pub async fn register_resource(
        &self,
        descriptor: ResourceDescriptor,
        policy: RegistrationPolicy,
    ) -> Result<Arc<ResourceTable>, AppError> {
        let name = descriptor.name.clone();
        let previous = self.registry.get(&name).await.ok();
        let table = self.install_resource(descriptor, policy).await?;

        if let Some(store) = &self.store {
            let stored = match table.descriptor().await {
                Some(descriptor) => store.save_resource(&descriptor).await,
                None => Ok(()),
            };
            if let Err(e) = stored {
                tracing::error!("Failed to persist resource '{}': {}", name, e);
                self.rollback(&name, previous).await;
                return Err(e.into());
            }
        }
        Ok(table)
    }

    async fn install_resource(
        &self,
        mut descriptor: ResourceDescriptor,
        policy: RegistrationPolicy,
    ) -> Result<Arc<ResourceTable>, AppError> {
        let handle = self.integration(&descriptor.integration).await.map_err(|_| {
            AppError::Validation(format!(
                "Resource '{}' refers to unknown integration '{}'",
                descriptor.name, descriptor.integration
            ))
        })?;
        descriptor.pagination.fill_page_size(self.default_page_size);

        self.registry.register(descriptor.clone(), policy).await?;
        let registered = self.registry.get(&descriptor.name).await?;

        let table = Arc::new(ResourceTable::new(
            descriptor.name.clone(),
            handle.connection.clone(),
            handle.remote.clone(),
            self.settings.clone(),
        ));
        table.register(registered).await?;

        let replaced = self.tables.write().await.insert(descriptor.name.clone(), table.clone());
        if let Some(old) = replaced {
            old.teardown().await;
        }

        if handle.connection.is_connected().await {
            Self::activate(&table).await;
        }
        Ok(table)
    }

    async fn rollback(&self, name: &str, previous: Option<Arc<ResourceDescriptor>>) {
        let restored = match previous {
            Some(descriptor) => self
                .install_resource((*descriptor).clone(), RegistrationPolicy::Replace)
                .await
                .is_ok(),
            None => false,
        };
        if !restored {
            self.registry.remove(name).await;
            let removed = self.tables.write().await.remove(name);
            if let Some(table) = removed {
                table.teardown().await;
            }
        }
    }

    pub async fn remove_resource(&self, name: &str) -> Result<(), AppError> {
        if self.registry.remove(name).await.is_none() {
            return Err(AppError::NotFound(format!("Resource '{}' not found", name)));
        }
        let removed = self.tables.write().await.remove(name);
        if let Some(table) = removed {
            table.teardown().await;
        }
        if let Some(store) = &self.store {
            store.delete_resource(name).await?;
        }
        Ok(())
    }

    pub async fn table(&self, name: &str) -> Result<Arc<ResourceTable>, AppError> {
        self.tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Resource '{}' not found", name)))
    }

    pub async fn resources(&self) -> Vec<Arc<ResourceDescriptor>> {
        self.registry.list().await
    }

    async fn tables_of(&self, integration: &str) -> Vec<Arc<ResourceTable>> {
        self.tables
            .read()
            .await
            .values()
            .filter(|t| t.integration() == integration)
            .cloned()
            .collect()
    }

    async fn activate(table: &ResourceTable) {
        let outcome = match table.connect().await {
            Ok(_) => table.serve().await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            tracing::warn!("Table '{}' is not serving: {}", table.name(), e);
        }
    }

    /// Tear down every table and drop every session
    pub async fn shutdown(&self) {
        let tables: Vec<Arc<ResourceTable>> = self.tables.write().await.drain().map(|(_, t)| t).collect();
        for table in &tables {
            table.teardown().await;
        }
        let handles: Vec<Arc<IntegrationHandle>> = self.integrations.read().await.values().cloned().collect();
        for handle in handles {
            handle.connection.disconnect().await;
        }
        tracing::info!("Catalog shut down ({} table(s) torn down)", tables.len());
    }
}
