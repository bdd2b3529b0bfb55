//! Vendor registry
//!
//! Maps each [`Vendor`] to the factory that builds its adapter. Built once at
//! startup and shared by reference; there is no global instance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::integrations::{
    AdapterFactory, IntegrationCatalog, Vendor, VendorAdapter, asana::AsanaAdapter,
    github::GitHubAdapter,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("no adapter registered for '{0}'")]
    MissingAdapter(Vendor),
}

#[derive(Clone, Default)]
pub struct VendorRegistry {
    factories: HashMap<Vendor, Arc<dyn AdapterFactory>>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled GitHub and Asana adapters.
    pub fn with_bundled_adapters(http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        let github_http = http.clone();
        registry.register(
            Vendor::GitHub,
            Arc::new(move |workspace_id: i64| {
                Box::new(GitHubAdapter::new(workspace_id, github_http.clone()))
                    as Box<dyn VendorAdapter>
            }),
        );
        registry.register(
            Vendor::Asana,
            Arc::new(move |workspace_id: i64| {
                Box::new(AsanaAdapter::new(workspace_id, http.clone())) as Box<dyn VendorAdapter>
            }),
        );
        registry
    }

    pub fn register(&mut self, vendor: Vendor, factory: Arc<dyn AdapterFactory>) {
        self.factories.insert(vendor, factory);
    }

    pub fn contains(&self, vendor: Vendor) -> bool {
        self.factories.contains_key(&vendor)
    }

    pub fn create(
        &self,
        vendor: Vendor,
        workspace_id: i64,
    ) -> Result<Box<dyn VendorAdapter>, RegistryError> {
        self.factories
            .get(&vendor)
            .map(|factory| factory.create(workspace_id))
            .ok_or(RegistryError::MissingAdapter(vendor))
    }

    /// Fails if the catalog lists a vendor with no adapter.
    pub fn verify_catalog(&self, catalog: &IntegrationCatalog) -> Result<(), RegistryError> {
        for integration in catalog.iter() {
            if !self.contains(integration.id) {
                return Err(RegistryError::MissingAdapter(integration.id));
            }
        }
        Ok(())
    }

    pub fn vendors(&self) -> Vec<Vendor> {
        let mut vendors: Vec<Vendor> = self.factories.keys().copied().collect();
        vendors.sort();
        vendors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_registry_covers_github_and_asana() {
        let registry = VendorRegistry::with_bundled_adapters(reqwest::Client::new());
        assert_eq!(registry.vendors(), vec![Vendor::Asana, Vendor::GitHub]);

        let adapter = registry.create(Vendor::GitHub, 9).unwrap();
        assert_eq!(adapter.vendor(), Vendor::GitHub);
        assert_eq!(adapter.workspace_id(), 9);
        assert_eq!(adapter.key_for("projects"), "github:projects");
    }

    #[test]
    fn unregistered_vendor_is_a_typed_error() {
        let registry = VendorRegistry::with_bundled_adapters(reqwest::Client::new());
        assert!(matches!(
            registry.create(Vendor::Teamweek, 1),
            Err(RegistryError::MissingAdapter(Vendor::Teamweek))
        ));

        let catalog = IntegrationCatalog::from_json(
            r#"[{"id":"basecamp","name":"Basecamp","auth_type":"oauth2"}]"#,
        )
        .unwrap();
        assert!(registry.verify_catalog(&catalog).is_err());
    }
}
