//! Vendor integrations
//!
//! - [`VendorAdapter`]: capability every vendor implements
//! - [`VendorRegistry`]: vendor to adapter factory lookup
//! - [`IntegrationCatalog`]: static description of offered integrations
//! - bundled adapters for GitHub and Asana

pub mod asana;
pub mod github;
pub mod metadata;
pub mod registry;
pub mod trait_;

pub use metadata::{
    AuthType, CatalogError, IntegrationCatalog, IntegrationDefinition, PipeDefinition, Vendor,
};
pub use registry::{RegistryError, VendorRegistry};
pub use trait_::{AdapterError, AdapterFactory, VendorAdapter};
