//! Vendor identifiers and the integration catalog.
//!
//! The catalog is a static JSON file describing each vendor, its auth flow
//! and the pipes it offers. It is loaded once at startup.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::error::PipeError;
use crate::pipes::PipeId;

/// Third-party services the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Asana,
    Basecamp,
    FreshBooks,
    GitHub,
    Teamweek,
}

impl Vendor {
    pub const ALL: [Vendor; 5] = [
        Vendor::Asana,
        Vendor::Basecamp,
        Vendor::FreshBooks,
        Vendor::GitHub,
        Vendor::Teamweek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Asana => "asana",
            Vendor::Basecamp => "basecamp",
            Vendor::FreshBooks => "freshbooks",
            Vendor::GitHub => "github",
            Vendor::Teamweek => "teamweek",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vendor::ALL
            .into_iter()
            .find(|vendor| vendor.as_str() == s)
            .ok_or_else(|| PipeError::UnknownVendor(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    OAuth1,
    OAuth2,
}

/// Catalog entry for one pipe of an integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeDefinition {
    pub id: PipeId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub automatic_option: bool,
    #[serde(default)]
    pub premium: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationDefinition {
    pub id: Vendor,
    pub name: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub image: String,
    pub auth_type: AuthType,
    #[serde(default)]
    pub pipes: Vec<PipeDefinition>,
}

impl IntegrationDefinition {
    pub fn offers(&self, pipe: PipeId) -> bool {
        self.pipes.iter().any(|p| p.id == pipe)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read integration catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid integration catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("integration '{0}' is listed more than once")]
    Duplicate(Vendor),
}

/// The set of integrations offered to workspaces.
#[derive(Debug, Clone, Default)]
pub struct IntegrationCatalog {
    integrations: Vec<IntegrationDefinition>,
}

impl IntegrationCatalog {
    pub fn new(integrations: Vec<IntegrationDefinition>) -> Result<Self, CatalogError> {
        let mut seen = std::collections::HashSet::new();
        for integration in &integrations {
            if !seen.insert(integration.id) {
                return Err(CatalogError::Duplicate(integration.id));
            }
        }
        Ok(Self { integrations })
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Self::new(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IntegrationDefinition> {
        self.integrations.iter()
    }

    pub fn get(&self, vendor: Vendor) -> Option<&IntegrationDefinition> {
        self.integrations.iter().find(|i| i.id == vendor)
    }

    pub fn auth_type(&self, vendor: Vendor) -> Option<AuthType> {
        self.get(vendor).map(|i| i.auth_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {"id": "github", "name": "GitHub", "auth_type": "oauth2",
         "pipes": [{"id": "projects", "name": "Projects", "automatic_option": true}]},
        {"id": "freshbooks", "name": "FreshBooks", "auth_type": "oauth1", "pipes": []}
    ]"#;

    #[test]
    fn vendor_parsing_is_closed() {
        assert_eq!("github".parse::<Vendor>().unwrap(), Vendor::GitHub);
        assert_eq!(Vendor::FreshBooks.to_string(), "freshbooks");
        assert!(matches!(
            "trello".parse::<Vendor>(),
            Err(PipeError::UnknownVendor(name)) if name == "trello"
        ));
    }

    #[test]
    fn catalog_resolves_auth_type_and_pipes() {
        let catalog = IntegrationCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.auth_type(Vendor::GitHub), Some(AuthType::OAuth2));
        assert_eq!(catalog.auth_type(Vendor::FreshBooks), Some(AuthType::OAuth1));
        assert_eq!(catalog.auth_type(Vendor::Asana), None);
        let github = catalog.get(Vendor::GitHub).unwrap();
        assert!(github.offers(PipeId::Projects));
        assert!(!github.offers(PipeId::Users));
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let json = r#"[{"id":"asana","name":"A","auth_type":"oauth2"},
                       {"id":"asana","name":"B","auth_type":"oauth2"}]"#;
        assert!(matches!(
            IntegrationCatalog::from_json(json),
            Err(CatalogError::Duplicate(Vendor::Asana))
        ));
    }
}
