//! Flavor Catalog
//!
//! TigerStyle: Fixed, pre-seeded, immutable.
//!
//! Every flavor reports `vcpus = 10` regardless of its size.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CloudError, ResourceKind, Result};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// vCPU count reported for every flavor
pub const FLAVOR_VCPUS: u32 = 10;

/// Base URL for flavor links
pub const FLAVOR_LINK_BASE: &str =
    "http://localhost:8774/v2/5064d71eb09c47e1956cf579822bae9a/flavors";

/// Seed data: (id, disk GB, name, ram MB)
const FLAVOR_SEED: [(u32, u32, &str, u64); 8] = [
    (1, 0, "m1.tiny", 512),
    (2, 10, "m1.small", 2048),
    (3, 10, "m1.medium", 4096),
    (4, 10, "m1.large", 8192),
    (5, 10, "m1.xlarge", 16384),
    (6, 0, "tinier", 506),
    (7, 0, "m1.rd-tiny", 512),
    (8, 0, "m1.rd-smaller", 768),
];

// =============================================================================
// Types
// =============================================================================

/// A hypermedia link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
}

/// Build `self` and `bookmark` links to the same href
pub(crate) fn self_links(href: &str) -> Vec<Link> {
    ["self", "bookmark"]
        .iter()
        .map(|rel| Link {
            href: href.to_string(),
            rel: rel.to_string(),
        })
        .collect()
}

/// A compute sizing template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub id: u32,
    pub disk: u32,
    pub name: String,
    pub ram: u64,
    pub vcpus: u32,
}

/// Compact flavor reference, as embedded in a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorRef {
    pub id: u32,
    pub links: Vec<Link>,
}

impl Flavor {
    fn new(id: u32, disk: u32, name: &str, ram: u64) -> Self {
        Self {
            id,
            disk,
            name: name.to_string(),
            ram,
            vcpus: FLAVOR_VCPUS,
        }
    }

    /// Self link href
    pub fn href(&self) -> String {
        format!("{}/{}", FLAVOR_LINK_BASE, self.id)
    }

    /// `self` and `bookmark` links
    pub fn links(&self) -> Vec<Link> {
        self_links(&self.href())
    }

    /// Suffix used for inexact href matching
    pub fn href_suffix(&self) -> String {
        format!("flavors/{}", self.id)
    }

    /// Compact reference form
    pub fn to_ref(&self) -> FlavorRef {
        FlavorRef {
            id: self.id,
            links: self.links(),
        }
    }
}

/// The flavor catalog
#[derive(Debug, Clone)]
pub struct FlavorCatalog {
    flavors: BTreeMap<u32, Flavor>,
}

impl Default for FlavorCatalog {
    fn default() -> Self {
        Self::seeded()
    }
}

impl FlavorCatalog {
    /// The fixed catalog
    pub fn seeded() -> Self {
        let flavors = FLAVOR_SEED
            .iter()
            .map(|&(id, disk, name, ram)| (id, Flavor::new(id, disk, name, ram)))
            .collect();
        Self { flavors }
    }

    /// Look up by id. Accepts anything that parses as an integer id.
    pub fn get(&self, id: &str) -> Result<&Flavor> {
        let numeric: u32 = id
            .trim()
            .parse()
            .map_err(|_| CloudError::not_found(ResourceKind::Flavor, id))?;
        self.get_by_id(numeric)
    }

    /// Look up by numeric id
    pub fn get_by_id(&self, id: u32) -> Result<&Flavor> {
        self.flavors
            .get(&id)
            .ok_or_else(|| CloudError::not_found(ResourceKind::Flavor, id.to_string()))
    }

    /// Look up by link. Matching is on the `flavors/{id}` suffix since the
    /// exact endpoint varies.
    pub fn get_by_href(&self, href: &str) -> Result<&Flavor> {
        self.flavors
            .values()
            .find(|flavor| href.ends_with(&flavor.href_suffix()))
            .ok_or_else(|| CloudError::not_found(ResourceKind::Flavor, href))
    }

    /// Resolve a server's flavor ref: integer id first, then link.
    pub fn resolve(&self, flavor_ref: &str) -> Result<&Flavor> {
        match flavor_ref.trim().parse::<u32>() {
            Ok(id) => self.get_by_id(id),
            Err(_) => self.get_by_href(flavor_ref),
        }
    }

    /// All flavors, ordered by id
    pub fn list(&self) -> Vec<Flavor> {
        self.flavors.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_catalog() {
        let catalog = FlavorCatalog::seeded();
        let flavors = catalog.list();

        assert_eq!(flavors.len(), 8);
        assert!(flavors.iter().all(|f| f.vcpus == FLAVOR_VCPUS));
        assert_eq!(catalog.get("2").unwrap().name, "m1.small");
        assert_eq!(catalog.get_by_id(5).unwrap().ram, 16384);
    }

    #[test]
    fn test_unknown_flavor() {
        let catalog = FlavorCatalog::seeded();
        assert!(catalog.get("99").unwrap_err().is_not_found());
        assert!(catalog.get("small").unwrap_err().is_not_found());
    }

    #[test]
    fn test_links_and_href_lookup() {
        let catalog = FlavorCatalog::seeded();
        let tiny = catalog.get_by_id(1).unwrap();
        let links = tiny.links();

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].rel, "self");
        assert_eq!(links[1].rel, "bookmark");
        assert_eq!(
            links[0].href,
            "http://localhost:8774/v2/5064d71eb09c47e1956cf579822bae9a/flavors/1"
        );

        let found = catalog
            .get_by_href("https://elsewhere.example/v2/t/flavors/3")
            .unwrap();
        assert_eq!(found.name, "m1.medium");
    }

    #[test]
    fn test_resolve_prefers_numeric() {
        let catalog = FlavorCatalog::seeded();
        let medium = catalog.get_by_id(3).unwrap();

        assert_eq!(catalog.resolve("4").unwrap().id, 4);
        assert_eq!(catalog.resolve(&medium.href()).unwrap().id, 3);
        assert!(catalog.resolve("flavors/42").is_err());
    }

    #[test]
    fn test_to_ref_serializes() {
        let catalog = FlavorCatalog::seeded();
        let value = serde_json::to_value(catalog.get_by_id(2).unwrap().to_ref()).unwrap();

        assert_eq!(value["id"], 2);
        assert_eq!(value["links"][0]["rel"], "self");
    }
}
