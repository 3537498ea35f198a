//! Shared metadata field types and service seams
//!
//! The shape of a metadata field (which external-tool keys it reads/writes,
//! whether it is multi-valued) is declarative and immutable. Runtime values are
//! carried as [`MetadataValue`]. The traits at the bottom are the seams between
//! the orchestrating entities and their external collaborators; production
//! implementations live in `services/`, tests substitute mocks.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::services::shutterstock_client::{Category, SearchPage, SearchRequest};

/// Static descriptor of one metadata field.
///
/// `request` is the external tool's read flag (e.g. `-iptc:objectName`),
/// `response` the key the tool reports the value under (e.g. `ObjectName`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub request: &'static str,
    pub response: &'static str,
    pub multi: bool,
}

/// Runtime value of a metadata field.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Single(String),
    Multi(Vec<String>),
}

impl MetadataValue {
    /// Empty default for a field: empty string or empty sequence.
    pub fn empty(multi: bool) -> Self {
        if multi {
            MetadataValue::Multi(Vec::new())
        } else {
            MetadataValue::Single(String::new())
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, MetadataValue::Multi(_))
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Single(s) => write!(f, "{}", s),
            MetadataValue::Multi(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

/// Field values keyed by shape entry id.
pub type FileMetadata = HashMap<String, MetadataValue>;

/// Equality used for the dirty/saved reconciliation: set-equality ignoring
/// order for multi-valued fields, exact equality otherwise.
pub fn values_equal(a: &MetadataValue, b: &MetadataValue) -> bool {
    match (a, b) {
        (MetadataValue::Multi(x), MetadataValue::Multi(y)) => {
            x.iter().collect::<HashSet<_>>() == y.iter().collect::<HashSet<_>>()
        }
        (MetadataValue::Single(x), MetadataValue::Single(y)) => x == y,
        _ => false,
    }
}

/// Foreground external-tool access used by the metadata entity.
#[async_trait::async_trait]
pub trait ExifToolService: Send + Sync {
    async fn read(&self, path: &Path, shape: &'static [ShapeEntry]) -> Result<FileMetadata>;
    async fn write(
        &self,
        path: &Path,
        shape: &'static [ShapeEntry],
        values: &FileMetadata,
    ) -> Result<()>;
}

/// Background metadata access used by the gallery cache (lower priority).
#[async_trait::async_trait]
pub trait MetadataService: Send + Sync {
    async fn read(&self, path: &Path) -> Result<FileMetadata>;
}

/// Tagging Service A (Imagga) contract.
#[async_trait::async_trait]
pub trait ImaggaApi: Send + Sync {
    async fn tags(&self, credentials: &str, image: Vec<u8>) -> Result<Vec<String>>;
    async fn remaining_quota(&self, credentials: &str) -> Result<u64>;
}

/// Tagging Service B (Shutterstock) contract, including the image-search API.
#[async_trait::async_trait]
pub trait ShutterstockApi: Send + Sync {
    async fn upload(&self, credentials: &str, base64_image: String) -> Result<String>;
    async fn keywords(&self, credentials: &str, upload_id: &str) -> Result<Vec<String>>;
    async fn search(&self, credentials: &str, request: &SearchRequest) -> Result<SearchPage>;
    async fn categories(&self, credentials: &str) -> Result<Vec<Category>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_equality_ignores_order() {
        let a = MetadataValue::Multi(vec!["sun".into(), "sea".into()]);
        let b = MetadataValue::Multi(vec!["sea".into(), "sun".into()]);
        assert!(values_equal(&a, &b));

        let c = MetadataValue::Multi(vec!["sea".into()]);
        assert!(!values_equal(&a, &c));
    }

    #[test]
    fn test_single_equality_is_exact() {
        let a = MetadataValue::Single("Sunset".into());
        let b = MetadataValue::Single("sunset".into());
        assert!(!values_equal(&a, &b));
        assert!(values_equal(&a, &a.clone()));
    }

    #[test]
    fn test_empty_defaults() {
        assert_eq!(MetadataValue::empty(false), MetadataValue::Single(String::new()));
        assert_eq!(MetadataValue::empty(true), MetadataValue::Multi(Vec::new()));
    }
}
