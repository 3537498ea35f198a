//! Common error types for picmeta
//!
//! Service modules define their own error enums (`ExifToolError`, `ImaggaError`,
//! `ShutterstockError`); this module folds them into one crate-level `Error` and
//! adds the per-entity `Domain` wrapper used by task chains so a global handler
//! can attribute failures to the entity that raised them.

use std::fmt;
use thiserror::Error;

use crate::services::exiftool::ExifToolError;
use crate::services::imagga_client::ImaggaError;
use crate::services::shutterstock_client::ShutterstockError;
use crate::store::StoreError;
use crate::tasks::queue::QueueClosed;

/// Common result type for picmeta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Orchestrating entities, used to attribute asynchronous failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Metadata,
    Gallery,
    Keywording,
    Search,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Metadata => "metadata",
            Entity::Gallery => "gallery",
            Entity::Keywording => "keywording",
            Entity::Search => "search",
        };
        write!(f, "{}", name)
    }
}

/// Crate-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// External metadata tool invocation failed
    #[error("External tool error: {0}")]
    ExifTool(#[from] ExifToolError),

    /// Tagging Service A failure
    #[error("Imagga error: {0}")]
    Imagga(#[from] ImaggaError),

    /// Tagging Service B failure
    #[error("Shutterstock error: {0}")]
    Shutterstock(#[from] ShutterstockError),

    /// Reactive store violation (cyclic update)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Work queue shut down before a submitted job completed
    #[error("Queue error: {0}")]
    Queue(#[from] QueueClosed),

    /// Filesystem watcher failure
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or persistence error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure attributed to an owning entity
    #[error("{entity} operation failed: {source}")]
    Domain {
        entity: Entity,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error with the entity it belongs to.
    ///
    /// Already-tagged errors keep their original entity.
    pub fn for_entity(self, entity: Entity) -> Error {
        match self {
            err @ Error::Domain { .. } => err,
            other => Error::Domain {
                entity,
                source: Box::new(other),
            },
        }
    }

    /// Entity this error is attributed to, if any.
    pub fn entity(&self) -> Option<Entity> {
        match self {
            Error::Domain { entity, .. } => Some(*entity),
            _ => None,
        }
    }
}
