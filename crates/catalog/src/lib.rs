//! The composite per-catalog content store.
//!
//! One `Store` owns a root directory of committed catalogs. Ingest fans a
//! single pass over the blob stream out to the enabled sinks, stages their
//! artifacts in a hidden sibling directory, and atomically renames the
//! staged tree over the live one; readers either see the entire prior
//! catalog or the entire new one.

mod store;

pub use store::Store;

use graphql::MergePolicy;
use std::path::PathBuf;

/// Configuration of a [`Store`].
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding one subdirectory per committed catalog.
    pub root: PathBuf,
    /// Build and persist the sparse index alongside the raw content.
    #[serde(default = "default_true")]
    pub index: bool,
    /// Accumulate blob shapes and generate a GraphQL schema per catalog.
    /// Requires `index`: resolvers stream exclusively through it.
    #[serde(default = "default_true")]
    pub graphql: bool,
    /// How blob shape accumulation treats conflicting field types.
    #[serde(default)]
    pub merge_policy: MergePolicy,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: true,
            graphql: true,
            merge_policy: MergePolicy::default(),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.graphql && !self.index {
            return Err(Error::Config(
                "the GraphQL sink requires the index sink".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Content(#[from] content::Error),
    #[error(transparent)]
    Fbc(#[from] fbc::Error),
    #[error(transparent)]
    Graphql(#[from] graphql::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("catalog {0:?} is not stored")]
    NotFound(String),
    #[error("catalog {0:?} has no index")]
    NoIndex(String),
    #[error("catalog {0:?} has no GraphQL schema")]
    NoSchema(String),
    #[error("{0:?} is not a valid catalog name")]
    InvalidName(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("storing failed: {}", join_all(.0))]
    Sinks(Vec<Error>),
}

fn join_all(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
