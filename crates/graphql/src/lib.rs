//! A GraphQL query surface discovered from catalog content.
//!
//! One pass over the blob stream accumulates the shape of every source
//! schema's blobs; once the stream is drained, a typed query schema is
//! generated from those shapes. Resolvers slice the catalog's raw file
//! through its sparse index, so query results are decoded from the same
//! bytes the raw endpoints serve.

mod accumulate;
mod ident;
mod jq;
mod resolve;
mod sample;
mod typegen;

pub use accumulate::Accumulator;
pub use resolve::{JqCache, Scope};
pub use typegen::build_schema;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// How to treat two observed values of one field whose JSON types disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Fail the ingest with an error naming the conflicting field.
    #[default]
    Strict,
    /// Degrade the conflicting field to the pass-through JSON scalar.
    Widen,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("decoding blob of schema {schema:?}: {source}")]
    Decode {
        schema: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("blob of schema {schema:?} is not a JSON object")]
    NotAnObject { schema: String },
    #[error("merging field {path:?}: cannot merge {left} with {right}")]
    Merge {
        path: String,
        left: &'static str,
        right: &'static str,
    },
    #[error("building GraphQL schema: {0}")]
    Build(String),
    #[error(transparent)]
    Fbc(#[from] fbc::Error),
    #[error("storing canceled")]
    Canceled,
}

/// Accumulate blob shapes from the stream, the schema-builder's leg of the
/// ingest fan-out. Cancellation is honored between records.
pub async fn accumulate<S>(
    stream: S,
    policy: MergePolicy,
    cancel: &CancellationToken,
) -> Result<Accumulator, Error>
where
    S: Stream<Item = Result<fbc::Meta, fbc::Error>> + Send,
{
    futures::pin_mut!(stream);
    let mut accumulator = Accumulator::new(policy);

    loop {
        let meta = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            next = stream.next() => match next {
                None => break,
                Some(result) => result?,
            },
        };
        accumulator.add(&meta)?;
    }
    Ok(accumulator)
}
