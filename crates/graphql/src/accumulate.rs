use crate::sample::Sample;
use crate::{Error, MergePolicy};
use fbc::Meta;
use std::collections::BTreeMap;

/// Accumulator folds every ingested blob into one shape per source schema,
/// the input to query-schema generation.
#[derive(Debug)]
pub struct Accumulator {
    policy: MergePolicy,
    schemas: BTreeMap<String, BTreeMap<String, Sample>>,
}

impl Accumulator {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            schemas: BTreeMap::new(),
        }
    }

    /// Fold one blob into its source schema's accumulated shape. The blob
    /// must decode to a JSON object; a decode failure aborts the ingest.
    pub fn add(&mut self, meta: &Meta) -> Result<(), Error> {
        let decoded: serde_json::Value =
            serde_json::from_slice(&meta.blob).map_err(|source| Error::Decode {
                schema: meta.schema.clone(),
                source,
            })?;
        let serde_json::Value::Object(fields) = decoded else {
            return Err(Error::NotAnObject {
                schema: meta.schema.clone(),
            });
        };

        let accumulated = self.schemas.entry(meta.schema.clone()).or_default();
        for (key, value) in fields {
            let path = format!("{}.{}", meta.schema, key);
            let sample = Sample::of(&value, self.policy, &path)?;
            let merged = match accumulated.remove(&key) {
                None => sample,
                Some(prior) => prior.merge(sample, self.policy, &path)?,
            };
            accumulated.insert(key, merged);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub(crate) fn schemas(&self) -> &BTreeMap<String, BTreeMap<String, Sample>> {
        &self.schemas
    }
}
