use crate::{singleflight, Error};
use fbc::Meta;
use futures::{Stream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Section is the byte range of exactly one blob within a catalog's raw file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(into = "(u64, u64)", from = "(u64, u64)")]
pub struct Section {
    pub offset: u64,
    pub length: u64,
}

impl From<(u64, u64)> for Section {
    fn from((offset, length): (u64, u64)) -> Self {
        Self { offset, length }
    }
}

impl From<Section> for (u64, u64) {
    fn from(section: Section) -> Self {
        (section.offset, section.length)
    }
}

/// Index maps schema, package, and name keys onto the sections of the blobs
/// that carry them, in arrival (equals byte-offset) order. Empty package and
/// name fields are not indexed.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Index {
    by_schema: BTreeMap<String, Vec<Section>>,
    by_package: BTreeMap<String, Vec<Section>>,
    by_name: BTreeMap<String, Vec<Section>>,
}

impl Index {
    /// Build an index by consuming the blob stream once, tracking a running
    /// byte offset from zero. Cancellation is honored between records.
    pub async fn build<S>(stream: S, cancel: &CancellationToken) -> Result<Self, Error>
    where
        S: Stream<Item = Result<Meta, fbc::Error>> + Send,
    {
        futures::pin_mut!(stream);
        let mut index = Self::default();
        let mut offset = 0;

        loop {
            let meta = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Canceled),
                next = stream.next() => match next {
                    None => break,
                    Some(result) => result?,
                },
            };
            index.insert(&meta, offset);
            offset += meta.blob.len() as u64;
        }
        Ok(index)
    }

    fn insert(&mut self, meta: &Meta, offset: u64) {
        let section = Section {
            offset,
            length: meta.blob.len() as u64,
        };
        self.by_schema
            .entry(meta.schema.clone())
            .or_default()
            .push(section);
        if !meta.package.is_empty() {
            self.by_package
                .entry(meta.package.clone())
                .or_default()
                .push(section);
        }
        if !meta.name.is_empty() {
            self.by_name
                .entry(meta.name.clone())
                .or_default()
                .push(section);
        }
    }

    /// The sections matching all of the given keys, in ascending offset
    /// order. An empty `schema` selects every schema bucket; an empty
    /// `package` or `name` applies no filter on that axis.
    pub fn sections(&self, schema: &str, package: &str, name: &str) -> Vec<Section> {
        let mut out: Vec<Section> = if schema.is_empty() {
            self.by_schema.values().flatten().copied().collect()
        } else {
            self.by_schema.get(schema).cloned().unwrap_or_default()
        };
        for (key, bucket) in [(package, &self.by_package), (name, &self.by_name)] {
            if key.is_empty() {
                continue;
            }
            let keep: HashSet<Section> = bucket
                .get(key)
                .map(|sections| sections.iter().copied().collect())
                .unwrap_or_default();
            out.retain(|section| keep.contains(section));
        }
        out.sort_by_key(|section| section.offset);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.by_schema.is_empty()
    }
}

/// Indices stores each catalog's index as `catalog-index-<name>.json` under
/// its root, staged and renamed like the raw files, and parses them back on
/// demand. Concurrent cold loads of one catalog's index collapse to a single
/// disk parse; parsed indices are not cached across request batches.
pub struct Indices {
    root: PathBuf,
    registry: RwLock<HashMap<String, PathBuf>>,
    flights: singleflight::Group<Arc<Index>>,
}

impl Indices {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            registry: RwLock::new(HashMap::new()),
            flights: singleflight::Group::new(),
        })
    }

    /// Build the catalog's index from the blob stream and atomically replace
    /// any previously registered index file.
    pub async fn store<S>(
        &self,
        catalog: &str,
        stream: S,
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        S: Stream<Item = Result<Meta, fbc::Error>> + Send,
    {
        let index = Index::build(stream, cancel).await?;

        let staged = tempfile::Builder::new()
            .prefix(&format!("catalog-index-{catalog}-"))
            .suffix(".json")
            .tempfile_in(&self.root)?;
        serde_json::to_writer(staged.as_file(), &index)?;
        staged.as_file().sync_all()?;

        let finalized = self.root.join(format!("catalog-index-{catalog}.json"));
        staged.persist(&finalized).map_err(|err| err.error)?;
        tracing::debug!(catalog, path = %finalized.display(), "stored catalog index");

        let mut registry = self.registry.write().unwrap();
        registry.insert(catalog.to_string(), finalized);
        Ok(())
    }

    /// Parse the catalog's index from disk. Concurrent loads for one catalog
    /// share a single parse.
    pub async fn load(&self, catalog: &str) -> Result<Arc<Index>, Error> {
        // Hold the registry lock only for the path lookup, not the load.
        let path = {
            let registry = self.registry.read().unwrap();
            registry
                .get(catalog)
                .cloned()
                .ok_or_else(|| Error::NotFound(catalog.to_string()))?
        };
        let loaded = self
            .flights
            .run(catalog, || async move {
                let bytes = tokio::fs::read(&path).await?;
                Ok(Arc::new(serde_json::from_slice::<Index>(&bytes)?))
            })
            .await?;
        Ok(loaded)
    }

    /// Remove the catalog's index file and registration; idempotent.
    pub fn delete(&self, catalog: &str) -> Result<(), Error> {
        let removed = self.registry.write().unwrap().remove(catalog);
        if let Some(path) = removed {
            match std::fs::remove_file(&path) {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err.into()),
                _ => (),
            }
        }
        Ok(())
    }

    pub fn exists(&self, catalog: &str) -> bool {
        let registry = self.registry.read().unwrap();
        registry
            .get(catalog)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn fixture() -> Vec<Result<Meta, fbc::Error>> {
        [
            r#"{"schema":"olm.package","name":"p"}"#,
            r#"{"schema":"olm.channel","package":"p","name":"c"}"#,
            r#"{"schema":"olm.bundle","package":"p","name":"b"}"#,
            r#"{"schema":"olm.bundle","package":"q","name":"b"}"#,
        ]
        .iter()
        .map(|line| Meta::parse(Bytes::copy_from_slice(line.as_bytes())))
        .collect()
    }

    async fn build(metas: Vec<Result<Meta, fbc::Error>>) -> Index {
        Index::build(stream::iter(metas), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_tracks_offsets_and_lengths() {
        let metas = fixture();
        let lengths: Vec<u64> = metas
            .iter()
            .map(|m| m.as_ref().unwrap().blob.len() as u64)
            .collect();
        let index = build(metas).await;

        let all = index.sections("", "", "");
        assert_eq!(all.len(), 4);
        let mut offset = 0;
        for (section, length) in all.iter().zip(&lengths) {
            assert_eq!((section.offset, section.length), (offset, *length));
            offset += length;
        }
    }

    #[tokio::test]
    async fn test_sections_intersect_axes() {
        let index = build(fixture()).await;

        assert_eq!(index.sections("olm.package", "", "").len(), 1);
        assert_eq!(index.sections("olm.bundle", "", "").len(), 2);
        assert_eq!(index.sections("olm.bundle", "q", "").len(), 1);
        assert_eq!(index.sections("olm.bundle", "q", "b").len(), 1);
        assert_eq!(index.sections("olm.bundle", "q", "c").len(), 0);
        assert_eq!(index.sections("", "p", "").len(), 2);
        assert_eq!(index.sections("", "", "b").len(), 2);
        assert_eq!(index.sections("missing", "", "").len(), 0);
    }

    #[tokio::test]
    async fn test_empty_fields_are_not_indexed() {
        let index = build(vec![Meta::parse(Bytes::from_static(
            b"{\"schema\":\"olm.deprecations\"}\n",
        ))])
        .await;

        assert_eq!(index.sections("olm.deprecations", "", "").len(), 1);
        assert_eq!(index.sections("", "", "").len(), 1);
        assert!(index.by_package.is_empty());
        assert!(index.by_name.is_empty());
    }

    #[tokio::test]
    async fn test_serialized_shape() {
        let index = build(vec![Meta::parse(Bytes::from_static(
            b"{\"schema\":\"olm.channel\",\"package\":\"p\",\"name\":\"c\"}\n",
        ))])
        .await;

        let serialized = serde_json::to_value(&index).unwrap();
        assert_eq!(
            serialized,
            serde_json::json!({
                "by_schema": {"olm.channel": [[0, 50]]},
                "by_package": {"p": [[0, 50]]},
                "by_name": {"c": [[0, 50]]},
            }),
        );
        let round_tripped: Index = serde_json::from_value(serialized).unwrap();
        assert_eq!(round_tripped, index);
    }

    #[tokio::test]
    async fn test_indices_store_load_delete() {
        let root = tempfile::tempdir().unwrap();
        let indices = Indices::new(root.path()).unwrap();
        let cancel = CancellationToken::new();

        indices
            .store("cat", stream::iter(fixture()), &cancel)
            .await
            .unwrap();
        assert!(indices.exists("cat"));
        assert!(root
            .path()
            .join("catalog-index-cat.json")
            .is_file());

        let index = indices.load("cat").await.unwrap();
        assert_eq!(index.sections("olm.bundle", "", "").len(), 2);

        indices.delete("cat").unwrap();
        assert!(!indices.exists("cat"));
        assert!(matches!(
            indices.load("cat").await,
            Err(Error::NotFound(_))
        ));
        indices.delete("cat").unwrap();
    }
}
