use crate::{Config, Error};
use bytes::Bytes;
use fbc::Meta;
use futures::Stream;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

const RAW_FILE: &str = "catalog.jsonl";
const INDEX_FILE: &str = "index.json";

/// Store holds committed catalogs under one root directory, each as a
/// read-only `<root>/<catalog>/` tree of sink artifacts, and serves
/// consistent reads while writers replace whole catalogs.
///
/// `store` calls for one catalog are serialized by the caller. An
/// unserialized overlap cannot corrupt readers — the last atomic rename
/// wins — but one of the writes is silently superseded.
pub struct Store {
    config: Config,
    catalogs: RwLock<HashMap<String, Arc<Catalog>>>,
    flights: content::singleflight::Group<Arc<content::Index>>,
}

struct Catalog {
    raw: PathBuf,
    index: Option<PathBuf>,
    schema: Option<async_graphql::dynamic::Schema>,
}

impl Store {
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        std::fs::create_dir_all(&config.root)?;
        Ok(Self {
            config,
            catalogs: RwLock::new(HashMap::new()),
            flights: content::singleflight::Group::new(),
        })
    }

    /// Open a store over a root that may already hold committed catalogs:
    /// each one is registered again, and stale staging directories left by
    /// an interrupted ingest are discarded. GraphQL schemas are rebuilt by
    /// walking the committed raw files.
    pub async fn open(config: Config) -> Result<Self, Error> {
        let store = Self::new(config)?;

        let mut entries = std::fs::read_dir(&store.config.root)?
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            if name.starts_with('.') {
                tracing::warn!(dir = %path.display(), "removing stale staging directory");
                content::fsutil::set_read_only(&path, false)?;
                std::fs::remove_dir_all(&path)?;
                continue;
            }
            store.register(&name, &path).await?;
        }
        Ok(store)
    }

    async fn register(&self, catalog: &str, dir: &std::path::Path) -> Result<(), Error> {
        let raw = dir.join(RAW_FILE);
        if !raw.is_file() {
            tracing::warn!(catalog, "skipping directory without committed raw content");
            return Ok(());
        }

        let schema = if self.config.graphql {
            let file = tokio::fs::File::open(&raw).await?;
            let accumulator = graphql::accumulate(
                fbc::walk_lines(tokio::io::BufReader::new(file)),
                self.config.merge_policy,
                &CancellationToken::new(),
            )
            .await?;
            (!accumulator.is_empty())
                .then(|| graphql::build_schema(&accumulator))
                .transpose()?
        } else {
            None
        };

        self.catalogs.write().unwrap().insert(
            catalog.to_string(),
            Arc::new(Catalog {
                raw,
                index: self
                    .config
                    .index
                    .then(|| dir.join(INDEX_FILE))
                    .filter(|path| path.is_file()),
                schema,
            }),
        );
        tracing::info!(catalog, "registered committed catalog content");
        Ok(())
    }

    /// Ingest the blob stream into a fresh staged tree and atomically commit
    /// it as `catalog`'s content. Every enabled sink consumes its own copy of
    /// the single-pass stream; all sink failures are collected and joined,
    /// and any failure or cancellation leaves the prior committed catalog
    /// untouched.
    pub async fn store<S>(
        &self,
        catalog: &str,
        stream: S,
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        S: Stream<Item = Result<Meta, fbc::Error>> + Send + 'static,
    {
        validate_name(catalog)?;

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{catalog}-"))
            .tempdir_in(&self.config.root)?;
        let raw_path = staging.path().join(RAW_FILE);
        let index_path = staging.path().join(INDEX_FILE);

        let sinks = 1 + usize::from(self.config.index) + usize::from(self.config.graphql);
        let (outputs, _cancel_fanout) = fanout::fan_out(stream, sinks);
        let mut outputs = outputs.into_iter();
        let raw_out = outputs.next().expect("fan-out yields one output per sink");
        let index_out = self.config.index.then(|| outputs.next()).flatten();
        let graphql_out = self.config.graphql.then(|| outputs.next()).flatten();

        let raw_sink = async {
            let mut file = tokio::fs::File::create(&raw_path)
                .await
                .map_err(content::Error::from)?;
            let total = content::files::write_blobs(&mut file, raw_out, cancel).await?;
            file.sync_all().await.map_err(content::Error::from)?;
            Ok::<u64, Error>(total)
        };
        let index_sink = async {
            let Some(out) = index_out else {
                return Ok(());
            };
            let index = content::Index::build(out, cancel).await?;
            let mut file = tokio::fs::File::create(&index_path)
                .await
                .map_err(content::Error::from)?;
            let encoded = serde_json::to_vec(&index).map_err(content::Error::from)?;
            use tokio::io::AsyncWriteExt;
            file.write_all(&encoded).await.map_err(content::Error::from)?;
            file.sync_all().await.map_err(content::Error::from)?;
            Ok::<(), Error>(())
        };
        let graphql_sink = async {
            let Some(out) = graphql_out else {
                return Ok(None);
            };
            let accumulator =
                graphql::accumulate(out, self.config.merge_policy, cancel).await?;
            Ok::<_, Error>(Some(accumulator))
        };

        let (raw_result, index_result, graphql_result) =
            tokio::join!(raw_sink, index_sink, graphql_sink);

        let mut errors = Vec::new();
        let total = match raw_result {
            Ok(total) => total,
            Err(err) => {
                errors.push(err);
                0
            }
        };
        if let Err(err) = index_result {
            errors.push(err);
        }
        let accumulator = match graphql_result {
            Ok(accumulator) => accumulator,
            Err(err) => {
                errors.push(err);
                None
            }
        };
        if errors.len() == 1 {
            return Err(errors.remove(0));
        } else if !errors.is_empty() {
            return Err(Error::Sinks(errors));
        }

        // The stream is drained; the query schema is generated before commit
        // so a generation failure aborts the whole store.
        let schema = match &accumulator {
            Some(accumulator) if !accumulator.is_empty() => {
                Some(graphql::build_schema(accumulator)?)
            }
            _ => None,
        };

        let dir = self.config.root.join(catalog);
        let staged = staging.into_path();
        if let Err(err) = self.commit(catalog, &staged, &dir, schema) {
            if let Err(cleanup) = content::fsutil::set_read_only(&staged, false)
                .and_then(|()| std::fs::remove_dir_all(&staged))
            {
                tracing::warn!(catalog, error = %cleanup, "failed to clean staged catalog tree");
            }
            return Err(err);
        }

        tracing::info!(catalog, bytes = total, "committed catalog content");
        Ok(())
    }

    fn commit(
        &self,
        catalog: &str,
        staged: &std::path::Path,
        dir: &std::path::Path,
        schema: Option<async_graphql::dynamic::Schema>,
    ) -> Result<(), Error> {
        content::fsutil::set_read_only(staged, true)?;

        let mut catalogs = self.catalogs.write().unwrap();
        content::fsutil::replace_dir(staged, dir)?;
        catalogs.insert(
            catalog.to_string(),
            Arc::new(Catalog {
                raw: dir.join(RAW_FILE),
                index: self.config.index.then(|| dir.join(INDEX_FILE)),
                schema,
            }),
        );
        Ok(())
    }

    /// Remove the catalog's registration and committed directory; absent
    /// catalogs are not an error.
    pub fn delete(&self, catalog: &str) -> Result<(), Error> {
        validate_name(catalog)?;
        self.catalogs.write().unwrap().remove(catalog);

        let dir = self.config.root.join(catalog);
        match std::fs::symlink_metadata(&dir) {
            Ok(_) => {
                content::fsutil::set_read_only(&dir, false)?;
                std::fs::remove_dir_all(&dir)?;
                tracing::info!(catalog, "deleted catalog content");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether the catalog is registered and its raw file is still a regular
    /// file on disk.
    pub fn content_exists(&self, catalog: &str) -> bool {
        let Ok(entry) = self.lookup(catalog) else {
            return false;
        };
        std::fs::metadata(&entry.raw)
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// The committed raw file's path.
    pub fn raw_path(&self, catalog: &str) -> Result<PathBuf, Error> {
        Ok(self.lookup(catalog)?.raw.clone())
    }

    /// A freshly opened handle onto the committed raw file. The handle keeps
    /// streaming the same content even if the catalog is replaced while it
    /// is open.
    pub async fn raw_file(&self, catalog: &str) -> Result<tokio::fs::File, Error> {
        let entry = self.lookup(catalog)?;
        Ok(tokio::fs::File::open(&entry.raw).await?)
    }

    /// The committed raw file's modification time.
    pub fn raw_mod_time(&self, catalog: &str) -> Result<SystemTime, Error> {
        let entry = self.lookup(catalog)?;
        Ok(content::fsutil::mod_time(&entry.raw)?)
    }

    /// Stream the blobs matching the given keys as JSONL chunks, in raw-file
    /// offset order. Empty keys apply no filter on their axis.
    pub async fn metas(
        &self,
        catalog: &str,
        schema: &str,
        package: &str,
        name: &str,
    ) -> Result<impl Stream<Item = std::io::Result<Bytes>> + Send + 'static, Error> {
        let entry = self.lookup(catalog)?;
        let index = self.load_index(catalog, &entry).await?;
        let file = tokio::fs::File::open(&entry.raw).await?;
        Ok(content::read::stream_sections(
            file,
            index.sections(schema, package, name),
        ))
    }

    /// Execute a GraphQL query against the catalog's generated schema. The
    /// request is scoped to the raw file and index as committed at request
    /// time; engine errors travel in the response, not as an Err.
    pub async fn graphql(
        &self,
        catalog: &str,
        query: String,
    ) -> Result<async_graphql::Response, Error> {
        let entry = self.lookup(catalog)?;
        let Some(schema) = entry.schema.clone() else {
            return Err(Error::NoSchema(catalog.to_string()));
        };
        let index = self.load_index(catalog, &entry).await?;
        let file = tokio::fs::File::open(&entry.raw).await?;

        let request = async_graphql::Request::new(query)
            .data(graphql::Scope::new(file, index))
            .data(graphql::JqCache::default());
        Ok(schema.execute(request).await)
    }

    fn lookup(&self, catalog: &str) -> Result<Arc<Catalog>, Error> {
        let catalogs = self.catalogs.read().unwrap();
        catalogs
            .get(catalog)
            .cloned()
            .ok_or_else(|| Error::NotFound(catalog.to_string()))
    }

    // Load the catalog's index from disk, collapsing concurrent cold loads
    // into one parse. Parsed indices are not cached across request batches.
    async fn load_index(
        &self,
        catalog: &str,
        entry: &Catalog,
    ) -> Result<Arc<content::Index>, Error> {
        let Some(path) = entry.index.clone() else {
            return Err(Error::NoIndex(catalog.to_string()));
        };
        let index = self
            .flights
            .run(catalog, move || async move {
                let bytes = tokio::fs::read(&path).await?;
                Ok(Arc::new(serde_json::from_slice::<content::Index>(&bytes)?))
            })
            .await
            .map_err(content::Error::from)?;
        Ok(index)
    }
}

// A catalog names one directory under the root; it must be a single, visible
// path segment.
fn validate_name(catalog: &str) -> Result<(), Error> {
    let valid = !catalog.is_empty()
        && !catalog.starts_with('.')
        && !catalog
            .chars()
            .any(|c| std::path::is_separator(c) || c == '\0');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(catalog.to_string()))
    }
}
