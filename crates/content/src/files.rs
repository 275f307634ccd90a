use crate::Error;
use fbc::Meta;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Files stores each catalog's raw content as a single JSONL file directly
/// under its root, staged through a temporary sibling and atomically renamed
/// into place. A registry maps catalog names to their finalized paths.
///
/// Store calls for the same catalog are serialized by the caller; the atomic
/// rename means an unserialized overlap still cannot corrupt readers.
pub struct Files {
    root: PathBuf,
    registry: RwLock<HashMap<String, PathBuf>>,
}

impl Files {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            registry: RwLock::new(HashMap::new()),
        })
    }

    /// Write every blob of `stream` to a fresh temporary file, then atomically
    /// replace the catalog's registered file. On cancellation or a stream
    /// error the temporary file is removed and any prior registration is left
    /// untouched.
    pub async fn store<S>(
        &self,
        catalog: &str,
        stream: S,
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        S: Stream<Item = Result<Meta, fbc::Error>> + Send,
    {
        let staged = tempfile::Builder::new()
            .prefix(&format!("{catalog}-tmp-"))
            .suffix(".jsonl")
            .tempfile_in(&self.root)?;

        let mut file = tokio::fs::File::from_std(staged.reopen()?);
        let total = write_blobs(&mut file, stream, cancel).await?;
        file.sync_all().await?;

        let finalized = self.root.join(format!("{catalog}.jsonl"));
        staged.persist(&finalized).map_err(|err| err.error)?;
        tracing::debug!(catalog, bytes = total, path = %finalized.display(), "stored raw catalog file");

        let mut registry = self.registry.write().unwrap();
        registry.insert(catalog.to_string(), finalized);
        Ok(())
    }

    /// Open a fresh handle onto the catalog's raw file. The caller closes it.
    pub async fn get(&self, catalog: &str) -> Result<tokio::fs::File, Error> {
        let path = self.path(catalog)?;
        Ok(tokio::fs::File::open(path).await?)
    }

    /// The registered path of the catalog's raw file.
    pub fn path(&self, catalog: &str) -> Result<PathBuf, Error> {
        let registry = self.registry.read().unwrap();
        registry
            .get(catalog)
            .cloned()
            .ok_or_else(|| Error::NotFound(catalog.to_string()))
    }

    /// Remove the catalog's file and registration. Absent catalogs are not an
    /// error.
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

    /// Whether the registered path still references a regular file on disk.
    pub fn exists(&self, catalog: &str) -> bool {
        let Ok(path) = self.path(catalog) else {
            return false;
        };
        std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Drain `stream` into `file`, writing each blob verbatim with no added
/// framing, and return the total bytes written. Cancellation is honored
/// between records.
pub async fn write_blobs<S>(
    file: &mut tokio::fs::File,
    stream: S,
    cancel: &CancellationToken,
) -> Result<u64, Error>
where
    S: Stream<Item = Result<Meta, fbc::Error>> + Send,
{
    futures::pin_mut!(stream);
    let mut total = 0;

    loop {
        let meta = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            next = stream.next() => match next {
                None => break,
                Some(result) => result?,
            },
        };
        file.write_all(&meta.blob).await?;
        total += meta.blob.len() as u64;
    }
    file.flush().await?;
    Ok(total)
}
