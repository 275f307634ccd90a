use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

/// Meta is one File-Based-Catalog record: the `schema`, `package`, and `name`
/// routing fields extracted from its top level, plus the verbatim blob bytes.
///
/// `blob` is never re-encoded, so byte offsets and content hashes over stored
/// catalog content are stable. It always carries a trailing newline, which
/// makes any concatenation of blobs a valid JSONL document.
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    pub schema: String,
    pub package: String,
    pub name: String,
    pub blob: Bytes,
}

/// MetaStream is the boxed stream of Meta records produced by a catalog walk.
/// An Err item is terminal: the walk stops after yielding it.
pub type MetaStream = futures::stream::BoxStream<'static, Result<Meta, Error>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("decoding FBC blob: {0}")]
    Json(#[source] Arc<serde_json::Error>),
    #[error("FBC blob has no top-level schema field")]
    MissingSchema,
    #[error("reading FBC content: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

// Routing fields of a blob. Everything else stays opaque in `blob`.
#[derive(serde::Deserialize)]
struct Routing {
    #[serde(default)]
    schema: String,
    #[serde(default)]
    package: String,
    #[serde(default)]
    name: String,
}

impl Meta {
    /// Parse one blob into a Meta. The blob must be a JSON object with a
    /// non-empty top-level `schema`; `package` and `name` may be absent.
    /// A trailing newline is appended if `blob` lacks one.
    pub fn parse(blob: Bytes) -> Result<Self, Error> {
        let Routing {
            schema,
            package,
            name,
        } = serde_json::from_slice(&blob)?;

        if schema.is_empty() {
            return Err(Error::MissingSchema);
        }
        let blob = if blob.last() == Some(&b'\n') {
            blob
        } else {
            [blob.as_ref(), b"\n"].concat().into()
        };

        Ok(Self {
            schema,
            package,
            name,
            blob,
        })
    }
}

/// Adapt a JSONL reader into a stream of Meta records, one per line.
/// Blank lines are skipped. The first read or parse error is yielded
/// and ends the stream.
pub fn walk_lines<R>(reader: R) -> impl Stream<Item = Result<Meta, Error>> + Send + 'static
where
    R: tokio::io::AsyncBufRead + Send + Unpin + 'static,
{
    futures::stream::try_unfold(reader, |mut reader| async move {
        loop {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return Ok(None);
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some((Meta::parse(line.into())?, reader)));
        }
    })
}

/// Walk a File-Based-Catalog file tree into a stream of Meta records.
/// Regular files are visited in lexical order, depth-first, and each is
/// read as JSONL. The first error ends the stream.
pub fn walk_dir(root: impl Into<PathBuf>) -> impl Stream<Item = Result<Meta, Error>> + Send + 'static {
    let root = root.into();
    futures::stream::once(async move {
        let mut files = Vec::new();
        list_files(&root, &mut files)?;
        Ok::<_, Error>(futures::stream::iter(files.into_iter().map(Ok::<_, Error>)))
    })
    .try_flatten()
    .and_then(|path: PathBuf| async move {
        let file = tokio::fs::File::open(&path).await?;
        Ok(walk_lines(tokio::io::BufReader::new(file)))
    })
    .try_flatten()
}

fn list_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let kind = entry.file_type()?;
        if kind.is_dir() {
            list_files(&entry.path(), files)?;
        } else if kind.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}
