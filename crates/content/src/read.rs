use crate::Section;
use bytes::Bytes;
use futures::Stream;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Read one section's bytes from the raw file.
pub async fn read_section(
    file: &mut tokio::fs::File,
    section: Section,
) -> std::io::Result<Bytes> {
    file.seek(SeekFrom::Start(section.offset)).await?;
    let mut buf = vec![0; section.length as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf.into())
}

/// Stream the given sections of `file`, one Bytes chunk per section. With
/// sections in ascending offset order and one blob per section, the
/// concatenated chunks form a valid JSONL document.
pub fn stream_sections(
    file: tokio::fs::File,
    sections: Vec<Section>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    futures::stream::try_unfold(
        (file, sections.into_iter()),
        |(mut file, mut sections)| async move {
            let Some(section) = sections.next() else {
                return Ok(None);
            };
            let chunk = read_section(&mut file, section).await?;
            Ok(Some((chunk, (file, sections))))
        },
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Write;

    #[tokio::test]
    async fn test_stream_sections_slices_blobs() {
        let blobs = [
            "{\"schema\":\"olm.package\",\"name\":\"p\"}\n",
            "{\"schema\":\"olm.channel\",\"name\":\"c\",\"package\":\"p\"}\n",
            "{\"schema\":\"olm.bundle\",\"name\":\"b\",\"package\":\"p\"}\n",
        ];
        let mut raw = tempfile::NamedTempFile::new().unwrap();
        let mut sections = Vec::new();
        let mut offset = 0;
        for blob in &blobs {
            raw.write_all(blob.as_bytes()).unwrap();
            sections.push(Section {
                offset,
                length: blob.len() as u64,
            });
            offset += blob.len() as u64;
        }
        raw.flush().unwrap();

        let file = tokio::fs::File::open(raw.path()).await.unwrap();
        let chunks: Vec<Bytes> = stream_sections(file, vec![sections[2], sections[0]])
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], blobs[2].as_bytes());
        assert_eq!(chunks[1], blobs[0].as_bytes());

        let file = tokio::fs::File::open(raw.path()).await.unwrap();
        let chunks: Vec<Bytes> = stream_sections(file, Vec::new()).try_collect().await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_read_section_past_eof_fails() {
        let mut raw = tempfile::NamedTempFile::new().unwrap();
        raw.write_all(b"{}\n").unwrap();

        let mut file = tokio::fs::File::open(raw.path()).await.unwrap();
        let result = read_section(
            &mut file,
            Section {
                offset: 0,
                length: 100,
            },
        )
        .await;
        assert!(result.is_err());
    }
}
