//! Bulk gallery download: fetches each media blob from the remote store and
//! streams a ZIP archive to the client as it goes.

pub mod zip;

use crate::media_host::{BlobFetcher, FetchError};
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tracing::warn;
use self::zip::{CompressionMethod, ZipStreamWriter};

/// One media reference snapshotted from a gallery at request time.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub url: String,
    pub file_name: String,
}

#[derive(Debug)]
pub enum EntryOutcome {
    /// The blob was fetched and fully written into the archive.
    Archived { bytes: u64 },
    /// The fetch failed; an `ERROR_<name>.txt` placeholder was written.
    Placeholder { reason: String },
}

#[derive(Debug)]
pub struct EntryReport {
    pub file_name: String,
    pub outcome: EntryOutcome,
}

#[derive(Debug, Default)]
pub struct ArchiveSummary {
    pub reports: Vec<EntryReport>,
}

impl ArchiveSummary {
    pub fn archived(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, EntryOutcome::Archived { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.archived()
    }
}

/// The archive job itself faulted. Per-entry fetch failures are NOT errors;
/// they become placeholder entries and the job continues.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The output sink broke (typically the client disconnected) or the
    /// container writer could not make progress.
    #[error("archive stream aborted: {0}")]
    Sink(#[from] std::io::Error),
}

/// Write every entry into a ZIP container on `sink`, strictly in order and
/// one fetch at a time, so peak memory stays at roughly one in-flight chunk
/// regardless of gallery size. Fetch failures are downgraded to placeholder
/// entries; only sink failures abort the job.
pub async fn stream_gallery_archive<W, F>(
    entries: Vec<ArchiveEntry>,
    fetcher: &F,
    sink: W,
) -> Result<ArchiveSummary, ArchiveError>
where
    W: AsyncWrite + Unpin + Send,
    F: BlobFetcher + ?Sized,
{
    let mut writer = ZipStreamWriter::new(sink);
    let mut summary = ArchiveSummary::default();

    for entry in entries {
        let outcome = append_entry(&mut writer, fetcher, &entry).await?;

        if let EntryOutcome::Placeholder { reason } = &outcome {
            warn!(
                "archive entry {} replaced with placeholder: {}",
                entry.file_name, reason
            );
        }

        summary.reports.push(EntryReport {
            file_name: entry.file_name,
            outcome,
        });
    }

    let mut sink = writer.finish().await?;
    tokio::io::AsyncWriteExt::shutdown(&mut sink).await?;

    Ok(summary)
}

async fn append_entry<W, F>(
    writer: &mut ZipStreamWriter<W>,
    fetcher: &F,
    entry: &ArchiveEntry,
) -> Result<EntryOutcome, ArchiveError>
where
    W: AsyncWrite + Unpin + Send,
    F: BlobFetcher + ?Sized,
{
    let mut stream = match fetcher.fetch(&entry.url).await {
        Ok(stream) => stream,
        Err(err) => {
            write_placeholder(writer, entry, &err).await?;
            return Ok(EntryOutcome::Placeholder {
                reason: err.to_string(),
            });
        }
    };

    // Media is stored uncompressed: gallery content is already-encoded
    // JPEG/MP4 and throughput matters more than ratio here.
    writer
        .begin_entry(&entry.file_name, CompressionMethod::Stored)
        .await?;

    let mut written: u64 = 0;
    let mut interrupted: Option<FetchError> = None;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                writer.write_chunk(&bytes).await?;
                written += bytes.len() as u64;
            }
            Err(err) => {
                interrupted = Some(err);
                break;
            }
        }
    }

    // Bytes already emitted cannot be recalled from the stream, so a broken
    // fetch still finalizes the (truncated) entry before the placeholder.
    writer.finish_entry().await?;

    match interrupted {
        None => Ok(EntryOutcome::Archived { bytes: written }),
        Some(err) => {
            write_placeholder(writer, entry, &err).await?;
            Ok(EntryOutcome::Placeholder {
                reason: err.to_string(),
            })
        }
    }
}

async fn write_placeholder<W>(
    writer: &mut ZipStreamWriter<W>,
    entry: &ArchiveEntry,
    err: &FetchError,
) -> Result<(), ArchiveError>
where
    W: AsyncWrite + Unpin + Send,
{
    let name = format!("ERROR_{}.txt", entry.file_name);
    let body = format!(
        "Could not download {} from {}\nReason: {}\n",
        entry.file_name, entry.url, err
    );
    writer.add_text_entry(&name, &body).await?;
    Ok(())
}

const FILENAME_UNSAFE: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Attachment name pair for a gallery download: the Unicode name goes into
/// the RFC 5987 `filename*` parameter, the ASCII name is the plain
/// `filename` fallback for readers that ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFileName {
    pub ascii: String,
    pub unicode: String,
}

pub fn archive_file_name(title: &str) -> ArchiveFileName {
    let sanitized: String = title
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if FILENAME_UNSAFE.contains(&c) { '_' } else { c })
        .collect();

    let sanitized = sanitized.trim().to_string();
    let base = if sanitized.is_empty() {
        "gallery".to_string()
    } else {
        sanitized
    };

    let ascii: String = base
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();

    ArchiveFileName {
        ascii: format!("{}.zip", ascii),
        unicode: format!("{}.zip", base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeBlobFetcher;
    use std::io::{Cursor, Read};

    fn entry(url: &str, name: &str) -> ArchiveEntry {
        ArchiveEntry {
            url: url.to_string(),
            file_name: name.to_string(),
        }
    }

    fn read_archive(bytes: Vec<u8>) -> ::zip::ZipArchive<std::io::Cursor<Vec<u8>>> {
        ::zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("archive should parse")
    }

    fn entry_string(
        archive: &mut ::zip::ZipArchive<std::io::Cursor<Vec<u8>>>,
        index: usize,
    ) -> (String, Vec<u8>) {
        let mut entry = archive.by_index(index).unwrap();
        let name = entry.name().to_string();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        (name, content)
    }

    #[tokio::test]
    async fn all_entries_archived_in_gallery_order() {
        let fetcher = FakeBlobFetcher::new()
            .with_blob("https://m/one.jpg", b"first".to_vec())
            .with_blob("https://m/two.jpg", b"second".to_vec());

        let sink = Cursor::new(Vec::new());
        let summary = stream_gallery_archive(
            vec![
                entry("https://m/one.jpg", "one.jpg"),
                entry("https://m/two.jpg", "two.jpg"),
            ],
            &fetcher,
            sink,
        )
        .await
        .unwrap();

        assert_eq!(summary.archived(), 2);
        assert_eq!(summary.failed(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_becomes_placeholder_entry() {
        let fetcher = FakeBlobFetcher::new().with_blob("https://m/ok.jpg", b"fine".to_vec());

        let collected = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let (writer, mut reader) = tokio::io::duplex(4096);
        let collected_clone = collected.clone();
        let reader_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
                .await
                .unwrap();
            collected_clone.lock().await.extend_from_slice(&buf);
        });

        let summary = stream_gallery_archive(
            vec![
                entry("https://m/ok.jpg", "ok.jpg"),
                entry("https://m/gone.jpg", "gone.jpg"),
            ],
            &fetcher,
            writer,
        )
        .await
        .unwrap();
        reader_task.await.unwrap();

        assert_eq!(summary.archived(), 1);
        assert_eq!(summary.failed(), 1);

        let bytes = collected.lock().await.clone();
        let mut archive = read_archive(bytes);
        assert_eq!(archive.len(), 2);

        let (first, content) = entry_string(&mut archive, 0);
        assert_eq!(first, "ok.jpg");
        assert_eq!(content, b"fine");

        let (second, content) = entry_string(&mut archive, 1);
        assert_eq!(second, "ERROR_gone.jpg.txt");
        let text = String::from_utf8(content).unwrap();
        assert!(text.contains("https://m/gone.jpg"));
    }

    #[tokio::test]
    async fn midstream_failure_keeps_job_going() {
        let fetcher = FakeBlobFetcher::new()
            .with_broken_stream("https://m/broken.jpg", b"partial-".to_vec())
            .with_blob("https://m/after.jpg", b"still here".to_vec());

        let sink = Cursor::new(Vec::new());
        let summary = stream_gallery_archive(
            vec![
                entry("https://m/broken.jpg", "broken.jpg"),
                entry("https://m/after.jpg", "after.jpg"),
            ],
            &fetcher,
            sink,
        )
        .await
        .unwrap();

        assert_eq!(summary.archived(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(matches!(
            summary.reports[0].outcome,
            EntryOutcome::Placeholder { .. }
        ));
        assert!(matches!(
            summary.reports[1].outcome,
            EntryOutcome::Archived { bytes: 10 }
        ));
    }

    #[tokio::test]
    async fn fetches_never_overlap() {
        let fetcher = FakeBlobFetcher::new()
            .with_blob("https://m/a.jpg", vec![1u8; 256 * 1024])
            .with_blob("https://m/b.jpg", vec![2u8; 256 * 1024])
            .with_blob("https://m/c.jpg", vec![3u8; 256 * 1024]);

        let sink = Cursor::new(Vec::new());
        stream_gallery_archive(
            vec![
                entry("https://m/a.jpg", "a.jpg"),
                entry("https://m/b.jpg", "b.jpg"),
                entry("https://m/c.jpg", "c.jpg"),
            ],
            &fetcher,
            sink,
        )
        .await
        .unwrap();

        assert_eq!(fetcher.max_in_flight(), 1);
        assert_eq!(fetcher.fetches(), 3);
    }

    #[tokio::test]
    async fn dropped_reader_aborts_the_job() {
        let fetcher = FakeBlobFetcher::new()
            .with_blob("https://m/a.jpg", vec![0u8; 1024 * 1024])
            .with_blob("https://m/b.jpg", vec![0u8; 1024 * 1024]);

        let (writer, reader) = tokio::io::duplex(4096);
        drop(reader);

        let result = stream_gallery_archive(
            vec![
                entry("https://m/a.jpg", "a.jpg"),
                entry("https://m/b.jpg", "b.jpg"),
            ],
            &fetcher,
            writer,
        )
        .await;

        assert!(matches!(result, Err(ArchiveError::Sink(_))));
        // The second fetch never starts once the sink is gone.
        assert_eq!(fetcher.fetches(), 1);
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        let name = archive_file_name(r#"a/b\c:d*e?f"g<h>i|j"#);
        assert_eq!(name.ascii, "a_b_c_d_e_f_g_h_i_j.zip");
        assert_eq!(name.unicode, name.ascii);
        for c in FILENAME_UNSAFE {
            assert!(!name.ascii.contains(*c));
        }
    }

    #[test]
    fn non_ascii_title_keeps_unicode_and_gets_ascii_fallback() {
        let name = archive_file_name("יום הולדת");
        assert_eq!(name.unicode, "יום הולדת.zip");
        assert_eq!(name.ascii, "_________.zip");
        assert!(name.ascii.is_ascii());
    }

    #[test]
    fn empty_title_falls_back() {
        assert_eq!(archive_file_name("  ").unicode, "gallery.zip");
        assert_eq!(archive_file_name("").ascii, "gallery.zip");
    }
}
