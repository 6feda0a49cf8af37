//! Run log file
//!
//! One JSON object per line, appended and flushed line by line. Readers work
//! on byte offsets and only ever consume complete lines, so polling while the
//! writer is mid-line is safe.

use chrono::Utc;
use conduit_core::domain::run::{LogLine, LogStream};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::warn;

/// Append-only writer owned by a run's pump task
pub struct LogWriter {
    file: File,
    sequence: u64,
}

impl LogWriter {
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self { file, sequence: 0 })
    }

    /// Appends one record and flushes it
    pub async fn append(&mut self, stream: LogStream, text: String) -> std::io::Result<()> {
        self.sequence += 1;
        let record = LogLine {
            sequence: self.sequence,
            timestamp: Utc::now(),
            stream,
            text,
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await
    }

    pub fn lines_written(&self) -> u64 {
        self.sequence
    }
}

/// Reads every complete line past `offset`
///
/// Returns the decoded records (at most the `limit` most recent, 0 meaning no
/// limit) and the offset just past the last complete line.
pub async fn read_from(
    path: &Path,
    offset: u64,
    limit: usize,
) -> std::io::Result<(Vec<LogLine>, u64)> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), offset)),
        Err(e) => return Err(e),
    };

    let len = file.metadata().await?.len();
    if offset >= len {
        return Ok((Vec::new(), offset));
    }

    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut buf).await?;

    let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
        return Ok((Vec::new(), offset));
    };
    let complete = &buf[..=last_newline];
    let next_offset = offset + complete.len() as u64;

    let mut items = decode(complete);
    if limit > 0 && items.len() > limit {
        items.drain(..items.len() - limit);
    }

    Ok((items, next_offset))
}

/// Text of the last `n` lines of a log
pub async fn tail(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let (items, _) = read_from(path, 0, n).await?;
    Ok(items.into_iter().map(|l| l.text).collect())
}

fn decode(complete: &[u8]) -> Vec<LogLine> {
    complete
        .split(|b| *b == b'\n')
        .filter(|raw| !raw.is_empty())
        .filter_map(|raw| match serde_json::from_slice::<LogLine>(raw) {
            Ok(line) => Some(line),
            Err(e) => {
                warn!("Skipping malformed log record: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");

        let mut writer = LogWriter::create(&path).await.unwrap();
        writer.append(LogStream::Stdout, "one".into()).await.unwrap();
        writer.append(LogStream::Stderr, "two".into()).await.unwrap();
        assert_eq!(writer.lines_written(), 2);

        let (items, offset) = read_from(&path, 0, 0).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].sequence, 1);
        assert_eq!(items[1].stream, LogStream::Stderr);
        assert_eq!(offset, tokio::fs::metadata(&path).await.unwrap().len());

        let (again, same) = read_from(&path, offset, 0).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(same, offset);
    }

    #[tokio::test]
    async fn test_partial_trailing_line_is_not_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");

        let mut writer = LogWriter::create(&path).await.unwrap();
        writer.append(LogStream::Stdout, "whole".into()).await.unwrap();
        let whole_len = tokio::fs::metadata(&path).await.unwrap().len();

        let mut raw = OpenOptions::new().append(true).open(&path).await.unwrap();
        raw.write_all(br#"{"sequence":2,"timest"#).await.unwrap();
        raw.flush().await.unwrap();

        let (items, offset) = read_from(&path, 0, 0).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(offset, whole_len);
    }

    #[tokio::test]
    async fn test_limit_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");

        let mut writer = LogWriter::create(&path).await.unwrap();
        for i in 0..5 {
            writer.append(LogStream::Stdout, format!("line {}", i)).await.unwrap();
        }

        let (items, _) = read_from(&path, 0, 2).await.unwrap();
        let seqs: Vec<u64> = items.iter().map(|l| l.sequence).collect();
        assert_eq!(seqs, vec![4, 5]);

        assert_eq!(tail(&path, 1).await.unwrap(), vec!["line 4".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let (items, offset) = read_from(Path::new("/nonexistent/log.jsonl"), 7, 0)
            .await
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(offset, 7);
    }
}
