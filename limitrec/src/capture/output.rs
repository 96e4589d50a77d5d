//! Capture tool output handling.
//!
//! yt-dlp and ffmpeg redraw progress lines with `\r`, so piped output is
//! split on either `\r` or `\n` to surface updates as they happen.

use std::collections::VecDeque;
use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Yields trimmed, non-empty records delimited by `\r` or `\n`.
pub struct RecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    eof: bool,
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            eof: false,
        }
    }

    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(record) = self.take_record() {
                return Ok(Some(record));
            }
            if self.eof {
                return Ok(self.take_rest());
            }

            let chunk = self.reader.fill_buf().await?;
            if chunk.is_empty() {
                self.eof = true;
                continue;
            }
            let n = chunk.len();
            self.pending.extend_from_slice(chunk);
            self.reader.consume(n);
        }
    }

    fn take_record(&mut self) -> Option<String> {
        while let Some(idx) = self.pending.iter().position(|b| matches!(b, b'\r' | b'\n')) {
            let raw: Vec<u8> = self.pending.drain(..=idx).collect();
            let text = String::from_utf8_lossy(&raw[..idx]).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
        None
    }

    fn take_rest(&mut self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!text.is_empty()).then_some(text)
    }
}

/// The last `capacity` records of a stream.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_splits_progress_redraws() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            tx.write_all(b"[download]  1.0%\r[download]  2.0%\r\n\nERROR: gone\nlast")
                .await
                .unwrap();
        });

        let mut reader = RecordReader::new(rx);
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().await.unwrap() {
            records.push(record);
        }

        assert_eq!(
            records,
            vec!["[download]  1.0%", "[download]  2.0%", "ERROR: gone", "last"]
        );
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        let mut tail = OutputTail::new(2);
        for line in ["a", "b", "c"] {
            tail.push(line.to_string());
        }
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.joined(), "b\nc");
    }
}
