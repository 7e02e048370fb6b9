//! Buffered line reader for the SMTP command channel.
//!
//! Bytes are read in fixed-size chunks into one growable buffer and handed
//! out a line at a time. Several complete lines may sit in the buffer at
//! once; callers drain them before more bytes are requested, which is how
//! pipelined commands are served in arrival order.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{Error, Result};

/// Reads LF-terminated lines with a size cap and an inactivity timeout.
#[derive(Debug)]
pub struct LineReader {
    buffer: BytesMut,
    chunk: Vec<u8>,
    max_size: Option<usize>,
    timeout: Option<Duration>,
    last_line: Instant,
}

impl LineReader {
    /// Creates a reader.
    ///
    /// `max_size` caps bytes buffered without a line feed and `timeout` is
    /// the longest wait for the next complete line. `None` disables either.
    #[must_use]
    pub fn new(chunk_size: usize, max_size: Option<usize>, timeout: Option<Duration>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(chunk_size),
            chunk: vec![0; chunk_size.max(1)],
            max_size,
            timeout,
            last_line: Instant::now(),
        }
    }

    /// Creates a reader from the server I/O settings.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.io_buffer_chunk_size,
            config.io_buffer_max_size,
            config.io_cmd_timeout,
        )
    }

    /// Returns the next line, including its terminator.
    ///
    /// Cancel safe: if the future is dropped, no buffered byte is lost.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no complete line arrived in time.
    /// - [`Error::BufferOverrun`] if the unterminated input exceeds the cap.
    /// - [`Error::ConnectionClosed`] on end of stream.
    /// - [`Error::Io`] if the read fails.
    pub async fn read_line<S>(&mut self, stream: &mut S) -> Result<Vec<u8>>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(line) = self.next_buffered_line() {
                self.last_line = Instant::now();
                return Ok(line);
            }
            if let Some(max) = self.max_size
                && self.buffer.len() > max
            {
                return Err(Error::BufferOverrun(max));
            }

            let read = match self.timeout {
                Some(timeout) => {
                    let deadline = self.last_line + timeout;
                    tokio::time::timeout_at(deadline, stream.read(&mut self.chunk))
                        .await
                        .map_err(|_| Error::Timeout(timeout))??
                }
                None => stream.read(&mut self.chunk).await?,
            };
            if read == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&self.chunk[..read]);
        }
    }

    /// Returns true if a complete line is already buffered.
    #[must_use]
    pub fn has_buffered_line(&self) -> bool {
        self.buffer.contains(&b'\n')
    }

    /// Takes every buffered byte, leaving the reader empty.
    pub fn take_buffered(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Restarts the inactivity window.
    pub fn reset_timeout(&mut self) {
        self.last_line = Instant::now();
    }

    fn next_buffered_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        Some(self.buffer.split_to(pos + 1).to_vec())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_single_line() {
        let mut mock = Builder::new().read(b"EHLO test\r\n").build();
        let mut reader = LineReader::new(4096, None, None);

        let line = reader.read_line(&mut mock).await.unwrap();
        assert_eq!(line, b"EHLO test\r\n");
        assert!(!reader.has_buffered_line());
    }

    #[tokio::test]
    async fn test_pipelined_lines_come_from_buffer() {
        let mut mock = Builder::new()
            .read(b"MAIL FROM:<a@b>\r\nRCPT TO:<c@d>\r\nDA")
            .read(b"TA\r\n")
            .build();
        let mut reader = LineReader::new(4096, None, None);

        assert_eq!(reader.read_line(&mut mock).await.unwrap(), b"MAIL FROM:<a@b>\r\n");
        assert!(reader.has_buffered_line());
        assert_eq!(reader.read_line(&mut mock).await.unwrap(), b"RCPT TO:<c@d>\r\n");
        assert!(!reader.has_buffered_line());
        assert_eq!(reader.read_line(&mut mock).await.unwrap(), b"DATA\r\n");
    }

    #[tokio::test]
    async fn test_small_chunks_reassemble_line() {
        let mut mock = Builder::new().read(b"NOOP\r\n").build();
        let mut reader = LineReader::new(2, None, None);

        assert_eq!(reader.read_line(&mut mock).await.unwrap(), b"NOOP\r\n");
    }

    #[tokio::test]
    async fn test_bare_lf_is_a_line() {
        let mut mock = Builder::new().read(b"NOOP\n").build();
        let mut reader = LineReader::new(4096, None, None);

        assert_eq!(reader.read_line(&mut mock).await.unwrap(), b"NOOP\n");
    }

    #[tokio::test]
    async fn test_eof_reports_closed() {
        let mut mock = Builder::new().read(b"partial").build();
        let mut reader = LineReader::new(4096, None, None);

        let err = reader.read_line(&mut mock).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_buffer_overrun() {
        let mut mock = Builder::new().read(b"0123456789ab").build();
        let mut reader = LineReader::new(4, Some(8), None);

        let err = reader.read_line(&mut mock).await.unwrap_err();
        assert!(matches!(err, Error::BufferOverrun(8)));
    }

    #[tokio::test]
    async fn test_lines_within_cap_are_not_overrun() {
        let mut mock = Builder::new().read(b"0123\r\n4567\r\n").build();
        let mut reader = LineReader::new(16, Some(8), None);

        assert_eq!(reader.read_line(&mut mock).await.unwrap(), b"0123\r\n");
        assert_eq!(reader.read_line(&mut mock).await.unwrap(), b"4567\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_line() {
        let (_client, mut server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(64, None, Some(Duration::from_secs(30)));

        let err = reader.read_line(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(t) if t == Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_input_does_not_extend_timeout() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(64, None, Some(Duration::from_secs(30)));

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            client.write_all(b"NO").await.unwrap();
            tokio::time::sleep(Duration::from_secs(20)).await;
            client.write_all(b"OP\r\n").await.unwrap();
            client
        });

        let err = reader.read_line(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        drop(writer);
    }

    #[tokio::test]
    async fn test_take_buffered_drains_reader() {
        let mut mock = Builder::new().read(b"STARTTLS\r\n\x16\x03\x01").build();
        let mut reader = LineReader::new(4096, None, None);

        assert_eq!(reader.read_line(&mut mock).await.unwrap(), b"STARTTLS\r\n");
        assert_eq!(&reader.take_buffered()[..], b"\x16\x03\x01");
        assert!(reader.take_buffered().is_empty());
    }
}
