//! Stream plumbing: caller-supplied input sources and output sinks
//!
//! Executors take `&self`, so sources and sinks are shared handles. A source
//! is consumed by the first call that reads it. A sink may be cloned into both
//! the stdout and stderr slots; each chunk is written under the sink's lock.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

const CHUNK_SIZE: usize = 8 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Input fed to a command's stdin
#[derive(Clone)]
pub struct Source(Arc<Mutex<BoxedReader>>);

impl Source {
    /// Wrap any async reader
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self(Arc::new(Mutex::new(Box::new(reader))))
    }

    /// Source reading from an in-memory byte buffer
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(io::Cursor::new(bytes.into()))
    }

    /// Copy everything left in the source into `writer`, then shut it down
    ///
    /// A reader that went away before the input was exhausted is not an error.
    pub(crate) async fn feed<W>(&self, mut writer: W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut reader = self.0.lock().await;
        let copied = match tokio::io::copy(&mut *reader, &mut writer).await {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(0),
            Err(e) => return Err(e),
        };
        match writer.shutdown().await {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
            _ => Ok(copied),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source").finish_non_exhaustive()
    }
}

/// Destination for a command's stdout or stderr
#[derive(Clone)]
pub struct Sink(Arc<Mutex<BoxedWriter>>);

impl Sink {
    /// Wrap any async writer
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// Write one chunk
    pub(crate) async fn write(&self, chunk: &[u8]) -> io::Result<()> {
        let mut writer = self.0.lock().await;
        writer.write_all(chunk).await
    }

    pub(crate) async fn flush(&self) -> io::Result<()> {
        let mut writer = self.0.lock().await;
        writer.flush().await
    }

    /// Copy `reader` into the sink chunk by chunk until EOF
    pub(crate) async fn pump<R>(&self, mut reader: R) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.write(&buf[..n]).await?;
        }
        self.flush().await
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink").finish_non_exhaustive()
    }
}

/// Cloneable in-memory writer
///
/// Useful as a [`Sink`] when the caller wants to inspect redirected output
/// after the call.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink writing into this buffer
    #[must_use]
    pub fn sink(&self) -> Sink {
        Sink::new(self.clone())
    }

    /// Copy of the bytes written so far
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Bytes written so far, lossily decoded as UTF-8
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Stream configuration shared by both executors
///
/// Unset stdout/stderr are captured and returned; unset stdin reads nothing.
#[derive(Debug, Clone, Default)]
pub struct Stdio {
    /// Input source
    pub stdin: Option<Source>,
    /// Output sink
    pub stdout: Option<Sink>,
    /// Error sink
    pub stderr: Option<Sink>,
}

impl Stdio {
    /// Feed stdin from `source`
    #[must_use]
    pub fn with_stdin(mut self, source: Source) -> Self {
        self.stdin = Some(source);
        self
    }

    /// Redirect stdout to `sink`
    #[must_use]
    pub fn with_stdout(mut self, sink: Sink) -> Self {
        self.stdout = Some(sink);
        self
    }

    /// Redirect stderr to `sink`
    #[must_use]
    pub fn with_stderr(mut self, sink: Sink) -> Self {
        self.stderr = Some(sink);
        self
    }
}

/// Either collect a stream into memory or forward it to a sink
pub(crate) async fn capture_or_pump<R>(reader: R, sink: Option<&Sink>) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    match sink {
        Some(sink) => {
            sink.pump(reader).await?;
            Ok(Vec::new())
        }
        None => {
            let mut reader = reader;
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_feed_copies_everything() {
        let source = Source::from_bytes("Hello, world");
        let buffer = SharedBuffer::new();

        let copied = source.feed(buffer.clone()).await.unwrap();

        assert_eq!(copied, 12);
        assert_eq!(buffer.to_string_lossy(), "Hello, world");
    }

    #[tokio::test]
    async fn test_source_is_consumed_once() {
        let source = Source::from_bytes("once");
        let first = SharedBuffer::new();
        let second = SharedBuffer::new();

        source.feed(first.clone()).await.unwrap();
        source.feed(second.clone()).await.unwrap();

        assert_eq!(first.to_string_lossy(), "once");
        assert!(second.contents().is_empty());
    }

    #[tokio::test]
    async fn test_shared_sink_collects_both_streams() {
        let buffer = SharedBuffer::new();
        let sink = buffer.sink();

        let (a, b) = tokio::join!(
            capture_or_pump(&b"first\n"[..], Some(&sink)),
            capture_or_pump(&b"second\n"[..], Some(&sink)),
        );

        assert!(a.unwrap().is_empty());
        assert!(b.unwrap().is_empty());
        let text = buffer.to_string_lossy();
        assert!(text.contains("first\n"));
        assert!(text.contains("second\n"));
        assert_eq!(text.len(), 13);
    }

    #[tokio::test]
    async fn test_capture_without_sink() {
        let captured = capture_or_pump(&b"captured"[..], None).await.unwrap();

        assert_eq!(captured, b"captured");
    }
}
