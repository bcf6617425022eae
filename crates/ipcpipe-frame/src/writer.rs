use bytes::BytesMut;
use ipcpipe_transport::{Direction, Endpoint};
use tracing::trace;

use crate::codec::{encode_frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Sending side of a pipe: each [`put`](Self::put) writes one complete frame.
///
/// Concurrent `put`s through clones are serialised by the endpoint's I/O
/// lock; every frame is written end-to-end before the next one starts.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    endpoint: Endpoint,
    config: FrameConfig,
}

impl PipeWriter {
    /// Wrap a write endpoint with default configuration.
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        Self::with_config(endpoint, FrameConfig::default())
    }

    /// Wrap a write endpoint with explicit configuration.
    pub fn with_config(endpoint: Endpoint, config: FrameConfig) -> Result<Self> {
        endpoint.expect_direction(Direction::Write)?;
        Ok(Self { endpoint, config })
    }

    /// Send one message. Oversized payloads are rejected before anything is
    /// written.
    ///
    /// Not cancel-safe: a `put` dropped after part of the frame was written
    /// leaves the reader out of sync. Close the endpoint after a cancelled
    /// `put`.
    pub async fn put(&self, payload: &[u8]) -> Result<()> {
        self.config.check(payload.len())?;
        let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        encode_frame(payload, &mut frame)?;

        let guard = self.endpoint.lock_io().await?;
        write_frame(&guard, &frame).await?;
        trace!(endpoint = %self.endpoint, len = payload.len(), "sent frame");
        Ok(())
    }

    /// Close the endpoint. Fails with `Locked` while a `put` is in flight.
    pub fn close(&self) -> Result<()> {
        Ok(self.endpoint.close()?)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn into_endpoint(self) -> Endpoint {
        self.endpoint
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Update maximum payload size for subsequent writes.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }
}

impl TryFrom<Endpoint> for PipeWriter {
    type Error = FrameError;

    fn try_from(endpoint: Endpoint) -> Result<Self> {
        Self::new(endpoint)
    }
}

#[cfg(unix)]
async fn write_frame(guard: &ipcpipe_transport::IoGuard<'_>, frame: &[u8]) -> Result<()> {
    crate::io::Engine::writable(guard)?.write_all(frame).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn write_frame(_guard: &ipcpipe_transport::IoGuard<'_>, _frame: &[u8]) -> Result<()> {
    Err(ipcpipe_transport::TransportError::Unsupported("cooperative pipe I/O").into())
}

#[cfg(all(test, unix))]
mod tests {
    use ipcpipe_transport::TransportError;

    use super::*;
    use crate::pipe;

    fn capacity(writer: &PipeWriter) -> usize {
        writer
            .endpoint()
            .pipe_capacity()
            .unwrap()
            .unwrap_or(64 * 1024)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_during_pending_put_is_refused() {
        let (reader, writer) = pipe().unwrap();
        let payload = vec![7u8; 2 * capacity(&writer)];
        let pending = tokio::spawn({
            let writer = writer.clone();
            let payload = payload.clone();
            async move { writer.put(&payload).await }
        });

        // The pipe fills up; the put parks with the I/O lock held.
        let mut busy = false;
        for _ in 0..1000 {
            if matches!(writer.endpoint().check_idle(), Err(TransportError::Locked)) {
                busy = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(busy);

        assert!(matches!(
            writer.close(),
            Err(FrameError::Transport(TransportError::Locked))
        ));

        let received = reader.get().await.unwrap();
        pending.await.unwrap().unwrap();
        assert_eq!(received.len(), payload.len());
        writer.close().unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_puts_do_not_interleave() {
        let (reader, writer) = pipe().unwrap();
        let size = 3 * capacity(&writer);

        let tasks: Vec<_> = (0u8..3)
            .map(|tag| {
                let writer = writer.clone();
                tokio::spawn(async move { writer.put(&vec![tag; size]).await })
            })
            .collect();

        let mut tags = Vec::new();
        for _ in 0..tasks.len() {
            let frame = reader.get().await.unwrap();
            assert_eq!(frame.len(), size);
            assert!(frame.iter().all(|b| *b == frame[0]));
            tags.push(frame[0]);
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        tags.sort_unstable();
        assert_eq!(tags, [0, 1, 2]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn put_after_close_reports_closed() {
        let (_reader, writer) = pipe().unwrap();
        writer.close().unwrap();

        assert!(matches!(
            writer.put(b"x").await,
            Err(FrameError::Transport(TransportError::Closed))
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn put_to_closed_reader_fails_with_io_error() {
        let (reader, writer) = pipe().unwrap();
        reader.close().unwrap();

        let err = writer.put(b"nobody listens").await.unwrap_err();
        let FrameError::Io(io) = err else {
            panic!("expected an I/O error, got {err:?}");
        };
        assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn oversized_payload_is_rejected_before_writing() {
        let (reader, mut writer) = pipe().unwrap();
        writer.set_max_payload_size(4);

        assert!(matches!(
            writer.put(b"too long").await,
            Err(FrameError::PayloadTooLarge { size: 8, max: 4 })
        ));
        writer.put(b"ok").await.unwrap();
        assert_eq!(&reader.get().await.unwrap()[..], b"ok");
    }

    #[test]
    fn rejects_read_endpoint() {
        let (reader, _writer) = pipe().unwrap();
        assert!(matches!(
            PipeWriter::try_from(reader.into_endpoint()),
            Err(FrameError::Transport(TransportError::WrongDirection {
                expected: Direction::Write,
                actual: Direction::Read,
            }))
        ));
    }
}
