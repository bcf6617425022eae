use bytes::{Bytes, BytesMut};
use ipcpipe_transport::{Direction, Endpoint};
use tracing::trace;

use crate::codec::{FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Payload buffer growth step; a length prefix alone never allocates more.
#[cfg(unix)]
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Receiving side of a pipe: yields one complete payload per [`get`](Self::get).
///
/// Clones share the endpoint, so concurrent `get`s from several tasks are
/// serialised by its I/O lock.
#[derive(Debug, Clone)]
pub struct PipeReader {
    endpoint: Endpoint,
    config: FrameConfig,
}

impl PipeReader {
    /// Wrap a read endpoint with default configuration.
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        Self::with_config(endpoint, FrameConfig::default())
    }

    /// Wrap a read endpoint with explicit configuration.
    pub fn with_config(endpoint: Endpoint, config: FrameConfig) -> Result<Self> {
        endpoint.expect_direction(Direction::Read)?;
        Ok(Self { endpoint, config })
    }

    /// Receive the next message.
    ///
    /// Returns [`FrameError::Eof`] if the writer closed with no message
    /// pending and [`FrameError::Truncated`] if it closed part-way through one.
    ///
    /// Not cancel-safe: dropping the future part-way through a message (for
    /// example when an outer `tokio::time::timeout` fires) leaves the stream
    /// out of sync. Close the endpoint after a cancelled `get`.
    pub async fn get(&self) -> Result<Bytes> {
        let guard = self.endpoint.lock_io().await?;
        let payload = read_message(&guard, &self.config).await?;
        trace!(endpoint = %self.endpoint, len = payload.len(), "received frame");
        Ok(payload)
    }

    /// Close the endpoint. Fails with `Locked` while a `get` is in flight.
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

    /// Update maximum payload size for subsequent reads.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }
}

impl TryFrom<Endpoint> for PipeReader {
    type Error = FrameError;

    fn try_from(endpoint: Endpoint) -> Result<Self> {
        Self::new(endpoint)
    }
}

#[cfg(unix)]
async fn read_message(
    guard: &ipcpipe_transport::IoGuard<'_>,
    config: &FrameConfig,
) -> Result<Bytes> {
    let engine = crate::io::Engine::readable(guard)?;

    let mut header = [0u8; HEADER_SIZE];
    match engine.read_fill(&mut header).await? {
        0 => return Err(FrameError::Eof),
        HEADER_SIZE => {}
        received => {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE,
                received,
            })
        }
    }
    let len = u32::from_be_bytes(header) as usize;
    config.check(len)?;

    let mut payload = BytesMut::new();
    while payload.len() < len {
        let start = payload.len();
        let step = (len - start).min(READ_CHUNK_SIZE);
        payload.resize(start + step, 0);
        let got = engine.read_fill(&mut payload[start..]).await?;
        if got < step {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE + len,
                received: HEADER_SIZE + start + got,
            });
        }
    }
    Ok(payload.freeze())
}

#[cfg(not(unix))]
async fn read_message(
    _guard: &ipcpipe_transport::IoGuard<'_>,
    _config: &FrameConfig,
) -> Result<Bytes> {
    Err(ipcpipe_transport::TransportError::Unsupported("cooperative pipe I/O").into())
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use ipcpipe_transport::TransportError;

    use super::*;
    use crate::{pipe, PipeWriter};

    async fn wait_until_busy(endpoint: &Endpoint) {
        for _ in 0..1000 {
            if matches!(endpoint.check_idle(), Err(TransportError::Locked)) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("{endpoint} never became busy");
    }

    fn capacity(reader: &PipeReader) -> usize {
        reader
            .endpoint()
            .pipe_capacity()
            .unwrap()
            .unwrap_or(64 * 1024)
    }

    async fn round_trip(reader: &PipeReader, writer: &PipeWriter, payload: &[u8]) -> Bytes {
        let (sent, received) = tokio::join!(writer.put(payload), reader.get());
        sent.unwrap();
        received.unwrap()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn round_trips_payloads_around_pipe_capacity() {
        let (reader, writer) = pipe().unwrap();
        let cap = capacity(&reader);

        for size in [0, 1, cap - 1, cap, cap + 1, 3 * 1024 * 1024] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let received = round_trip(&reader, &writer, &payload).await;
            assert_eq!(received.len(), size);
            assert_eq!(&received[..], &payload[..]);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn preserves_order_across_sizes() {
        let (reader, writer) = pipe().unwrap();
        let cap = capacity(&reader);
        let payloads = [vec![b'a'; 10], vec![b'b'; 2 * cap], vec![b'c'; 1]];

        let send = async {
            for payload in &payloads {
                writer.put(payload).await.unwrap();
            }
        };
        let receive = async {
            let mut out = Vec::new();
            for _ in 0..payloads.len() {
                out.push(reader.get().await.unwrap());
            }
            out
        };
        let ((), received) = tokio::join!(send, receive);

        for (got, want) in received.iter().zip(&payloads) {
            assert_eq!(&got[..], &want[..]);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_during_pending_get_is_refused() {
        let (reader, writer) = pipe().unwrap();
        let pending = tokio::spawn({
            let reader = reader.clone();
            async move { reader.get().await }
        });
        wait_until_busy(reader.endpoint()).await;

        assert!(matches!(
            reader.close(),
            Err(FrameError::Transport(TransportError::Locked))
        ));
        assert!(!reader.endpoint().is_closed());

        writer.put(b"late").await.unwrap();
        let payload = pending.await.unwrap().unwrap();
        assert_eq!(&payload[..], b"late");
        reader.close().unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn get_after_close_reports_closed() {
        let (reader, _writer) = pipe().unwrap();
        reader.close().unwrap();

        assert!(matches!(
            reader.get().await,
            Err(FrameError::Transport(TransportError::Closed))
        ));
        assert!(matches!(
            reader.close(),
            Err(FrameError::Transport(TransportError::Closed))
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn get_on_foreign_endpoint_is_refused() {
        let (reader, _writer) = pipe().unwrap();
        reader.endpoint().legitimize(1).unwrap();

        let err = reader.get().await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::CrossProcess { owner: 1, .. })
        ));

        reader.endpoint().legitimize(std::process::id()).unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn writer_closed_before_any_byte_is_eof() {
        let (reader, writer) = pipe().unwrap();
        writer.close().unwrap();

        let err = reader.get().await.unwrap_err();
        assert!(matches!(err, FrameError::Eof));
        assert!(err.is_disconnect());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn messages_sent_before_close_are_still_delivered() {
        let (reader, writer) = pipe().unwrap();
        writer.put(b"last words").await.unwrap();
        drop(writer);

        assert_eq!(&reader.get().await.unwrap()[..], b"last words");
        assert!(matches!(reader.get().await, Err(FrameError::Eof)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn writer_closed_mid_payload_is_truncated() {
        let (reader, writer) = pipe().unwrap();
        {
            let io = writer.endpoint().lock_io().await.unwrap();
            assert_eq!(io.write(b"\x00\x00\x00\x0aabc").unwrap(), 7);
        }
        writer.close().unwrap();

        let err = reader.get().await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 14,
                received: 7
            }
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn writer_closed_mid_header_is_truncated() {
        let (reader, writer) = pipe().unwrap();
        {
            let io = writer.endpoint().lock_io().await.unwrap();
            io.write(b"\x00\x00").unwrap();
        }
        writer.close().unwrap();

        assert!(matches!(
            reader.get().await,
            Err(FrameError::Truncated {
                expected: 4,
                received: 2
            })
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn announced_length_over_ceiling_is_rejected() {
        let (mut reader, writer) = pipe().unwrap();
        reader.set_max_payload_size(8);
        writer.put(&[0u8; 16]).await.unwrap();

        assert!(matches!(
            reader.get().await,
            Err(FrameError::PayloadTooLarge { size: 16, max: 8 })
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn get_waits_without_blocking_other_tasks() {
        let (reader, writer) = pipe().unwrap();
        let get = reader.get();
        let sleep = tokio::time::sleep(Duration::from_millis(20));
        tokio::pin!(get);

        tokio::select! {
            _ = &mut get => panic!("nothing was sent"),
            () = sleep => {}
        }
        writer.put(b"now").await.unwrap();
        assert_eq!(&get.await.unwrap()[..], b"now");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_get_leaves_stream_out_of_sync() {
        let (mut reader, writer) = pipe().unwrap();
        reader.set_max_payload_size(16);
        {
            let io = writer.endpoint().lock_io().await.unwrap();
            io.write(b"\x00\x00\x00\x08abc").unwrap();
        }

        let cancelled = tokio::time::timeout(Duration::from_millis(20), reader.get()).await;
        assert!(cancelled.is_err());
        // The lock is released; the endpoint itself is still usable.
        reader.endpoint().check_idle().unwrap();

        {
            let io = writer.endpoint().lock_io().await.unwrap();
            io.write(b"defgh").unwrap();
        }
        writer.put(b"next").await.unwrap();

        // The tail of the cancelled payload is now read as a length prefix.
        assert!(matches!(
            reader.get().await,
            Err(FrameError::PayloadTooLarge { .. })
        ));
        reader.close().unwrap();
    }

    #[test]
    fn rejects_write_endpoint() {
        let (_reader, writer) = pipe().unwrap();
        let err = PipeReader::try_from(writer.into_endpoint()).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::WrongDirection { .. })
        ));
    }
}
