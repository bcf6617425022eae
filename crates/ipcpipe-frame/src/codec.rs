use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Frame header: payload length as a big-endian `u32`.
pub const HEADER_SIZE: usize = 4;

/// Largest payload the wire format can describe.
pub const MAX_WIRE_PAYLOAD: usize = u32::MAX as usize;

/// Configuration for framed pipe I/O.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: the wire limit, i.e. no ceiling.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_WIRE_PAYLOAD,
        }
    }
}

impl FrameConfig {
    pub(crate) fn check(&self, size: usize) -> Result<()> {
        let max = self.max_payload_size.min(MAX_WIRE_PAYLOAD);
        if size > max {
            return Err(FrameError::PayloadTooLarge { size, max });
        }
        Ok(())
    }
}

/// Encode one frame into `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────────────┐
/// │ Length (4B)  │ Payload         │
/// │ big-endian   │ (Length bytes)  │
/// └──────────────┴─────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: MAX_WIRE_PAYLOAD,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32(len);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` until a complete frame is buffered; on success the frame
/// bytes are consumed.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    let Some(header) = src.first_chunk::<HEADER_SIZE>() else {
        return Ok(None);
    };
    let len = u32::from_be_bytes(*header) as usize;
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }
    if src.len() < HEADER_SIZE + len {
        src.reserve(HEADER_SIZE + len - src.len());
        return Ok(None);
    }
    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(len).freeze()))
}

/// [`tokio_util::codec`] adapter for length-prefixed frames on any byte
/// stream, e.g. stdin/stdout.
#[derive(Debug, Clone)]
pub struct LengthPrefixCodec {
    max_payload_size: usize,
}

impl LengthPrefixCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            max_payload_size: config.max_payload_size.min(MAX_WIRE_PAYLOAD),
        }
    }
}

impl Default for LengthPrefixCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LengthPrefixCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let expected = match src.first_chunk::<HEADER_SIZE>() {
            Some(header) => HEADER_SIZE + u32::from_be_bytes(*header) as usize,
            None => HEADER_SIZE,
        };
        Err(FrameError::Truncated {
            expected,
            received: src.len(),
        })
    }
}

impl Encoder<Bytes> for LengthPrefixCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[test]
    fn header_is_big_endian_length() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf).unwrap();
        assert_eq!(&buf[..], b"\x00\x00\x00\x05hello");
    }

    #[test]
    fn decode_waits_for_complete_header_and_payload() {
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(decode_frame(&mut buf, MAX_WIRE_PAYLOAD).unwrap().is_none());

        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);
        assert!(decode_frame(&mut buf, MAX_WIRE_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn decode_consumes_consecutive_frames() {
        let mut buf = BytesMut::new();
        encode_frame(b"first", &mut buf).unwrap();
        encode_frame(b"", &mut buf).unwrap();
        encode_frame(b"third", &mut buf).unwrap();

        let frames: Vec<_> = std::iter::from_fn(|| decode_frame(&mut buf, 64).unwrap()).collect();
        assert_eq!(frames, [&b"first"[..], &b""[..], &b"third"[..]]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_announced_length_over_ceiling() {
        let mut buf = BytesMut::new();
        buf.put_u32(32 * 1024 * 1024);
        let err = decode_frame(&mut buf, 1024).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge {
                size: 33_554_432,
                max: 1024
            }
        ));
    }

    #[test]
    fn config_ceiling_is_checked() {
        let config = FrameConfig {
            max_payload_size: 3,
        };
        config.check(3).unwrap();
        assert!(matches!(
            config.check(4),
            Err(FrameError::PayloadTooLarge { size: 4, max: 3 })
        ));
    }

    #[tokio::test]
    async fn framed_write_then_read_over_byte_stream() {
        let mut wire = Vec::new();
        {
            let mut sink = FramedWrite::new(&mut wire, LengthPrefixCodec::new());
            sink.send(Bytes::from_static(b"one")).await.unwrap();
            sink.send(Bytes::from_static(b"two")).await.unwrap();
        }

        let mut stream = FramedRead::new(&wire[..], LengthPrefixCodec::new());
        assert_eq!(stream.next().await.unwrap().unwrap(), "one");
        assert_eq!(stream.next().await.unwrap().unwrap(), "two");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn framed_read_reports_truncated_tail() {
        let wire: &[u8] = b"\x00\x00\x00\x0aabc";
        let mut stream = FramedRead::new(wire, LengthPrefixCodec::new());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 14,
                received: 7
            }
        ));
    }

    #[tokio::test]
    async fn encoder_honours_ceiling() {
        let codec = LengthPrefixCodec::with_config(&FrameConfig {
            max_payload_size: 2,
        });
        let mut sink = FramedWrite::new(Vec::new(), codec);
        let err = sink.send(Bytes::from_static(b"abc")).await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 3, max: 2 }));
        assert!(sink.get_ref().is_empty());
    }
}
