// Length-prefixed framing for the Cast channel.
//
// Each frame is a 4-byte big-endian length followed by exactly that many
// bytes of protobuf-encoded `CastMessage`. Plugs into
// `tokio_util::codec::Framed` on top of the TLS stream.

use bytes::{Buf, BufMut, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;
use crate::message::CastMessage;

/// Largest frame body accepted from a receiver (1 MiB).
pub const MAX_FRAME_LEN: usize = 1 << 20;

const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct CastCodec;

impl Decoder for CastCodec {
    type Item = CastMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;

        if len > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(len).freeze();
        Ok(Some(CastMessage::decode(body)?))
    }
}

impl Encoder<CastMessage> for CastCodec {
    type Error = Error;

    fn encode(&mut self, item: CastMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.encoded_len();
        let too_large = || Error::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        };
        if len > MAX_FRAME_LEN {
            return Err(too_large());
        }
        let prefix = u32::try_from(len).map_err(|_| too_large())?;

        dst.reserve(HEADER_LEN + len);
        dst.put_u32(prefix);
        // Only fails on insufficient capacity, which `reserve` rules out.
        item.encode(dst).map_err(|_| too_large())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::{ControlPayload, NAMESPACE_CONNECTION};

    fn sample() -> CastMessage {
        CastMessage::json(
            NAMESPACE_CONNECTION,
            "sender-1",
            "receiver-0",
            &ControlPayload::Connect,
        )
        .unwrap()
    }

    #[test]
    fn encoded_frame_has_length_prefix() {
        let msg = sample();
        let mut buf = BytesMut::new();
        CastCodec.encode(msg.clone(), &mut buf).unwrap();

        let body_len = msg.encoded_len();
        assert_eq!(buf.len(), HEADER_LEN + body_len);
        assert_eq!(&buf[..HEADER_LEN], &u32::try_from(body_len).unwrap().to_be_bytes());
    }

    #[test]
    fn waits_for_complete_frame() {
        let mut full = BytesMut::new();
        CastCodec.encode(sample(), &mut full).unwrap();

        // Header only, then a partial body.
        let mut partial = BytesMut::from(&full[..3]);
        assert!(CastCodec.decode(&mut partial).unwrap().is_none());

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(CastCodec.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), full.len() - 1, "nothing consumed");

        partial.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(CastCodec.decode(&mut partial).unwrap(), Some(sample()));
        assert!(partial.is_empty());
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut buf = BytesMut::new();
        CastCodec.encode(sample(), &mut buf).unwrap();
        CastCodec.encode(sample(), &mut buf).unwrap();

        assert!(CastCodec.decode(&mut buf).unwrap().is_some());
        assert!(CastCodec.decode(&mut buf).unwrap().is_some());
        assert!(CastCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_length() {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::try_from(MAX_FRAME_LEN + 1).unwrap());
        buf.put_slice(&[0u8; 16]);

        let err = CastCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { len, .. } if len == MAX_FRAME_LEN + 1));
    }

    #[test]
    fn refuses_to_encode_oversized_frame() {
        let mut msg = sample();
        msg.payload_utf8 = Some("x".repeat(MAX_FRAME_LEN));
        let mut buf = BytesMut::new();

        let err = CastCodec.encode(msg, &mut buf).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { len, .. } if len > MAX_FRAME_LEN));
        assert!(err.is_fatal());
        assert!(buf.is_empty(), "nothing written for a rejected frame");
    }

    #[test]
    fn accepts_frame_at_limit_header() {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::try_from(MAX_FRAME_LEN).unwrap());
        assert!(CastCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn garbage_body_is_decode_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(&[0xff, 0xff, 0xff]);
        assert!(matches!(CastCodec.decode(&mut buf), Err(Error::Decode(_))));
    }
}
