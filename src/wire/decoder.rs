use std::{error, fmt, io};

use tokio_util::codec;

use super::ber::{self, BerError};
use super::message::{self, Message};

/// Maximum size of a single message frame. No message variant in this
/// protocol carries unbounded payload, so a generous fixed ceiling is
/// enough to bound a misbehaving peer without special-casing any variant.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Decodes a stream of BER-framed protocol messages.
///
/// Each frame is a single outermost TLV; this state machine only needs to
/// know how many bytes make up that TLV (tag + length octets + content) to
/// know when a complete message has arrived, then hands the whole thing to
/// [`message::decode`].
#[derive(Debug, Default)]
pub struct Decoder;

impl codec::Decoder for Decoder {
    type Item = (u64, Message);

    type Error = Error;

    fn decode(
        &mut self,
        src: &mut bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        let frame_len = match ber::scan_element_len(src) {
            Ok(Some(len)) => len,
            Ok(None) => {
                if src.len() > MAX_FRAME_LEN {
                    return Err(Error::FrameTooLarge);
                }
                return Ok(None);
            },
            Err(err) => return Err(Error::Framing(err)),
        };

        if frame_len > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge);
        }

        let frame = src.split_to(frame_len);

        match message::decode(&frame) {
            Ok((id, msg)) => Ok(Some((id, msg))),
            Err(err) => Err(Error::Decode(err)),
        }
    }
}

/// Decode errors: malformed input identifies the offending
/// byte range; the session controller logs and continues rather than
/// tearing down the connection, except for I/O errors which are fatal.
#[derive(Debug)]
pub enum Error {
    /// The outer length framing itself is malformed (bad length form).
    /// Unlike a decode error inside a well-framed message, this means the
    /// stream can no longer be trusted to resynchronise, so it's fatal.
    Framing(BerError),
    /// A complete frame was read but its contents didn't decode cleanly.
    /// Recoverable: the session can keep reading the next frame.
    Decode(BerError),
    FrameTooLarge,
    Io(io::Error),
}

impl Error {
    /// Whether the connection can keep reading after this error: a decode
    /// error only means one frame was malformed, while framing/transport
    /// errors mean the stream itself can no longer be trusted.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Framing(e) => write!(f, "frame length malformed: {e}"),
            Error::Decode(e) => write!(f, "message decode failed: {e}"),
            Error::FrameTooLarge => write!(f, "frame exceeds maximum size"),
            Error::Io(e) => write!(f, "{e}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use tokio_stream::StreamExt;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn decodes_back_to_back_frames() {
        let mut stream = BytesMut::new();
        message::encode(0, &Message::KeepAlive, &mut stream);
        message::encode(
            2,
            &Message::StatusRequest {
                job_id: "j1".into(),
            },
            &mut stream,
        );

        let decoder = Decoder;
        let mut framed = FramedRead::new(stream.as_ref(), decoder);

        let (id, msg) = framed.next().await.unwrap().unwrap();
        assert_eq!(id, 0);
        assert_eq!(msg, Message::KeepAlive);

        let (id, msg) = framed.next().await.unwrap().unwrap();
        assert_eq!(id, 2);
        assert_eq!(
            msg,
            Message::StatusRequest {
                job_id: "j1".into()
            }
        );

        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn waits_for_more_bytes_on_partial_frame() {
        let mut full = BytesMut::new();
        message::encode(0, &Message::KeepAlive, &mut full);

        let cut = full.len() - 1;
        let partial = &full[..cut];

        let decoder = Decoder;
        let mut framed = FramedRead::new(partial, decoder);
        assert!(framed.next().await.is_none());

        let decoder = Decoder;
        let mut framed = FramedRead::new(full.as_ref(), decoder);
        let (id, msg) = framed.next().await.unwrap().unwrap();
        assert_eq!(id, 0);
        assert_eq!(msg, Message::KeepAlive);
    }

    #[tokio::test]
    async fn malformed_message_is_recoverable_decode_error() {
        let mut stream = BytesMut::new();
        message::encode(0, &Message::KeepAlive, &mut stream);
        // Flip the variant tag to an unassigned number.
        let idx = stream.len() - 2;
        stream[idx] = ber::context_constructed(31);

        let decoder = Decoder;
        let mut framed = FramedRead::new(stream.as_ref(), decoder);
        let err = framed.next().await.unwrap().unwrap_err();
        assert!(err.is_recoverable());
    }
}
