use std::{error, fmt, io};

use tokio_util::codec;

use super::message::{self, Message};

/// An encoder for outbound protocol messages. The message ID travels
/// alongside the message itself rather than through a separate call, since
/// every outbound message needs one (responses reuse the
/// request's ID, client-originated messages allocate one from the
/// session's monotonic counter).
#[derive(Debug, Default)]
pub struct Encoder {}

impl codec::Encoder<(u64, Message)> for Encoder {
    type Error = Error;

    fn encode(
        &mut self,
        (id, item): (u64, Message),
        dst: &mut bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        message::encode(id, &item, dst);
        Ok(())
    }
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
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
    use tokio_util::codec::Encoder as _;

    #[test]
    fn encodes_into_destination_buffer() {
        let mut dst = BytesMut::new();
        let mut enc = Encoder::default();
        enc.encode((4, Message::KeepAlive), &mut dst).unwrap();
        assert!(!dst.is_empty());
    }
}
