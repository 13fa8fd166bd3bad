use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::message::{DecodeError, Reply, Request};

#[derive(Debug, Error)]
pub enum ControllerCodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    LengthDelimited(#[from] tokio_util::codec::LengthDelimitedCodecError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Client-side controller codec: encodes requests, decodes replies
pub struct ControllerCodec {
    /// Framing codec
    inner: LengthDelimitedCodec,
    /// Buffer for encoding messages
    buf: BytesMut,
}

impl ControllerCodec {
    /// Create a new ControllerCodec
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .new_codec(),
            buf: BytesMut::new(),
        }
    }
}

impl Default for ControllerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ControllerCodec {
    type Item = Reply;
    type Error = ControllerCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(Reply::decode(frame.freeze())?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Request> for ControllerCodec {
    type Error = ControllerCodecError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.buf.clear();
        item.encode(&mut self.buf);
        Ok(self.inner.encode(self.buf.clone().freeze(), dst)?)
    }
}
