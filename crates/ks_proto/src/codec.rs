//! Encoding and decoding of the key storage schemas.
//!
//! The file carries no framing of its own: its entire content is exactly one
//! encoded message.

use prost::Message;
use zeroize::Zeroizing;

/// Encode a message that carries no secrets.
pub fn encode<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}

/// Encode a message whose encoding must be wiped after use.
pub fn encode_secret<M: Message>(message: &M) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(message.encode_to_vec())
}

/// Decode one message spanning all of `bytes`.
///
/// Empty input decodes to a message holding only default values.
pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M, CodecError> {
    Ok(M::decode(bytes)?)
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}
