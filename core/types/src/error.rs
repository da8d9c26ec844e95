use ethers::utils::rlp::DecoderError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("rlp decoding failed: {0}")]
    Rlp(#[from] DecoderError),

    #[error("block is missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' does not fit in 64 bits")]
    Overflow(&'static str),
}
