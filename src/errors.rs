use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZcError>;

#[derive(Debug, Error)]
pub enum ZcError {
    #[error("message too small")]
    PacketTooSmall,
    #[error("message too large")]
    PacketTooLarge,
    #[error("invalid name: {0}")]
    InvalidName(&'static str),
    #[error("invalid message: {0}")]
    InvalidPacket(&'static str),
    #[error("bad rdata for type {0}")]
    InvalidRdata(u16),
    #[error("bad transfer data: {0}")]
    InvalidXfr(&'static str),
    #[error("internal error: {0}")]
    InternalError(&'static str),
}
