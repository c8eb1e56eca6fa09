//! Aggregated error kinds (§7). Individual crates define focused error
//! enums; this is the umbrella type Swarm-facing APIs return.

use thiserror::Error;

use crate::framer::FramerError;
use crate::multiaddr::MultiAddressError;
use crate::secure::SecureChannelError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("protocol negotiation exhausted for: {0:?}")]
    NegotiationExhausted(Vec<String>),

    #[error("bad identity: {0}")]
    BadIdentity(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Framer(#[from] FramerError),

    #[error(transparent)]
    MultiAddress(#[from] MultiAddressError),

    #[error(transparent)]
    SecureChannel(#[from] SecureChannelError),

    #[error("all dial addresses failed: {0:?}")]
    AllAddressesFailed(Vec<String>),

    #[error("cancelled")]
    Cancelled,
}
