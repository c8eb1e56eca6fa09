//! Secure channel adapter contract. Concrete variants (plaintext,
//! secio) live in their own crates and implement [`SecureUpgrade`].

use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::peer::{Keypair, PeerId};
use crate::transport::{BoxedStream, TransportError};

#[derive(Debug, Error)]
pub enum SecureChannelError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// A stream transformation that authenticates and (where implemented)
/// encrypts traffic after a handshake. `encrypt` completes the connection's
/// security-established slot as a side effect.
#[async_trait::async_trait]
pub trait SecureUpgrade: Send + Sync {
    /// The versioned multistream protocol name this upgrade registers under,
    /// e.g. `/plaintext/1.0.0`.
    fn protocol_name(&self) -> &'static str;

    async fn encrypt(
        &self,
        stream: BoxedStream,
        local_key: Option<&Keypair>,
        cancel: CancellationToken,
    ) -> Result<(BoxedStream, Option<PeerId>), SecureChannelError>;
}
