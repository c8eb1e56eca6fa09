//! The `/secio/1.0.0` secure channel upgrade.
//!
//! Registers the protocol name so it still takes part in multistream-select
//! negotiation, mirroring plaintext's crate shape, but the actual key
//! exchange and stream cipher live outside what this crate implements —
//! SECIO crypto internals are explicitly out of scope.
//! [`Secio::encrypt`] always fails with [`SecioError::OutOfScope`].

use async_trait::async_trait;
use swarmlink_core::cancel::CancellationToken;
use swarmlink_core::peer::{Keypair, PeerId};
use swarmlink_core::secure::{SecureChannelError, SecureUpgrade};
use swarmlink_core::transport::BoxedStream;
use thiserror::Error;

pub const PROTOCOL_NAME: &str = "/secio/1.0.0";

#[derive(Debug, Error)]
pub enum SecioError {
    #[error("secio key exchange is out of scope for this build")]
    OutOfScope,
}

#[derive(Debug, Default)]
pub struct Secio;

impl Secio {
    pub fn new() -> Secio {
        Secio
    }
}

#[async_trait]
impl SecureUpgrade for Secio {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    async fn encrypt(
        &self,
        _stream: BoxedStream,
        _local_key: Option<&Keypair>,
        _cancel: CancellationToken,
    ) -> Result<(BoxedStream, Option<PeerId>), SecureChannelError> {
        Err(SecureChannelError::Other(SecioError::OutOfScope.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[async_std::test]
    async fn advertises_its_protocol_name_but_refuses_to_encrypt() {
        let secio = Secio::new();
        assert_eq!(secio.protocol_name(), PROTOCOL_NAME);
        let stream: BoxedStream = Box::pin(Cursor::new(Vec::new()));
        let err = secio.encrypt(stream, None, CancellationToken::never()).await.unwrap_err();
        assert!(matches!(err, SecureChannelError::Other(_)));
    }
}
