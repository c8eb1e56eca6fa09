//! The `/plaintext/1.0.0` secure channel upgrade: passes the underlying
//! stream through unchanged and never establishes a remote peer identity,
//! exactly as the protocol name advertises.

use async_trait::async_trait;
use swarmlink_core::cancel::CancellationToken;
use swarmlink_core::peer::{Keypair, PeerId};
use swarmlink_core::secure::{SecureChannelError, SecureUpgrade};
use swarmlink_core::transport::BoxedStream;

pub const PROTOCOL_NAME: &str = "/plaintext/1.0.0";

#[derive(Debug, Default)]
pub struct Plaintext;

impl Plaintext {
    pub fn new() -> Plaintext {
        Plaintext
    }
}

#[async_trait]
impl SecureUpgrade for Plaintext {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    async fn encrypt(
        &self,
        stream: BoxedStream,
        _local_key: Option<&Keypair>,
        _cancel: CancellationToken,
    ) -> Result<(BoxedStream, Option<PeerId>), SecureChannelError> {
        Ok((stream, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[async_std::test]
    async fn passes_the_stream_through_unchanged_and_establishes_no_identity() {
        let plaintext = Plaintext::new();
        let stream: BoxedStream = Box::pin(Cursor::new(b"hello".to_vec()));
        let (_stream, peer_id) = plaintext
            .encrypt(stream, None, CancellationToken::never())
            .await
            .unwrap();
        assert!(peer_id.is_none());
    }
}
