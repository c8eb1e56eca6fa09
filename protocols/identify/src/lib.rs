//! The `/ipfs/id/1.0.0` identity exchange protocol. Ships its own minimal
//! length-prefixed record rather than a Protobuf layout, so this crate has
//! no dependency on `prost`.
//!
//! A record is a flat sequence of varint-length-prefixed fields: protocol
//! version, agent version, public key bytes, a varint count of listen
//! addresses (each itself length-prefixed), and the observed address.

use futures::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt};
use smallvec::SmallVec;
use swarmlink_core::multiaddr::MultiAddress;
use swarmlink_core::peer::PeerId;
use thiserror::Error;
use unsigned_varint::aio as varint_aio;
use unsigned_varint::encode as varint_encode;

pub const PROTOCOL_NAME: &str = "/ipfs/id/1.0.0";

#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid varint")]
    InvalidVarint,
    #[error("field was not valid utf-8")]
    InvalidUtf8,
    #[error("advertised address was malformed: {0}")]
    BadAddress(#[from] swarmlink_core::multiaddr::MultiAddressError),
}

/// The information exchanged by both sides of an identify handshake:
/// the `agentVersion`/`protocolVersion` fields, plus listen/observed
/// addresses, that also live on the connection's `Peer` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyInfo {
    pub protocol_version: String,
    pub agent_version: String,
    pub public_key: Vec<u8>,
    pub listen_addrs: SmallVec<[MultiAddress; 4]>,
    pub observed_addr: Option<MultiAddress>,
}

impl IdentifyInfo {
    /// Checks the remote `PeerId` presented at the secure-channel layer
    /// actually hashes to the public key this record advertises.
    pub fn verify_peer_id(&self, claimed: &PeerId) -> bool {
        claimed.matches_public_key(&self.public_key)
    }
}

fn write_varint<W: std::io::Write>(out: &mut W, value: u64) -> std::io::Result<()> {
    let mut scratch = varint_encode::u64_buffer();
    out.write_all(varint_encode::u64(value, &mut scratch))
}

fn write_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64).expect("writing to a Vec never fails");
    buf.extend_from_slice(bytes);
}

pub async fn send<S: AsyncWrite + Unpin>(io: &mut S, info: &IdentifyInfo) -> Result<(), IdentifyError> {
    let mut buf = Vec::new();
    write_field(&mut buf, info.protocol_version.as_bytes());
    write_field(&mut buf, info.agent_version.as_bytes());
    write_field(&mut buf, &info.public_key);

    write_varint(&mut buf, info.listen_addrs.len() as u64).expect("writing to a Vec never fails");
    for addr in &info.listen_addrs {
        write_field(&mut buf, addr.to_string().as_bytes());
    }

    let observed = info.observed_addr.as_ref().map(|a| a.to_string()).unwrap_or_default();
    write_field(&mut buf, observed.as_bytes());

    io.write_all(&buf).await?;
    io.flush().await?;
    Ok(())
}

async fn read_field<R: AsyncRead + Unpin>(io: &mut R) -> Result<Vec<u8>, IdentifyError> {
    let len = varint_aio::read_u64(io).await.map_err(|_| IdentifyError::InvalidVarint)? as usize;
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn read_string<R: AsyncRead + Unpin>(io: &mut R) -> Result<String, IdentifyError> {
    String::from_utf8(read_field(io).await?).map_err(|_| IdentifyError::InvalidUtf8)
}

pub async fn receive<R: AsyncRead + Unpin>(io: &mut R) -> Result<IdentifyInfo, IdentifyError> {
    let protocol_version = read_string(io).await?;
    let agent_version = read_string(io).await?;
    let public_key = read_field(io).await?;

    let addr_count = varint_aio::read_u64(io).await.map_err(|_| IdentifyError::InvalidVarint)?;
    let mut listen_addrs = SmallVec::new();
    for _ in 0..addr_count {
        let text = read_string(io).await?;
        listen_addrs.push(text.parse()?);
    }

    let observed_text = read_string(io).await?;
    let observed_addr = if observed_text.is_empty() { None } else { Some(observed_text.parse()?) };

    Ok(IdentifyInfo { protocol_version, agent_version, public_key, listen_addrs, observed_addr })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    fn sample() -> IdentifyInfo {
        IdentifyInfo {
            protocol_version: "swarmlink/1.0.0".to_string(),
            agent_version: "swarmlink-node/0.1.0".to_string(),
            public_key: vec![1, 2, 3, 4],
            listen_addrs: smallvec::smallvec!["/ip4/127.0.0.1/tcp/4001".parse().unwrap()],
            observed_addr: Some("/ip4/198.51.100.2/tcp/51000".parse().unwrap()),
        }
    }

    #[async_std::test]
    async fn round_trips_a_record() {
        let info = sample();
        let mut buf = Vec::new();
        send(&mut buf, &info).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = receive(&mut cursor).await.unwrap();
        assert_eq!(decoded, info);
    }

    #[async_std::test]
    async fn empty_observed_address_round_trips_to_none() {
        let mut info = sample();
        info.observed_addr = None;
        let mut buf = Vec::new();
        send(&mut buf, &info).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = receive(&mut cursor).await.unwrap();
        assert!(decoded.observed_addr.is_none());
    }
}
