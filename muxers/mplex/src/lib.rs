//! An mplex-style stream multiplexer implementing
//! `swarmlink_core::muxing::StreamMuxer`.

mod muxer;
mod substream;
mod wire;

pub use muxer::Mplex;
pub(crate) use muxer::MuxerShared;
pub use substream::MplexSubstream;
pub use wire::{PacketType, WireError};

pub const PROTOCOL_NAME: &str = "/mplex/6.7.0";
