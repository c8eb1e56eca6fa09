//! Private-network protector seam: an optional pre-shared-key transform
//! applied to every stream. The transform itself (pnet) is out of core
//! scope — this crate only needs the plug-in point so
//! `Swarm::dial_one`/`on_remote_connect` can apply one when configured.

use swarmlink_core::transport::BoxedStream;

pub trait NetworkProtector: Send + Sync {
    fn protect(&self, stream: BoxedStream) -> BoxedStream;
}
