//! Adapters own the room index of a namespace and fan its broadcasts out.
//!
//! The default [`LocalAdapter`] keeps everything in memory. Cluster adapters, such as the
//! ones of the `socketwire-cluster` crate, wrap the same local state and forward every
//! operation to the other servers.
use std::{convert::Infallible, time::Duration};

use socketwire_core::{
    adapter::{BroadcastOptions, CoreAdapter, CoreLocalAdapter},
    packet::Packet,
};

use crate::ack::AckInnerStream;

pub use crate::ns::Emitter;
pub use socketwire_core::adapter::{
    BroadcastFlags, RecoveryConfig, RemoteSocketData, Room, RoomEvent, RoomEventKind, RoomParam,
};

/// An adapter usable by the server: a [`CoreAdapter`] bound to the namespace [`Emitter`].
pub trait Adapter: CoreAdapter<Emitter> + Sized {}
impl<T: CoreAdapter<Emitter>> Adapter for T {}

/// The default adapter. It stores the rooms in memory.
pub struct LocalAdapter(CoreLocalAdapter<Emitter>);

impl CoreAdapter<Emitter> for LocalAdapter {
    type Error = Infallible;
    type State = ();
    type AckStream = AckInnerStream;

    fn new(_state: &Self::State, local: CoreLocalAdapter<Emitter>) -> Self {
        Self(local)
    }

    async fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
        timeout: Option<Duration>,
    ) -> Result<Self::AckStream, Self::Error> {
        Ok(self.0.broadcast_with_ack(packet, opts, timeout).0)
    }

    fn get_local(&self) -> &CoreLocalAdapter<Emitter> {
        &self.0
    }
}

impl std::fmt::Debug for LocalAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAdapter")
            .field("ns", self.0.path())
            .finish()
    }
}
