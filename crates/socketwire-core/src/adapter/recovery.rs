//! Connection state recovery: a bounded backlog of broadcast packets and the
//! sessions of recently disconnected sockets.
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;

use super::{BroadcastFlags, BroadcastOptions, Room};
use crate::{
    Sid, Value,
    packet::{Packet, PacketData},
};

/// Configuration of connection state recovery.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How long a disconnected session can be recovered.
    /// Defaults to 2 minutes.
    pub max_disconnection_duration: Duration,
    /// The maximum number of packets kept in the backlog.
    /// Defaults to 4096.
    pub max_packets: usize,
    /// Skip the namespace middlewares when a session is recovered.
    /// Defaults to true.
    pub skip_middlewares: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_disconnection_duration: Duration::from_secs(120),
            max_packets: 4096,
            skip_middlewares: true,
        }
    }
}

/// A recovered session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// The id of the socket before the disconnection
    pub sid: Sid,
    /// The private session id
    pub pid: Sid,
    /// The rooms the socket was in
    pub rooms: Vec<Room>,
    /// The packets broadcast to those rooms since the disconnection
    pub missed_packets: Vec<Packet>,
}

struct PersistedPacket {
    offset: u64,
    emitted_at: Instant,
    packet: Packet,
    rooms: HashSet<Room>,
    except: HashSet<Room>,
}

impl PersistedPacket {
    fn targets(&self, rooms: &[Room]) -> bool {
        let included = self.rooms.is_empty() || rooms.iter().any(|r| self.rooms.contains(r));
        included && !rooms.iter().any(|r| self.except.contains(r))
    }
}

struct PersistedSession {
    sid: Sid,
    rooms: Vec<Room>,
    disconnected_at: Instant,
}

#[derive(Default)]
struct Backlog {
    packets: VecDeque<PersistedPacket>,
    sessions: HashMap<Sid, PersistedSession>,
}

pub(super) struct Recovery {
    config: RecoveryConfig,
    next_offset: AtomicU64,
    backlog: Mutex<Backlog>,
}

impl Recovery {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            next_offset: AtomicU64::new(0),
            backlog: Mutex::new(Backlog::default()),
        }
    }

    /// Store a broadcast packet and append its offset as the last argument.
    /// Volatile packets and packets expecting an ack are never stored.
    pub fn persist_packet(&self, packet: &mut Packet, opts: &BroadcastOptions) {
        if opts.has_flag(BroadcastFlags::Volatile) {
            return;
        }
        let PacketData::Event(_, args, None) = &mut packet.inner else {
            return;
        };
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        args.push(Value::String(offset.to_string()));

        let mut backlog = self.backlog.lock().unwrap();
        backlog.packets.push_back(PersistedPacket {
            offset,
            emitted_at: Instant::now(),
            packet: packet.clone(),
            rooms: opts.rooms.clone(),
            except: opts.except.clone(),
        });
        self.prune(&mut backlog);
    }

    pub fn persist_session(&self, sid: Sid, pid: Sid, rooms: Vec<Room>) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?sid, ?pid, "persisting session");

        let mut backlog = self.backlog.lock().unwrap();
        backlog.sessions.insert(
            pid,
            PersistedSession {
                sid,
                rooms,
                disconnected_at: Instant::now(),
            },
        );
        self.prune(&mut backlog);
    }

    /// A session is restored at most once. It fails if the session expired
    /// or if the offset is not in the backlog anymore.
    pub fn restore_session(&self, pid: Sid, offset: &str) -> Option<Session> {
        let mut backlog = self.backlog.lock().unwrap();
        self.prune(&mut backlog);
        let session = backlog.sessions.remove(&pid)?;
        let offset: u64 = offset.parse().ok()?;
        let start = backlog.packets.iter().position(|p| p.offset == offset)?;

        let missed_packets = backlog
            .packets
            .iter()
            .skip(start + 1)
            .filter(|p| p.targets(&session.rooms))
            .map(|p| p.packet.clone())
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(?pid, sid = ?session.sid, "session restored");

        Some(Session {
            sid: session.sid,
            pid,
            rooms: session.rooms,
            missed_packets,
        })
    }

    fn prune(&self, backlog: &mut Backlog) {
        let max_age = self.config.max_disconnection_duration;
        while backlog
            .packets
            .front()
            .is_some_and(|p| p.emitted_at.elapsed() > max_age)
            || backlog.packets.len() > self.config.max_packets
        {
            backlog.packets.pop_front();
        }
        backlog
            .sessions
            .retain(|_, s| s.disconnected_at.elapsed() <= max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &'static str) -> Packet {
        Packet::event("/", name, vec![])
    }

    fn opts(rooms: &[&'static str], except: &[&'static str]) -> BroadcastOptions {
        let mut opts = BroadcastOptions::default();
        opts.rooms = rooms.iter().map(|r| Room::Borrowed(*r)).collect();
        opts.except = except.iter().map(|r| Room::Borrowed(*r)).collect();
        opts
    }

    #[test]
    fn packets_with_ack_are_not_stored() {
        let recovery = Recovery::new(RecoveryConfig::default());
        let mut with_ack = event("ev");
        with_ack.inner.set_ack_id(1);
        recovery.persist_packet(&mut with_ack, &opts(&[], &[]));
        let mut ack = Packet::ack("/", vec![], 1);
        recovery.persist_packet(&mut ack, &opts(&[], &[]));
        assert_eq!(with_ack, {
            let mut p = event("ev");
            p.inner.set_ack_id(1);
            p
        });
        assert!(recovery.backlog.lock().unwrap().packets.is_empty());
    }

    #[test]
    fn except_rooms_are_honored() {
        let recovery = Recovery::new(RecoveryConfig::default());
        let pid = Sid::new();
        recovery.persist_packet(&mut event("start"), &opts(&[], &[]));
        recovery.persist_session(Sid::new(), pid, vec!["a".into(), "vip".into()]);
        recovery.persist_packet(&mut event("excluded"), &opts(&["a"], &["vip"]));
        recovery.persist_packet(&mut event("all"), &opts(&[], &[]));

        let session = recovery.restore_session(pid, "0").unwrap();
        assert_eq!(session.missed_packets.len(), 1);
        assert!(matches!(
            &session.missed_packets[0].inner,
            PacketData::Event(e, _, _) if e == "all"
        ));
    }

    #[test]
    fn backlog_is_bounded() {
        let recovery = Recovery::new(RecoveryConfig {
            max_packets: 2,
            ..Default::default()
        });
        let pid = Sid::new();
        recovery.persist_session(Sid::new(), pid, vec![]);
        for _ in 0..3 {
            recovery.persist_packet(&mut event("ev"), &opts(&[], &[]));
        }
        // offset 0 was dropped from the backlog
        assert!(recovery.restore_session(pid, "0").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_expire() {
        let recovery = Recovery::new(RecoveryConfig::default());
        let pid = Sid::new();
        recovery.persist_packet(&mut event("ev"), &opts(&[], &[]));
        recovery.persist_session(Sid::new(), pid, vec![]);
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(recovery.restore_session(pid, "0").is_none());
    }

    #[test]
    fn invalid_offset() {
        let recovery = Recovery::new(RecoveryConfig::default());
        let pid = Sid::new();
        recovery.persist_session(Sid::new(), pid, vec![]);
        assert!(recovery.restore_session(pid, "abc").is_none());
    }
}
