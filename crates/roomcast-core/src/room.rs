//! Room lifecycle and membership.
//!
//! A [`Room`] owns the member table, the shared message bus, and a
//! one-shot shutdown signal. Opening a room starts two tasks: the
//! dispatcher (single consumer of the bus, see [`crate::dispatch`]) and a
//! watcher that performs [`Room::close`] when [`Room::signal_close`]
//! fires. The synchronization primitives stay private to this module;
//! callers only ever see the operations below.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{debug, info, warn};

use crate::dispatch;
use crate::member::{DeliveryPolicy, MemberHandle};

/// Room errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Join attempted with a name that is already a live member.
    #[error("member already exists: {0}")]
    DuplicateMember(String),

    /// Operation against a room that has been closed.
    #[error("room is closed")]
    Closed,
}

/// Room tuning knobs.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Capacity of the shared bus. Producers await free capacity, so a
    /// full bus backpressures transports instead of growing memory.
    pub bus_capacity: usize,
    /// Capacity of each member's private outbox.
    pub outbox_capacity: usize,
    /// What to do when a member's outbox is full at delivery time.
    pub delivery: DeliveryPolicy,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            bus_capacity: 64,
            outbox_capacity: 256,
            delivery: DeliveryPolicy::default(),
        }
    }
}

/// State shared between the room handle, the dispatcher, and the watcher.
pub(crate) struct Shared {
    pub(crate) name: String,
    /// The member table. Exclusive lock for join/leave/close, shared
    /// lock for dispatch-time reads.
    pub(crate) members: RwLock<HashMap<String, MemberHandle>>,
    pub(crate) config: RoomConfig,
    /// Latches to `true` exactly once; the room never reopens.
    pub(crate) shutdown: watch::Sender<bool>,
    /// One-shot close signal consumed by the watcher.
    quit: Mutex<Option<oneshot::Sender<()>>>,
}

/// An isolated broadcast domain.
///
/// Cheap to clone; clones share the same room. Must be created inside a
/// Tokio runtime, since opening a room spawns its dispatcher and
/// shutdown watcher.
#[derive(Clone)]
pub struct Room {
    shared: Arc<Shared>,
    bus: mpsc::Sender<String>,
}

impl Room {
    /// Open a room with default configuration.
    #[must_use]
    pub fn open(name: impl Into<String>) -> Self {
        Self::with_config(name, RoomConfig::default())
    }

    /// Open a room with custom configuration.
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: RoomConfig) -> Self {
        let name = name.into();
        info!(room = %name, "opening room");

        let (bus_tx, bus_rx) = mpsc::channel(config.bus_capacity);
        let (shutdown, _) = watch::channel(false);
        let (quit_tx, quit_rx) = oneshot::channel();

        let shared = Arc::new(Shared {
            name,
            members: RwLock::new(HashMap::new()),
            config,
            shutdown,
            quit: Mutex::new(Some(quit_tx)),
        });

        let room = Self {
            shared: Arc::clone(&shared),
            bus: bus_tx,
        };

        tokio::spawn(dispatch::run(shared, bus_rx));

        let watcher = room.clone();
        tokio::spawn(async move {
            if quit_rx.await.is_ok() {
                watcher.close().await;
            }
        });

        room
    }

    /// The room's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether the room has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    /// Attach a member under `name`.
    ///
    /// Returns the transport collaborator's kit: the bus send side bound
    /// to the member's name and the receive side of its private outbox.
    /// The mode string is stored opaquely; the room never branches on it.
    ///
    /// # Errors
    ///
    /// [`RoomError::DuplicateMember`] if `name` is already a live member
    /// (no state is mutated), [`RoomError::Closed`] if the room has shut
    /// down.
    pub async fn join(&self, name: &str, mode: &str) -> Result<Membership, RoomError> {
        let mut members = self.shared.members.write().await;
        if self.is_closed() {
            return Err(RoomError::Closed);
        }
        if members.contains_key(name) {
            warn!(room = %self.shared.name, member = %name, "member already exists, rejecting join");
            return Err(RoomError::DuplicateMember(name.to_string()));
        }

        let (outbox_tx, outbox_rx) = mpsc::channel(self.shared.config.outbox_capacity);
        members.insert(
            name.to_string(),
            MemberHandle::new(name, mode, outbox_tx),
        );
        info!(room = %self.shared.name, member = %name, mode = %mode, "member joined");

        Ok(Membership {
            publisher: BusPublisher {
                member: name.to_string(),
                bus: self.bus.clone(),
            },
            outbox: outbox_rx,
        })
    }

    /// Detach `name` and notify the remaining members with
    /// `leavingroommate:<name>\n`.
    ///
    /// Removing a name that is not present is a silent no-op. The
    /// departed member is not notified; dropping its handle closes its
    /// outbox.
    pub async fn leave(&self, name: &str) {
        let mut members = self.shared.members.write().await;
        if members.remove(name).is_none() {
            return;
        }
        info!(room = %self.shared.name, member = %name, "member left");

        let notice = roomcast_wire::grammar::departure_line(name);
        for member in members.values() {
            member.deliver(notice.clone(), self.shared.config.delivery);
        }
    }

    /// Close the room: end the bus and empty the member table.
    ///
    /// Idempotent - a repeat call is a no-op. Safe with zero members.
    /// Publishing after close reports [`RoomError::Closed`].
    pub async fn close(&self) {
        let mut members = self.shared.members.write().await;
        if self.shared.shutdown.send_replace(true) {
            return;
        }
        info!(room = %self.shared.name, members = members.len(), "closing room");
        members.clear();
    }

    /// Fire the one-shot close signal; the shutdown watcher performs
    /// [`Room::close`]. Subsequent calls are no-ops.
    pub fn signal_close(&self) {
        if let Ok(mut slot) = self.shared.quit.lock() {
            if let Some(quit) = slot.take() {
                debug!(room = %self.shared.name, "close signalled");
                let _ = quit.send(());
            }
        }
    }

    /// Current member count. Advisory: a point-in-time snapshot, not
    /// synchronized with concurrent joins and leaves.
    pub async fn member_count(&self) -> usize {
        self.shared.members.read().await.len()
    }

    /// Names of the current members.
    pub async fn members(&self) -> Vec<String> {
        self.shared.members.read().await.keys().cloned().collect()
    }

    /// Have `member` refuse targeted traffic from `sender`.
    ///
    /// Returns `false` when `member` is not in the room or `sender` was
    /// already muted. Muting is one-directional and keyed by name only;
    /// a member that rejoins starts with an empty mute list.
    pub async fn mute(&self, member: &str, sender: &str) -> bool {
        let mut members = self.shared.members.write().await;
        match members.get_mut(member) {
            Some(handle) => {
                let muted = handle.mute(sender);
                if muted {
                    debug!(room = %self.shared.name, member = %member, sender = %sender, "muted");
                }
                muted
            }
            None => false,
        }
    }

    /// Lift a mute set by [`Room::mute`].
    pub async fn unmute(&self, member: &str, sender: &str) -> bool {
        let mut members = self.shared.members.write().await;
        match members.get_mut(member) {
            Some(handle) => {
                let unmuted = handle.unmute(sender);
                if unmuted {
                    debug!(room = %self.shared.name, member = %member, sender = %sender, "unmuted");
                }
                unmuted
            }
            None => false,
        }
    }
}

/// What a successful [`Room::join`] hands the transport collaborator.
///
/// The collaborator publishes inbound peer traffic through `publisher`
/// and drains `outbox` to the peer. On detach it must call
/// [`Room::leave`] so the remaining members are notified.
#[derive(Debug)]
pub struct Membership {
    /// Send side of the room bus, bound to this member's name.
    pub publisher: BusPublisher,
    /// Receive side of this member's private outbox.
    pub outbox: mpsc::Receiver<String>,
}

/// The sending half of a room's bus, bound to one member name.
#[derive(Clone, Debug)]
pub struct BusPublisher {
    member: String,
    bus: mpsc::Sender<String>,
}

impl BusPublisher {
    /// The member name this publisher stamps onto messages.
    #[must_use]
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Frame `payload` as `sender:payload` and push it onto the bus.
    ///
    /// Awaits bus capacity, backpressuring the producer when the
    /// dispatcher is behind.
    ///
    /// # Errors
    ///
    /// [`RoomError::Closed`] once the room has shut down.
    pub async fn publish(&self, payload: &str) -> Result<(), RoomError> {
        self.bus
            .send(format!("{}:{}", self.member, payload))
            .await
            .map_err(|_| RoomError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_secs(1);

    async fn recv(outbox: &mut mpsc::Receiver<String>) -> String {
        timeout(TICK, outbox.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("outbox closed")
    }

    async fn trio() -> (Room, Membership, Membership, Membership) {
        let room = Room::open("test");
        let a = room.join("alice", "").await.unwrap();
        let b = room.join("bob", "").await.unwrap();
        let c = room.join("charlie", "").await.unwrap();
        (room, a, b, c)
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let (_room, mut a, mut b, mut c) = trio().await;

        a.publisher.publish("hello\n").await.unwrap();
        assert_eq!(recv(&mut b.outbox).await, "alice:hello\n");
        assert_eq!(recv(&mut c.outbox).await, "alice:hello\n");

        // Alice sees nothing of her own broadcast: the next thing in her
        // outbox is bob's.
        b.publisher.publish("ping\n").await.unwrap();
        assert_eq!(recv(&mut a.outbox).await, "bob:ping\n");
    }

    #[tokio::test]
    async fn test_directed_delivery() {
        let (_room, mut a, mut b, mut c) = trio().await;

        a.publisher.publish("To:bob:hello\n").await.unwrap();
        assert_eq!(recv(&mut b.outbox).await, "hello\n");

        // Charlie is untouched; the next thing he sees is a marker.
        b.publisher.publish("marker\n").await.unwrap();
        assert_eq!(recv(&mut c.outbox).await, "bob:marker\n");
        assert_eq!(recv(&mut a.outbox).await, "bob:marker\n");
    }

    #[tokio::test]
    async fn test_direct_message_to_self_is_delivered() {
        let (_room, mut a, _b, _c) = trio().await;

        a.publisher.publish("To:alice:note to self\n").await.unwrap();
        assert_eq!(recv(&mut a.outbox).await, "note to self\n");
    }

    #[tokio::test]
    async fn test_tool_messages_keep_their_prefix() {
        let (_room, a, mut b, mut c) = trio().await;

        a.publisher.publish("Repeater:To:bob:req\n").await.unwrap();
        assert_eq!(recv(&mut b.outbox).await, "Repeater:req\n");

        a.publisher.publish("Intruder:payloads\n").await.unwrap();
        assert_eq!(recv(&mut b.outbox).await, "Intruder:payloads\n");
        assert_eq!(recv(&mut c.outbox).await, "Intruder:payloads\n");
    }

    #[tokio::test]
    async fn test_mute_filtering() {
        let (room, a, mut b, mut c) = trio().await;
        assert!(room.mute("bob", "alice").await);

        // Tool broadcast: charlie receives, bob does not.
        a.publisher.publish("Repeater:req\n").await.unwrap();
        assert_eq!(recv(&mut c.outbox).await, "Repeater:req\n");

        // Directed at bob: suppressed.
        a.publisher.publish("To:bob:direct\n").await.unwrap();

        // Plain broadcast: bob skipped.
        a.publisher.publish("plain\n").await.unwrap();
        assert_eq!(recv(&mut c.outbox).await, "alice:plain\n");

        // Bob's outbox saw none of it.
        c.publisher.publish("after\n").await.unwrap();
        assert_eq!(recv(&mut b.outbox).await, "charlie:after\n");
    }

    #[tokio::test]
    async fn test_unmute_restores_delivery() {
        let (room, a, mut b, _c) = trio().await;

        assert!(room.mute("bob", "alice").await);
        assert!(room.unmute("bob", "alice").await);
        assert!(!room.unmute("bob", "alice").await);

        a.publisher.publish("To:bob:back\n").await.unwrap();
        assert_eq!(recv(&mut b.outbox).await, "back\n");
    }

    #[tokio::test]
    async fn test_mute_unknown_member() {
        let (room, _a, _b, _c) = trio().await;
        assert!(!room.mute("ghost", "alice").await);
        assert!(!room.unmute("ghost", "alice").await);
    }

    #[tokio::test]
    async fn test_roster_query_reaches_everyone() {
        let (_room, mut a, mut b, mut c) = trio().await;

        a.publisher.publish("newroommates\n").await.unwrap();
        for outbox in [&mut a.outbox, &mut b.outbox, &mut c.outbox] {
            let line = recv(outbox).await;
            let names = line
                .strip_prefix("roommates:")
                .and_then(|rest| rest.strip_suffix('\n'))
                .unwrap_or_else(|| panic!("unexpected roster line: {line:?}"));
            let names: HashSet<&str> = names.split(',').collect();
            assert_eq!(names, HashSet::from(["alice", "bob", "charlie"]));
        }
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_members() {
        let (room, mut a, mut b, mut c) = trio().await;

        room.leave("alice").await;
        assert_eq!(recv(&mut b.outbox).await, "leavingroommate:alice\n");
        assert_eq!(recv(&mut c.outbox).await, "leavingroommate:alice\n");

        // Alice is gone, not notified: her outbox just closes.
        assert!(timeout(TICK, a.outbox.recv()).await.unwrap().is_none());
        assert_eq!(room.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_leave_unknown_is_noop() {
        let (room, _a, _b, _c) = trio().await;
        room.leave("ghost").await;
        assert_eq!(room.member_count().await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected_without_state_change() {
        let room = Room::open("dup");
        let _alice = room.join("alice", "spectator").await.unwrap();

        match room.join("alice", "other").await {
            Err(RoomError::DuplicateMember(name)) => assert_eq!(name, "alice"),
            other => panic!("expected DuplicateMember, got {other:?}"),
        }
        assert_eq!(room.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejoin_starts_with_empty_mute_list() {
        let (room, a, mut b, _c) = trio().await;

        assert!(room.mute("bob", "alice").await);
        room.leave("bob").await;
        assert!(timeout(TICK, b.outbox.recv()).await.unwrap().is_none());

        let mut bob = room.join("bob", "").await.unwrap();
        a.publisher.publish("hi again\n").await.unwrap();
        assert_eq!(recv(&mut bob.outbox).await, "alice:hi again\n");
    }

    #[tokio::test]
    async fn test_routing_follows_bus_order() {
        let (_room, a, b, mut c) = trio().await;

        a.publisher.publish("first\n").await.unwrap();
        b.publisher.publish("second\n").await.unwrap();

        assert_eq!(recv(&mut c.outbox).await, "alice:first\n");
        assert_eq!(recv(&mut c.outbox).await, "bob:second\n");
    }

    #[tokio::test]
    async fn test_unknown_target_does_not_kill_dispatcher() {
        let (_room, mut a, b, _c) = trio().await;

        a.publisher.publish("To:ghost:boo\n").await.unwrap();
        a.publisher.publish("Repeater:To:ghost:boo\n").await.unwrap();
        a.publisher.publish("Intruder:To:ghost:boo\n").await.unwrap();

        b.publisher.publish("alive\n").await.unwrap();
        assert_eq!(recv(&mut a.outbox).await, "bob:alive\n");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (room, a, _b, _c) = trio().await;

        room.close().await;
        room.close().await;

        assert!(room.is_closed());
        assert_eq!(room.member_count().await, 0);

        // The bus ends once the dispatcher drops its receiver.
        let mut rejected = false;
        for _ in 0..50 {
            if a.publisher.publish("late\n").await.is_err() {
                rejected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rejected, "publish should fail after close");
    }

    #[tokio::test]
    async fn test_close_with_zero_members() {
        let room = Room::open("empty");
        room.close().await;
        assert!(room.is_closed());
        assert_eq!(room.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_after_close_rejected() {
        let room = Room::open("done");
        room.close().await;
        assert!(matches!(room.join("alice", "").await, Err(RoomError::Closed)));
    }

    #[tokio::test]
    async fn test_signal_close_tears_the_room_down() {
        let (room, _a, _b, _c) = trio().await;

        room.signal_close();
        room.signal_close(); // repeat must not panic

        for _ in 0..50 {
            if room.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(room.is_closed());
        assert_eq!(room.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_outbox_drops_newest() {
        let config = RoomConfig {
            outbox_capacity: 1,
            ..RoomConfig::default()
        };
        let room = Room::with_config("tight", config);
        let a = room.join("alice", "").await.unwrap();
        let mut b = room.join("bob", "").await.unwrap();
        let mut c = room.join("charlie", "").await.unwrap();

        // Bob never drains; his outbox holds one message.
        a.publisher.publish("m1\n").await.unwrap();
        a.publisher.publish("m2\n").await.unwrap();
        assert_eq!(recv(&mut c.outbox).await, "alice:m1\n");
        assert_eq!(recv(&mut c.outbox).await, "alice:m2\n");

        assert_eq!(b.outbox.try_recv().unwrap(), "alice:m1\n");
        assert!(b.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_outbox_timeout_hand_off_delivers_late() {
        let config = RoomConfig {
            outbox_capacity: 1,
            delivery: DeliveryPolicy::Timeout(Duration::from_millis(500)),
            ..RoomConfig::default()
        };
        let room = Room::with_config("patient", config);
        let a = room.join("alice", "").await.unwrap();
        let mut b = room.join("bob", "").await.unwrap();

        a.publisher.publish("m1\n").await.unwrap();
        a.publisher.publish("m2\n").await.unwrap();

        // Draining frees capacity; the handed-off send completes.
        assert_eq!(recv(&mut b.outbox).await, "alice:m1\n");
        assert_eq!(recv(&mut b.outbox).await, "alice:m2\n");
    }

    #[tokio::test]
    async fn test_member_snapshot() {
        let (room, _a, _b, _c) = trio().await;
        let names: HashSet<String> = room.members().await.into_iter().collect();
        assert_eq!(
            names,
            HashSet::from(["alice".to_string(), "bob".to_string(), "charlie".to_string()])
        );
        assert_eq!(room.name(), "test");
    }
}
