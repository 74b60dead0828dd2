//! Per-member state inside a room.
//!
//! A [`MemberHandle`] is the room's record for one attached participant:
//! the send side of its private outbox, its opaque mode string, and the
//! set of sender names it refuses traffic from. Handles live in the
//! room's member table and never outlive their entry.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What to do with a message when the recipient's outbox is full.
///
/// Delivery is always non-blocking from the dispatcher's point of view;
/// the policy only decides the fate of the message itself. Either way
/// the number of outstanding hand-offs stays bounded, unlike a
/// spawn-per-delivery scheme where an undrained outbox leaks tasks
/// without limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Drop the message being delivered and log the drop.
    DropNewest,
    /// Hand the send to a background task that gives up after the
    /// given duration.
    Timeout(Duration),
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::DropNewest
    }
}

/// A room's record for one attached member.
#[derive(Debug)]
pub struct MemberHandle {
    /// Member name, matching the key it is stored under.
    name: String,
    /// Opaque mode string set at join time. The room never branches on
    /// it; interpretation belongs to the transport collaborator.
    mode: String,
    /// Send side of the member's private delivery channel.
    outbox: mpsc::Sender<String>,
    /// Sender names this member refuses targeted traffic from.
    muted: HashSet<String>,
}

impl MemberHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        mode: impl Into<String>,
        outbox: mpsc::Sender<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mode: mode.into(),
            outbox,
            muted: HashSet::new(),
        }
    }

    /// The member's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mode string supplied at join time.
    #[must_use]
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Whether this member has muted `sender`.
    #[must_use]
    pub fn has_muted(&self, sender: &str) -> bool {
        self.muted.contains(sender)
    }

    /// Add `sender` to the mute list. Returns `true` if newly muted.
    pub(crate) fn mute(&mut self, sender: &str) -> bool {
        self.muted.insert(sender.to_string())
    }

    /// Remove `sender` from the mute list. Returns `true` if it was muted.
    pub(crate) fn unmute(&mut self, sender: &str) -> bool {
        self.muted.remove(sender)
    }

    /// Hand a message to this member's outbox without blocking.
    ///
    /// Returns `false` when the message was dropped outright: outbox
    /// closed, or full under [`DeliveryPolicy::DropNewest`]. A timed
    /// hand-off counts as accepted even though it may still expire.
    pub(crate) fn deliver(&self, line: String, policy: DeliveryPolicy) -> bool {
        match self.outbox.try_send(line) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(member = %self.name, "outbox closed, dropping delivery");
                false
            }
            Err(mpsc::error::TrySendError::Full(line)) => match policy {
                DeliveryPolicy::DropNewest => {
                    warn!(member = %self.name, "outbox full, dropping message");
                    false
                }
                DeliveryPolicy::Timeout(timeout) => {
                    let outbox = self.outbox.clone();
                    let member = self.name.clone();
                    tokio::spawn(async move {
                        if outbox.send_timeout(line, timeout).await.is_err() {
                            warn!(member = %member, "delivery timed out, dropping message");
                        }
                    });
                    true
                }
            },
        }
    }
}
