//! The message pump.
//!
//! One dispatcher task per room consumes the bus strictly serially:
//! each message is classified and fully routed before the next is read,
//! so routing decisions happen in bus-arrival order. Deliveries are
//! non-blocking hand-offs into per-member outboxes; only the decision of
//! who receives what is ordered, not cross-recipient delivery timing.

use std::sync::Arc;

use roomcast_wire::grammar::{self, Directive, Envelope};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::room::Shared;

/// Consume the bus until the room closes or the bus ends.
pub(crate) async fn run(shared: Arc<Shared>, mut bus: mpsc::Receiver<String>) {
    let mut shutdown = shared.shutdown.subscribe();
    debug!(room = %shared.name, "dispatcher started");

    loop {
        tokio::select! {
            biased;

            _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => break,

            message = bus.recv() => match message {
                Some(message) => route(&shared, &message).await,
                None => break,
            },
        }
    }

    debug!(room = %shared.name, "dispatcher stopped");
}

/// Route one raw bus message to its recipients.
async fn route(shared: &Shared, raw: &str) {
    let envelope = Envelope::parse(raw);
    let directive = envelope.directive();
    trace!(room = %shared.name, sender = %envelope.sender, "routing message");

    let members = shared.members.read().await;
    let policy = shared.config.delivery;

    match directive {
        Directive::RosterQuery => {
            let roster = grammar::roster_line(members.keys());
            debug!(room = %shared.name, roster = %roster.trim_end(), "roster query");
            for member in members.values() {
                member.deliver(roster.clone(), policy);
            }
        }

        Directive::Directed { target, line } => match members.get(target) {
            Some(member) => {
                if member.has_muted(envelope.sender) {
                    debug!(
                        room = %shared.name,
                        target = %target,
                        sender = %envelope.sender,
                        "target muted sender, suppressing delivery"
                    );
                } else {
                    debug!(room = %shared.name, target = %target, "directed delivery");
                    member.deliver(line, policy);
                }
            }
            None => {
                warn!(
                    room = %shared.name,
                    target = %target,
                    sender = %envelope.sender,
                    "directed message to unknown target, dropping"
                );
            }
        },

        Directive::Broadcast { line } => {
            let mut recipients = 0usize;
            for (name, member) in members.iter() {
                if name == envelope.sender || member.has_muted(envelope.sender) {
                    continue;
                }
                if member.deliver(line.clone(), policy) {
                    recipients += 1;
                }
            }
            debug!(
                room = %shared.name,
                sender = %envelope.sender,
                recipients,
                "broadcast"
            );
        }

        Directive::Malformed { reason } => {
            warn!(
                room = %shared.name,
                sender = %envelope.sender,
                reason,
                "malformed message, dropping"
            );
        }
    }
}
