//! # roomcast-core
//!
//! Room membership, message bus, and routing for the roomcast message
//! router.
//!
//! A [`Room`] is an isolated broadcast domain: a named set of members,
//! one ordered bus all inbound traffic funnels through, and a serial
//! dispatcher that decides, per message, which members receive it.
//!
//! ```text
//! ┌───────────┐  publish   ┌─────────┐  route   ┌────────────┐
//! │ Transport │───────────▶│   Bus   │─────────▶│ Dispatcher │
//! └───────────┘            └─────────┘          └────────────┘
//!       ▲                                             │
//!       │              per-member outbox              │
//!       └─────────────────────────────────────────────┘
//! ```
//!
//! The dispatcher is the ordering guarantee of the whole system: routing
//! decisions happen strictly in bus-arrival order. Delivery to each
//! recipient is an independent non-blocking hand-off governed by
//! [`DeliveryPolicy`], so a stalled recipient never holds up routing for
//! anyone else.

pub mod member;
pub mod room;

mod dispatch;

pub use member::{DeliveryPolicy, MemberHandle};
pub use room::{BusPublisher, Membership, Room, RoomConfig, RoomError};
