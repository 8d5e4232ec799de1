//! `armbridge-middleware` – the message bus
//!
//! Routes commands and state between the bridge and the rest of the control
//! stack without caring about what the arm does with them.
//!
//! # Modules
//!
//! - [`bus`] – Typed, topic-based publish/subscribe bus built on Tokio
//!   broadcast channels, one channel per named [`Topic`].
//! - [`gateway`] – rosbridge-style WebSocket gateway that lets external
//!   clients publish commands and receive joint states and status as JSON.

pub mod bus;
pub mod gateway;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use gateway::RosbridgeGateway;
