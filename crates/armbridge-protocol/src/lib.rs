//! `armbridge-protocol` – the controller's line-oriented text protocol.
//!
//! Pure translation, no I/O.
//!
//! # Modules
//!
//! - [`encoder`] – [`encode`][encoder::encode]: turns a
//!   [`Command`][armbridge_types::Command] into the exact wire line plus the
//!   status the arm is optimistically assumed to enter.
//! - [`classifier`] – [`StatusClassifier`][classifier::StatusClassifier]:
//!   an ordered substring rule table that maps a received line to at most
//!   one [`ArmStatus`][armbridge_types::ArmStatus] transition.

pub mod classifier;
pub mod encoder;

pub use classifier::{RuleKind, StatusClassifier, StatusRule};
pub use encoder::{encode, EncodedCommand};
