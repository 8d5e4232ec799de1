//! `armbridge-hal` – Hardware Abstraction Layer
//!
//! Owns the byte-level connection to the arm's microcontroller.
//!
//! # Modules
//!
//! - [`serial_link`] – [`SerialLink`]: opens the USB-serial device, waits for
//!   the controller to come out of reset, and splits into a [`LineReader`]
//!   (bounded-timeout reads, lossy UTF-8, trimmed non-empty lines) and a
//!   [`LineWriter`] (newline-terminated sends).
//! - [`sim`] – [`SimController`][sim::SimController]: an in-process
//!   controller that records sent lines and injects received ones, for tests
//!   and CI without hardware.

pub mod serial_link;
pub mod sim;

pub use serial_link::{
    LineReader, LineWriter, Lines, SerialConfig, SerialLink, DEFAULT_BAUD_RATE,
    DEFAULT_READ_RETRY_BACKOFF, DEFAULT_READ_TIMEOUT, DEFAULT_SETTLE_DELAY,
};
pub use sim::SimController;
