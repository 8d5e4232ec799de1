//! `armbridge-runtime` – the running bridge.
//!
//! # Modules
//!
//! - [`arm_state`] – [`ArmState`] and the single task that owns it. Every
//!   read and write goes through a cloneable [`StateHandle`].
//! - [`serial_io`] – the serial writer and reader threads. The writer drains
//!   a [`CommandSink`] queue; the reader classifies incoming lines with a
//!   [`StatusClassifier`][armbridge_protocol::StatusClassifier].
//! - [`bridge`] – [`Bridge`]: command callbacks for `run_macro`, `run_pose`
//!   and `joint_goals`, plus the periodic `joint_states` / `arm_status`
//!   publisher. [`Bridge::start`] wires everything to a
//!   [`SerialLink`][armbridge_hal::SerialLink].
//! - [`telemetry`] – [`init_tracing`]: console logging with optional OTLP
//!   span export.

pub mod arm_state;
pub mod bridge;
pub mod serial_io;
pub mod telemetry;

pub use arm_state::{ArmState, StateHandle};
pub use bridge::{Bridge, BridgeConfig, DEFAULT_PUBLISH_PERIOD, RunningBridge};
pub use serial_io::{CommandSink, WriterThread, handle_line, spawn_reader, spawn_writer};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
