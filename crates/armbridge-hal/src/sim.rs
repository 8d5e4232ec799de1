//! In-process stand-in for the arm's microcontroller.
//!
//! [`SimController`] hands out a [`SerialLink`] whose bytes never leave the
//! process: every line the host sends is recorded, and lines "printed" by the
//! controller are injected with [`SimController::emit`]. This lets the bridge
//! run end to end in tests and CI without a USB-serial device.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use armbridge_hal::sim::SimController;
//!
//! let (sim, link) = SimController::new();
//! let (mut reader, mut writer) = link.split();
//!
//! writer.send("pose load home").unwrap();
//! assert_eq!(sim.sent(), vec!["pose load home".to_string()]);
//!
//! sim.emit("Status: MOVING");
//! assert_eq!(reader.poll_line().unwrap().as_deref(), Some("Status: MOVING"));
//! ```

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::serial_link::SerialLink;

/// Port name reported by simulated links.
pub const SIM_PORT: &str = "sim://arm";

/// Read timeout of the simulated device; short so tests stay fast.
const SIM_READ_TIMEOUT: Duration = Duration::from_millis(20);
const SIM_RETRY_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Default)]
struct SimShared {
    sent: Vec<String>,
    partial: Vec<u8>,
    fail_writes: bool,
}

/// Test handle for a simulated controller.
///
/// Dropping it closes the device's output, after which the host's reads fail
/// as if the cable had been pulled.
pub struct SimController {
    shared: Arc<Mutex<SimShared>>,
    to_host: Sender<Vec<u8>>,
}

impl SimController {
    /// Create a controller and the host-side link connected to it.
    pub fn new() -> (Self, SerialLink) {
        let shared = Arc::new(Mutex::new(SimShared::default()));
        let (to_host, from_device) = mpsc::channel();

        let link = SerialLink::from_halves(
            SIM_PORT,
            SimReadHalf {
                from_device,
                buffered: VecDeque::new(),
            },
            SimWriteHalf {
                shared: Arc::clone(&shared),
            },
            SIM_RETRY_BACKOFF,
        );
        (Self { shared, to_host }, link)
    }

    /// Print `line` from the controller, newline included.
    pub fn emit(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.emit_bytes(&bytes);
    }

    /// Push raw bytes toward the host, without adding a terminator.
    pub fn emit_bytes(&self, bytes: &[u8]) {
        // The host side may already be gone; nothing left to deliver to.
        let _ = self.to_host.send(bytes.to_vec());
    }

    /// Every complete line the host has sent so far, without terminators.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.shared).sent.clone()
    }

    /// Make subsequent host writes fail with `BrokenPipe`.
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.shared).fail_writes = fail;
    }
}

fn lock(shared: &Mutex<SimShared>) -> MutexGuard<'_, SimShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SimReadHalf {
    from_device: Receiver<Vec<u8>>,
    buffered: VecDeque<u8>,
}

impl Read for SimReadHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffered.is_empty() {
            match self.from_device.recv_timeout(SIM_READ_TIMEOUT) {
                Ok(bytes) => self.buffered.extend(bytes),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "sim read timed out"));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "sim controller disconnected",
                    ));
                }
            }
        }
        let n = buf.len().min(self.buffered.len());
        for (slot, byte) in buf.iter_mut().zip(self.buffered.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct SimWriteHalf {
    shared: Arc<Mutex<SimShared>>,
}

impl Write for SimWriteHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut shared = lock(&self.shared);
        if shared.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sim write failure"));
        }
        shared.partial.extend_from_slice(buf);
        while let Some(pos) = shared.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = shared.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            shared.sent.push(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armbridge_types::BridgeError;

    #[test]
    fn records_host_lines() {
        let (sim, link) = SimController::new();
        assert_eq!(link.port(), SIM_PORT);
        let (_reader, mut writer) = link.split();

        writer.send("macro play wave").unwrap();
        writer.send("move 0 0 0 0 0 0 0").unwrap();

        assert_eq!(sim.sent(), vec!["macro play wave", "move 0 0 0 0 0 0 0"]);
    }

    #[test]
    fn emitted_lines_reach_the_host() {
        let (sim, link) = SimController::new();
        let (mut reader, _writer) = link.split();

        sim.emit("Macro interrompida");
        assert_eq!(
            reader.poll_line().unwrap().as_deref(),
            Some("Macro interrompida")
        );
    }

    #[test]
    fn idle_device_times_out() {
        let (_sim, link) = SimController::new();
        let (mut reader, _writer) = link.split();
        assert_eq!(reader.poll_line().unwrap(), None);
    }

    #[test]
    fn failing_writes_surface_as_write_errors() {
        let (sim, link) = SimController::new();
        let (_reader, mut writer) = link.split();

        sim.fail_writes(true);
        assert!(matches!(writer.send("pose load home"), Err(BridgeError::Write(_))));
        sim.fail_writes(false);
        writer.send("pose load home").unwrap();

        assert_eq!(sim.sent(), vec!["pose load home"]);
    }

    #[test]
    fn dropped_controller_is_a_read_error() {
        let (sim, link) = SimController::new();
        let (mut reader, _writer) = link.split();
        drop(sim);
        assert!(matches!(reader.poll_line(), Err(BridgeError::Read(_))));
    }
}
