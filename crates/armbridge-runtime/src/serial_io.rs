//! Dedicated threads for the two directions of the serial link.
//!
//! - **Writer** – one thread drains a queue of wire lines and sends them in
//!   order, so commands issued concurrently never interleave mid-line.
//!   Failed sends are logged by the link and dropped. Stopping the writer
//!   flushes every line queued before the stop request.
//! - **Reader** – one thread consumes the link's line iterator, classifies
//!   each line, and forwards status transitions to the state task. It exits
//!   at the first read timeout after the stop flag is raised.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};

use armbridge_hal::{LineReader, LineWriter};
use armbridge_protocol::StatusClassifier;
use tokio::sync::mpsc;
use tracing::debug;

use crate::arm_state::StateHandle;

#[derive(Debug)]
enum Outgoing {
    Line(String),
    Stop,
}

/// Queue feeding the writer thread.
#[derive(Clone, Debug)]
pub struct CommandSink {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl CommandSink {
    /// Queue `line` for sending. Never blocks.
    pub fn send(&self, line: String) {
        if self.tx.send(Outgoing::Line(line)).is_err() {
            debug!("serial writer stopped; command dropped");
        }
    }
}

/// Join handle for the writer thread.
#[derive(Debug)]
pub struct WriterThread {
    tx: mpsc::UnboundedSender<Outgoing>,
    handle: JoinHandle<()>,
}

impl WriterThread {
    /// Ask the writer to exit after the lines already queued and return its
    /// handle for joining. Sinks still alive afterwards drop their lines.
    pub fn stop(self) -> JoinHandle<()> {
        let _ = self.tx.send(Outgoing::Stop);
        self.handle
    }
}

/// Start the writer thread.
///
/// The thread exits on [`WriterThread::stop`], closing the write half of the
/// link.
pub fn spawn_writer(mut writer: LineWriter) -> io::Result<(CommandSink, WriterThread)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
    let handle = thread::Builder::new()
        .name("armbridge-serial-tx".to_string())
        .spawn(move || {
            while let Some(Outgoing::Line(line)) = rx.blocking_recv() {
                // Already logged by the link; no retry.
                let _ = writer.send(&line);
            }
            debug!("serial writer stopped");
        })?;
    Ok((CommandSink { tx: tx.clone() }, WriterThread { tx, handle }))
}

/// Start the reader thread.
pub fn spawn_reader(
    reader: LineReader,
    classifier: StatusClassifier,
    state: StateHandle,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("armbridge-serial-rx".to_string())
        .spawn(move || {
            for line in reader.into_lines(stop) {
                handle_line(&classifier, &state, &line);
            }
            debug!("serial reader stopped");
        })
}

/// Log one received line and apply any status transition it implies.
pub fn handle_line(classifier: &StatusClassifier, state: &StateHandle, line: &str) {
    // Separator lines from the firmware's help banner are noise.
    if !line.starts_with("---") {
        debug!("Serial RX: {line}");
    }
    if let Some(status) = classifier.classify(line) {
        state.set_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use armbridge_hal::SimController;
    use armbridge_types::ArmStatus;

    use crate::arm_state::ArmState;

    async fn wait_for_status(state: &StateHandle, want: ArmStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.snapshot().await.unwrap().status != want {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("status never reached");
    }

    #[tokio::test]
    async fn handle_line_applies_classified_status() {
        let (state, _task) = StateHandle::spawn(ArmState::default());
        let classifier = StatusClassifier::firmware();

        handle_line(&classifier, &state, "RUNNING_MACRO");
        assert_eq!(state.snapshot().await.unwrap().status, ArmStatus::RunningMacro);

        handle_line(&classifier, &state, "Servo 1 -> 30");
        assert_eq!(state.snapshot().await.unwrap().status, ArmStatus::RunningMacro);

        handle_line(&classifier, &state, "--- Comandos ---");
        handle_line(&classifier, &state, "Macro 'wave' concluida");
        assert_eq!(state.snapshot().await.unwrap().status, ArmStatus::Idle);
    }

    #[tokio::test]
    async fn writer_sends_lines_in_order() {
        let (sim, link) = SimController::new();
        let (_reader, writer) = link.split();
        let (sink, thread) = spawn_writer(writer).unwrap();

        for i in 0..20 {
            sink.send(format!("pose load p{i}"));
        }
        thread.stop().join().unwrap();

        let expected: Vec<String> = (0..20).map(|i| format!("pose load p{i}")).collect();
        assert_eq!(sim.sent(), expected);
    }

    #[tokio::test]
    async fn writer_survives_write_failures() {
        let (sim, link) = SimController::new();
        let (_reader, writer) = link.split();
        let (sink, thread) = spawn_writer(writer).unwrap();

        sim.fail_writes(true);
        sink.send("macro play lost".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        sim.fail_writes(false);
        sink.send("macro play wave".to_string());
        thread.stop().join().unwrap();

        assert_eq!(sim.sent(), vec!["macro play wave"]);
    }

    #[test]
    fn sends_after_stop_are_dropped() {
        let (sim, link) = SimController::new();
        let (_reader, writer) = link.split();
        let (sink, thread) = spawn_writer(writer).unwrap();

        sink.send("pose load home".to_string());
        thread.stop().join().unwrap();
        sink.send("pose load late".to_string());

        assert_eq!(sim.sent(), vec!["pose load home"]);
    }

    #[tokio::test]
    async fn reader_thread_updates_state_and_stops() {
        let (sim, link) = SimController::new();
        let (reader, _writer) = link.split();
        let (state, _task) = StateHandle::spawn(ArmState::default());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = spawn_reader(
            reader,
            StatusClassifier::firmware(),
            state.clone(),
            Arc::clone(&stop),
        )
        .unwrap();

        sim.emit("Status: MOVING");
        wait_for_status(&state, ArmStatus::Moving).await;

        sim.emit("Status: IDLE");
        wait_for_status(&state, ArmStatus::Idle).await;

        stop.store(true, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || handle.join())
            .await
            .unwrap()
            .unwrap();
    }
}
