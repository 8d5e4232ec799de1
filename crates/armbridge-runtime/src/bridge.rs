//! [`Bridge`] – wires the message bus to the arm's serial link.
//!
//! Three activities run side by side:
//!
//! 1. **Dispatch** – commands arriving on `run_macro`, `run_pose` and
//!    `joint_goals` are encoded, queued for the serial writer, and the
//!    optimistic status is applied.
//! 2. **Read** – the serial reader thread classifies every received line and
//!    forwards status transitions (see [`serial_io`][crate::serial_io]).
//! 3. **Publish** – every `publish_period` a snapshot of the arm state is
//!    published on `joint_states` and `arm_status`.
//!
//! All state access goes through the [`StateHandle`]; all serial writes go
//! through the single writer thread behind [`CommandSink`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use armbridge_hal::SimController;
//! use armbridge_middleware::EventBus;
//! use armbridge_runtime::bridge::{Bridge, BridgeConfig};
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (_sim, link) = SimController::new();
//! let bus = Arc::new(EventBus::default());
//! let running = Bridge::start(link, Arc::clone(&bus), BridgeConfig::default())?;
//! running.bridge().on_run_macro("wave");
//! running.shutdown().await;
//! # Ok(()) }
//! ```

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use armbridge_hal::SerialLink;
use armbridge_middleware::{EventBus, Topic};
use armbridge_protocol::{StatusClassifier, encode};
use armbridge_types::{
    BridgeError, Command, Event, EventPayload, JOINT_COUNT, JointState, first_non_finite,
};
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::arm_state::{ArmState, StateHandle};
use crate::serial_io::{CommandSink, WriterThread, spawn_reader, spawn_writer};

const SOURCE: &str = "armbridge-runtime::bridge";

/// Default cadence of `joint_states` / `arm_status` (10 Hz).
pub const DEFAULT_PUBLISH_PERIOD: Duration = Duration::from_millis(100);

/// Behaviour knobs for [`Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Interval between state publications.
    pub publish_period: Duration,
    /// Write the goal of each accepted joint move into the published joint
    /// state. Off by default: published angles then stay at the home pose,
    /// since the controller never reports its actual angles.
    pub echo_commanded_angles: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            publish_period: DEFAULT_PUBLISH_PERIOD,
            echo_commanded_angles: false,
        }
    }
}

/// Command callbacks and periodic publisher.
pub struct Bridge {
    bus: Arc<EventBus>,
    state: StateHandle,
    commands: CommandSink,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(
        bus: Arc<EventBus>,
        state: StateHandle,
        commands: CommandSink,
        config: BridgeConfig,
    ) -> Self {
        Self {
            bus,
            state,
            commands,
            config,
        }
    }

    /// Split `link`, spawn the state task and both serial threads, and start
    /// the dispatcher and publisher on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a serial thread cannot be spawned.
    pub fn start(
        link: SerialLink,
        bus: Arc<EventBus>,
        config: BridgeConfig,
    ) -> io::Result<RunningBridge> {
        info!(port = link.port(), "starting bridge");
        let (reader, writer) = link.split();

        let (state, _state_task) = StateHandle::spawn(ArmState::default());
        let (commands, writer) = spawn_writer(writer)?;
        let stop_reader = Arc::new(AtomicBool::new(false));
        let reader_thread = spawn_reader(
            reader,
            StatusClassifier::firmware(),
            state.clone(),
            Arc::clone(&stop_reader),
        )?;

        let bridge = Arc::new(Bridge::new(bus, state, commands, config));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            let shutdown = shutdown_rx.clone();
            async move { bridge.run_dispatcher(shutdown).await }
        });
        let publisher = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.run_publisher(shutdown_rx).await }
        });

        Ok(RunningBridge {
            bridge,
            shutdown_tx,
            stop_reader,
            tasks: vec![dispatcher, publisher],
            reader: reader_thread,
            writer,
        })
    }

    // ------------------------------------------------------------------
    // Inbound callbacks
    // ------------------------------------------------------------------

    /// `run_macro`: play the named macro.
    pub fn on_run_macro(&self, name: &str) {
        info!(name, "running macro");
        self.dispatch(&Command::RunMacro {
            name: name.to_string(),
        });
    }

    /// `run_pose`: load the named pose.
    pub fn on_run_pose(&self, name: &str) {
        info!(name, "loading pose");
        self.dispatch(&Command::RunPose {
            name: name.to_string(),
        });
    }

    /// `joint_goals`: move every joint to `positions` (radians).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidJointGoals`] when `positions` does not
    /// hold exactly one value per joint, and
    /// [`BridgeError::NonFiniteJointGoal`] when any position is NaN or
    /// infinite. Nothing is sent and the state is left untouched.
    pub fn on_joint_goals(&self, positions: &[f64]) -> Result<(), BridgeError> {
        let angles: [f64; JOINT_COUNT] = positions.try_into().map_err(|_| {
            warn!(
                expected = JOINT_COUNT,
                actual = positions.len(),
                "joint_goals must carry one position per joint; dropping"
            );
            BridgeError::InvalidJointGoals {
                expected: JOINT_COUNT,
                actual: positions.len(),
            }
        })?;
        if let Some(joint) = first_non_finite(&angles) {
            warn!(joint, position = angles[joint], "joint_goals position is not finite; dropping");
            return Err(BridgeError::NonFiniteJointGoal { joint });
        }
        info!(?angles, "moving joints");
        self.dispatch(&Command::MoveJoints { angles });
        Ok(())
    }

    /// Encode `command`, queue it for the serial link, and apply the
    /// optimistic status.
    pub fn dispatch(&self, command: &Command) {
        let encoded = encode(command);
        self.commands.send(encoded.line);
        self.state.set_status(encoded.optimistic_status);
        if self.config.echo_commanded_angles {
            if let Some(angles) = encoded.commanded {
                self.state.set_angles(angles);
            }
        }
    }

    /// Route one bus event to its callback. Outbound payloads are ignored.
    pub fn handle_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::RunMacro(name) => self.on_run_macro(name),
            EventPayload::RunPose(name) => self.on_run_pose(name),
            EventPayload::JointGoals(goal) => {
                // Rejection is already logged.
                let _ = self.on_joint_goals(&goal.position);
            }
            EventPayload::JointStates(_) | EventPayload::ArmStatus(_) => {}
        }
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Publish one `joint_states` + `arm_status` pair and return the
    /// snapshot they were built from.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Channel`] if the state task has stopped. Topics
    /// without subscribers are not an error.
    pub async fn publish_state(&self) -> Result<ArmState, BridgeError> {
        let snapshot = self.state.snapshot().await?;

        let joint_state = JointState::from_angles(&snapshot.angles, Utc::now());
        self.publish(Topic::JointStates, EventPayload::JointStates(joint_state));
        self.publish(Topic::ArmStatus, EventPayload::ArmStatus(snapshot.status));

        Ok(snapshot)
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        if let Err(e) = self.bus.publish_to(topic, Event::new(SOURCE, payload)) {
            trace!(%topic, error = %e, "state not delivered");
        }
    }

    /// Publish the arm state every `publish_period` until shutdown.
    pub async fn run_publisher(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.publish_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_state().await {
                        warn!(error = %e, "publisher stopping");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("publisher stopped");
    }

    /// Consume the three command topics until shutdown.
    pub async fn run_dispatcher(&self, mut shutdown: watch::Receiver<bool>) {
        let mut run_macro = self.bus.subscribe_to(Topic::RunMacro);
        let mut run_pose = self.bus.subscribe_to(Topic::RunPose);
        let mut joint_goals = self.bus.subscribe_to(Topic::JointGoals);

        loop {
            let received = tokio::select! {
                r = run_macro.recv() => (Topic::RunMacro, r),
                r = run_pose.recv() => (Topic::RunPose, r),
                r = joint_goals.recv() => (Topic::JointGoals, r),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match received {
                (_, Ok(event)) => self.handle_event(&event),
                (topic, Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(%topic, lagged_by = n, "command subscriber lagged; commands lost");
                }
                (topic, Err(broadcast::error::RecvError::Closed)) => {
                    debug!(%topic, "bus closed");
                    break;
                }
            }
        }
        debug!("dispatcher stopped");
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }
}

/// A started [`Bridge`] and the tasks and threads serving it.
pub struct RunningBridge {
    bridge: Arc<Bridge>,
    shutdown_tx: watch::Sender<bool>,
    stop_reader: Arc<AtomicBool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    reader: JoinHandle<()>,
    writer: WriterThread,
}

impl RunningBridge {
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Stop publishing and dispatching, stop the reader, and wait until both
    /// serial threads have exited and released the device.
    pub async fn shutdown(self) {
        let RunningBridge {
            bridge: _,
            shutdown_tx,
            stop_reader,
            tasks,
            reader,
            writer,
        } = self;

        let _ = shutdown_tx.send(true);
        for task in tasks {
            let _ = task.await;
        }

        stop_reader.store(true, Ordering::SeqCst);
        let writer = writer.stop();

        let joined = tokio::task::spawn_blocking(move || {
            let _ = reader.join();
            let _ = writer.join();
        })
        .await;
        if joined.is_err() {
            warn!("serial threads did not shut down cleanly");
        }
        info!("bridge stopped");
    }
}
