//! [`ArmState`] and the task that owns it.
//!
//! The arm's last known joint angles and status are touched from three
//! places: command callbacks, the serial reader thread, and the periodic
//! publisher. Rather than sharing the aggregate behind a lock, a single
//! Tokio task owns it and every access is a message on one queue:
//!
//! ```text
//!  command callbacks ──┐
//!  serial reader ──────┼──► mpsc ──► state task (owns ArmState)
//!  publisher ──────────┘                   │
//!        ▲                                 │
//!        └──────── oneshot snapshot ◄──────┘
//! ```
//!
//! Requests are applied strictly in arrival order, so a snapshot always
//! reflects every update queued before it and never a half-applied one.

use armbridge_types::{ArmStatus, BridgeError, JointAngles};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Last known configuration of the arm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmState {
    pub angles: JointAngles,
    pub status: ArmStatus,
}

impl ArmState {
    /// Set the status, returning `true` if it changed.
    pub fn set_status(&mut self, status: ArmStatus) -> bool {
        let changed = self.status != status;
        self.status = status;
        changed
    }

    pub fn set_angles(&mut self, angles: JointAngles) {
        self.angles = angles;
    }

    pub fn snapshot(&self) -> ArmState {
        *self
    }
}

enum StateRequest {
    SetStatus(ArmStatus),
    SetAngles(JointAngles),
    Snapshot(oneshot::Sender<ArmState>),
}

/// Cloneable handle to the state task.
///
/// Updates are fire-and-forget and may be sent from any thread, including
/// threads outside the Tokio runtime.
#[derive(Clone, Debug)]
pub struct StateHandle {
    tx: mpsc::UnboundedSender<StateRequest>,
}

impl StateHandle {
    /// Spawn the owning task on the current Tokio runtime.
    ///
    /// The task runs until every handle has been dropped and then yields the
    /// final state.
    pub fn spawn(initial: ArmState) -> (Self, JoinHandle<ArmState>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut state = initial;
            while let Some(request) = rx.recv().await {
                match request {
                    StateRequest::SetStatus(status) => {
                        let from = state.status;
                        if state.set_status(status) {
                            debug!(%from, to = %status, "arm status changed");
                        }
                    }
                    StateRequest::SetAngles(angles) => state.set_angles(angles),
                    StateRequest::Snapshot(reply) => {
                        // The requester may have given up waiting.
                        let _ = reply.send(state.snapshot());
                    }
                }
            }
            state
        });
        (Self { tx }, task)
    }

    pub fn set_status(&self, status: ArmStatus) {
        self.request(StateRequest::SetStatus(status));
    }

    pub fn set_angles(&self, angles: JointAngles) {
        self.request(StateRequest::SetAngles(angles));
    }

    /// A copy of the state after every previously queued update.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Channel`] if the state task has stopped.
    pub async fn snapshot(&self) -> Result<ArmState, BridgeError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(StateRequest::Snapshot(reply))
            .map_err(|_| BridgeError::Channel("arm state task stopped".to_string()))?;
        response
            .await
            .map_err(|_| BridgeError::Channel("arm state task dropped snapshot".to_string()))
    }

    fn request(&self, request: StateRequest) {
        if self.tx.send(request).is_err() {
            debug!("arm state task stopped; update dropped");
        }
    }
}
