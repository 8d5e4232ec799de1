use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Number of joints on the arm, servo order included.
pub const JOINT_COUNT: usize = 7;

/// Joint names in servo order. The order is part of the wire protocol.
pub const JOINT_NAMES: [&str; JOINT_COUNT] = [
    "base",
    "shoulder1",
    "shoulder2",
    "elbow",
    "wrist",
    "hand",
    "gripper",
];

/// Neutral angle every joint is assumed to hold at startup.
pub const HOME_ANGLE_DEG: i32 = 90;

/// Values closer than this to a whole degree are treated as that degree
/// before truncation, so float noise from a radian round-trip cannot knock
/// `45.0` down to `44`.
const DEGREE_EPSILON: f64 = 1e-9;

/// Convert radians to whole degrees, truncating toward zero.
///
/// Truncation (not rounding) matches what the firmware has always been
/// sent: `0.99°` becomes `0`, `-1.7°` becomes `-1`.
pub fn rad_to_deg(rad: f64) -> i32 {
    let deg = rad * 180.0 / PI;
    let nearest = deg.round();
    if (deg - nearest).abs() < DEGREE_EPSILON {
        nearest as i32
    } else {
        deg.trunc() as i32
    }
}

/// Index of the first NaN or infinite value in `radians`.
pub fn first_non_finite(radians: &[f64]) -> Option<usize> {
    radians.iter().position(|r| !r.is_finite())
}

/// Convert whole degrees to radians.
pub fn deg_to_rad(deg: i32) -> f64 {
    f64::from(deg) * PI / 180.0
}

// ────────────────────────────────────────────────────────────────────────────
// Arm model
// ────────────────────────────────────────────────────────────────────────────

/// Per-joint angles in whole degrees, always exactly [`JOINT_COUNT`] long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointAngles([i32; JOINT_COUNT]);

impl JointAngles {
    /// Every joint at [`HOME_ANGLE_DEG`].
    pub const HOME: Self = Self([HOME_ANGLE_DEG; JOINT_COUNT]);

    pub fn new(degrees: [i32; JOINT_COUNT]) -> Self {
        Self(degrees)
    }

    /// Build from a slice of radians, truncating each value to whole degrees.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidJointGoals`] when `radians` does not hold
    /// exactly [`JOINT_COUNT`] values, and [`BridgeError::NonFiniteJointGoal`]
    /// for a NaN or infinite position.
    pub fn from_radians(radians: &[f64]) -> Result<Self, BridgeError> {
        let radians: &[f64; JOINT_COUNT] =
            radians
                .try_into()
                .map_err(|_| BridgeError::InvalidJointGoals {
                    expected: JOINT_COUNT,
                    actual: radians.len(),
                })?;
        if let Some(joint) = first_non_finite(radians) {
            return Err(BridgeError::NonFiniteJointGoal { joint });
        }
        Ok(Self((*radians).map(rad_to_deg)))
    }

    pub fn degrees(&self) -> &[i32; JOINT_COUNT] {
        &self.0
    }

    pub fn to_radians(&self) -> [f64; JOINT_COUNT] {
        self.0.map(deg_to_rad)
    }
}

impl Default for JointAngles {
    fn default() -> Self {
        Self::HOME
    }
}

/// Discrete arm status, as reported to the control stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArmStatus {
    #[default]
    Idle,
    Moving,
    RunningMacro,
}

impl ArmStatus {
    /// Name published on the `arm_status` channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArmStatus::Idle => "IDLE",
            ArmStatus::Moving => "MOVING",
            ArmStatus::RunningMacro => "RUNNING_MACRO",
        }
    }
}

impl fmt::Display for ArmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArmStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(ArmStatus::Idle),
            "MOVING" => Ok(ArmStatus::Moving),
            "RUNNING_MACRO" => Ok(ArmStatus::RunningMacro),
            other => Err(BridgeError::Serialization(format!(
                "unknown arm status {other:?}"
            ))),
        }
    }
}

/// High-level commands accepted from the control stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum Command {
    /// Play back a macro stored on the controller.
    RunMacro { name: String },
    /// Move to a pose stored on the controller.
    RunPose { name: String },
    /// Move every joint to an absolute goal, in radians.
    MoveJoints { angles: [f64; JOINT_COUNT] },
}

/// Joint names and positions in radians, shaped like a ROS `JointState`.
///
/// Used both for published joint states and for inbound joint goals; goals
/// may leave `name` empty since only `position` is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub stamp: DateTime<Utc>,
    #[serde(default)]
    pub name: Vec<String>,
    pub position: Vec<f64>,
}

impl JointState {
    /// Snapshot `angles` as a named joint state stamped with `stamp`.
    pub fn from_angles(angles: &JointAngles, stamp: DateTime<Utc>) -> Self {
        Self {
            stamp,
            name: JOINT_NAMES.iter().map(|n| n.to_string()).collect(),
            position: angles.to_radians().to_vec(),
        }
    }

    /// A goal carrying only positions.
    pub fn goal(position: Vec<f64>) -> Self {
        Self {
            stamp: Utc::now(),
            name: Vec::new(),
            position,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "armbridge-runtime::publisher"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    RunMacro(String),
    RunPose(String),
    JointGoals(JointState),
    JointStates(JointState),
    ArmStatus(ArmStatus),
}

/// Error type shared by every armbridge crate.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Serial connection error on {port}: {details}")]
    Connection { port: String, details: String },

    #[error("Serial write error: {0}")]
    Write(String),

    #[error("Serial read error: {0}")]
    Read(String),

    #[error("joint_goals must carry {expected} positions, got {actual}")]
    InvalidJointGoals { expected: usize, actual: usize },

    #[error("joint_goals position {joint} is not a finite number")]
    NonFiniteJointGoal { joint: usize },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config error: {0}")]
    Config(String),
}
