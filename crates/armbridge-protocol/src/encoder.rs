//! Command encoder: [`Command`] → one line of the controller's text protocol.
//!
//! | Command | Wire line | Optimistic status |
//! |---|---|---|
//! | `RunMacro { name }` | `macro play <name>` | `RUNNING_MACRO` |
//! | `RunPose { name }` | `pose load <name>` | `MOVING` |
//! | `MoveJoints { angles }` | `move <a0> … <a6>` (whole degrees) | `MOVING` |
//!
//! The line terminator is added by the serial link, not here.

use armbridge_types::{ArmStatus, Command, JointAngles};

/// Result of encoding a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    /// Wire line without the trailing newline.
    pub line: String,
    /// Status to assume as soon as the line is sent.
    pub optimistic_status: ArmStatus,
    /// Truncated joint goal, for `MoveJoints` only.
    pub commanded: Option<JointAngles>,
}

/// Encode `command` into its wire line and optimistic status.
pub fn encode(command: &Command) -> EncodedCommand {
    match command {
        Command::RunMacro { name } => EncodedCommand {
            line: format!("macro play {name}"),
            optimistic_status: ArmStatus::RunningMacro,
            commanded: None,
        },
        Command::RunPose { name } => EncodedCommand {
            line: format!("pose load {name}"),
            optimistic_status: ArmStatus::Moving,
            commanded: None,
        },
        Command::MoveJoints { angles } => {
            let degrees = JointAngles::new((*angles).map(armbridge_types::rad_to_deg));
            let joined = degrees
                .degrees()
                .iter()
                .map(i32::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            EncodedCommand {
                line: format!("move {joined}"),
                optimistic_status: ArmStatus::Moving,
                commanded: Some(degrees),
            }
        }
    }
}
