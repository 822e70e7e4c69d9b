use thiserror::Error;

use crate::identity::EnumerationError;
use crate::probe::ProbeParseError;
use crate::runner::CommandError;
use crate::types::{DeviceId, Direction};

/// Errors surfaced by engine operations.
///
/// Messages are short and never carry raw tool output; they are returned to
/// HTTP callers as-is.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("hardware enumeration failed: {0}")]
    Enumeration(#[from] EnumerationError),

    #[error("capability probe failed: {0}")]
    ProbeParse(#[from] ProbeParseError),

    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("invalid port roles: expected capture -> playback, got {from} -> {to}")]
    InvalidPortRole { from: Direction, to: Direction },

    #[error("failed to attach device {device}: {reason}")]
    AttachFailed { device: DeviceId, reason: String },

    #[error("{command} failed: {reason}")]
    RoutingCommand { command: String, reason: String },

    #[error("device {0} is still loaded")]
    DeviceBusy(DeviceId),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PatchError {
    pub(crate) fn routing(command: &str, err: CommandError) -> Self {
        Self::RoutingCommand {
            command: command.to_string(),
            reason: err.to_string(),
        }
    }
}
