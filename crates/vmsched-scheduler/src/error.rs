//! Scheduler error types.

use thiserror::Error;
use vmsched_placement::PlacementError;

use crate::collaborators::CollaboratorError;

/// Rollback-relevant discriminant of a [`SchedulerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    NoValidHost,
    ComputeServiceUnavailable,
    Unimplemented,
    Other,
}

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No valid host was found. {reason}")]
    NoValidHost { reason: String },

    #[error("Compute service of {host} is unavailable at this time.")]
    ComputeServiceUnavailable { host: String },

    #[error("{0} is not implemented by this scheduler driver")]
    Unimplemented(&'static str),

    #[error("Instance {uuid} is not running.")]
    InstanceNotRunning { uuid: String },

    #[error("Unable to migrate instance ({uuid}) to current host ({host}).")]
    UnableToMigrateToSelf { uuid: String, host: String },

    #[error("Migration pre-check error: {0}")]
    MigrationPreCheck(String),

    #[error("The destination hypervisor type does not match the source.")]
    InvalidHypervisorType,

    #[error("The instance requires a newer hypervisor version than has been provided.")]
    DestinationHypervisorTooOld,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("scheduler configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("{0}")]
    Other(String),
}

impl SchedulerError {
    pub fn no_valid_host(reason: impl Into<String>) -> Self {
        Self::NoValidHost {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoValidHost { .. } => ErrorKind::NoValidHost,
            Self::ComputeServiceUnavailable { .. } => ErrorKind::ComputeServiceUnavailable,
            Self::Unimplemented(_) => ErrorKind::Unimplemented,
            _ => ErrorKind::Other,
        }
    }

    /// Request-validation failures. Live migration skips a candidate
    /// destination that fails one of these.
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            Self::InstanceNotRunning { .. }
                | Self::UnableToMigrateToSelf { .. }
                | Self::MigrationPreCheck(_)
                | Self::InvalidHypervisorType
                | Self::DestinationHypervisorTooOld
                | Self::InvalidRequest(_)
        )
    }

    /// Declared outcomes of a scheduler call, as opposed to faults.
    pub fn is_expected(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NoValidHost | ErrorKind::ComputeServiceUnavailable
        ) || self.is_invalid()
    }

    /// Short type name recorded in fault records.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::NoValidHost { .. } => "NoValidHost",
            Self::ComputeServiceUnavailable { .. } => "ComputeServiceUnavailable",
            Self::Unimplemented(_) => "NotImplementedError",
            Self::InstanceNotRunning { .. } => "InstanceNotRunning",
            Self::UnableToMigrateToSelf { .. } => "UnableToMigrateToSelf",
            Self::MigrationPreCheck(_) => "MigrationPreCheckError",
            Self::InvalidHypervisorType => "InvalidHypervisorType",
            Self::DestinationHypervisorTooOld => "DestinationHypervisorTooOld",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::Config(_) => "ConfigError",
            Self::Collaborator(CollaboratorError::NotFound(_)) => "NotFound",
            Self::Collaborator(_) => "CollaboratorError",
            Self::Other(_) => "SchedulerError",
        }
    }

    /// Fault code recorded alongside the instance fault.
    pub fn fault_code(&self) -> u16 {
        if self.is_invalid() { 400 } else { 500 }
    }
}

impl From<PlacementError> for SchedulerError {
    fn from(err: PlacementError) -> Self {
        match err {
            PlacementError::NoValidHost { reason } => Self::NoValidHost { reason },
            PlacementError::UnknownFilter(name) => Self::Config(format!("unknown filter {name}")),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// A scheduler error as seen by the transport.
///
/// `Expected` errors are part of the method's contract and must not be
/// logged as server faults.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{0}")]
    Expected(SchedulerError),

    #[error("{0}")]
    Unexpected(SchedulerError),
}

impl RpcError {
    pub fn inner(&self) -> &SchedulerError {
        match self {
            Self::Expected(e) | Self::Unexpected(e) => e,
        }
    }

    pub fn into_inner(self) -> SchedulerError {
        match self {
            Self::Expected(e) | Self::Unexpected(e) => e,
        }
    }
}

impl From<SchedulerError> for RpcError {
    fn from(err: SchedulerError) -> Self {
        if err.is_expected() {
            Self::Expected(err)
        } else {
            Self::Unexpected(err)
        }
    }
}
