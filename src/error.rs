use thiserror::Error;

use crate::result::CommandResult;

/// Errors that escape an orchestrator operation.
///
/// Remote command failures are never reported here: they are recorded as
/// failed [`CommandResult`]s inside the returned status report. Only faults
/// that make the rest of the run meaningless surface as `Err`.
#[derive(Debug, Error)]
pub enum Error {
    /// The session could not be authenticated. Fatal for the whole run.
    #[error("authentication to {host} failed")]
    Authentication {
        host: String,
        record: Box<CommandResult>,
    },

    /// A cloud run-command response lacked the structured markers that
    /// delimit the remote command's stdout and stderr.
    #[error("cloud run-command response is missing the {marker} marker")]
    CloudParse { marker: String, response: String },

    /// A workload or unmount operation referenced a volume with no mount record.
    #[error("volume {volume} has no mount record")]
    UnknownVolume { volume: String },

    #[error("invalid volume descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The failed greeting record for authentication errors.
    pub fn record(&self) -> Option<&CommandResult> {
        match self {
            Error::Authentication { record, .. } => Some(record),
            _ => None,
        }
    }
}
