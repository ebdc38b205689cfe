use thiserror::Error;

use super::InstanceId;

#[derive(Debug, Error)]
pub enum ShikiError {
    #[error("process not found: {0}")]
    ProcessNotFound(InstanceId),

    #[error("unsupported job status type: {0}")]
    UnsupportedAgentStatus(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unable to fork a handler process: {0}")]
    ForkFailed(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ShikiError {
    fn from(e: zip::result::ZipError) -> Self {
        ShikiError::Archive(e.to_string())
    }
}
