use thiserror::Error;

pub type IoLimitResult<T> = Result<T, IoLimitError>;

#[derive(Error, Debug)]
pub enum IoLimitError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported cgroup hierarchy: {0}")]
    UnsupportedCgroup(String),

    #[error("{0} runtime support is not present")]
    UnsupportedRuntime(String),

    #[error("Could not resolve major:minor of {device}: {source}")]
    DeviceResolutionFailed {
        device: String,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to write {path}: {source}")]
    ApplyFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<IoLimitError> for tonic::Status {
    fn from(err: IoLimitError) -> Self {
        let msg = err.to_string();
        match err {
            IoLimitError::InvalidArgument(_) => tonic::Status::invalid_argument(msg),
            IoLimitError::NotFound(_) => tonic::Status::not_found(msg),
            IoLimitError::UnsupportedCgroup(_) | IoLimitError::UnsupportedRuntime(_) => {
                tonic::Status::failed_precondition(msg)
            }
            IoLimitError::DeviceResolutionFailed { .. } | IoLimitError::ApplyFailed { .. } => {
                tonic::Status::internal(msg)
            }
        }
    }
}
