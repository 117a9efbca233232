use thiserror::Error;

pub type LvmResult<T> = Result<T, LvmError>;

#[derive(Error, Debug)]
pub enum LvmError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Logical volume already exists: {0}")]
    AlreadyExists(String),

    #[error("Logical volume not found: {0}")]
    NotFound(String),

    /// The volume was registered but its device node is gone.
    #[error("Logical volume device missing: {0}")]
    DeviceMissing(String),

    #[error("lvcreate failed for {name}: {output}")]
    CreationFailed { name: String, output: String },

    #[error("lvremove failed for {path}: {output}")]
    DeletionFailed { path: String, output: String },

    /// The external tool succeeded but the registry could not be updated to
    /// match. Requires manual reconciliation.
    #[error("Registry out of sync with volume manager: {0}")]
    Inconsistent(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LvmError> for tonic::Status {
    fn from(err: LvmError) -> Self {
        let msg = err.to_string();
        match err {
            LvmError::InvalidArgument(_) => tonic::Status::invalid_argument(msg),
            LvmError::AlreadyExists(_) => tonic::Status::already_exists(msg),
            LvmError::NotFound(_) | LvmError::DeviceMissing(_) => tonic::Status::not_found(msg),
            LvmError::CreationFailed { .. }
            | LvmError::DeletionFailed { .. }
            | LvmError::Inconsistent(_)
            | LvmError::Io(_) => tonic::Status::internal(msg),
        }
    }
}
