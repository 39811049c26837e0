use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EvsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsafe transform: {reason}")]
    Transform { reason: String },

    #[error("another EverSession operation is in progress ({0})")]
    Lock(PathBuf),
}

impl EvsError {
    pub fn transform(reason: impl Into<String>) -> Self {
        EvsError::Transform {
            reason: reason.into(),
        }
    }
}
