use thiserror::Error;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task title must not be empty")]
    EmptyTitle,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}")]
    Codec {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no such task: {0}")]
    UnknownTask(TaskId),
}

impl SyncError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn codec(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Codec {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification permission denied")]
    PermissionDenied,

    #[error("notification delivery failed")]
    Delivery,
}
