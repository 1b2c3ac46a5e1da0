use thiserror::Error;

/// Terminal resolutions of a cancellable context
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

pub type ContextResult<T> = std::result::Result<T, ContextError>;
