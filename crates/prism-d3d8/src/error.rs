use prism_gpu::BackendError;
use thiserror::Error;

/// The public error taxonomy of the runtime.
///
/// These mirror the legacy API's HRESULT failure modes: a caller that held
/// onto the original return-code semantics can map each variant 1:1.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum D3dError {
    /// Parameter validation failed or the call is illegal in the current
    /// state (double lock, wrong pool for a usage, bad box).
    #[error("invalid call")]
    InvalidCall,
    /// Resource allocation failed. Creation paths roll back before
    /// returning this.
    #[error("out of memory")]
    OutOfMemory,
    /// The device is lost; only state queries and loss notifications are
    /// meaningful until the hardware becomes ready again.
    #[error("device lost")]
    DeviceLost,
    /// The device is ready to be restored; call `reset`.
    #[error("device not reset")]
    DeviceNotReset,
    /// The requested format/usage combination is not supported.
    #[error("not available")]
    NotAvailable,
    /// `query_interface` for a capability set the object does not implement.
    #[error("no interface")]
    NoInterface,
}

pub type D3dResult<T> = Result<T, D3dError>;

impl From<BackendError> for D3dError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::OutOfMemory => D3dError::OutOfMemory,
            BackendError::Unsupported(_) => D3dError::NotAvailable,
            BackendError::UnknownHandle(_) | BackendError::OutOfBounds(_) => D3dError::InvalidCall,
        }
    }
}
