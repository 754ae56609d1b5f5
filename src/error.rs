use std::io;

use thiserror::Error;

/// Errors that can be returned from bus, adapter, and codec operations.
/// These are generally converted into `io::Error`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CbmError {
    /// Unknown error
    #[error("unknown error")]
    Unknown,
    /// No backend with the requested name is registered
    #[error("unknown backend")]
    UnknownBackend,
    /// The backend is marked inactive in the configuration
    #[error("backend is disabled in the configuration")]
    BackendDisabled,
    /// The backend lacks at least one mandatory operation
    #[error("backend does not provide all mandatory operations")]
    BackendIncomplete,
    /// An optional feature group is only partially provided
    #[error("backend provides an incomplete optional feature group")]
    BackendInconsistent,
    /// The backend's init hook failed
    #[error("backend initialization failed")]
    BackendInitFailed,
    /// No backend has been resolved for this session
    #[error("no backend available")]
    NoBackend,
    /// The resolved backend does not provide the requested feature
    #[error("operation not supported by this backend")]
    NotSupported,
    /// No matching adapter was found on any USB bus
    #[error("adapter not found")]
    DeviceNotFound,
    /// The adapter firmware speaks a different protocol version
    #[error("firmware version {found} does not match expected version {expected}")]
    VersionMismatch { found: u8, expected: u8 },
    /// The adapter could not be configured or claimed
    #[error("unable to claim adapter")]
    ClaimFailed,
    /// USB transport failure; the adapter's framing is now unknown
    #[error("USB I/O error: {0}")]
    UsbIo(String),
    /// The adapter firmware reported a failed command
    #[error("adapter reported an error")]
    DeviceError,
    /// A blocked status wait was cancelled
    #[error("operation cancelled")]
    Cancelled,
    /// Neither disk nor tape mode has been established
    #[error("adapter is in neither disk nor tape mode")]
    NoDiskTapeMode,
    /// Tape command sent to firmware without tape support
    #[error("adapter firmware has no tape support")]
    NoTapeSupport,
    /// Tape command sent while the adapter is in disk mode
    #[error("tape command refused in disk mode")]
    TapeCmdInDiskMode,
    /// Disk command sent while the adapter is in tape mode
    #[error("disk command refused in tape mode")]
    DiskCmdInTapeMode,
    /// A device did not respond to LISTEN/TALK/OPEN/CLOSE
    #[error("bus error")]
    BusError,
    /// A drive memory transfer failed
    #[error("drive memory transfer failed")]
    TransferFailed,
    /// Malformed argument, such as an adapter specification
    #[error("invalid argument")]
    InvalidArgument,
    /// Empty or otherwise unusable buffer
    #[error("invalid buffer")]
    InvalidBuffer,
}

impl From<CbmError> for io::Error {
    fn from(error: CbmError) -> io::Error {
        use self::CbmError::*;
        use std::io::ErrorKind;
        let kind = match error {
            Unknown => ErrorKind::Other,
            UnknownBackend | BackendDisabled => ErrorKind::NotFound,
            BackendIncomplete | BackendInconsistent => ErrorKind::InvalidData,
            BackendInitFailed => ErrorKind::Other,
            NoBackend => ErrorKind::NotConnected,
            NotSupported => ErrorKind::Unsupported,
            DeviceNotFound => ErrorKind::NotFound,
            VersionMismatch { .. } => ErrorKind::InvalidData,
            ClaimFailed => ErrorKind::PermissionDenied,
            UsbIo(_) => ErrorKind::BrokenPipe,
            DeviceError => ErrorKind::Other,
            Cancelled => ErrorKind::Interrupted,
            NoDiskTapeMode | NoTapeSupport | TapeCmdInDiskMode | DiskCmdInTapeMode => {
                ErrorKind::InvalidInput
            }
            BusError => ErrorKind::Other,
            TransferFailed => ErrorKind::Other,
            InvalidArgument | InvalidBuffer => ErrorKind::InvalidInput,
        };
        io::Error::new(kind, error)
    }
}

impl From<io::Error> for CbmError {
    fn from(error: io::Error) -> CbmError {
        CbmError::from_io_error(&error).unwrap_or(CbmError::Unknown)
    }
}

impl From<rusb::Error> for CbmError {
    fn from(error: rusb::Error) -> CbmError {
        CbmError::UsbIo(error.to_string())
    }
}

impl CbmError {
    /// If the provided `io::Error` contains a `CbmError`, return the
    /// underlying `CbmError`.  If not, return None.
    pub fn from_io_error(error: &io::Error) -> Option<CbmError> {
        error
            .get_ref()
            .and_then(|e| e.downcast_ref::<CbmError>())
            .cloned()
    }

    /// This is sometimes useful instead of .into() when the compiler doesn't
    /// have enough information to perform type inference.
    pub fn to_io_error(&self) -> io::Error {
        self.clone().into()
    }

    /// Mode violations are caller programming errors and are never retried.
    pub fn is_mode_violation(&self) -> bool {
        matches!(
            self,
            CbmError::NoDiskTapeMode
                | CbmError::NoTapeSupport
                | CbmError::TapeCmdInDiskMode
                | CbmError::DiskCmdInTapeMode
        )
    }
}

impl PartialEq<io::Error> for CbmError {
    fn eq(&self, other: &io::Error) -> bool {
        matches!(CbmError::from_io_error(other), Some(ref e) if e == self)
    }
}

impl PartialEq<CbmError> for io::Error {
    fn eq(&self, other: &CbmError) -> bool {
        matches!(CbmError::from_io_error(self), Some(ref e) if e == other)
    }
}
