//! Error types for ftlink

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by sessions, codecs, transports and task queues.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `connect` called while a connection is already established
    #[error("Already connected")]
    AlreadyConnected,

    /// Operation requires a connected (or online) session
    #[error("Not connected")]
    NotConnected,

    /// Operation requires online mode
    #[error("Online mode is not active")]
    NotOnline,

    /// Address could not be interpreted by the transport
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Response identifier did not match the one expected by the request
    #[error("Protocol mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ProtocolMismatch {
        /// Identifier the request expects back
        expected: u32,
        /// Identifier actually received
        actual: u32,
    },

    /// Buffer shorter than the layout requires
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    TruncatedFrame {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// TX packet checksum did not match its contents
    #[error("Checksum error: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        expected: u16,
        /// Checksum carried by the packet
        actual: u16,
    },

    /// Frame is structurally invalid (bad start/end marker, negative size, ...)
    #[error("Malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Underlying socket failure
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Serial port failure
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Only the master unit (extension 0) is supported
    #[error("Unsupported extension: {0}")]
    UnsupportedExtension(u8),

    /// Port index outside the register bank
    #[error("Invalid {kind} index: {index}")]
    InvalidPort {
        /// Register family ("input", "output", "motor")
        kind: &'static str,
        /// Offending index
        index: usize,
    },

    /// Plain output accessor used on a motor pair, or motor accessor on plain outputs
    #[error("Output {port} is {}", pairing(.motor))]
    PortMode {
        /// Output (or motor) index
        port: usize,
        /// Whether the port is currently in motor mode
        motor: bool,
    },

    /// Output register value outside `0..=max`
    #[error("Value {value} out of range (0..={max})")]
    ValueOutOfRange {
        /// Rejected value
        value: i32,
        /// Upper bound
        max: i32,
    },

    /// Task queue has been disposed
    #[error("Task queue disposed")]
    QueueDisposed,

    /// A queued job panicked
    #[error("Queued job panicked: {0}")]
    JobPanicked(String),
}

fn pairing(motor: &bool) -> &'static str {
    if *motor {
        "paired as a motor"
    } else {
        "not paired as a motor"
    }
}

impl Error {
    /// Errors that leave the wire exchange in an unknown state.
    ///
    /// A session hitting one of these mid-exchange moves to `Invalid`.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ProtocolMismatch { .. }
            | Self::TruncatedFrame { .. }
            | Self::ChecksumMismatch { .. }
            | Self::MalformedFrame(_)
            | Self::Transport(_)
            | Self::UnsupportedExtension(_)
            | Self::JobPanicked(_)
            | Self::QueueDisposed => true,
            #[cfg(feature = "serial")]
            Self::Serial(_) => true,
            Self::AlreadyConnected
            | Self::NotConnected
            | Self::NotOnline
            | Self::InvalidAddress(_)
            | Self::InvalidPort { .. }
            | Self::PortMode { .. }
            | Self::ValueOutOfRange { .. } => false,
        }
    }
}
