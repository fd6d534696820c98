//! Per-family wire exchanges driven by [`crate::Session`].

use crate::error::Result;
use crate::registers::{INPUT_COUNT, RegisterBank};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl core::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Identity reported by the controller right after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerInfo {
    pub name: String,
    pub version: FirmwareVersion,
}

/// One controller family's request/response exchanges.
///
/// Every method runs on the session's task queue worker and owns the
/// transport for the duration of the call.
pub trait Protocol: Send + 'static {
    /// Family name used in logs and queue thread names.
    const NAME: &'static str;

    /// Forget per-connection bookkeeping before a fresh connect.
    fn reset(&mut self);

    /// Identification exchange performed during `connect`.
    fn identify(&mut self, io: &mut dyn Transport) -> Result<ControllerInfo>;

    fn start_online(&mut self, io: &mut dyn Transport) -> Result<()>;

    /// Push port configuration (input modes, motor pairing).
    fn update_config(&mut self, io: &mut dyn Transport, bank: &RegisterBank) -> Result<()>;

    /// Send output registers, return the universal input readings.
    fn exchange(
        &mut self,
        io: &mut dyn Transport,
        bank: &RegisterBank,
    ) -> Result<[i16; INPUT_COUNT]>;

    fn stop_online(&mut self, io: &mut dyn Transport) -> Result<()>;
}
