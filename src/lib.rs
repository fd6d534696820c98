//! Rust client for the fischertechnik ROBO TX and ROBO TXT online protocols.
//!
//! The recommended API surface is:
//! - [`TxtSession`] / [`TxSession`] to connect, enter online mode and drive I/O
//! - [`SessionEvent`] listeners for connection and input changes
//! - [`CameraStream`] for the TXT camera
//! - [`transport`] for TCP and Bluetooth serial links
//!
//! [`tx`] and [`txt`] expose the wire codecs for tooling and simulators.

mod config;
mod error;
mod events;
mod protocol;
mod queue;
mod registers;
mod session;
/// Byte transports underneath the controller protocols.
pub mod transport;
/// ROBO TX packet codec and protocol.
pub mod tx;
/// ROBO TXT message codec, protocol and camera stream.
pub mod txt;
mod wire;

pub use config::*;
/// Errors returned by sessions, codecs and transports.
pub use error::{Error, Result};
pub use events::{CameraEvent, CameraFrame, EventHub, ListenerId, SessionEvent};
pub use protocol::{ControllerInfo, FirmwareVersion, Protocol};
/// Single-worker queue serializing all I/O of one connection.
pub use queue::TaskQueue;
pub use registers::{
    COUNTER_COUNT, INPUT_COUNT, InputMode, MAX_OUTPUT_VALUE, MOTOR_COUNT, MotorDirection,
    OUTPUT_COUNT, OutputMode, RegisterBank,
};
pub use session::{ConnectionState, Session, SessionHandle};
pub use tx::{TxProtocol, TxSession};
pub use txt::camera::{CameraControl, CameraStream, FramePool};
pub use txt::{TxtProtocol, TxtSession};
