//! ROBO TX controller: framed packets over a Bluetooth serial link.

pub mod messages;
pub mod packet;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::protocol::{ControllerInfo, Protocol};
use crate::registers::{INPUT_COUNT, RegisterBank};
use crate::session::Session;
use crate::transport::Transport;

use messages::{ConfigPayload, InputPayload, OutputPayload};
use packet::{CommandCode, TxPacket, read_packet};

pub type TxSession = Session<TxProtocol>;

/// Request/response bookkeeping for one TX connection.
///
/// The transaction id advances with every request. The session id is chosen
/// by the controller and echoed back on the next request.
#[derive(Debug, Clone, Default)]
pub struct TxProtocol {
    transaction_id: u16,
    session_id: u16,
    verify_checksums: bool,
}

impl TxProtocol {
    pub fn new(verify_checksums: bool) -> Self {
        Self {
            verify_checksums,
            ..Self::default()
        }
    }

    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    /// Round trip without payload, used as a liveness probe.
    pub fn echo(&mut self, io: &mut dyn Transport) -> Result<()> {
        self.call(io, CommandCode::Echo, Vec::new()).map(|_| ())
    }

    fn call(
        &mut self,
        io: &mut dyn Transport,
        command: CommandCode,
        payload: Vec<u8>,
    ) -> Result<TxPacket> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let request = TxPacket::request(command, self.transaction_id, self.session_id, payload);
        log::debug!(
            "TX: {:?} tid={} sid={} ({} payload bytes)",
            command,
            self.transaction_id,
            self.session_id,
            request.payload.len()
        );
        io.write(&request.encode())?;

        let reply = read_packet(io, self.verify_checksums)?;
        let expected = command.reply();
        if reply.command != expected {
            return Err(Error::ProtocolMismatch {
                expected: expected.into(),
                actual: reply.command.into(),
            });
        }
        check_transfer_area(reply.transfer_area)?;
        self.session_id = reply.session_id;
        Ok(reply)
    }
}

/// Only the master unit (transfer area 0) is addressable.
fn check_transfer_area(area: Option<u32>) -> Result<()> {
    match area {
        None | Some(0) => Ok(()),
        Some(other) => Err(Error::UnsupportedExtension(
            u8::try_from(other).unwrap_or(u8::MAX),
        )),
    }
}

impl Protocol for TxProtocol {
    const NAME: &'static str = "TX";

    fn reset(&mut self) {
        self.transaction_id = 0;
        self.session_id = 0;
    }

    fn identify(&mut self, io: &mut dyn Transport) -> Result<ControllerInfo> {
        let reply = self.call(io, CommandCode::RequestInfo, Vec::new())?;
        let info = messages::decode_info(&reply.payload)?;
        log::info!("TX: connected to {} (firmware {})", info.name, info.version);
        Ok(info)
    }

    fn start_online(&mut self, io: &mut dyn Transport) -> Result<()> {
        self.echo(io)
    }

    fn update_config(&mut self, io: &mut dyn Transport, bank: &RegisterBank) -> Result<()> {
        let payload = ConfigPayload::from_bank(bank)?.encode();
        self.call(io, CommandCode::Config, payload).map(|_| ())
    }

    fn exchange(
        &mut self,
        io: &mut dyn Transport,
        bank: &RegisterBank,
    ) -> Result<[i16; INPUT_COUNT]> {
        let payload = OutputPayload::from_bank(bank).encode();
        let reply = self.call(io, CommandCode::Output, payload)?;
        Ok(InputPayload::decode(&reply.payload)?.universal)
    }

    /// The TX leaves online mode when the host stops exchanging.
    fn stop_online(&mut self, _io: &mut dyn Transport) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "serial")]
impl Session<TxProtocol> {
    /// Session over the RFCOMM serial device node (e.g. `/dev/rfcomm0`, `COM5`).
    pub fn serial(config: SessionConfig) -> Result<Self> {
        let transport = crate::transport::serial::SerialTransport::with(
            crate::config::TX_BAUD_RATE,
            config.io_timeout,
        );
        let protocol = TxProtocol::new(config.verify_checksums);
        Session::new(Box::new(transport), protocol, config)
    }
}

impl Session<TxProtocol> {
    pub fn tx_with_transport(transport: Box<dyn Transport>, config: SessionConfig) -> Result<Self> {
        let protocol = TxProtocol::new(config.verify_checksums);
        Session::new(transport, protocol, config)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::messages::{self, InputPayload, OutputPayload};
    use super::packet::{ADDRESS_CONTROLLER, ADDRESS_HOST, CommandCode, TxPacket};
    use super::{TxProtocol, TxSession};
    use crate::config::SessionConfig;
    use crate::error::Error;
    use crate::events::SessionEvent;
    use crate::protocol::{ControllerInfo, FirmwareVersion, Protocol};
    use crate::registers::{MotorDirection, OutputMode, RegisterBank};
    use crate::transport::Transport;
    use crate::transport::mock::MockTransport;

    const CONTROLLER_SESSION: u16 = 0x5A17;

    #[derive(Default)]
    struct Controller {
        inputs: [i16; 8],
        outputs: Vec<OutputPayload>,
        configs: usize,
        reply_area: u32,
        last_tid: u16,
    }

    fn controller() -> (MockTransport, Arc<Mutex<Controller>>) {
        let state = Arc::new(Mutex::new(Controller::default()));
        let device = Arc::clone(&state);
        let mock = MockTransport::with_responder(move |request| {
            let request = TxPacket::decode(request, true).expect("host sends valid packets");
            let mut device = device.lock();
            device.last_tid = request.transaction_id;
            let payload = match request.command {
                CommandCode::RequestInfo => messages::encode_info(&ControllerInfo {
                    name: "ROBO TX-301".into(),
                    version: FirmwareVersion {
                        major: 1,
                        minor: 30,
                        patch: 0,
                    },
                }),
                CommandCode::Config => {
                    device.configs += 1;
                    Vec::new()
                }
                CommandCode::Output => {
                    device
                        .outputs
                        .push(OutputPayload::decode(&request.payload).expect("valid output"));
                    InputPayload {
                        universal: device.inputs,
                        ..InputPayload::default()
                    }
                    .encode()
                }
                _ => Vec::new(),
            };
            let command = request.command.reply();
            TxPacket {
                from: ADDRESS_CONTROLLER,
                to: ADDRESS_HOST,
                transaction_id: request.transaction_id,
                session_id: CONTROLLER_SESSION,
                command,
                transfer_area: command.has_transfer_area().then_some(device.reply_area),
                payload,
            }
            .encode()
        });
        (mock, state)
    }

    fn opened(mock: &MockTransport) -> Box<dyn Transport> {
        let mut io = mock.as_transport();
        io.open("/dev/rfcomm0").expect("mock opens");
        io
    }

    #[test]
    fn identifies_controller_and_adopts_session_id() {
        let (mock, device) = controller();
        let mut io = opened(&mock);
        let mut protocol = TxProtocol::new(true);

        let info = protocol.identify(&mut *io).expect("controller answers");
        assert_eq!(info.name, "ROBO TX-301");
        assert_eq!(protocol.session_id(), CONTROLLER_SESSION);

        protocol.echo(&mut *io).expect("echo answered");
        assert_eq!(protocol.transaction_id(), 2);
        assert_eq!(device.lock().last_tid, 2);

        let second = TxPacket::decode(&mock.requests()[1], true).expect("valid request");
        assert_eq!(second.session_id, CONTROLLER_SESSION);
    }

    #[test]
    fn exchange_returns_universal_inputs() {
        let (mock, device) = controller();
        device.lock().inputs = [10, 0, 0, 0, 0, 0, 0, -4];
        let mut io = opened(&mock);
        let mut protocol = TxProtocol::new(true);

        let mut bank = RegisterBank::new();
        bank.set_output_value(2, 128).expect("plain output");
        protocol.update_config(&mut *io, &bank).expect("config acknowledged");
        let inputs = protocol.exchange(&mut *io, &bank).expect("exchange answered");

        assert_eq!(inputs, [10, 0, 0, 0, 0, 0, 0, -4]);
        let device = device.lock();
        assert_eq!(device.configs, 1);
        assert_eq!(device.outputs[0].duty[2], 128);
    }

    #[test]
    fn rejects_foreign_transfer_area() {
        let (mock, device) = controller();
        device.lock().reply_area = 3;
        let mut io = opened(&mock);
        let mut protocol = TxProtocol::new(true);

        assert!(matches!(
            protocol.exchange(&mut *io, &RegisterBank::new()),
            Err(Error::UnsupportedExtension(3))
        ));
    }

    #[test]
    fn rejects_unexpected_reply_command() {
        let mock = MockTransport::with_responder(|request| {
            let request = TxPacket::decode(request, true).expect("valid request");
            TxPacket {
                from: ADDRESS_CONTROLLER,
                to: ADDRESS_HOST,
                transaction_id: request.transaction_id,
                session_id: 0,
                command: CommandCode::EchoReply,
                transfer_area: None,
                payload: Vec::new(),
            }
            .encode()
        });
        let mut io = opened(&mock);
        let mut protocol = TxProtocol::new(true);

        assert!(matches!(
            protocol.identify(&mut *io),
            Err(Error::ProtocolMismatch {
                expected: 106,
                actual: 101
            })
        ));
    }

    #[test]
    fn session_drives_motor_registers() {
        let (mock, device) = controller();
        let config = SessionConfig {
            update_interval: Duration::from_millis(10),
            ..SessionConfig::default()
        };
        let session =
            TxSession::tx_with_transport(mock.as_transport(), config).expect("queue starts");
        let (_, events) = session.subscribe_channel();

        session.connect("/dev/rfcomm0").expect("controller answers");
        assert_eq!(
            session.controller_info().map(|info| info.name),
            Some("ROBO TX-301".to_string())
        );
        session
            .configure_output_mode(0, OutputMode::Motor)
            .expect("connected");
        session.start_online().expect("echo answered");
        session
            .set_motor_value(0, 300, MotorDirection::Left)
            .expect("motor pair");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let seen = device
                .lock()
                .outputs
                .last()
                .map(|out| (out.duty[0], out.duty[1]));
            if seen == Some((0, 300)) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "tick never sent 0/300");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(device.lock().configs >= 1);

        session.stop_online().expect("online");
        let last = device.lock().outputs.last().cloned().expect("final exchange");
        assert_eq!(last.duty, [0; 8]);

        session.disconnect().expect("connected");
        let received: Vec<SessionEvent> = events.try_iter().collect();
        assert!(received.contains(&SessionEvent::OnlineStopped));
        assert_eq!(received.last(), Some(&SessionEvent::Disconnected));
    }
}
