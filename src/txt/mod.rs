//! ROBO TXT controller: identifier-tagged messages over TCP.

pub mod camera;
pub mod codec;

use std::sync::Arc;

use crate::config::{CameraConfig, SessionConfig, TXT_CAMERA_PORT, TXT_PORT};
use crate::error::{Error, Result};
use crate::protocol::{ControllerInfo, Protocol};
use crate::registers::{INPUT_COUNT, RegisterBank};
use crate::session::{Session, SessionHandle};
use crate::transport::Transport;
use crate::transport::tcp::TcpTransport;

use camera::{CameraControl, CameraStream};
use codec::{CameraRequest, ConfigRequest, ExchangeRequest, TxtCommand, TxtReply, read_reply};

pub type TxtSession = Session<TxtProtocol>;

#[derive(Debug, Clone, Default)]
pub struct TxtProtocol {
    config_id: i16,
}

impl TxtProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id carried by the most recent `UpdateConfig`.
    pub fn config_id(&self) -> i16 {
        self.config_id
    }

    fn call(&mut self, io: &mut dyn Transport, command: TxtCommand) -> Result<TxtReply> {
        let id = command.id();
        let bytes = command.encode();
        log::debug!("TXT: {:?} ({} bytes)", id, bytes.len());
        io.write(&bytes)?;
        read_reply(io, id)
    }

    /// Ask the controller to start streaming on the camera port.
    pub fn start_camera(&mut self, io: &mut dyn Transport, config: &CameraConfig) -> Result<()> {
        self.call(io, TxtCommand::StartCamera(CameraRequest::from(config)))
            .map(|_| ())
    }

    pub fn stop_camera(&mut self, io: &mut dyn Transport) -> Result<()> {
        self.call(io, TxtCommand::StopCamera).map(|_| ())
    }
}

impl Protocol for TxtProtocol {
    const NAME: &'static str = "TXT";

    fn reset(&mut self) {
        self.config_id = 0;
    }

    fn identify(&mut self, io: &mut dyn Transport) -> Result<ControllerInfo> {
        match self.call(io, TxtCommand::QueryStatus)? {
            TxtReply::Status(status) => {
                let info = status.info();
                log::info!("TXT: connected to {} (firmware {})", info.name, info.version);
                Ok(info)
            }
            _ => Err(Error::MalformedFrame("status reply expected")),
        }
    }

    fn start_online(&mut self, io: &mut dyn Transport) -> Result<()> {
        self.call(io, TxtCommand::StartOnline).map(|_| ())
    }

    fn update_config(&mut self, io: &mut dyn Transport, bank: &RegisterBank) -> Result<()> {
        self.config_id = self.config_id.wrapping_add(1);
        let request = ConfigRequest::from_bank(self.config_id, 0, bank)?;
        self.call(io, TxtCommand::UpdateConfig(request)).map(|_| ())
    }

    fn exchange(
        &mut self,
        io: &mut dyn Transport,
        bank: &RegisterBank,
    ) -> Result<[i16; INPUT_COUNT]> {
        let request = ExchangeRequest::from_bank(bank);
        match self.call(io, TxtCommand::ExchangeData(request))? {
            TxtReply::Exchange(reply) => Ok(reply.universal),
            _ => Err(Error::MalformedFrame("exchange reply expected")),
        }
    }

    fn stop_online(&mut self, io: &mut dyn Transport) -> Result<()> {
        self.call(io, TxtCommand::StopOnline).map(|_| ())
    }
}

impl Session<TxtProtocol> {
    /// Session over TCP to the main protocol port.
    pub fn tcp(config: SessionConfig) -> Result<Self> {
        let transport = TcpTransport::with_port(TXT_PORT, config.io_timeout);
        Session::new(Box::new(transport), TxtProtocol::new(), config)
    }

    pub fn txt_with_transport(transport: Box<dyn Transport>, config: SessionConfig) -> Result<Self> {
        Session::new(transport, TxtProtocol::new(), config)
    }

    /// Camera stream on the connected controller's camera port.
    pub fn camera(&self, config: CameraConfig) -> Result<CameraStream> {
        let address = self.address().ok_or(Error::NotConnected)?;
        let host = camera_host(&address);
        let transport = TcpTransport::with_port(TXT_CAMERA_PORT, self.config().io_timeout);
        self.camera_with_transport(Box::new(transport), host, config)
    }

    /// Camera stream over a caller supplied transport.
    pub fn camera_with_transport(
        &self,
        transport: Box<dyn Transport>,
        address: String,
        config: CameraConfig,
    ) -> Result<CameraStream> {
        let control: Arc<dyn CameraControl> = Arc::new(self.handle());
        CameraStream::new(control, transport, address, config)
    }
}

/// Strip an explicit main-protocol port so the camera port applies.
fn camera_host(address: &str) -> String {
    match address.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() && !host.contains(':') => {
            host.to_string()
        }
        _ => address.to_string(),
    }
}

impl CameraControl for SessionHandle<TxtProtocol> {
    fn start_camera(&self, config: &CameraConfig) -> Result<()> {
        let config = config.clone();
        self.run_exchange(move |protocol, io| protocol.start_camera(io, &config))
    }

    fn stop_camera(&self) -> Result<()> {
        self.run_exchange(|protocol, io| protocol.stop_camera(io))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::codec::{
        ConfigRequest, ExchangeReply, ExchangeRequest, MessageId, StatusReply, encode_ack,
    };
    use super::{TxtProtocol, camera_host};
    use crate::config::CameraConfig;
    use crate::error::Error;
    use crate::protocol::Protocol;
    use crate::registers::{InputMode, RegisterBank};
    use crate::transport::Transport;
    use crate::transport::mock::MockTransport;

    /// What the simulated TXT has seen so far.
    #[derive(Default)]
    pub(crate) struct TxtDevice {
        pub inputs: [i16; 8],
        pub exchanges: Vec<ExchangeRequest>,
        pub configs: Vec<ConfigRequest>,
        pub commands: Vec<MessageId>,
        /// Answer `ExchangeData` with this identifier instead of the right one
        pub wrong_exchange_reply: bool,
    }

    impl TxtDevice {
        pub fn count(&self, id: MessageId) -> usize {
            self.commands.iter().filter(|&&seen| seen == id).count()
        }
    }

    /// Mock transport answering like a TXT on the main protocol port.
    pub(crate) fn txt_device() -> (MockTransport, Arc<Mutex<TxtDevice>>) {
        let state = Arc::new(Mutex::new(TxtDevice::default()));
        let device = Arc::clone(&state);
        let mock = MockTransport::with_responder(move |request| {
            let raw = u32::from_le_bytes([request[0], request[1], request[2], request[3]]);
            let id = MessageId::try_from(raw).expect("host sends known commands");
            let body = &request[4..];
            let mut device = device.lock();
            device.commands.push(id);
            match id {
                MessageId::QueryStatus => StatusReply {
                    name: "TXT-0815".into(),
                    version: 0x0104_0600,
                }
                .encode(),
                MessageId::UpdateConfig => {
                    let config = ConfigRequest::decode(body).expect("valid config");
                    device.configs.push(config);
                    encode_ack(id.reply())
                }
                MessageId::ExchangeData => {
                    let exchange = ExchangeRequest::decode(body).expect("valid exchange");
                    device.exchanges.push(exchange);
                    if device.wrong_exchange_reply {
                        return encode_ack(MessageId::StopOnlineReply);
                    }
                    ExchangeReply {
                        universal: device.inputs,
                        ..ExchangeReply::default()
                    }
                    .encode()
                }
                other => encode_ack(other.reply()),
            }
        });
        (mock, state)
    }

    #[test]
    fn identify_and_config_ids() {
        let (mock, device) = txt_device();
        let mut io = mock.as_transport();
        io.open("192.168.7.2").expect("mock opens");
        let mut protocol = TxtProtocol::new();

        let info = protocol.identify(&mut *io).expect("status answered");
        assert_eq!(info.name, "TXT-0815");
        assert_eq!(info.version.to_string(), "1.4.6");

        let mut bank = RegisterBank::new();
        bank.set_input_mode(0, InputMode::Resistance, true)
            .expect("valid input");
        protocol.update_config(&mut *io, &bank).expect("acknowledged");
        protocol.update_config(&mut *io, &bank).expect("acknowledged");

        let device = device.lock();
        let ids: Vec<i16> = device.configs.iter().map(|c| c.config_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(device.configs[0].inputs[0], (InputMode::Resistance, true));
    }

    #[test]
    fn exchange_with_wrong_reply_is_protocol_mismatch() {
        let (mock, device) = txt_device();
        device.lock().wrong_exchange_reply = true;
        let mut io = mock.as_transport();
        io.open("192.168.7.2").expect("mock opens");

        assert!(matches!(
            TxtProtocol::new().exchange(&mut *io, &RegisterBank::new()),
            Err(Error::ProtocolMismatch { .. })
        ));
    }

    #[test]
    fn camera_commands_are_acknowledged() {
        let (mock, device) = txt_device();
        let mut io = mock.as_transport();
        io.open("192.168.7.2").expect("mock opens");
        let mut protocol = TxtProtocol::new();

        protocol
            .start_camera(&mut *io, &CameraConfig::default())
            .expect("acknowledged");
        protocol.stop_camera(&mut *io).expect("acknowledged");

        let device = device.lock();
        assert_eq!(
            device.commands,
            vec![MessageId::StartCamera, MessageId::StopCamera]
        );
    }

    #[test]
    fn camera_host_drops_main_port() {
        assert_eq!(camera_host("192.168.8.2"), "192.168.8.2");
        assert_eq!(camera_host("192.168.8.2:65000"), "192.168.8.2");
        assert_eq!(camera_host("txt.local"), "txt.local");
        assert_eq!(camera_host("::1"), "::1");
    }
}
