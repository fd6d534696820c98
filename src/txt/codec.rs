//! ROBO TXT wire messages.
//!
//! Every message starts with a 32-bit little-endian identifier followed by a
//! fixed layout. Replies are checked identifier-first: a reply whose leading
//! word is not the expected one is rejected before anything else is parsed.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::CameraConfig;
use crate::error::{Error, Result};
use crate::protocol::{ControllerInfo, FirmwareVersion};
use crate::registers::{COUNTER_COUNT, INPUT_COUNT, InputMode, MOTOR_COUNT, OUTPUT_COUNT, RegisterBank};
use crate::transport::Transport;
use crate::wire::{Reader, put_ascii};

/// Leading word of every camera frame header.
pub const CAMERA_FRAME_MAGIC: u32 = 0xBDC2_D7A1;
/// Sent back on the camera socket after each frame.
pub const CAMERA_ACK_MAGIC: u32 = 0xADA0_9FBA;

pub const FRAME_HEADER_LEN: usize = 20;
pub const IR_CHANNEL_COUNT: usize = 5;

const ID_LEN: usize = 4;
const NAME_LEN: usize = 16;
const ONLINE_NAME_LEN: usize = 64;
const MOTOR_CONFIG_LEN: usize = 16;

/// Counter inputs count rising edges.
const COUNTER_MODE_RISING: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum MessageId {
    QueryStatus = 0xDC21_219A,
    QueryStatusReply = 0xBAC9_723E,
    StartOnline = 0x163F_F61D,
    StartOnlineReply = 0xCA68_9F75,
    UpdateConfig = 0x060E_F27E,
    UpdateConfigReply = 0x9689_A68C,
    ExchangeData = 0xCC35_97BA,
    ExchangeDataReply = 0x4EEF_AC41,
    StopOnline = 0x9BE5_082C,
    StopOnlineReply = 0xFBF6_00D2,
    StartCamera = 0x882A_40A6,
    StartCameraReply = 0xCF41_B24E,
    StopCamera = 0x17C3_1F2F,
    StopCameraReply = 0x4B3C_1EB6,
}

impl MessageId {
    pub fn reply(self) -> Self {
        match self {
            Self::QueryStatus => Self::QueryStatusReply,
            Self::StartOnline => Self::StartOnlineReply,
            Self::UpdateConfig => Self::UpdateConfigReply,
            Self::ExchangeData => Self::ExchangeDataReply,
            Self::StopOnline => Self::StopOnlineReply,
            Self::StartCamera => Self::StartCameraReply,
            Self::StopCamera => Self::StopCameraReply,
            reply => reply,
        }
    }

    /// Bytes following the identifier in a reply.
    pub fn reply_body_len(self) -> usize {
        match self.reply() {
            Self::QueryStatusReply => NAME_LEN + 4,
            Self::ExchangeDataReply => ExchangeReply::BODY_LEN,
            _ => 0,
        }
    }
}

/// Port configuration pushed with `UpdateConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRequest {
    pub config_id: i16,
    pub extension_id: i16,
    pub motor: [bool; MOTOR_COUNT],
    pub inputs: [(InputMode, bool); INPUT_COUNT],
    pub counter_modes: [u8; COUNTER_COUNT],
}

impl ConfigRequest {
    /// Body length, identifier excluded.
    pub const LEN: usize = 92;

    pub fn from_bank(config_id: i16, extension: u8, bank: &RegisterBank) -> Result<Self> {
        if extension != 0 {
            return Err(Error::UnsupportedExtension(extension));
        }
        let mut motor = [false; MOTOR_COUNT];
        for (index, flag) in motor.iter_mut().enumerate() {
            *flag = bank.is_motor(index)?;
        }
        let mut inputs = [(InputMode::default(), false); INPUT_COUNT];
        for (index, input) in inputs.iter_mut().enumerate() {
            *input = (bank.input_mode(index)?, bank.input_is_digital(index)?);
        }
        Ok(Self {
            config_id,
            extension_id: 0,
            motor,
            inputs,
            counter_modes: [COUNTER_MODE_RISING; COUNTER_COUNT],
        })
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.config_id.to_le_bytes());
        out.extend_from_slice(&self.extension_id.to_le_bytes());
        // program state, old transfer layout flag, padding
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend(self.motor.iter().map(|&m| u8::from(m)));
        for &(mode, digital) in &self.inputs {
            out.extend_from_slice(&[u8::from(mode), u8::from(digital), 0, 0]);
        }
        for &mode in &self.counter_modes {
            out.extend_from_slice(&[mode, 0, 0, 0]);
        }
        out.resize(out.len() + MOTOR_CONFIG_LEN * 2, 0);
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        let config_id = reader.i16()?;
        let extension_id = reader.i16()?;
        reader.skip(4)?;
        let mut motor = [false; MOTOR_COUNT];
        for flag in &mut motor {
            *flag = reader.u8()? != 0;
        }
        let mut inputs = [(InputMode::default(), false); INPUT_COUNT];
        for input in &mut inputs {
            let mode = InputMode::try_from(reader.u8()?)
                .map_err(|_| Error::MalformedFrame("unknown input mode"))?;
            *input = (mode, reader.u8()? != 0);
            reader.skip(2)?;
        }
        let mut counter_modes = [0u8; COUNTER_COUNT];
        for mode in &mut counter_modes {
            *mode = reader.u8()?;
            reader.skip(3)?;
        }
        reader.skip(MOTOR_CONFIG_LEN * 2)?;
        Ok(Self {
            config_id,
            extension_id,
            motor,
            inputs,
            counter_modes,
        })
    }
}

/// Output side of one `ExchangeData` cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExchangeRequest {
    pub pwm: [i16; OUTPUT_COUNT],
    pub motor_master: [i16; MOTOR_COUNT],
    pub motor_distance: [i16; MOTOR_COUNT],
    pub motor_command_id: [i16; MOTOR_COUNT],
    pub counter_reset_command_id: [i16; COUNTER_COUNT],
    pub sound_command_id: u16,
    pub sound_index: u16,
    pub sound_repeat: u16,
}

impl ExchangeRequest {
    /// Body length, identifier excluded.
    pub const LEN: usize = 56;

    pub fn from_bank(bank: &RegisterBank) -> Self {
        let mut pwm = [0i16; OUTPUT_COUNT];
        for (slot, value) in pwm.iter_mut().zip(bank.pwm_values()) {
            *slot = value as i16;
        }
        Self {
            pwm,
            ..Self::default()
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        for value in self
            .pwm
            .iter()
            .chain(&self.motor_master)
            .chain(&self.motor_distance)
            .chain(&self.motor_command_id)
            .chain(&self.counter_reset_command_id)
        {
            out.extend_from_slice(&value.to_le_bytes());
        }
        for value in [self.sound_command_id, self.sound_index, self.sound_repeat] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&[0, 0]);
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        let request = Self {
            pwm: reader.i16s()?,
            motor_master: reader.i16s()?,
            motor_distance: reader.i16s()?,
            motor_command_id: reader.i16s()?,
            counter_reset_command_id: reader.i16s()?,
            sound_command_id: reader.u16()?,
            sound_index: reader.u16()?,
            sound_repeat: reader.u16()?,
        };
        reader.skip(2)?;
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxtCommand {
    QueryStatus,
    StartOnline,
    UpdateConfig(ConfigRequest),
    ExchangeData(ExchangeRequest),
    StopOnline,
    StartCamera(CameraRequest),
    StopCamera,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraRequest {
    pub width: i32,
    pub height: i32,
    pub framerate: i32,
    pub powerline_frequency: i32,
}

impl From<&CameraConfig> for CameraRequest {
    fn from(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            framerate: config.framerate,
            powerline_frequency: config.powerline_frequency,
        }
    }
}

impl TxtCommand {
    pub fn id(&self) -> MessageId {
        match self {
            Self::QueryStatus => MessageId::QueryStatus,
            Self::StartOnline => MessageId::StartOnline,
            Self::UpdateConfig(_) => MessageId::UpdateConfig,
            Self::ExchangeData(_) => MessageId::ExchangeData,
            Self::StopOnline => MessageId::StopOnline,
            Self::StartCamera(_) => MessageId::StartCamera,
            Self::StopCamera => MessageId::StopCamera,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ID_LEN + ConfigRequest::LEN);
        out.extend_from_slice(&u32::from(self.id()).to_le_bytes());
        match self {
            Self::StartOnline => put_ascii(&mut out, "", ONLINE_NAME_LEN),
            Self::UpdateConfig(config) => config.encode_into(&mut out),
            Self::ExchangeData(request) => request.encode_into(&mut out),
            Self::StartCamera(camera) => {
                for value in [
                    camera.width,
                    camera.height,
                    camera.framerate,
                    camera.powerline_frequency,
                ] {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            Self::QueryStatus | Self::StopOnline | Self::StopCamera => {}
        }
        out
    }
}

/// Identification returned by `QueryStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    pub name: String,
    pub version: u32,
}

impl StatusReply {
    pub fn info(&self) -> ControllerInfo {
        ControllerInfo {
            name: self.name.clone(),
            version: firmware_version(self.version),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ID_LEN + NAME_LEN + 4);
        out.extend_from_slice(&u32::from(MessageId::QueryStatusReply).to_le_bytes());
        put_ascii(&mut out, &self.name, NAME_LEN);
        out.extend_from_slice(&self.version.to_le_bytes());
        out
    }
}

/// The firmware packs `major.minor.patch` into the upper three bytes.
pub fn firmware_version(raw: u32) -> FirmwareVersion {
    let [_, patch, minor, major] = raw.to_le_bytes();
    FirmwareVersion {
        major,
        minor,
        patch,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrChannel {
    pub left_x: i8,
    pub left_y: i8,
    pub right_x: i8,
    pub right_y: i8,
    pub buttons: u8,
}

/// Input side of one `ExchangeData` cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExchangeReply {
    pub universal: [i16; INPUT_COUNT],
    pub counter_input: [i16; COUNTER_COUNT],
    pub counter_value: [i16; COUNTER_COUNT],
    pub counter_command_id: [i16; COUNTER_COUNT],
    pub motor_command_id: [i16; MOTOR_COUNT],
    pub sound_command_id: u16,
    pub ir: [IrChannel; IR_CHANNEL_COUNT],
}

impl ExchangeReply {
    pub const BODY_LEN: usize = 75;

    fn decode_body(reader: &mut Reader<'_>) -> Result<Self> {
        let mut reply = Self {
            universal: reader.i16s()?,
            counter_input: reader.i16s()?,
            counter_value: reader.i16s()?,
            counter_command_id: reader.i16s()?,
            motor_command_id: reader.i16s()?,
            sound_command_id: reader.u16()?,
            ir: [IrChannel::default(); IR_CHANNEL_COUNT],
        };
        for channel in &mut reply.ir {
            *channel = IrChannel {
                left_x: reader.i8()?,
                left_y: reader.i8()?,
                right_x: reader.i8()?,
                right_y: reader.i8()?,
                buttons: reader.u8()?,
            };
        }
        Ok(reply)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ID_LEN + Self::BODY_LEN);
        out.extend_from_slice(&u32::from(MessageId::ExchangeDataReply).to_le_bytes());
        for value in self
            .universal
            .iter()
            .chain(&self.counter_input)
            .chain(&self.counter_value)
            .chain(&self.counter_command_id)
            .chain(&self.motor_command_id)
        {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&self.sound_command_id.to_le_bytes());
        for channel in &self.ir {
            out.extend_from_slice(&[
                channel.left_x as u8,
                channel.left_y as u8,
                channel.right_x as u8,
                channel.right_y as u8,
                channel.buttons,
            ]);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxtReply {
    Status(StatusReply),
    Exchange(ExchangeReply),
    /// Replies carrying nothing but their identifier
    Ack(MessageId),
}

/// Bare identifier, as sent for acknowledgements.
pub fn encode_ack(id: MessageId) -> Vec<u8> {
    u32::from(id).to_le_bytes().to_vec()
}

fn check_id(expected: MessageId, actual: u32) -> Result<()> {
    if actual != u32::from(expected) {
        return Err(Error::ProtocolMismatch {
            expected: expected.into(),
            actual,
        });
    }
    Ok(())
}

/// Decode the reply to `request` from a complete buffer.
pub fn decode_reply(request: MessageId, buf: &[u8]) -> Result<TxtReply> {
    let expected = request.reply();
    let mut reader = Reader::new(buf);
    check_id(expected, reader.u32()?)?;
    decode_body(expected, &mut reader)
}

fn decode_body(expected: MessageId, reader: &mut Reader<'_>) -> Result<TxtReply> {
    Ok(match expected {
        MessageId::QueryStatusReply => TxtReply::Status(StatusReply {
            name: reader.ascii(NAME_LEN)?,
            version: reader.u32()?,
        }),
        MessageId::ExchangeDataReply => TxtReply::Exchange(ExchangeReply::decode_body(reader)?),
        other => TxtReply::Ack(other),
    })
}

/// Read the reply to `request`: identifier first, body only once it matched.
pub fn read_reply(io: &mut dyn Transport, request: MessageId) -> Result<TxtReply> {
    let expected = request.reply();
    let id = Reader::new(&io.read(ID_LEN)?).u32()?;
    check_id(expected, id)?;
    let body = io.read(request.reply_body_len())?;
    if log::log_enabled!(log::Level::Trace) {
        log::trace!("TXT: RX {:?} body: {:02X?}", expected, body);
    }
    decode_body(expected, &mut Reader::new(&body))
}

/// Header preceding every camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frames_ready: i32,
    pub width: i16,
    pub height: i16,
    pub raw_size: i32,
    pub compressed_size: i32,
}

impl FrameHeader {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        check_camera_magic(reader.u32()?)?;
        let header = Self {
            frames_ready: reader.i32()?,
            width: reader.i16()?,
            height: reader.i16()?,
            raw_size: reader.i32()?,
            compressed_size: reader.i32()?,
        };
        if header.compressed_size <= 0 {
            return Err(Error::MalformedFrame("non-positive frame size"));
        }
        if header.width <= 0 || header.height <= 0 {
            return Err(Error::MalformedFrame("non-positive frame dimensions"));
        }
        // JPEG never outgrows the 24-bit raw image it encodes
        let max_raw = i64::from(header.width) * i64::from(header.height) * 3;
        if i64::from(header.raw_size) > max_raw {
            return Err(Error::MalformedFrame("raw size exceeds frame dimensions"));
        }
        if header.compressed_size > header.raw_size {
            return Err(Error::MalformedFrame("compressed size exceeds raw size"));
        }
        Ok(header)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN);
        out.extend_from_slice(&CAMERA_FRAME_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.frames_ready.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.raw_size.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out
    }

    /// Payload bytes following the header.
    pub fn payload_len(&self) -> usize {
        usize::try_from(self.compressed_size).unwrap_or(0)
    }
}

fn check_camera_magic(actual: u32) -> Result<()> {
    if actual != CAMERA_FRAME_MAGIC {
        return Err(Error::ProtocolMismatch {
            expected: CAMERA_FRAME_MAGIC,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::OutputMode;
    use crate::transport::mock::MockTransport;

    #[test]
    fn command_layout_sizes() {
        let bank = RegisterBank::new();
        let config = ConfigRequest::from_bank(1, 0, &bank).expect("master unit");
        assert_eq!(TxtCommand::UpdateConfig(config).encode().len(), 4 + ConfigRequest::LEN);
        assert_eq!(
            TxtCommand::ExchangeData(ExchangeRequest::from_bank(&bank))
                .encode()
                .len(),
            4 + ExchangeRequest::LEN
        );
        assert_eq!(TxtCommand::StartOnline.encode().len(), 68);
        assert_eq!(TxtCommand::QueryStatus.encode(), vec![0x9A, 0x21, 0x21, 0xDC]);
        assert_eq!(
            TxtCommand::StartCamera(CameraRequest::from(&CameraConfig::default()))
                .encode()
                .len(),
            20
        );
        assert_eq!(ExchangeReply::default().encode().len(), 79);
        assert_eq!(
            StatusReply {
                name: "TXT".into(),
                version: 0
            }
            .encode()
            .len(),
            24
        );
    }

    #[test]
    fn update_config_carries_port_table() {
        let mut bank = RegisterBank::new();
        bank.set_output_mode(2, OutputMode::Motor).expect("valid motor");
        bank.set_input_mode(7, InputMode::Ultrasonic, true)
            .expect("valid input");

        let config = ConfigRequest::from_bank(5, 0, &bank).expect("master unit");
        let bytes = TxtCommand::UpdateConfig(config.clone()).encode();

        assert_eq!(&bytes[4..6], &[5, 0]);
        assert_eq!(&bytes[12..16], &[0, 0, 1, 0]);
        assert_eq!(&bytes[16 + 7 * 4..16 + 7 * 4 + 2], &[3, 1]);
        assert_eq!(bytes[48], COUNTER_MODE_RISING);
        assert_eq!(ConfigRequest::decode(&bytes[4..]).expect("valid body"), config);
    }

    #[test]
    fn rejects_extension_units() {
        assert!(matches!(
            ConfigRequest::from_bank(1, 1, &RegisterBank::new()),
            Err(Error::UnsupportedExtension(1))
        ));
    }

    #[test]
    fn exchange_request_carries_pwm() {
        let mut bank = RegisterBank::new();
        bank.set_output_value(3, 400).expect("plain output");
        let bytes = TxtCommand::ExchangeData(ExchangeRequest::from_bank(&bank)).encode();

        let request = ExchangeRequest::decode(&bytes[4..]).expect("valid body");
        assert_eq!(request.pwm, [0, 0, 0, 400, 0, 0, 0, 0]);
    }

    #[test]
    fn mismatched_reply_id_is_rejected_before_parsing() {
        let reply = StatusReply {
            name: "TXT-1".into(),
            version: 0x0104_0600,
        }
        .encode();
        assert!(matches!(
            decode_reply(MessageId::ExchangeData, &reply),
            Err(Error::ProtocolMismatch {
                expected: 0x4EEF_AC41,
                actual: 0xBAC9_723E
            })
        ));

        // Only the identifier is on the wire: the reader must fail on it alone.
        let mock = MockTransport::new();
        let mut io = mock.as_transport();
        io.open("txt").expect("mock opens");
        mock.inject(&encode_ack(MessageId::StopOnlineReply));
        assert!(matches!(
            read_reply(&mut *io, MessageId::StartOnline),
            Err(Error::ProtocolMismatch { .. })
        ));
    }

    #[test]
    fn decodes_status_and_version() {
        let reply = StatusReply {
            name: "TXT-4711".into(),
            version: 0x0104_0600,
        };
        match decode_reply(MessageId::QueryStatus, &reply.encode()).expect("valid reply") {
            TxtReply::Status(status) => {
                assert_eq!(status, reply);
                assert_eq!(status.info().version.to_string(), "1.4.6");
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn decodes_exchange_reply_fields() {
        let mut reply = ExchangeReply {
            universal: [1, 2, 3, 4, 5, 6, 7, -8],
            sound_command_id: 9,
            ..ExchangeReply::default()
        };
        reply.ir[4] = IrChannel {
            left_x: -15,
            left_y: 15,
            right_x: 0,
            right_y: 1,
            buttons: 0b10,
        };
        let bytes = reply.encode();

        assert_eq!(
            decode_reply(MessageId::ExchangeData, &bytes).expect("valid reply"),
            TxtReply::Exchange(reply)
        );
        assert!(matches!(
            decode_reply(MessageId::ExchangeData, &bytes[..40]),
            Err(Error::TruncatedFrame { .. })
        ));
    }

    #[test]
    fn frame_header_validation() {
        let header = FrameHeader {
            frames_ready: 1,
            width: 320,
            height: 240,
            raw_size: 320 * 240 * 3,
            compressed_size: 4096,
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN);
        assert_eq!(FrameHeader::decode(&bytes).expect("valid header"), header);
        assert_eq!(header.payload_len(), 4096);

        let mut bad_magic = bytes.clone();
        bad_magic[0] ^= 0xFF;
        assert!(matches!(
            FrameHeader::decode(&bad_magic),
            Err(Error::ProtocolMismatch { .. })
        ));

        let empty = FrameHeader {
            compressed_size: 0,
            ..header
        };
        assert!(matches!(
            FrameHeader::decode(&empty.encode()),
            Err(Error::MalformedFrame(_))
        ));

        let oversized = FrameHeader {
            compressed_size: i32::MAX,
            ..header
        };
        assert!(matches!(
            FrameHeader::decode(&oversized.encode()),
            Err(Error::MalformedFrame(_))
        ));

        let inflated_raw = FrameHeader {
            raw_size: i32::MAX,
            compressed_size: i32::MAX,
            ..header
        };
        assert!(matches!(
            FrameHeader::decode(&inflated_raw.encode()),
            Err(Error::MalformedFrame(_))
        ));
    }
}
