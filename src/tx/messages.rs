//! Typed payloads carried inside TX packets.

use crate::error::{Error, Result};
use crate::protocol::{ControllerInfo, FirmwareVersion};
use crate::registers::{COUNTER_COUNT, INPUT_COUNT, InputMode, MOTOR_COUNT, OUTPUT_COUNT, RegisterBank};
use crate::wire::{Reader, put_ascii};

pub const CONFIG_LEN: usize = 48;
pub const OUTPUT_LEN: usize = 44;
pub const INPUT_LEN: usize = 48;
pub const INFO_LEN: usize = 20;

const NAME_LEN: usize = 17;

/// Counter inputs count rising edges.
const COUNTER_MODE_RISING: u8 = 1;

/// Port configuration of one transfer area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPayload {
    pub motor: [bool; MOTOR_COUNT],
    pub inputs: [(InputMode, bool); INPUT_COUNT],
    pub counter_modes: [u8; COUNTER_COUNT],
}

impl ConfigPayload {
    pub fn from_bank(bank: &RegisterBank) -> Result<Self> {
        let mut motor = [false; MOTOR_COUNT];
        for (index, flag) in motor.iter_mut().enumerate() {
            *flag = bank.is_motor(index)?;
        }
        let mut inputs = [(InputMode::default(), false); INPUT_COUNT];
        for (index, input) in inputs.iter_mut().enumerate() {
            *input = (bank.input_mode(index)?, bank.input_is_digital(index)?);
        }
        Ok(Self {
            motor,
            inputs,
            counter_modes: [COUNTER_MODE_RISING; COUNTER_COUNT],
        })
    }

    /// `reserved(4) | motor(4) | 8 x (mode, digital, pad(2)) | counter(4) | reserved(4)`
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CONFIG_LEN);
        out.extend_from_slice(&[0; 4]);
        out.extend(self.motor.iter().map(|&m| u8::from(m)));
        for &(mode, digital) in &self.inputs {
            out.extend_from_slice(&[u8::from(mode), u8::from(digital), 0, 0]);
        }
        out.extend_from_slice(&self.counter_modes);
        out.extend_from_slice(&[0; 4]);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        reader.skip(4)?;
        let mut motor = [false; MOTOR_COUNT];
        for flag in &mut motor {
            *flag = reader.u8()? != 0;
        }
        let mut inputs = [(InputMode::default(), false); INPUT_COUNT];
        for input in &mut inputs {
            let mode = InputMode::try_from(reader.u8()?)
                .map_err(|_| Error::MalformedFrame("unknown input mode"))?;
            let digital = reader.u8()? != 0;
            reader.skip(2)?;
            *input = (mode, digital);
        }
        let counter_modes = reader.array()?;
        reader.skip(4)?;
        Ok(Self {
            motor,
            inputs,
            counter_modes,
        })
    }
}

/// Output registers sent every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputPayload {
    pub counter_reset_ids: [u16; COUNTER_COUNT],
    pub motor_master: [u8; MOTOR_COUNT],
    pub duty: [i16; OUTPUT_COUNT],
    pub motor_distance: [u16; MOTOR_COUNT],
    pub motor_command_ids: [u16; MOTOR_COUNT],
}

impl OutputPayload {
    pub fn from_bank(bank: &RegisterBank) -> Self {
        let mut duty = [0i16; OUTPUT_COUNT];
        for (slot, value) in duty.iter_mut().zip(bank.pwm_values()) {
            *slot = value as i16;
        }
        Self {
            duty,
            ..Self::default()
        }
    }

    /// `counter_reset(4 x u16) | master(4 x u8) | duty(8 x i16) | distance(4 x u16) | motor_cmd(4 x u16)`
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OUTPUT_LEN);
        for id in self.counter_reset_ids {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out.extend_from_slice(&self.motor_master);
        for duty in self.duty {
            out.extend_from_slice(&duty.to_le_bytes());
        }
        for distance in self.motor_distance {
            out.extend_from_slice(&distance.to_le_bytes());
        }
        for id in self.motor_command_ids {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        Ok(Self {
            counter_reset_ids: reader.u16s()?,
            motor_master: reader.array()?,
            duty: reader.i16s()?,
            motor_distance: reader.u16s()?,
            motor_command_ids: reader.u16s()?,
        })
    }
}

/// Input registers returned by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputPayload {
    pub universal: [i16; INPUT_COUNT],
    pub counter_input: [i16; COUNTER_COUNT],
    pub counter_value: [i16; COUNTER_COUNT],
    pub counter_command_ids: [u16; COUNTER_COUNT],
    pub motor_command_ids: [u16; MOTOR_COUNT],
}

impl InputPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INPUT_LEN);
        for value in self
            .universal
            .iter()
            .chain(&self.counter_input)
            .chain(&self.counter_value)
        {
            out.extend_from_slice(&value.to_le_bytes());
        }
        for id in self.counter_command_ids.iter().chain(&self.motor_command_ids) {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(buf);
        Ok(Self {
            universal: reader.i16s()?,
            counter_input: reader.i16s()?,
            counter_value: reader.i16s()?,
            counter_command_ids: reader.u16s()?,
            motor_command_ids: reader.u16s()?,
        })
    }
}

/// `name(17, ASCII) | version(major, minor, patch)`
pub fn encode_info(info: &ControllerInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(INFO_LEN);
    put_ascii(&mut out, &info.name, NAME_LEN);
    out.extend_from_slice(&[info.version.major, info.version.minor, info.version.patch]);
    out
}

pub fn decode_info(buf: &[u8]) -> Result<ControllerInfo> {
    let mut reader = Reader::new(buf);
    let name = reader.ascii(NAME_LEN)?;
    let [major, minor, patch] = reader.array()?;
    Ok(ControllerInfo {
        name,
        version: FirmwareVersion {
            major,
            minor,
            patch,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{MotorDirection, OutputMode};

    #[test]
    fn config_payload_layout() {
        let mut bank = RegisterBank::new();
        bank.set_output_mode(1, OutputMode::Motor).expect("valid motor");
        bank.set_input_mode(2, InputMode::Ultrasonic, false)
            .expect("valid input");
        bank.set_input_mode(5, InputMode::Resistance, true)
            .expect("valid input");

        let payload = ConfigPayload::from_bank(&bank).expect("bank is consistent");
        let bytes = payload.encode();

        assert_eq!(bytes.len(), CONFIG_LEN);
        assert_eq!(&bytes[4..8], &[0, 1, 0, 0]);
        assert_eq!(&bytes[8 + 2 * 4..8 + 2 * 4 + 2], &[3, 0]);
        assert_eq!(&bytes[8 + 5 * 4..8 + 5 * 4 + 2], &[1, 1]);
        assert_eq!(&bytes[40..44], &[1, 1, 1, 1]);
        assert_eq!(ConfigPayload::decode(&bytes).expect("valid config"), payload);
    }

    #[test]
    fn output_payload_carries_pwm_registers() {
        let mut bank = RegisterBank::new();
        bank.set_output_mode(0, OutputMode::Motor).expect("valid motor");
        bank.set_motor_value(0, 300, MotorDirection::Left)
            .expect("motor accepts value");
        bank.set_output_value(7, 512).expect("plain output");

        let bytes = OutputPayload::from_bank(&bank).encode();
        assert_eq!(bytes.len(), OUTPUT_LEN);

        let duty_start = 8 + 4;
        assert_eq!(&bytes[duty_start..duty_start + 4], &[0, 0, 0x2C, 0x01]);
        assert_eq!(&bytes[duty_start + 14..duty_start + 16], &[0x00, 0x02]);
    }

    #[test]
    fn input_payload_parses_universal_inputs() {
        let payload = InputPayload {
            universal: [1, -2, 3, 400, 5, 6, 7, 8],
            counter_value: [0, 0, 9, 0],
            ..InputPayload::default()
        };
        let bytes = payload.encode();
        assert_eq!(bytes.len(), INPUT_LEN);

        let decoded = InputPayload::decode(&bytes).expect("valid input");
        assert_eq!(decoded.universal, [1, -2, 3, 400, 5, 6, 7, 8]);
        assert_eq!(decoded.counter_value[2], 9);

        assert!(matches!(
            InputPayload::decode(&bytes[..20]),
            Err(Error::TruncatedFrame { .. })
        ));
    }

    #[test]
    fn info_payload_reads_name_and_version() {
        let info = ControllerInfo {
            name: "ROBO TX-477".into(),
            version: FirmwareVersion {
                major: 1,
                minor: 30,
                patch: 0,
            },
        };
        let bytes = encode_info(&info);
        assert_eq!(bytes.len(), INFO_LEN);

        let decoded = decode_info(&bytes).expect("valid info");
        assert_eq!(decoded, info);
        assert_eq!(decoded.version.to_string(), "1.30.0");
    }
}
