//! In-memory model of one controller's I/O registers.
//!
//! Outputs come in pairs: outputs `2m` and `2m + 1` form motor `m` when the
//! pair is switched to motor mode. Plain accessors refuse motor pairs and
//! motor accessors refuse plain pairs.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display, EnumIter};

use crate::error::{Error, Result};

pub const INPUT_COUNT: usize = 8;
pub const OUTPUT_COUNT: usize = 8;
pub const MOTOR_COUNT: usize = 4;
pub const COUNTER_COUNT: usize = 4;

/// Largest PWM register value.
pub const MAX_OUTPUT_VALUE: i32 = 512;

/// Universal input interpretation, wire value in parentheses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum InputMode {
    /// Voltage in mV (0)
    #[default]
    Voltage = 0,
    /// Resistance up to 5 kOhm (1)
    Resistance = 1,
    /// Resistance up to 15 kOhm (2)
    Resistance2 = 2,
    /// Distance in cm (3)
    Ultrasonic = 3,
    Invalid = 4,
}

/// Pairing of two adjacent outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter)]
pub enum OutputMode {
    /// Two independent PWM outputs
    #[default]
    Plain,
    /// One bidirectional motor
    Motor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter)]
pub enum MotorDirection {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    input_values: [i16; INPUT_COUNT],
    input_modes: [InputMode; INPUT_COUNT],
    input_is_digital: [bool; INPUT_COUNT],
    output_values: [i32; OUTPUT_COUNT],
    output_is_motor: [bool; MOTOR_COUNT],
    motor_direction: [MotorDirection; MOTOR_COUNT],
    config_changed: bool,
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank {
    pub fn new() -> Self {
        Self {
            input_values: [0; INPUT_COUNT],
            input_modes: [InputMode::default(); INPUT_COUNT],
            input_is_digital: [false; INPUT_COUNT],
            output_values: [0; OUTPUT_COUNT],
            output_is_motor: [false; MOTOR_COUNT],
            motor_direction: [MotorDirection::default(); MOTOR_COUNT],
            config_changed: false,
        }
    }

    /// Zero every register. Port configuration is kept.
    pub fn reset_values(&mut self) {
        self.input_values = [0; INPUT_COUNT];
        self.output_values = [0; OUTPUT_COUNT];
        self.motor_direction = [MotorDirection::default(); MOTOR_COUNT];
    }

    /// Zero values and return every port to its power-on configuration.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn input_value(&self, index: usize) -> Result<i16> {
        check_index("input", index, INPUT_COUNT)?;
        Ok(self.input_values[index])
    }

    pub fn input_values(&self) -> [i16; INPUT_COUNT] {
        self.input_values
    }

    pub fn input_mode(&self, index: usize) -> Result<InputMode> {
        check_index("input", index, INPUT_COUNT)?;
        Ok(self.input_modes[index])
    }

    pub fn input_is_digital(&self, index: usize) -> Result<bool> {
        check_index("input", index, INPUT_COUNT)?;
        Ok(self.input_is_digital[index])
    }

    pub fn set_input_mode(&mut self, index: usize, mode: InputMode, digital: bool) -> Result<()> {
        check_index("input", index, INPUT_COUNT)?;
        if self.input_modes[index] != mode || self.input_is_digital[index] != digital {
            self.input_modes[index] = mode;
            self.input_is_digital[index] = digital;
            self.config_changed = true;
        }
        Ok(())
    }

    /// Store fresh readings and return the indices whose value changed.
    pub fn apply_inputs(&mut self, values: &[i16; INPUT_COUNT]) -> Vec<usize> {
        let mut changed = Vec::new();
        for (index, (stored, fresh)) in self.input_values.iter_mut().zip(values).enumerate() {
            if stored != fresh {
                *stored = *fresh;
                changed.push(index);
            }
        }
        changed
    }

    pub fn output_value(&self, port: usize) -> Result<i32> {
        self.check_plain_output(port)?;
        Ok(self.output_values[port])
    }

    pub fn set_output_value(&mut self, port: usize, value: i32) -> Result<()> {
        self.check_plain_output(port)?;
        check_value(value)?;
        self.output_values[port] = value;
        Ok(())
    }

    /// Raw PWM registers as sent on the wire, motor pairs included.
    pub fn pwm_values(&self) -> [i32; OUTPUT_COUNT] {
        self.output_values
    }

    pub fn is_motor(&self, motor: usize) -> Result<bool> {
        check_index("motor", motor, MOTOR_COUNT)?;
        Ok(self.output_is_motor[motor])
    }

    pub fn output_mode(&self, motor: usize) -> Result<OutputMode> {
        Ok(if self.is_motor(motor)? {
            OutputMode::Motor
        } else {
            OutputMode::Plain
        })
    }

    /// Switch outputs `2 * motor` and `2 * motor + 1` between plain and motor mode.
    pub fn set_output_mode(&mut self, motor: usize, mode: OutputMode) -> Result<()> {
        check_index("motor", motor, MOTOR_COUNT)?;
        let is_motor = mode == OutputMode::Motor;
        if self.output_is_motor[motor] != is_motor {
            self.output_is_motor[motor] = is_motor;
            self.output_values[2 * motor] = 0;
            self.output_values[2 * motor + 1] = 0;
            self.config_changed = true;
        }
        Ok(())
    }

    pub fn motor_value(&self, motor: usize) -> Result<i32> {
        self.check_motor(motor)?;
        Ok(self.output_values[2 * motor].max(self.output_values[2 * motor + 1]))
    }

    pub fn motor_direction(&self, motor: usize) -> Result<MotorDirection> {
        self.check_motor(motor)?;
        Ok(self.motor_direction[motor])
    }

    /// Drive motor `motor` at `value`. `Left` puts the duty cycle on the
    /// pair's second output, `Right` on the first.
    pub fn set_motor_value(&mut self, motor: usize, value: i32, direction: MotorDirection) -> Result<()> {
        self.check_motor(motor)?;
        check_value(value)?;
        self.motor_direction[motor] = direction;
        let (first, second) = match direction {
            MotorDirection::Left => (0, value),
            MotorDirection::Right => (value, 0),
        };
        self.output_values[2 * motor] = first;
        self.output_values[2 * motor + 1] = second;
        Ok(())
    }

    /// Change direction keeping the current speed.
    pub fn set_motor_direction(&mut self, motor: usize, direction: MotorDirection) -> Result<()> {
        let value = self.motor_value(motor)?;
        self.set_motor_value(motor, value, direction)
    }

    /// Zero every plain output and every motor.
    pub fn stop_outputs(&mut self) {
        self.output_values = [0; OUTPUT_COUNT];
    }

    pub fn config_changed(&self) -> bool {
        self.config_changed
    }

    pub fn mark_config_changed(&mut self) {
        self.config_changed = true;
    }

    /// Clear the configuration-changed flag, returning its previous value.
    pub fn take_config_changed(&mut self) -> bool {
        std::mem::take(&mut self.config_changed)
    }

    fn check_plain_output(&self, port: usize) -> Result<()> {
        check_index("output", port, OUTPUT_COUNT)?;
        if self.output_is_motor[port / 2] {
            return Err(Error::PortMode { port, motor: true });
        }
        Ok(())
    }

    fn check_motor(&self, motor: usize) -> Result<()> {
        check_index("motor", motor, MOTOR_COUNT)?;
        if !self.output_is_motor[motor] {
            return Err(Error::PortMode {
                port: motor,
                motor: false,
            });
        }
        Ok(())
    }
}

fn check_index(kind: &'static str, index: usize, count: usize) -> Result<()> {
    if index >= count {
        return Err(Error::InvalidPort { kind, index });
    }
    Ok(())
}

fn check_value(value: i32) -> Result<()> {
    if !(0..=MAX_OUTPUT_VALUE).contains(&value) {
        return Err(Error::ValueOutOfRange {
            value,
            max: MAX_OUTPUT_VALUE,
        });
    }
    Ok(())
}
