//! Microcontroller line protocol
//!
//! The wire format is ASCII, one message per `\n`-terminated line, 9600 8N1:
//!
//! ```text
//! -> MOTOR:<ls>,<rs>,<ld>,<rd>    speeds 0-255, directions 0/1
//! -> SERVO:<angle>                0-180 degrees
//! -> LED:<pattern>                eye animation
//! -> STOP                         emergency stop
//! <- ENCODER:<lt>,<rt>            cumulative signed 32-bit tick counts
//! <- IR:<raw>                     proximity sensor reading, unscaled
//! <- ACK                          acknowledges the most recent command
//! <- ERROR:<text>                 command was malformed, no state change
//! ```
//!
//! Parsing is total: a line that matches no known grammar decodes to `None`
//! and is logged and dropped by the link, never propagated as an error.

use crate::error::{Error, Result};

/// Eye LED animation patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Idle,
    Waiting,
    Moving,
    Error,
    SuccessScan,
    FailureScan,
}

impl LedPattern {
    /// Wire name of the pattern.
    pub fn as_str(&self) -> &'static str {
        match self {
            LedPattern::Idle => "IDLE",
            LedPattern::Waiting => "WAITING",
            LedPattern::Moving => "MOVING",
            LedPattern::Error => "ERROR",
            LedPattern::SuccessScan => "SUCCESS_SCAN",
            LedPattern::FailureScan => "FAILURE_SCAN",
        }
    }
}

/// A command for the microcontroller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set motor speeds (0-255) and directions (forward = true).
    Motor {
        left_speed: u8,
        right_speed: u8,
        left_forward: bool,
        right_forward: bool,
    },
    /// Target servo angle, 0-180 degrees.
    Servo(u8),
    /// Eye LED animation.
    Led(LedPattern),
    /// Emergency stop, equivalent to MOTOR:0,0,0,0.
    Stop,
}

impl Command {
    /// Motor command with both wheels stopped.
    pub fn motor_stop() -> Self {
        Command::Motor {
            left_speed: 0,
            right_speed: 0,
            left_forward: false,
            right_forward: false,
        }
    }

    /// Validated servo command.
    ///
    /// Angles above 180° are rejected before they reach the wire.
    pub fn servo(angle: u8) -> Result<Self> {
        if angle > 180 {
            return Err(Error::InvalidCommand(format!(
                "servo angle must be 0-180, got {}",
                angle
            )));
        }
        Ok(Command::Servo(angle))
    }

    /// True for commands that may be dropped under backpressure.
    ///
    /// Motor and servo commands must never be silently dropped; LED
    /// animations are cosmetic.
    pub fn is_droppable(&self) -> bool {
        matches!(self, Command::Led(_))
    }

    /// True for a zero-speed motor command (either form).
    pub fn is_zero_speed(&self) -> bool {
        match self {
            Command::Stop => true,
            Command::Motor {
                left_speed,
                right_speed,
                ..
            } => *left_speed == 0 && *right_speed == 0,
            _ => false,
        }
    }

    /// Encode as a wire line including the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Command::Motor {
                left_speed,
                right_speed,
                left_forward,
                right_forward,
            } => format!(
                "MOTOR:{},{},{},{}\n",
                left_speed,
                right_speed,
                u8::from(*left_forward),
                u8::from(*right_forward)
            ),
            Command::Servo(angle) => format!("SERVO:{}\n", angle),
            Command::Led(pattern) => format!("LED:{}\n", pattern.as_str()),
            Command::Stop => "STOP\n".to_string(),
        }
    }
}

/// An unsolicited line from the microcontroller.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    /// Cumulative signed tick counts since microcontroller reset, ~10 Hz.
    Encoder { left: i32, right: i32 },
    /// Raw proximity sensor reading, ~5 Hz. Interpreted upstream.
    Ir(f32),
    /// Acknowledgement of the most recent outgoing command.
    Ack,
    /// The most recent command was malformed; no state change occurred.
    Error(String),
}

/// Decode one stripped line. Returns `None` for unknown grammar.
pub fn parse_line(line: &str) -> Option<Telemetry> {
    if line == "ACK" {
        return Some(Telemetry::Ack);
    }
    if let Some(rest) = line.strip_prefix("ENCODER:") {
        let mut parts = rest.splitn(2, ',');
        let left = parts.next()?.trim().parse::<i32>().ok()?;
        let right = parts.next()?.trim().parse::<i32>().ok()?;
        return Some(Telemetry::Encoder { left, right });
    }
    if let Some(rest) = line.strip_prefix("IR:") {
        let raw = rest.trim().parse::<f32>().ok()?;
        return Some(Telemetry::Ir(raw));
    }
    if let Some(rest) = line.strip_prefix("ERROR:") {
        return Some(Telemetry::Error(rest.to_string()));
    }
    None
}

/// Accumulates raw bytes and yields complete lines.
///
/// Carriage returns are tolerated and stripped; an unterminated tail is
/// held until its newline arrives.
#[derive(Debug, Default)]
pub struct LineReader {
    buffer: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every complete line they close off.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let line: String = String::from_utf8_lossy(&self.buffer)
                    .trim_end_matches('\r')
                    .to_string();
                self.buffer.clear();
                if !line.is_empty() {
                    lines.push(line);
                }
            } else {
                self.buffer.push(byte);
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_encoding() {
        let cmd = Command::Motor {
            left_speed: 120,
            right_speed: 255,
            left_forward: true,
            right_forward: false,
        };
        assert_eq!(cmd.encode(), "MOTOR:120,255,1,0\n");
    }

    #[test]
    fn test_motor_stop_encoding() {
        assert_eq!(Command::motor_stop().encode(), "MOTOR:0,0,0,0\n");
        assert!(Command::motor_stop().is_zero_speed());
    }

    #[test]
    fn test_servo_encoding() {
        let cmd = Command::servo(90).unwrap();
        assert_eq!(cmd.encode(), "SERVO:90\n");
    }

    #[test]
    fn test_servo_angle_validated() {
        assert!(Command::servo(180).is_ok());
        assert!(matches!(
            Command::servo(181),
            Err(Error::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_led_encoding() {
        assert_eq!(
            Command::Led(LedPattern::SuccessScan).encode(),
            "LED:SUCCESS_SCAN\n"
        );
        assert_eq!(Command::Led(LedPattern::Idle).encode(), "LED:IDLE\n");
    }

    #[test]
    fn test_stop_encoding() {
        assert_eq!(Command::Stop.encode(), "STOP\n");
        assert!(Command::Stop.is_zero_speed());
    }

    #[test]
    fn test_only_led_droppable() {
        assert!(Command::Led(LedPattern::Moving).is_droppable());
        assert!(!Command::motor_stop().is_droppable());
        assert!(!Command::Servo(0).is_droppable());
        assert!(!Command::Stop.is_droppable());
    }

    #[test]
    fn test_parse_encoder() {
        assert_eq!(
            parse_line("ENCODER:1024,-312"),
            Some(Telemetry::Encoder {
                left: 1024,
                right: -312
            })
        );
    }

    #[test]
    fn test_parse_ir() {
        assert_eq!(parse_line("IR:42"), Some(Telemetry::Ir(42.0)));
        assert_eq!(parse_line("IR:23.5"), Some(Telemetry::Ir(23.5)));
    }

    #[test]
    fn test_parse_ack_and_error() {
        assert_eq!(parse_line("ACK"), Some(Telemetry::Ack));
        assert_eq!(
            parse_line("ERROR:bad command"),
            Some(Telemetry::Error("bad command".to_string()))
        );
    }

    #[test]
    fn test_parse_unknown_is_none() {
        assert_eq!(parse_line("GARBAGE"), None);
        assert_eq!(parse_line("ENCODER:1"), None);
        assert_eq!(parse_line("ENCODER:a,b"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn test_line_reader_split() {
        let mut reader = LineReader::new();
        assert!(reader.push(b"ENC").is_empty());
        let lines = reader.push(b"ODER:1,2\nACK\nIR:");
        assert_eq!(lines, vec!["ENCODER:1,2", "ACK"]);
        let lines = reader.push(b"7\n");
        assert_eq!(lines, vec!["IR:7"]);
    }

    #[test]
    fn test_line_reader_strips_cr() {
        let mut reader = LineReader::new();
        let lines = reader.push(b"ACK\r\n");
        assert_eq!(lines, vec!["ACK"]);
    }
}
