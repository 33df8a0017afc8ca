// src/hardware/mod.rs - Pump and air-assist valve interfaces
//
// The real drivers (I2C stepper controllers, GPIO solenoid) live outside this
// crate; the orchestrator only depends on these traits so test doubles and
// simulated hardware can be injected.
pub mod sim;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Unknown pump '{0}'")]
    UnknownPump(String),
    #[error("Invalid direction '{0}' (expected F or R)")]
    InvalidDirection(String),
    #[error("Motor bus error: {0}")]
    Bus(String),
    #[error("Pump '{0}' operation failed: {1}")]
    PumpFailed(PumpId, String),
    #[error("Air valve operation failed: {0}")]
    ValveFailed(String),
}

/// Identifies one of the four syringe pumps. Motors A-C feed materials,
/// motor D drives the drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PumpId {
    A,
    B,
    C,
    Drain,
}

impl PumpId {
    pub const ALL: [PumpId; 4] = [PumpId::A, PumpId::B, PumpId::C, PumpId::Drain];

    /// Configuration key for this pump ("a", "b", "c", "drain").
    pub fn config_key(&self) -> &'static str {
        match self {
            PumpId::A => "a",
            PumpId::B => "b",
            PumpId::C => "c",
            PumpId::Drain => "drain",
        }
    }

    /// Motor id letter as used by the motor controller boards.
    pub fn motor_letter(&self) -> char {
        match self {
            PumpId::A => 'A',
            PumpId::B => 'B',
            PumpId::C => 'C',
            PumpId::Drain => 'D',
        }
    }
}

impl fmt::Display for PumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpId::A => write!(f, "Pump A"),
            PumpId::B => write!(f, "Pump B"),
            PumpId::C => write!(f, "Pump C"),
            PumpId::Drain => write!(f, "Drain Pump"),
        }
    }
}

impl FromStr for PumpId {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "PUMP_A" => Ok(PumpId::A),
            "B" | "PUMP_B" => Ok(PumpId::B),
            "C" | "PUMP_C" => Ok(PumpId::C),
            "D" | "DRAIN" | "DRAIN_PUMP" => Ok(PumpId::Drain),
            other => Err(HardwareError::UnknownPump(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpDirection {
    Forward,
    Reverse,
}

impl fmt::Display for PumpDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpDirection::Forward => write!(f, "forward"),
            PumpDirection::Reverse => write!(f, "reverse"),
        }
    }
}

impl FromStr for PumpDirection {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "F" | "FORWARD" => Ok(PumpDirection::Forward),
            "R" | "REVERSE" => Ok(PumpDirection::Reverse),
            other => Err(HardwareError::InvalidDirection(other.to_string())),
        }
    }
}

/// Drives one pump motor at a time. Implementations must hold the motor
/// energized for the requested duration and release it afterwards; only one
/// motor may be energized at any instant (all calls are serialized through
/// the orchestrator's monitor task).
#[async_trait]
pub trait PumpDriver: Send + Sync {
    async fn run_pump(
        &self,
        pump: PumpId,
        direction: PumpDirection,
        duration: Duration,
    ) -> Result<(), HardwareError>;

    /// Probe the motor controller bus. Used by diagnostics.
    async fn bus_check(&self) -> Result<(), HardwareError>;
}

/// Binary air-assist valve. Open blows air across the vat to push resin
/// toward the drain; close stops the flow. Must be left closed on error.
#[async_trait]
pub trait AirValve: Send + Sync {
    async fn open(&self) -> Result<(), HardwareError>;
    async fn close(&self) -> Result<(), HardwareError>;
}

/// Converts a requested volume into a run duration for a pump.
///
/// duration = volume_ml / flow_rate_ml_per_second
pub fn volume_to_duration(volume_ml: f64, flow_rate_ml_per_second: f64) -> Duration {
    Duration::from_secs_f64(volume_ml / flow_rate_ml_per_second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_to_duration() {
        let d = volume_to_duration(50.0, 2.5);
        assert_eq!(d, Duration::from_secs_f64(20.0));
    }

    #[test]
    fn test_pump_id_parsing() {
        assert_eq!("A".parse::<PumpId>().unwrap(), PumpId::A);
        assert_eq!("d".parse::<PumpId>().unwrap(), PumpId::Drain);
        assert_eq!("drain_pump".parse::<PumpId>().unwrap(), PumpId::Drain);
        assert!("X".parse::<PumpId>().is_err());
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("F".parse::<PumpDirection>().unwrap(), PumpDirection::Forward);
        assert_eq!("reverse".parse::<PumpDirection>().unwrap(), PumpDirection::Reverse);
        assert!("Q".parse::<PumpDirection>().is_err());
    }
}
