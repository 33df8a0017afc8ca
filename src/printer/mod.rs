// src/printer/mod.rs - Printer link interface and normalized status
pub mod monox;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("Connection to printer failed after {attempts} attempts: {reason}")]
    Connection { attempts: u32, reason: String },
    #[error("Printer rejected command '{0}'")]
    Rejected(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Normalized printer operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterOpState {
    Idle,
    Printing,
    Paused,
    Stopped,
    Complete,
    Error,
    Disconnected,
    Unknown,
}

impl PrinterOpState {
    /// Maps the raw state token from the wire protocol. Anything
    /// unrecognized becomes `Unknown` rather than an error; field
    /// ambiguity is resolved here, once, for all callers.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" | "standby" => PrinterOpState::Idle,
            "print" | "printing" => PrinterOpState::Printing,
            "pause" | "paused" => PrinterOpState::Paused,
            "stop" | "stopped" => PrinterOpState::Stopped,
            "complete" | "finished" | "done" => PrinterOpState::Complete,
            "error" => PrinterOpState::Error,
            _ => PrinterOpState::Unknown,
        }
    }
}

impl fmt::Display for PrinterOpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrinterOpState::Idle => "idle",
            PrinterOpState::Printing => "printing",
            PrinterOpState::Paused => "paused",
            PrinterOpState::Stopped => "stopped",
            PrinterOpState::Complete => "complete",
            PrinterOpState::Error => "error",
            PrinterOpState::Disconnected => "disconnected",
            PrinterOpState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Immutable status snapshot produced by each poll. A fresh value replaces
/// the previous one every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterStatus {
    pub state: PrinterOpState,
    /// 0 means the print has not started (or the layer is unknown).
    pub current_layer: u32,
    /// 0 if unknown.
    pub total_layers: u32,
    pub percent_complete: u8,
}

impl PrinterStatus {
    pub fn unknown() -> Self {
        Self {
            state: PrinterOpState::Unknown,
            current_layer: 0,
            total_layers: 0,
            percent_complete: 0,
        }
    }

    /// Whether this status indicates the print has finished: an explicit
    /// completion state, stopped at 100%, or the final layer at >= 99%.
    pub fn is_complete(&self) -> bool {
        if self.state == PrinterOpState::Complete {
            return true;
        }
        if self.state == PrinterOpState::Stopped && self.percent_complete >= 100 {
            return true;
        }
        self.total_layers > 0
            && self.current_layer >= self.total_layers
            && self.percent_complete >= 99
    }
}

/// A printable file stored on the printer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PrinterFile {
    /// Name used when issuing a print command.
    pub internal_name: String,
    pub display_name: String,
}

/// Request interface to the printer. Implementations retry transient
/// connection failures internally (3 attempts, fixed 1 s backoff) and
/// surface `PrinterError::Connection` only after the retries are exhausted.
#[async_trait]
pub trait PrinterLink: Send + Sync {
    async fn get_status(&self) -> Result<PrinterStatus, PrinterError>;
    async fn pause(&self) -> Result<(), PrinterError>;
    async fn resume(&self) -> Result<(), PrinterError>;
    async fn stop(&self) -> Result<(), PrinterError>;
    async fn list_files(&self) -> Result<Vec<PrinterFile>, PrinterError>;
    async fn start_print(&self, internal_name: &str) -> Result<(), PrinterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_normalization() {
        assert_eq!(PrinterOpState::from_wire("print"), PrinterOpState::Printing);
        assert_eq!(PrinterOpState::from_wire("PAUSE"), PrinterOpState::Paused);
        assert_eq!(PrinterOpState::from_wire("finished"), PrinterOpState::Complete);
        assert_eq!(PrinterOpState::from_wire("???"), PrinterOpState::Unknown);
    }

    #[test]
    fn test_completion_predicate() {
        let mut status = PrinterStatus {
            state: PrinterOpState::Printing,
            current_layer: 10,
            total_layers: 100,
            percent_complete: 10,
        };
        assert!(!status.is_complete());

        status.state = PrinterOpState::Complete;
        assert!(status.is_complete());

        status.state = PrinterOpState::Stopped;
        status.percent_complete = 100;
        assert!(status.is_complete());

        status.percent_complete = 50;
        assert!(!status.is_complete());

        status.state = PrinterOpState::Printing;
        status.current_layer = 100;
        status.percent_complete = 99;
        assert!(status.is_complete());
    }

    #[test]
    fn test_unknown_status_has_no_layer() {
        let status = PrinterStatus::unknown();
        assert_eq!(status.current_layer, 0);
        assert!(!status.is_complete());
    }
}
