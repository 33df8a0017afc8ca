//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};

/// Request to begin monitoring a printer.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    /// Overrides the configured printer address when present.
    #[serde(default)]
    pub printer_ip: Option<String>,
    #[serde(default)]
    pub recipe_path: Option<String>,
}

/// Response carrying the correlation id of an accepted command.
#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    pub command_id: String,
}

/// Uniform error body for rejected requests.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
