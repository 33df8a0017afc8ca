// src/printer/monox.rs - UART-over-WiFi printer link (TCP text protocol)
//
// The printer exposes a line-oriented command protocol on TCP port 6000:
// requests like "getstatus" or "goprint,<name>,end" are answered with
// comma-separated records terminated by an "end" token.
use super::{PrinterError, PrinterFile, PrinterLink, PrinterOpState, PrinterStatus};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct MonoXLink {
    host: String,
    port: u16,
    request_timeout: Duration,
}

impl MonoXLink {
    pub fn new(host: impl Into<String>, port: u16, request_timeout: Duration) -> Self {
        Self { host: host.into(), port, request_timeout }
    }

    /// Send one command and collect the raw reply. Retries transient
    /// connection failures with a fixed backoff before giving up.
    async fn send_request(&self, command: &str) -> Result<String, PrinterError> {
        let mut last_error = String::new();
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.try_send(command).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    tracing::warn!(
                        "Printer request '{}' attempt {}/{} failed: {}",
                        command,
                        attempt,
                        RETRY_ATTEMPTS,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < RETRY_ATTEMPTS {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }
        Err(PrinterError::Connection { attempts: RETRY_ATTEMPTS, reason: last_error })
    }

    async fn try_send(&self, command: &str) -> Result<String, std::io::Error> {
        let addr = format!("{}:{}", self.host, self.port);
        let mut stream = timeout(self.request_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

        stream.write_all(command.as_bytes()).await?;
        stream.flush().await?;

        let mut reply = String::new();
        let mut buf = [0u8; 1024];
        loop {
            let read = match timeout(self.request_timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e),
                // The printer does not close the socket; quiet after the
                // "end" token is the normal end of a reply.
                Err(_) if reply_complete(&reply) => break,
                Err(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "read timed out",
                    ));
                }
            };
            reply.push_str(&String::from_utf8_lossy(&buf[..read]));
            if reply_complete(&reply) {
                break;
            }
        }
        tracing::debug!("Printer <- '{}', -> '{}'", command, reply.trim_end());
        Ok(reply)
    }
}

/// Whether a buffered reply carries the terminating "end" token. The token
/// must stand alone: "end" also appears inside filenames ("legend.pwmb")
/// and inside comma-joined records, so only a bare trailing line or a bare
/// trailing comma-separated field counts.
fn reply_complete(reply: &str) -> bool {
    match reply.trim_end().lines().next_back() {
        Some(line) => {
            let line = line.trim();
            line == "end" || line.rsplit(',').next().is_some_and(|f| f.trim() == "end")
        }
        None => false,
    }
}

/// Reduces a raw `getstatus` reply to the normalized status record. This is
/// the single place raw fields are interpreted; unparseable replies produce
/// an `Unknown` status instead of an error.
///
/// Printing reply layout:
///   getstatus,print,<file>,<total_layers>,<percent>,<current_layer>,...,end
/// Idle reply layout:
///   getstatus,stop\r\n...,end
pub fn normalize_status(raw: &str) -> PrinterStatus {
    let line = match raw.lines().find(|l| l.trim_start().starts_with("getstatus")) {
        Some(l) => l.trim(),
        None => return PrinterStatus::unknown(),
    };
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 2 {
        return PrinterStatus::unknown();
    }

    let state = PrinterOpState::from_wire(fields[1]);
    let mut status = PrinterStatus { state, current_layer: 0, total_layers: 0, percent_complete: 0 };

    if fields.len() >= 6 {
        status.total_layers = fields[3].trim().parse().unwrap_or(0);
        status.percent_complete = fields[4].trim().parse().unwrap_or(0);
        status.current_layer = fields[5].trim().parse().unwrap_or(0);
    }
    status
}

/// Parses a `getfile` reply: one "<internal name>:<display name>" entry per
/// line, bracketed by the echoed command and the "end" token.
pub fn parse_file_list(raw: &str) -> Vec<PrinterFile> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "end" && !l.starts_with("getfile"))
        .filter_map(|l| {
            let (internal, display) = l.split_once(':')?;
            Some(PrinterFile {
                internal_name: internal.trim().to_string(),
                display_name: display.trim().to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl PrinterLink for MonoXLink {
    async fn get_status(&self) -> Result<PrinterStatus, PrinterError> {
        let raw = self.send_request("getstatus").await?;
        Ok(normalize_status(&raw))
    }

    async fn pause(&self) -> Result<(), PrinterError> {
        self.send_request("gopause").await?;
        Ok(())
    }

    async fn resume(&self) -> Result<(), PrinterError> {
        self.send_request("goresume").await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), PrinterError> {
        self.send_request("gostop,end").await?;
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<PrinterFile>, PrinterError> {
        let raw = self.send_request("getfile").await?;
        Ok(parse_file_list(&raw))
    }

    async fn start_print(&self, internal_name: &str) -> Result<(), PrinterError> {
        let command = format!("goprint,{},end", internal_name);
        let raw = self.send_request(&command).await?;
        if raw.contains("ERROR") {
            return Err(PrinterError::Rejected(command));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_printing_status() {
        let raw = "getstatus,print,widget.pwmb,2338,42,982,42921,32585,1.0,~178mm,UV,39.38,0.05,1,end";
        let status = normalize_status(raw);
        assert_eq!(status.state, PrinterOpState::Printing);
        assert_eq!(status.total_layers, 2338);
        assert_eq!(status.percent_complete, 42);
        assert_eq!(status.current_layer, 982);
    }

    #[test]
    fn test_normalize_idle_status() {
        let status = normalize_status("getstatus,stop\r\nend");
        assert_eq!(status.state, PrinterOpState::Stopped);
        assert_eq!(status.current_layer, 0);
    }

    #[test]
    fn test_normalize_garbage_is_unknown() {
        let status = normalize_status("lorem ipsum");
        assert_eq!(status.state, PrinterOpState::Unknown);
        assert_eq!(status.current_layer, 0);

        // Non-numeric fields degrade to zeroes, not errors
        let status = normalize_status("getstatus,print,f.pwmb,abc,def,ghi,end");
        assert_eq!(status.state, PrinterOpState::Printing);
        assert_eq!(status.current_layer, 0);
    }

    #[test]
    fn test_reply_complete_requires_bare_end_token() {
        // Terminated replies, both layouts
        assert!(reply_complete("getstatus,print,f.pwmb,100,1,2,end"));
        assert!(reply_complete("getfile\r\n1.pwmb:widget.pwmb\r\nend\r\n"));

        // "end" inside a filename is not a terminator
        assert!(!reply_complete("getfile\r\n1.pwmb:legend.pwmb"));
        assert!(!reply_complete("getstatus,print,legend.pwmb"));

        // Partial token and empty buffer
        assert!(!reply_complete("getstatus,print,f.pwmb,100,1,2,en"));
        assert!(!reply_complete(""));
    }

    #[test]
    fn test_parse_file_list() {
        let raw = "getfile\r\n1.pwmb:widget.pwmb\r\n2.pwmb:bracket.pwmb\r\nend";
        let files = parse_file_list(raw);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].internal_name, "1.pwmb");
        assert_eq!(files[0].display_name, "widget.pwmb");
    }
}
