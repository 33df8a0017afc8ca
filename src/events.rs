// src/events.rs - Outbound status event channel
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Subsystem tag carried on every status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Component {
    PrinterStatus,
    Material,
    Timing,
    Quiescence,
    Sequence,
    Diagnostics,
    Calibration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

/// One externally observable status update.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub component: Component,
    pub status: String,
    pub level: EventLevel,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl StatusEvent {
    pub fn new(component: Component, level: EventLevel, status: impl Into<String>) -> Self {
        Self {
            component,
            status: status.into(),
            level,
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Producer half held by the monitor loop. Emitting never blocks; if the
/// consumer has fallen far enough behind that the buffer is full, the event
/// is dropped with a warning.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<StatusEvent>,
}

impl EventSender {
    pub fn emit(&self, event: StatusEvent) {
        tracing::debug!(
            "Event [{}] {}: {}",
            serde_json::to_string(&event.component).unwrap_or_default(),
            serde_json::to_string(&event.level).unwrap_or_default(),
            event.status
        );
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!("Dropping status event, channel full or closed: {}", e);
        }
    }

    pub fn info(&self, component: Component, status: impl Into<String>) {
        self.emit(StatusEvent::new(component, EventLevel::Info, status));
    }

    pub fn warning(&self, component: Component, status: impl Into<String>) {
        self.emit(StatusEvent::new(component, EventLevel::Warning, status));
    }

    pub fn error(&self, component: Component, status: impl Into<String>) {
        self.emit(StatusEvent::new(component, EventLevel::Error, status));
    }
}

/// Bounded event queue connecting the monitor loop to pull-style consumers.
pub struct EventBus {
    sender: EventSender,
    receiver: Mutex<mpsc::Receiver<StatusEvent>>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self { sender: EventSender { tx }, receiver: Mutex::new(rx) }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Waits up to `wait` for the next event; `None` on timeout or if all
    /// producers are gone.
    pub async fn next_event(&self, wait: Duration) -> Option<StatusEvent> {
        let mut rx = self.receiver.lock().await;
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(8);
        let sender = bus.sender();
        sender.info(Component::System, "hello");

        let event = bus.next_event(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event.component, Component::System);
        assert_eq!(event.level, EventLevel::Info);
        assert_eq!(event.status, "hello");
    }

    #[tokio::test]
    async fn test_next_event_timeout() {
        let bus = EventBus::new(8);
        assert!(bus.next_event(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let sender = bus.sender();
        sender.info(Component::System, "first");
        sender.info(Component::System, "second"); // dropped, must not hang

        let event = bus.next_event(Duration::from_millis(50)).await.unwrap();
        assert_eq!(event.status, "first");
    }

    #[test]
    fn test_component_wire_names() {
        let json = serde_json::to_string(&Component::PrinterStatus).unwrap();
        assert_eq!(json, "\"PRINTER_STATUS\"");
    }
}
