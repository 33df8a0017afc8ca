// src/orchestrator.rs - Core state machine and monitoring loop
//
// The orchestrator owns all mutable coordination state. One background task
// per instance runs the monitoring loop; everything else reaches it through
// the command queue (in) and the event bus (out), plus a lock-protected
// snapshot accessor for synchronous reads. Commands run inline inside the
// loop, so at most one hardware-affecting operation is in flight at any
// instant without locking the hardware itself.
use crate::commands::{
    CalibrateSinglePumpParams, CommandKind, CommandResult, MaterialChangeParams,
    PendingCommand, PumpControlParams, StartMultiMaterialParams, StartPrinterPrintParams,
};
use crate::config::Config;
use crate::events::{Component, EventBus, EventLevel, EventSender, StatusEvent};
use crate::hardware::{AirValve, PumpDirection, PumpDriver, PumpId, volume_to_duration};
use crate::printer::PrinterLink;
use crate::recipe::{Material, Recipe, RecipeError};
use crate::sequencer::{MaterialChangeSequencer, SequenceError};
use crate::sync::{QuiescentWindow, StopSignal};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_QUEUE_DEPTH: usize = 32;
const EVENT_BUFFER: usize = 256;
const DIAGNOSTIC_PUMP_RUN: Duration = Duration::from_secs(2);
const GPIO_TEST_HOLD: Duration = Duration::from_millis(500);
const CALIBRATION_TEST_VOLUME_ML: f64 = 10.0;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Cannot start while {0}; a start is only accepted when idle")]
    NotIdle(OrchestratorState),
    #[error("Recipe load failed: {0}")]
    Recipe(#[from] RecipeError),
    #[error("Monitor loop is not running")]
    NotRunning,
    #[error("Command queue is full")]
    QueueFull,
    #[error("Monitor loop did not acknowledge stop within {0:?}; stop signal remains asserted")]
    StopTimeout(Duration),
    #[error("Monitor task terminated abnormally: {0}")]
    Halted(String),
}

/// Orchestrator lifecycle state. Exactly one state is held at a time; all
/// transitions happen on the monitor task or under the shared-state lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Starting,
    Monitoring,
    MaterialChanging,
    Stopping,
    Error,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Starting => "starting",
            OrchestratorState::Monitoring => "monitoring",
            OrchestratorState::MaterialChanging => "material_changing",
            OrchestratorState::Stopping => "stopping",
            OrchestratorState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Copy of the externally observable state. Readers never see the mutable
/// originals.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state: OrchestratorState,
    pub printer_ip: String,
    pub recipe_size: usize,
    pub recipe_active: bool,
    pub last_processed_layer: Option<u32>,
    pub remaining_layers: Vec<u32>,
}

struct SharedState {
    state: OrchestratorState,
    printer_ip: String,
    recipe: Recipe,
    recipe_active: bool,
    last_processed_layer: Option<u32>,
}

struct RunHandle {
    stop: StopSignal,
    cmd_tx: mpsc::Sender<PendingCommand>,
    join: JoinHandle<()>,
}

/// Builds a printer link for the address given to `start`. Injected by the
/// process entry point so tests can substitute scripted links.
pub type LinkFactory = Box<dyn Fn(&str) -> Arc<dyn PrinterLink> + Send + Sync>;

pub struct Orchestrator {
    shared: Arc<RwLock<SharedState>>,
    events: Arc<EventBus>,
    pumps: Arc<dyn PumpDriver>,
    valve: Arc<dyn AirValve>,
    link_factory: LinkFactory,
    config: Config,
    runtime: tokio::sync::Mutex<Option<RunHandle>>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        pumps: Arc<dyn PumpDriver>,
        valve: Arc<dyn AirValve>,
        link_factory: LinkFactory,
    ) -> Self {
        let shared = SharedState {
            state: OrchestratorState::Idle,
            printer_ip: config.printer.ip_address.clone(),
            recipe: Recipe::new(),
            recipe_active: false,
            last_processed_layer: None,
        };
        Self {
            shared: Arc::new(RwLock::new(shared)),
            events: Arc::new(EventBus::new(EVENT_BUFFER)),
            pumps,
            valve,
            link_factory,
            config,
            runtime: tokio::sync::Mutex::new(None),
        }
    }

    /// Launches the monitoring loop against `printer_ip`, optionally
    /// loading a recipe first. Accepted from `Idle` (or `Error`, where a
    /// fresh start is the required external intervention); rejected from
    /// every running state so two loops can never own the hardware at
    /// once. Returns once the loop task has been spawned.
    pub async fn start(
        &self,
        printer_ip: &str,
        recipe_path: Option<&Path>,
    ) -> Result<(), OrchestratorError> {
        let mut runtime = self.runtime.lock().await;
        {
            let mut shared = self.shared.write().await;
            match shared.state {
                OrchestratorState::Idle | OrchestratorState::Error => {}
                other => {
                    tracing::warn!("Rejecting start request while {}", other);
                    return Err(OrchestratorError::NotIdle(other));
                }
            }
            shared.state = OrchestratorState::Starting;
            shared.printer_ip = printer_ip.to_string();
            shared.last_processed_layer = None;

            if let Some(path) = recipe_path {
                match Recipe::load(path) {
                    Ok(recipe) => {
                        tracing::info!(
                            "Loaded recipe from {} with {} change(s)",
                            path.display(),
                            recipe.len()
                        );
                        shared.recipe = recipe;
                        shared.recipe_active = true;
                    }
                    Err(e) => {
                        shared.state = OrchestratorState::Error;
                        self.events.sender().error(
                            Component::System,
                            format!("recipe load failed: {}", e),
                        );
                        return Err(e.into());
                    }
                }
            }
        }

        let stop = StopSignal::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let link = (self.link_factory)(printer_ip);
        let sequencer = MaterialChangeSequencer::new(
            self.pumps.clone(),
            self.valve.clone(),
            link.clone(),
            self.config.clone(),
            self.events.sender(),
        );
        let monitor = MonitorLoop {
            shared: self.shared.clone(),
            link,
            sequencer,
            pumps: self.pumps.clone(),
            valve: self.valve.clone(),
            events: self.events.sender(),
            stop: stop.clone(),
            cmd_rx,
            config: self.config.clone(),
            window: QuiescentWindow::new(),
        };
        // Transition before the spawn so the loop's own terminal
        // transition can never be clobbered by this one.
        self.shared.write().await.state = OrchestratorState::Monitoring;
        let join = tokio::spawn(monitor.run());

        self.events
            .sender()
            .info(Component::System, format!("monitoring started for {}", printer_ip));
        *runtime = Some(RunHandle { stop, cmd_tx, join });
        Ok(())
    }

    /// Signals the loop to exit at its next checkpoint and waits a bounded
    /// time for it to do so. On timeout the signal stays asserted and the
    /// loop will still exit eventually.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        let handle = self
            .runtime
            .lock()
            .await
            .take()
            .ok_or(OrchestratorError::NotRunning)?;

        {
            let mut shared = self.shared.write().await;
            if shared.state == OrchestratorState::Monitoring {
                shared.state = OrchestratorState::Stopping;
            }
        }
        handle.stop.set();

        match tokio::time::timeout(STOP_TIMEOUT, handle.join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                // The task died without running its own finalizer (a panic
                // or abort), so the terminal transition happens here.
                self.shared.write().await.state = OrchestratorState::Error;
                tracing::error!("Monitor task terminated abnormally: {}", e);
                self.events.sender().error(
                    Component::System,
                    format!("monitor task terminated abnormally: {}", e),
                );
                Err(OrchestratorError::Halted(e.to_string()))
            }
            Err(_) => {
                tracing::error!("Monitor loop did not stop within {:?}", STOP_TIMEOUT);
                Err(OrchestratorError::StopTimeout(STOP_TIMEOUT))
            }
        }
    }

    /// Lock-protected copy of the current state. Never touches hardware.
    pub async fn snapshot(&self) -> StateSnapshot {
        let shared = self.shared.read().await;
        StateSnapshot {
            state: shared.state,
            printer_ip: shared.printer_ip.clone(),
            recipe_size: shared.recipe.len(),
            recipe_active: shared.recipe_active,
            last_processed_layer: shared.last_processed_layer,
            remaining_layers: shared.recipe.iter().map(|(l, _)| l).collect(),
        }
    }

    /// Enqueues a command for the next loop iteration and returns its
    /// correlation id. Never blocks on hardware.
    pub async fn submit_command(
        &self,
        kind: CommandKind,
        parameters: serde_json::Value,
    ) -> Result<String, OrchestratorError> {
        let runtime = self.runtime.lock().await;
        let handle = runtime.as_ref().ok_or(OrchestratorError::NotRunning)?;
        let command = PendingCommand::new(kind, parameters);
        let id = command.command_id.clone();
        handle.cmd_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OrchestratorError::QueueFull,
            // Receiver gone means the loop already exited.
            mpsc::error::TrySendError::Closed(_) => OrchestratorError::NotRunning,
        })?;
        Ok(id)
    }

    /// Pull-style event retrieval for UIs.
    pub async fn next_event(&self, wait: Duration) -> Option<StatusEvent> {
        self.events.next_event(wait).await
    }
}

enum LoopExit {
    Stopped,
    Completed,
    Fatal(String),
}

struct MonitorLoop {
    shared: Arc<RwLock<SharedState>>,
    link: Arc<dyn PrinterLink>,
    sequencer: MaterialChangeSequencer,
    pumps: Arc<dyn PumpDriver>,
    valve: Arc<dyn AirValve>,
    events: EventSender,
    stop: StopSignal,
    cmd_rx: mpsc::Receiver<PendingCommand>,
    config: Config,
    window: QuiescentWindow,
}

impl MonitorLoop {
    async fn run(mut self) {
        let exit = self.run_inner().await;
        let mut shared = self.shared.write().await;
        match exit {
            LoopExit::Stopped => {
                shared.state = OrchestratorState::Idle;
                tracing::info!("Monitoring loop stopped");
                self.events.info(Component::System, "monitoring stopped");
            }
            LoopExit::Completed => {
                shared.state = OrchestratorState::Idle;
                tracing::info!("Print completed, monitoring loop finished");
                self.events.info(Component::PrinterStatus, "print complete");
            }
            LoopExit::Fatal(reason) => {
                shared.state = OrchestratorState::Error;
                self.stop.set();
                tracing::error!("Monitoring loop halted: {}", reason);
                self.events.emit(
                    StatusEvent::new(Component::System, EventLevel::Error, "monitoring halted")
                        .with_data(json!({
                            "reason": reason,
                            "last_processed_layer": shared.last_processed_layer,
                            "remaining_changes": shared.recipe.len(),
                        })),
                );
            }
        }
    }

    async fn run_inner(&mut self) -> LoopExit {
        let poll_interval = Duration::from_secs_f64(self.config.printer.poll_interval_seconds);
        let retry_delay = Duration::from_secs_f64(self.config.printer.retry_delay_seconds);

        loop {
            if self.stop.is_set() {
                return LoopExit::Stopped;
            }

            // Command dispatch always precedes the printer poll; the
            // handler runs inline so this iteration holds the hardware
            // exclusively until it returns.
            if let Ok(command) = self.cmd_rx.try_recv() {
                if let Err(fatal) = self.dispatch(command).await {
                    return LoopExit::Fatal(fatal);
                }
            }
            if self.stop.is_set() {
                return LoopExit::Stopped;
            }

            if self.window.is_open() {
                // Do not race the printer firmware's pause sequence; skip
                // the poll and just report liveness.
                self.events.emit(
                    StatusEvent::new(Component::Quiescence, EventLevel::Info, "poll suppressed")
                        .with_data(json!({
                            "remaining_seconds": self.window.remaining().as_secs_f64(),
                        })),
                );
            } else {
                match self.link.get_status().await {
                    Err(e) => {
                        tracing::warn!("Lost connection to printer: {}", e);
                        self.events.warning(Component::PrinterStatus, "printer disconnected");
                        if self.stop.sleep(retry_delay).await {
                            return LoopExit::Stopped;
                        }
                        continue;
                    }
                    Ok(status) => {
                        self.events.emit(
                            StatusEvent::new(Component::PrinterStatus, EventLevel::Info, "status")
                                .with_data(json!({
                                    "state": status.state.to_string(),
                                    "current_layer": status.current_layer,
                                    "total_layers": status.total_layers,
                                    "percent_complete": status.percent_complete,
                                })),
                        );

                        // Layer 0 means not started or unknown; skip
                        // material-change evaluation this iteration.
                        if status.current_layer > 0 {
                            if let Err(fatal) =
                                self.maybe_change_material(status.current_layer).await
                            {
                                return LoopExit::Fatal(fatal);
                            }
                        }

                        if status.is_complete() {
                            return LoopExit::Completed;
                        }
                    }
                }
            }

            if self.stop.sleep(poll_interval).await {
                return LoopExit::Stopped;
            }
        }
    }

    /// Evaluates the recipe against the observed layer and runs the change
    /// sequence when one is due. `last_processed_layer` advances regardless
    /// of outcome so a failed change is never retried against the same
    /// monotonically increasing layer counter.
    async fn maybe_change_material(&mut self, layer: u32) -> Result<(), String> {
        let target = {
            let shared = self.shared.read().await;
            if !shared.recipe_active || shared.last_processed_layer == Some(layer) {
                return Ok(());
            }
            match shared.recipe.get(layer) {
                Some(material) => material,
                None => {
                    if let Some((next_layer, next)) = shared.recipe.next_change_after(layer) {
                        tracing::debug!(
                            "Next change at layer {} (material {}), {} layer(s) away",
                            next_layer,
                            next,
                            next_layer - layer
                        );
                    }
                    return Ok(());
                }
            }
        };

        self.shared.write().await.state = OrchestratorState::MaterialChanging;
        self.events.emit(
            StatusEvent::new(Component::Material, EventLevel::Info, "material change triggered")
                .with_data(json!({ "layer": layer, "target": target.to_string() })),
        );

        let result = self
            .sequencer
            .change_material(target, &mut self.window, &self.stop)
            .await;

        {
            let mut shared = self.shared.write().await;
            shared.last_processed_layer = Some(layer);
            if result.is_ok() {
                shared.recipe.take(layer);
            }
            shared.state = OrchestratorState::Monitoring;
        }

        match result {
            Ok(()) => {
                self.events.emit(
                    StatusEvent::new(Component::Material, EventLevel::Info, "material change complete")
                        .with_data(json!({ "layer": layer, "target": target.to_string() })),
                );
                Ok(())
            }
            Err(SequenceError::Cancelled) => {
                self.events.warning(Component::Material, "material change cancelled");
                Ok(())
            }
            Err(e @ SequenceError::ResumeFailed(_)) => {
                // The swap itself finished; the printer is stuck paused.
                self.events.error(Component::Material, e.to_string());
                Err(e.to_string())
            }
            Err(e) => {
                self.events.emit(
                    StatusEvent::new(Component::Material, EventLevel::Error, "material change failed")
                        .with_data(json!({
                            "layer": layer,
                            "target": target.to_string(),
                            "reason": e.to_string(),
                        })),
                );
                Ok(())
            }
        }
    }

    /// Dispatches one queued command and reports its result with the
    /// original correlation id. Returns `Err` only for fatal conditions
    /// that must halt the loop.
    async fn dispatch(&mut self, command: PendingCommand) -> Result<(), String> {
        tracing::info!("Dispatching command {:?} ({})", command.kind, command.command_id);
        let mut fatal = None;
        let mut data = serde_json::Value::Null;

        let outcome: Result<String, String> = match command.kind {
            CommandKind::StartMultiMaterial => self.handle_start_multi_material(&command).await,
            CommandKind::StopMultiMaterial => {
                self.shared.write().await.recipe_active = false;
                Ok("recipe deactivated".to_string())
            }
            CommandKind::PausePrint => match self.link.pause().await {
                Ok(()) => {
                    self.window.open(Duration::from_secs_f64(
                        self.config.material_change.quiescent_window_seconds,
                    ));
                    Ok("printer paused".to_string())
                }
                Err(e) => Err(e.to_string()),
            },
            CommandKind::ResumePrint => match self.link.resume().await {
                Ok(()) => {
                    self.window.clear();
                    Ok("printer resumed".to_string())
                }
                Err(e) => Err(e.to_string()),
            },
            CommandKind::StopPrint => self
                .link
                .stop()
                .await
                .map(|_| "printer stopped".to_string())
                .map_err(|e| e.to_string()),
            CommandKind::EmergencyStop => {
                self.stop.set();
                Ok("emergency stop asserted".to_string())
            }
            CommandKind::PumpControl => self.handle_pump_control(&command).await,
            CommandKind::RunMaterialChange => {
                match self.handle_manual_material_change(&command).await {
                    Ok(message) => Ok(message),
                    Err(DispatchFailure::Command(reason)) => Err(reason),
                    Err(DispatchFailure::Fatal(reason)) => {
                        fatal = Some(reason.clone());
                        Err(reason)
                    }
                }
            }
            CommandKind::GetFiles => match self.link.list_files().await {
                Ok(files) => {
                    data = serde_json::to_value(&files).unwrap_or_default();
                    Ok(format!("{} file(s)", files.len()))
                }
                Err(e) => Err(e.to_string()),
            },
            CommandKind::StartPrinterPrint => match command.params::<StartPrinterPrintParams>() {
                Ok(params) => self
                    .link
                    .start_print(&params.filename)
                    .await
                    .map(|_| format!("print '{}' started", params.filename))
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            CommandKind::TestI2c => self
                .pumps
                .bus_check()
                .await
                .map(|_| "motor bus ok".to_string())
                .map_err(|e| e.to_string()),
            CommandKind::TestGpio => self.handle_gpio_test().await,
            CommandKind::TestPumpMotors => self.handle_pump_motor_test().await,
            CommandKind::RunFullDiagnostics => self.handle_full_diagnostics().await,
            CommandKind::CalibratePumps => self.handle_calibrate_all().await,
            CommandKind::CalibrateSinglePump => self.handle_calibrate_single(&command).await,
        };

        let result = CommandResult {
            command_id: command.command_id.clone(),
            success: outcome.is_ok(),
            result: match &outcome {
                Ok(message) => message.clone(),
                Err(reason) => reason.clone(),
            },
            data,
        };
        let level = if result.success { EventLevel::Info } else { EventLevel::Error };
        self.events.emit(
            StatusEvent::new(Component::System, level, "command_result")
                .with_data(serde_json::to_value(&result).unwrap_or_default()),
        );

        match fatal {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    async fn handle_start_multi_material(
        &mut self,
        command: &PendingCommand,
    ) -> Result<String, String> {
        let params: StartMultiMaterialParams =
            command.params().map_err(|e| e.to_string())?;
        let mut shared = self.shared.write().await;
        if let Some(text) = &params.recipe {
            shared.recipe = Recipe::parse(text);
        } else if let Some(path) = &params.recipe_path {
            shared.recipe = Recipe::load(path).map_err(|e| e.to_string())?;
        }
        shared.recipe_active = true;
        Ok(format!("recipe active with {} change(s)", shared.recipe.len()))
    }

    /// Manual pump jog. Bypasses the sequencer entirely; used for bench
    /// testing a single motor.
    async fn handle_pump_control(&mut self, command: &PendingCommand) -> Result<String, String> {
        let params: PumpControlParams = command.params().map_err(|e| e.to_string())?;
        let pump: PumpId = params.motor.parse().map_err(|e: crate::hardware::HardwareError| e.to_string())?;
        let direction: PumpDirection =
            params.direction.parse().map_err(|e: crate::hardware::HardwareError| e.to_string())?;
        if !(params.duration_seconds > 0.0 && params.duration_seconds <= 600.0) {
            return Err(format!(
                "duration_seconds {} out of range (0, 600]",
                params.duration_seconds
            ));
        }

        self.pumps
            .run_pump(pump, direction, Duration::from_secs_f64(params.duration_seconds))
            .await
            .map(|_| format!("{} ran {} for {}s", pump, direction, params.duration_seconds))
            .map_err(|e| e.to_string())
    }

    async fn handle_manual_material_change(
        &mut self,
        command: &PendingCommand,
    ) -> Result<String, DispatchFailure> {
        let params: MaterialChangeParams = command
            .params()
            .map_err(|e| DispatchFailure::Command(e.to_string()))?;
        let target: Material = params
            .material
            .parse()
            .map_err(|e: RecipeError| DispatchFailure::Command(e.to_string()))?;

        self.shared.write().await.state = OrchestratorState::MaterialChanging;
        let result = self
            .sequencer
            .change_material(target, &mut self.window, &self.stop)
            .await;
        self.shared.write().await.state = OrchestratorState::Monitoring;

        match result {
            Ok(()) => Ok(format!("material changed to {}", target)),
            Err(e @ SequenceError::ResumeFailed(_)) => {
                Err(DispatchFailure::Fatal(e.to_string()))
            }
            Err(e) => Err(DispatchFailure::Command(e.to_string())),
        }
    }

    async fn handle_gpio_test(&mut self) -> Result<String, String> {
        self.events.info(Component::Diagnostics, "air valve test: opening");
        self.valve.open().await.map_err(|e| e.to_string())?;
        tokio::time::sleep(GPIO_TEST_HOLD).await;
        self.valve.close().await.map_err(|e| e.to_string())?;
        self.events.info(Component::Diagnostics, "air valve test: ok");
        Ok("air valve ok".to_string())
    }

    async fn handle_pump_motor_test(&mut self) -> Result<String, String> {
        let mut failures = Vec::new();
        for pump in PumpId::ALL {
            self.events.info(Component::Diagnostics, format!("test run: {}", pump));
            if let Err(e) = self
                .pumps
                .run_pump(pump, PumpDirection::Forward, DIAGNOSTIC_PUMP_RUN)
                .await
            {
                self.events
                    .error(Component::Diagnostics, format!("{} failed: {}", pump, e));
                failures.push(pump.to_string());
            }
        }
        if failures.is_empty() {
            Ok("all pump motors ok".to_string())
        } else {
            Err(format!("pump test failures: {}", failures.join(", ")))
        }
    }

    async fn handle_full_diagnostics(&mut self) -> Result<String, String> {
        self.events.info(Component::Diagnostics, "full diagnostics started");
        self.pumps
            .bus_check()
            .await
            .map_err(|e| format!("motor bus check failed: {}", e))?;
        self.events.info(Component::Diagnostics, "motor bus ok");
        self.handle_gpio_test().await?;
        self.handle_pump_motor_test().await?;
        self.events.info(Component::Diagnostics, "full diagnostics complete");
        Ok("diagnostics passed".to_string())
    }

    async fn calibrate_pump(&mut self, pump: PumpId, test_volume_ml: f64) -> Result<(), String> {
        let flow_rate = self.config.flow_rate(pump.config_key());
        let duration = volume_to_duration(test_volume_ml, flow_rate);
        self.events.emit(
            StatusEvent::new(Component::Calibration, EventLevel::Info, "calibration run")
                .with_data(json!({
                    "pump": pump.to_string(),
                    "test_volume_ml": test_volume_ml,
                    "flow_rate_ml_per_second": flow_rate,
                    "duration_seconds": duration.as_secs_f64(),
                })),
        );
        self.pumps
            .run_pump(pump, PumpDirection::Forward, duration)
            .await
            .map_err(|e| format!("{} calibration failed: {}", pump, e))
    }

    async fn handle_calibrate_all(&mut self) -> Result<String, String> {
        for pump in PumpId::ALL {
            self.calibrate_pump(pump, CALIBRATION_TEST_VOLUME_ML).await?;
        }
        Ok("calibration runs complete; measure dispensed volumes and update flow rates".to_string())
    }

    async fn handle_calibrate_single(&mut self, command: &PendingCommand) -> Result<String, String> {
        let params: CalibrateSinglePumpParams = command.params().map_err(|e| e.to_string())?;
        let pump: PumpId = params.pump.parse().map_err(|e: crate::hardware::HardwareError| e.to_string())?;
        if params.test_volume_ml <= 0.0 {
            return Err(format!("test_volume_ml {} must be positive", params.test_volume_ml));
        }
        self.calibrate_pump(pump, params.test_volume_ml).await?;
        Ok(format!("{} calibration run complete", pump))
    }
}

enum DispatchFailure {
    /// Reported through the command result; the loop continues.
    Command(String),
    /// Halts the loop (printer stuck paused after a completed change).
    Fatal(String),
}
