// src/sequencer.rs - Material-change sequencer
//
// Executes the fixed pause -> quiesce -> drain -> fill -> settle -> resume
// workflow for a single material switch. Step ordering encodes the physical
// safety constraints: no pump runs before the printer is paused, drain
// always precedes fill, and resume is only issued after the quiescent
// window has fully elapsed.
use crate::config::Config;
use crate::events::{Component, EventSender};
use crate::hardware::{AirValve, PumpDirection, PumpDriver, PumpId, volume_to_duration};
use crate::printer::{PrinterLink, PrinterOpState};
use crate::recipe::Material;
use crate::sync::{QuiescentWindow, StopSignal};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const BED_RAISE_TICK: Duration = Duration::from_secs(1);
const QUIESCENT_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("Sequence cancelled by stop request")]
    Cancelled,
    #[error("Could not pause printer: {0}")]
    PauseFailed(String),
    #[error("Drain step failed: {0}")]
    DrainFailed(String),
    #[error("Fill step for material {material} failed: {reason}")]
    FillFailed { material: Material, reason: String },
    #[error("Printer resume failed after completed material change: {0}; manual intervention required")]
    ResumeFailed(String),
}

pub struct MaterialChangeSequencer {
    pumps: Arc<dyn PumpDriver>,
    valve: Arc<dyn AirValve>,
    link: Arc<dyn PrinterLink>,
    config: Config,
    events: EventSender,
}

impl MaterialChangeSequencer {
    pub fn new(
        pumps: Arc<dyn PumpDriver>,
        valve: Arc<dyn AirValve>,
        link: Arc<dyn PrinterLink>,
        config: Config,
        events: EventSender,
    ) -> Self {
        Self { pumps, valve, link, config, events }
    }

    /// Fill pump feeding the given material. The fourth motor drives the
    /// drain, so material D has no fill pump and is rejected here.
    fn fill_pump(material: Material) -> Option<PumpId> {
        match material {
            Material::A => Some(PumpId::A),
            Material::B => Some(PumpId::B),
            Material::C => Some(PumpId::C),
            Material::D => None,
        }
    }

    /// Runs the full material-change workflow. Cancellation is honored up
    /// to the end of the bed-raise wait; once the drain has started the
    /// cycle runs to completion so no partial-drain state is left behind.
    pub async fn change_material(
        &self,
        target: Material,
        window: &mut QuiescentWindow,
        stop: &StopSignal,
    ) -> Result<(), SequenceError> {
        tracing::info!("Starting material change sequence, target material {}", target);
        self.events.emit(
            crate::events::StatusEvent::new(
                Component::Sequence,
                crate::events::EventLevel::Info,
                "material change started",
            )
            .with_data(json!({ "target": target.to_string() })),
        );

        self.pause_printer(window).await?;
        self.bed_raise_wait(stop).await?;
        self.drain().await?;
        self.fill(target).await?;
        self.settle().await;
        self.resume_printer(window, stop).await?;

        self.events.info(Component::Sequence, format!("material change to {} complete", target));
        tracing::info!("Material change to {} completed successfully", target);
        Ok(())
    }

    /// Step 1: pause the print and open the quiescent window so nothing
    /// else talks to the printer while its firmware raises the platform.
    async fn pause_printer(&self, window: &mut QuiescentWindow) -> Result<(), SequenceError> {
        self.events.info(Component::Sequence, "pausing printer");
        self.link
            .pause()
            .await
            .map_err(|e| SequenceError::PauseFailed(e.to_string()))?;
        window.open(Duration::from_secs_f64(self.config.material_change.quiescent_window_seconds));
        self.events.info(Component::Quiescence, "quiescent window opened");
        Ok(())
    }

    /// Step 2: deterministic wait for the platform raise. The firmware
    /// needs a fixed amount of wall-clock time regardless of what its
    /// status reports, so a mismatched re-poll is only a warning.
    async fn bed_raise_wait(&self, stop: &StopSignal) -> Result<(), SequenceError> {
        let mc = &self.config.material_change;
        let total = mc.bed_raise_initial_delay_seconds
            + mc.bed_raise_move_seconds
            + mc.bed_raise_buffer_seconds;
        self.events.emit(
            crate::events::StatusEvent::new(
                Component::Timing,
                crate::events::EventLevel::Info,
                "waiting for bed raise",
            )
            .with_data(json!({ "wait_seconds": total })),
        );

        if stop.sleep_ticked(Duration::from_secs_f64(total), BED_RAISE_TICK).await {
            tracing::info!("Bed-raise wait interrupted by stop request");
            return Err(SequenceError::Cancelled);
        }

        match self.link.get_status().await {
            Ok(status) if status.state != PrinterOpState::Paused => {
                tracing::warn!(
                    "Printer reports '{}' after pause, proceeding on fixed timing",
                    status.state
                );
                self.events.warning(
                    Component::Sequence,
                    format!("printer reports {} after pause", status.state),
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Could not confirm paused state: {}", e);
            }
        }
        Ok(())
    }

    /// Step 3: drain the vat, with air assist if enabled. The valve is
    /// closed again on every exit path.
    async fn drain(&self) -> Result<(), SequenceError> {
        let mc = &self.config.material_change;
        let duration = volume_to_duration(mc.drain_volume_ml, self.config.flow_rate("drain"));
        self.events.emit(
            crate::events::StatusEvent::new(
                Component::Sequence,
                crate::events::EventLevel::Info,
                "draining vat",
            )
            .with_data(json!({
                "volume_ml": mc.drain_volume_ml,
                "duration_seconds": duration.as_secs_f64(),
                "air_assist": mc.air_assist_enabled,
            })),
        );

        if !mc.air_assist_enabled {
            return self
                .pumps
                .run_pump(PumpId::Drain, PumpDirection::Forward, duration)
                .await
                .map_err(|e| SequenceError::DrainFailed(e.to_string()));
        }

        self.valve
            .open()
            .await
            .map_err(|e| SequenceError::DrainFailed(format!("air valve open: {}", e)))?;
        tokio::time::sleep(Duration::from_secs_f64(mc.air_assist_pre_delay_seconds)).await;

        let pump_result = self
            .pumps
            .run_pump(PumpId::Drain, PumpDirection::Forward, duration)
            .await;

        if pump_result.is_ok() {
            tokio::time::sleep(Duration::from_secs_f64(mc.air_assist_post_delay_seconds)).await;
        }
        if let Err(e) = self.valve.close().await {
            tracing::error!("Failed to close air valve after drain: {}", e);
            return Err(SequenceError::DrainFailed(format!("air valve close: {}", e)));
        }

        pump_result.map_err(|e| SequenceError::DrainFailed(e.to_string()))
    }

    /// Step 4: fill from the target material's pump. On failure the
    /// printer stays paused; resuming with an incomplete swap would ruin
    /// the print.
    async fn fill(&self, target: Material) -> Result<(), SequenceError> {
        let pump = Self::fill_pump(target).ok_or_else(|| SequenceError::FillFailed {
            material: target,
            reason: "no fill pump configured for this material".to_string(),
        })?;
        let mc = &self.config.material_change;
        let duration =
            volume_to_duration(mc.fill_volume_ml, self.config.flow_rate(pump.config_key()));
        self.events.emit(
            crate::events::StatusEvent::new(
                Component::Sequence,
                crate::events::EventLevel::Info,
                "filling vat",
            )
            .with_data(json!({
                "material": target.to_string(),
                "volume_ml": mc.fill_volume_ml,
                "duration_seconds": duration.as_secs_f64(),
            })),
        );

        self.pumps
            .run_pump(pump, PumpDirection::Forward, duration)
            .await
            .map_err(|e| SequenceError::FillFailed { material: target, reason: e.to_string() })
    }

    /// Step 5: let the fresh material stabilize in the vat.
    async fn settle(&self) {
        let settle = self.config.material_change.settle_time_seconds;
        self.events.info(Component::Timing, format!("settling for {:.0}s", settle));
        tokio::time::sleep(Duration::from_secs_f64(settle)).await;
    }

    /// Step 6: wait out whatever remains of the quiescent window, then
    /// resume. A pending stop request is noted but does not skip the wait
    /// or the resume; it takes effect at the next loop iteration.
    async fn resume_printer(
        &self,
        window: &mut QuiescentWindow,
        stop: &StopSignal,
    ) -> Result<(), SequenceError> {
        let mut stop_noted = false;
        loop {
            let remaining = window.remaining();
            if remaining.is_zero() {
                break;
            }
            if stop.is_set() && !stop_noted {
                tracing::info!("Stop requested; finishing resume before honoring it");
                stop_noted = true;
            }
            tokio::time::sleep(QUIESCENT_TICK.min(remaining)).await;
        }

        self.events.info(Component::Sequence, "resuming printer");
        self.link
            .resume()
            .await
            .map_err(|e| SequenceError::ResumeFailed(e.to_string()))?;
        window.clear();
        self.events.info(Component::Quiescence, "quiescent window cleared");
        Ok(())
    }
}
