// Tests for the material-change sequence itself: cancellation boundaries,
// quiescent-window handling, and the no-fill-pump edge for material D.

use mmu_host::config::Config;
use mmu_host::events::EventBus;
use mmu_host::hardware::sim::{SimAirValve, SimOp, SimPumpDriver};
use mmu_host::hardware::PumpId;
use mmu_host::printer::{PrinterError, PrinterFile, PrinterLink, PrinterOpState, PrinterStatus};
use mmu_host::recipe::Material;
use mmu_host::sequencer::{MaterialChangeSequencer, SequenceError};
use mmu_host::sync::{QuiescentWindow, StopSignal};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Link stub that always reports paused and counts pause/resume calls.
#[derive(Default)]
struct CountingLink {
    pauses: AtomicUsize,
    resumes: AtomicUsize,
}

#[async_trait]
impl PrinterLink for CountingLink {
    async fn get_status(&self) -> Result<PrinterStatus, PrinterError> {
        Ok(PrinterStatus {
            state: PrinterOpState::Paused,
            current_layer: 10,
            total_layers: 100,
            percent_complete: 10,
        })
    }

    async fn pause(&self) -> Result<(), PrinterError> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), PrinterError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), PrinterError> {
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<PrinterFile>, PrinterError> {
        Ok(Vec::new())
    }

    async fn start_print(&self, _internal_name: &str) -> Result<(), PrinterError> {
        Ok(())
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.material_change.quiescent_window_seconds = 0.1;
    config.material_change.bed_raise_initial_delay_seconds = 0.0;
    config.material_change.bed_raise_move_seconds = 0.0;
    config.material_change.bed_raise_buffer_seconds = 0.0;
    config.material_change.settle_time_seconds = 0.0;
    config.material_change.air_assist_pre_delay_seconds = 0.0;
    config.material_change.air_assist_post_delay_seconds = 0.0;
    config
}

struct Rig {
    sequencer: MaterialChangeSequencer,
    link: Arc<CountingLink>,
    pumps: Arc<SimPumpDriver>,
    valve: Arc<SimAirValve>,
    _bus: Arc<EventBus>,
}

fn rig(config: Config, time_scale: f64) -> Rig {
    let pumps = Arc::new(SimPumpDriver::new(time_scale));
    let valve = Arc::new(SimAirValve::new());
    let link = Arc::new(CountingLink::default());
    let bus = Arc::new(EventBus::new(64));
    let sequencer = MaterialChangeSequencer::new(
        pumps.clone(),
        valve.clone(),
        link.clone(),
        config,
        bus.sender(),
    );
    Rig { sequencer, link, pumps, valve, _bus: bus }
}

#[tokio::test]
async fn test_full_cycle_order_and_valve_discipline() {
    let r = rig(fast_config(), 0.0);
    let mut window = QuiescentWindow::new();
    let stop = StopSignal::new();

    r.sequencer
        .change_material(Material::A, &mut window, &stop)
        .await
        .unwrap();

    assert_eq!(r.link.pauses.load(Ordering::SeqCst), 1);
    assert_eq!(r.link.resumes.load(Ordering::SeqCst), 1);
    assert!(!window.is_open());
    assert!(!r.valve.is_open());

    let pump_ops: Vec<_> = r
        .pumps
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            SimOp::Pump { pump, .. } => Some(pump),
            _ => None,
        })
        .collect();
    assert_eq!(pump_ops, vec![PumpId::Drain, PumpId::A]);
}

#[tokio::test]
async fn test_resume_waits_out_quiescent_window() {
    let mut config = fast_config();
    config.material_change.quiescent_window_seconds = 0.3;
    let r = rig(config, 0.0);
    let mut window = QuiescentWindow::new();
    let stop = StopSignal::new();

    let before = Instant::now();
    r.sequencer
        .change_material(Material::B, &mut window, &stop)
        .await
        .unwrap();

    // The resume is only issued once the window has fully elapsed.
    assert!(before.elapsed() >= Duration::from_millis(300));
    assert_eq!(r.link.resumes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_after_drain_starts_completes_the_cycle() {
    let mut config = fast_config();
    // Real-time pump runs of ~100 ms each so the stop lands mid-drain.
    config.material_change.drain_volume_ml = 50.0;
    config.material_change.fill_volume_ml = 45.0;
    config.pumps.get_mut("drain").unwrap().flow_rate_ml_per_second = 500.0;
    for id in ["a", "b", "c"] {
        config.pumps.get_mut(id).unwrap().flow_rate_ml_per_second = 450.0;
    }
    let r = rig(config, 1.0);
    let mut window = QuiescentWindow::new();
    let stop = StopSignal::new();

    let stopper = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.set();
    });

    let result = r.sequencer.change_material(Material::C, &mut window, &stop).await;

    // The stop arrived after the drain began, so the cycle ran to the end.
    assert!(result.is_ok());
    assert!(stop.is_set());
    assert_eq!(r.link.resumes.load(Ordering::SeqCst), 1);
    assert!(!r.valve.is_open());
    let pump_ops: Vec<_> = r
        .pumps
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            SimOp::Pump { pump, .. } => Some(pump),
            _ => None,
        })
        .collect();
    assert_eq!(pump_ops, vec![PumpId::Drain, PumpId::C]);
}

#[tokio::test]
async fn test_stop_before_drain_cancels() {
    let mut config = fast_config();
    config.material_change.bed_raise_move_seconds = 30.0;
    let r = rig(config, 0.0);
    let mut window = QuiescentWindow::new();
    let stop = StopSignal::new();
    stop.set();

    let result = r.sequencer.change_material(Material::A, &mut window, &stop).await;

    assert!(matches!(result, Err(SequenceError::Cancelled)));
    // Pause happened but nothing was pumped and no resume was issued.
    assert_eq!(r.link.pauses.load(Ordering::SeqCst), 1);
    assert_eq!(r.link.resumes.load(Ordering::SeqCst), 0);
    assert!(r.pumps.operations().is_empty());
}

#[tokio::test]
async fn test_material_d_has_no_fill_pump() {
    let r = rig(fast_config(), 0.0);
    let mut window = QuiescentWindow::new();
    let stop = StopSignal::new();

    let result = r.sequencer.change_material(Material::D, &mut window, &stop).await;

    assert!(matches!(
        result,
        Err(SequenceError::FillFailed { material: Material::D, .. })
    ));
    // Drain ran, but the fill never started and the printer stays paused.
    let pump_ops: Vec<_> = r
        .pumps
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            SimOp::Pump { pump, .. } => Some(pump),
            _ => None,
        })
        .collect();
    assert_eq!(pump_ops, vec![PumpId::Drain]);
    assert_eq!(r.link.resumes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_drain_pump_failure_closes_valve() {
    let r = rig(fast_config(), 0.0);
    r.pumps.fail_pump(PumpId::Drain);
    let mut window = QuiescentWindow::new();
    let stop = StopSignal::new();

    let result = r.sequencer.change_material(Material::A, &mut window, &stop).await;

    assert!(matches!(result, Err(SequenceError::DrainFailed(_))));
    assert!(!r.valve.is_open());
    assert_eq!(r.link.resumes.load(Ordering::SeqCst), 0);
}
