// src/hardware/sim.rs - Simulated pump and valve implementations
//
// Stand-ins for the I2C motor boards and the GPIO solenoid. They sleep for
// the commanded duration (scaled) and record every operation so tests can
// assert on ordering and exclusivity.
use super::{AirValve, HardwareError, PumpDirection, PumpDriver, PumpId};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// One recorded hardware operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SimOp {
    Pump { pump: PumpId, direction: PumpDirection, duration: Duration },
    ValveOpen,
    ValveClose,
}

/// Simulated pump driver. `time_scale` compresses commanded durations so a
/// 20 s pump run does not stall tests (1.0 = real time, 0.0 = instant).
pub struct SimPumpDriver {
    time_scale: f64,
    ops: Mutex<Vec<SimOp>>,
    fail_pumps: Mutex<Vec<PumpId>>,
}

impl SimPumpDriver {
    pub fn new(time_scale: f64) -> Self {
        Self {
            time_scale,
            ops: Mutex::new(Vec::new()),
            fail_pumps: Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent runs of `pump` report failure.
    pub fn fail_pump(&self, pump: PumpId) {
        self.fail_pumps.lock().expect("sim lock poisoned").push(pump);
    }

    pub fn operations(&self) -> Vec<SimOp> {
        self.ops.lock().expect("sim lock poisoned").clone()
    }
}

impl Default for SimPumpDriver {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[async_trait]
impl PumpDriver for SimPumpDriver {
    async fn run_pump(
        &self,
        pump: PumpId,
        direction: PumpDirection,
        duration: Duration,
    ) -> Result<(), HardwareError> {
        tracing::info!(
            "[PUMP] Running {} {} for {:.1}s",
            pump,
            direction,
            duration.as_secs_f64()
        );
        if self.time_scale > 0.0 {
            tokio::time::sleep(duration.mul_f64(self.time_scale)).await;
        }
        let failing = self.fail_pumps.lock().expect("sim lock poisoned").contains(&pump);
        self.ops
            .lock()
            .expect("sim lock poisoned")
            .push(SimOp::Pump { pump, direction, duration });
        if failing {
            return Err(HardwareError::PumpFailed(pump, "simulated failure".to_string()));
        }
        tracing::info!("[PUMP] {} completed, motor released", pump);
        Ok(())
    }

    async fn bus_check(&self) -> Result<(), HardwareError> {
        tracing::info!("[I2C] Simulated motor bus check ok");
        Ok(())
    }
}

/// Simulated air-assist valve.
pub struct SimAirValve {
    ops: Mutex<Vec<SimOp>>,
    open: Mutex<bool>,
}

impl SimAirValve {
    pub fn new() -> Self {
        Self { ops: Mutex::new(Vec::new()), open: Mutex::new(false) }
    }

    pub fn operations(&self) -> Vec<SimOp> {
        self.ops.lock().expect("sim lock poisoned").clone()
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().expect("sim lock poisoned")
    }
}

impl Default for SimAirValve {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AirValve for SimAirValve {
    async fn open(&self) -> Result<(), HardwareError> {
        tracing::info!("[SOLENOID] Air valve opened");
        *self.open.lock().expect("sim lock poisoned") = true;
        self.ops.lock().expect("sim lock poisoned").push(SimOp::ValveOpen);
        Ok(())
    }

    async fn close(&self) -> Result<(), HardwareError> {
        tracing::info!("[SOLENOID] Air valve closed");
        *self.open.lock().expect("sim lock poisoned") = false;
        self.ops.lock().expect("sim lock poisoned").push(SimOp::ValveClose);
        Ok(())
    }
}
