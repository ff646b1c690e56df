//! Waits between launch stages.
//!
//! The target gives no readiness signal, so production waits are fixed
//! delays taken from config.

use std::time::Duration;

use pivrun_core::config::SettleConfig;

/// Point in the launch protocol a wait belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// After the process was spawned, before the first field is written.
    AfterSpawn,
    /// After the `load` action, before the run is started.
    AfterLoad,
}

pub trait ReadinessWait {
    fn wait_for_ready(&self, stage: Stage);
}

/// Blocking sleep of a configured length per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub after_spawn: Duration,
    pub after_load: Duration,
}

impl FixedDelay {
    pub fn delay(&self, stage: Stage) -> Duration {
        match stage {
            Stage::AfterSpawn => self.after_spawn,
            Stage::AfterLoad => self.after_load,
        }
    }
}

impl From<SettleConfig> for FixedDelay {
    fn from(settle: SettleConfig) -> Self {
        Self {
            after_spawn: settle.after_spawn,
            after_load: settle.after_load,
        }
    }
}

impl ReadinessWait for FixedDelay {
    fn wait_for_ready(&self, stage: Stage) {
        let delay = self.delay(stage);
        if delay.is_zero() {
            return;
        }
        tracing::debug!(?stage, delay_ms = delay.as_millis() as u64, "settling");
        std::thread::sleep(delay);
    }
}

/// Returns immediately. Used for dry runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWait;

impl ReadinessWait for NoWait {
    fn wait_for_ready(&self, _stage: Stage) {}
}
