use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Per-iteration statistics for the coordinator loop.
#[derive(Debug, Clone)]
pub struct LoopMetrics {
    pub loop_number: u64,
    pub duration_us: u128,
    pub events_handled: usize,
    pub outbound_count: usize,
    pub active_rooms: usize,
}

impl LoopMetrics {
    /// Budget for a single coordinator iteration before it is reported as slow.
    pub const LOOP_BUDGET_US: u128 = 10_000;

    pub fn exceeded_budget(&self) -> bool {
        self.duration_us > Self::LOOP_BUDGET_US
    }

    pub fn log(&self) {
        if self.exceeded_budget() {
            tracing::warn!(
                iteration = self.loop_number,
                duration_us = self.duration_us,
                events = self.events_handled,
                outbound = self.outbound_count,
                rooms = self.active_rooms,
                "coordinator loop exceeded budget ({}us > {}us)",
                self.duration_us,
                Self::LOOP_BUDGET_US
            );
        } else if self.events_handled > 0 {
            tracing::debug!(
                iteration = self.loop_number,
                duration_us = self.duration_us,
                events = self.events_handled,
                outbound = self.outbound_count,
                rooms = self.active_rooms,
                "coordinator loop completed"
            );
        }
    }
}
