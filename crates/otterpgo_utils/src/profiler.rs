use std::time::{Duration, Instant};

use tracing::debug;

/// Records named timing measurements for pipeline steps.
#[derive(Default)]
pub struct Profiler {
    phases: Vec<PhaseTiming>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_phase<F, T>(&mut self, name: impl Into<String>, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let name = name.into();
        let start = Instant::now();
        let output = f();
        let duration = start.elapsed();
        debug!(phase = %name, elapsed_ms = duration.as_millis(), "phase finished");
        self.phases.push(PhaseTiming { name, duration });
        output
    }

    pub fn phases(&self) -> &[PhaseTiming] {
        &self.phases
    }

    /// Sum of every recorded phase
    pub fn total(&self) -> Duration {
        self.phases.iter().map(|phase| phase.duration).sum()
    }

    /// Aggregated time per phase name, in first-seen order
    pub fn summary(&self) -> Vec<PhaseTiming> {
        let mut summary: Vec<PhaseTiming> = Vec::new();
        for phase in &self.phases {
            match summary.iter_mut().find(|entry| entry.name == phase.name) {
                Some(entry) => entry.duration += phase.duration,
                None => summary.push(phase.clone()),
            }
        }
        summary
    }
}

#[derive(Clone, Debug)]
pub struct PhaseTiming {
    pub name: String,
    pub duration: Duration,
}
