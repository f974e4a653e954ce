use std::path::Path;

/// Ticks between two "still running" reports
pub const REPORT_EVERY_TICKS: u32 = 100;
/// Ticks after which surviving clones are killed
pub const KILL_AFTER_TICKS: u32 = 20_000;

/// Liveness of a clone process as seen by one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited { success: bool },
}

/// A clone running out of process.
pub trait CloneProcess {
    /// Check liveness without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    fn poll(&mut self) -> std::io::Result<ProcessStatus>;

    /// Kill the process together with every process it started.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be delivered.
    fn kill_tree(&mut self) -> std::io::Result<()>;
}

/// Starts clone processes.
pub trait CloneSpawner {
    type Process: CloneProcess;

    /// Start cloning `url` into `target` and return without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn spawn(&self, url: &str, target: &Path) -> std::io::Result<Self::Process>;
}

/// Lifecycle of one clone task: `Running` ends in `Exited` or `Killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Exited { success: bool },
    Killed,
}

impl TaskState {
    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

/// What the hang watchdog wants done after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    Wait,
    /// Log the repositories still cloning
    Report,
    /// Kill every surviving clone
    Kill,
}

/// Counts poll ticks while waiting for the last clones to finish.
#[derive(Debug, Clone)]
pub struct Watchdog {
    ticks: u32,
    report_every: u32,
    kill_after: u32,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(REPORT_EVERY_TICKS, KILL_AFTER_TICKS)
    }
}

impl Watchdog {
    #[must_use]
    pub fn new(report_every: u32, kill_after: u32) -> Self {
        Self {
            ticks: 0,
            report_every: report_every.max(1),
            kill_after,
        }
    }

    /// Advance one tick. Every `report_every` ticks the watchdog asks for a
    /// report, or for a kill once `kill_after` ticks have passed.
    pub fn tick(&mut self) -> WatchdogAction {
        self.ticks = self.ticks.saturating_add(1);
        if self.ticks.checked_rem(self.report_every) != Some(0) {
            WatchdogAction::Wait
        } else if self.ticks < self.kill_after {
            WatchdogAction::Report
        } else {
            WatchdogAction::Kill
        }
    }

    #[must_use]
    pub fn ticks(&self) -> u32 {
        self.ticks
    }
}
