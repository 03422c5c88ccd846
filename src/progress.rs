//! Scan progress record and its transition functions.
//!
//! Every mutation of [`ScanProgress`] goes through the methods here; the session
//! only decides *which* transition to run and performs the side effects the
//! returned [`Step`] asks for. Progress input is clamped: `checked` and `working`
//! never decrease, `total` never shrinks once known, and `checked <= total`
//! whenever `total > 0`.

use serde::Serialize;
use tracing::debug;

use crate::types::{ScanEvent, ScanStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Completed,
    Cancelled,
    Errored,
}

impl ScanPhase {
    /// A channel is (or should be) attached.
    pub fn is_active(self) -> bool {
        matches!(self, ScanPhase::Starting | ScanPhase::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanPhase::Completed | ScanPhase::Cancelled | ScanPhase::Errored
        )
    }
}

/// How the session is observing the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserveMode {
    /// Live event stream opened by this client.
    Live,
    /// Status polling of a job found already running.
    Polling,
}

/// Outcome of applying one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Applied,
    /// Applied, but a regressing counter was held at its previous value.
    Clamped,
    /// Not valid in the current phase; nothing changed.
    Ignored,
    /// The job finished; the caller releases the channel and refreshes.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub checked: u64,
    pub total: u64,
    pub working: u64,
    pub current_agent: Option<String>,
    pub started_at: Option<String>,
    pub mode: Option<ObserveMode>,
    pub error: Option<String>,
    /// Whether `error` came from a failure worth retrying (5xx, connection-level).
    pub retryable: bool,
}

impl ScanProgress {
    /// Idle/terminal -> Starting. Counters reset; a new job is about to be opened.
    pub fn begin(&mut self) -> Step {
        if self.phase.is_active() {
            return Step::Ignored;
        }
        *self = ScanProgress {
            phase: ScanPhase::Starting,
            mode: Some(ObserveMode::Live),
            ..ScanProgress::default()
        };
        Step::Applied
    }

    /// Jump straight to Running from a status report of a job already in flight.
    pub fn resume(&mut self, status: &ScanStatus) -> Step {
        if self.phase == ScanPhase::Running {
            return Step::Ignored;
        }
        *self = ScanProgress {
            phase: ScanPhase::Running,
            mode: Some(ObserveMode::Polling),
            started_at: status.started_at.clone(),
            current_agent: status.current_agent.clone(),
            ..ScanProgress::default()
        };
        self.merge(status.checked, status.total, status.working);
        Step::Applied
    }

    pub fn apply_event(&mut self, event: &ScanEvent) -> Step {
        match event {
            ScanEvent::Start { total } => {
                if self.phase != ScanPhase::Starting {
                    return Step::Ignored;
                }
                self.phase = ScanPhase::Running;
                self.total = self.total.max(*total);
                Step::Applied
            }
            ScanEvent::Progress {
                checked,
                total,
                working,
                agent_name,
                ..
            } => {
                if !self.phase.is_active() {
                    return Step::Ignored;
                }
                self.phase = ScanPhase::Running;
                if agent_name.is_some() {
                    self.current_agent = agent_name.clone();
                }
                self.merge(*checked, *total, *working)
            }
            ScanEvent::Complete {
                total,
                checked,
                working,
                ..
            } => {
                if !self.phase.is_active() {
                    return Step::Ignored;
                }
                self.merge(
                    checked.unwrap_or(self.checked),
                    total.unwrap_or(self.total),
                    working.unwrap_or(self.working),
                );
                self.finish();
                Step::Finished
            }
        }
    }

    /// One polling tick. A stopped job finishes the session.
    pub fn apply_status(&mut self, status: &ScanStatus) -> Step {
        if !self.phase.is_active() {
            return Step::Ignored;
        }
        self.merge(status.checked, status.total, status.working);
        if status.is_scanning {
            self.phase = ScanPhase::Running;
            if status.current_agent.is_some() {
                self.current_agent = status.current_agent.clone();
            }
            Step::Applied
        } else {
            self.finish();
            Step::Finished
        }
    }

    pub fn cancel(&mut self) -> Step {
        if !self.phase.is_active() {
            return Step::Ignored;
        }
        self.phase = ScanPhase::Cancelled;
        self.current_agent = None;
        Step::Applied
    }

    /// Any state -> Errored. Counters are kept: they reflect work the server did.
    pub fn fail(&mut self, message: impl Into<String>, retryable: bool) -> Step {
        self.phase = ScanPhase::Errored;
        self.current_agent = None;
        self.error = Some(message.into());
        self.retryable = retryable;
        Step::Applied
    }

    /// Terminal -> Idle once the UI has shown the outcome.
    pub fn acknowledge(&mut self) -> Step {
        if !self.phase.is_terminal() {
            return Step::Ignored;
        }
        *self = ScanProgress::default();
        Step::Applied
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return if self.phase == ScanPhase::Completed { 100 } else { 0 };
        }
        ((self.checked.min(self.total) * 100) / self.total) as u8
    }

    fn finish(&mut self) {
        self.phase = ScanPhase::Completed;
        self.current_agent = None;
    }

    fn merge(&mut self, checked: u64, total: u64, working: u64) -> Step {
        let mut step = Step::Applied;
        if total < self.total {
            step = Step::Clamped;
        }
        self.total = self.total.max(total);

        let mut next_checked = checked;
        if self.total > 0 && next_checked > self.total {
            next_checked = self.total;
            step = Step::Clamped;
        }
        if next_checked < self.checked {
            debug!(
                current = self.checked,
                incoming = checked,
                "holding checked count against regressing input"
            );
            step = Step::Clamped;
        }
        self.checked = self.checked.max(next_checked);

        if working < self.working {
            step = Step::Clamped;
        }
        self.working = self.working.max(working);
        step
    }
}
