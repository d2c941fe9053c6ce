//! Scan lifecycle and the handle used to steer a running scan.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    NotStarted,
    Starting,
    Running,
    Finishing,
    Aborting,
    CleaningUp,
    Finished,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::NotStarted => "NOT_STARTED",
            ScanStatus::Starting => "STARTING",
            ScanStatus::Running => "RUNNING",
            ScanStatus::Finishing => "FINISHING",
            ScanStatus::Aborting => "ABORTING",
            ScanStatus::CleaningUp => "CLEANING_UP",
            ScanStatus::Finished => "FINISHED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Finished)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_become(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        match (self, next) {
            (Finished, _) => false,
            (_, CleaningUp) => *self != CleaningUp,
            (NotStarted, Starting) => true,
            (Starting, Running) => true,
            (Running, Finishing) | (Finishing, Running) => true,
            (Starting | Running | Finishing, Aborting) => true,
            (CleaningUp, Finished) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct ControlState {
    status: ScanStatus,
    history: Vec<ScanStatus>,
    abort_reason: Option<String>,
}

/// Shared view of a scan's status. Cheap to clone; every clone sees the same scan.
#[derive(Debug, Clone)]
pub struct ScanControl {
    state: Arc<Mutex<ControlState>>,
}

impl Default for ScanControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanControl {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ControlState {
                status: ScanStatus::NotStarted,
                history: vec![ScanStatus::NotStarted],
                abort_reason: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> ScanStatus {
        self.lock().status
    }

    /// Every status the scan has been in, oldest first.
    pub fn history(&self) -> Vec<ScanStatus> {
        self.lock().history.clone()
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.lock().abort_reason.clone()
    }

    /// Moves to `next`. Illegal transitions are refused and logged.
    pub fn set_status(&self, next: ScanStatus) -> bool {
        let mut state = self.lock();
        if state.status == next {
            return true;
        }
        if !state.status.can_become(next) {
            warn!("Refusing to change scan status from {} to {next}", state.status);
            return false;
        }
        debug!("Scan status: {} -> {next}", state.status);
        state.status = next;
        state.history.push(next);
        true
    }

    /// Asks the scan to stop without waiting for modules to go quiet.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let aborted = self.set_status(ScanStatus::Aborting);
        if aborted {
            info!("Aborting scan: {reason}");
            self.lock().abort_reason.get_or_insert(reason);
        }
        aborted
    }

    /// Operator interrupt (Ctrl-C). Treated as an abort.
    pub fn interrupt(&self) -> bool {
        self.abort("interrupted by user")
    }

    pub fn is_aborting(&self) -> bool {
        self.status() == ScanStatus::Aborting
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use super::ScanStatus::*;

    #[test]
    fn happy_path() {
        let control = ScanControl::new();
        for next in [Starting, Running, Finishing, Running, CleaningUp, Finished] {
            assert!(control.set_status(next), "{next}");
        }
        assert_eq!(
            control.history(),
            vec![NotStarted, Starting, Running, Finishing, Running, CleaningUp, Finished]
        );
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let control = ScanControl::new();
        assert!(!control.set_status(Running));
        assert!(!control.abort("too early"));
        assert_eq!(control.status(), NotStarted);

        assert!(control.set_status(CleaningUp));
        assert!(control.set_status(Finished));
        assert!(!control.set_status(Starting));
        assert!(!control.set_status(CleaningUp));
    }

    #[test]
    fn interrupt_aborts_and_keeps_the_first_reason() {
        let control = ScanControl::new();
        control.set_status(Starting);
        control.set_status(Running);
        assert!(control.interrupt());
        assert!(control.is_aborting());
        assert!(control.abort("second"));
        assert_eq!(control.abort_reason().as_deref(), Some("interrupted by user"));
        assert!(!control.set_status(Running));
        assert!(control.set_status(CleaningUp));
    }
}
