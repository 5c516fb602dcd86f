//! Process lifecycle state machine
//!
//! Pure transition and exit-classification rules. The supervisor service
//! consults these before mutating any registry record, so every state
//! change in the system goes through one table.

use shared::ProcessRunState;

/// Whether a process may move from one run state to another.
///
/// A stopped process always passes through `starting`; there is no direct
/// `stopped` to `running` edge. Any state may collapse to `error`.
pub fn can_transition(from: ProcessRunState, to: ProcessRunState) -> bool {
    use ProcessRunState::*;
    match (from, to) {
        // Spawning begins from rest, a failure, or a scheduled restart
        (Stopped, Starting) | (Error, Starting) | (Restarting, Starting) => true,
        // Successful spawn
        (Starting, Running) => true,
        // Graceful stop or restart request
        (Running, Stopped) | (Running, Restarting) => true,
        // Child exited while still coming up
        (Starting, Stopped) | (Starting, Restarting) => true,
        // Stop issued during a restart window cancels the pending start
        (Restarting, Stopped) => true,
        // Failures are reachable from anywhere
        (_, Error) => true,
        _ => false,
    }
}

/// Why a stop was requested, recorded before the child exits.
///
/// Lets the exit handler distinguish a supervisor-initiated stop from an
/// unexpected death, since the wait future only sees the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopIntent {
    /// No stop in flight; any exit is unexpected
    #[default]
    None,
    /// Operator asked for a stop; exit lands in `stopped`
    Stop,
    /// Operator asked for a restart; exit feeds the restart path
    Restart,
}

/// What to do after a child process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Settle in `stopped`
    Stopped,
    /// Settle in `error`, recording the exit code
    Failed,
    /// Schedule a respawn
    Restart,
}

/// Classify a child exit given the recorded intent and descriptor policy.
///
/// Auto-restart covers every unexpected exit, clean or not; only a
/// deliberate stop suppresses it.
pub fn decide_exit(
    intent: StopIntent,
    auto_restart: bool,
    exit_code: Option<i32>,
) -> ExitDecision {
    match intent {
        StopIntent::Stop => ExitDecision::Stopped,
        StopIntent::Restart => ExitDecision::Restart,
        StopIntent::None => {
            if auto_restart {
                ExitDecision::Restart
            } else if exit_code == Some(0) {
                ExitDecision::Stopped
            } else {
                ExitDecision::Failed
            }
        }
    }
}
