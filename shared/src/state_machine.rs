//! Command state derivation
//!
//! A command's state is never stored. It is computed from the start time,
//! stop time and exit code every time a status is produced, so the state and
//! the timestamps can never disagree.

use crate::State;

/// Derive the lifecycle state from `(start_time, stop_time, exit_code)`
///
/// | start | stop | exit | state    |
/// |-------|------|------|----------|
/// | 0     | 0    | any  | Pending  |
/// | >0    | 0    | any  | Running  |
/// | >0    | >0   | 0    | Complete |
/// | >0    | >0   | ≠0   | Fail     |
///
/// Any other combination is `Unknown`.
pub fn derive_state(start_time: i64, stop_time: i64, exit_code: i64) -> State {
    match (start_time, stop_time) {
        (0, 0) => State::Pending,
        (start, 0) if start > 0 => State::Running,
        (start, stop) if start > 0 && stop > 0 => {
            if exit_code == 0 {
                State::Complete
            } else {
                State::Fail
            }
        }
        _ => State::Unknown,
    }
}

/// True once a command can no longer change state
pub fn is_terminal(state: State) -> bool {
    matches!(state, State::Complete | State::Fail)
}
