//! Controller page-stack state machine, decoupled from any widget toolkit.
//!
//! Pushing a leaf page for a sub-flow, escaping pops one level, and
//! escaping from a job's detail view lands on the job list rather than all
//! the way back to the connection list. Rendering each state is out of
//! scope; `main.rs` only needs the transition, not a layout.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    ConnectionList,
    NewConnection,
    Shell,
    RunAll,
    Import,
    JobList,
    JobDetail,
}

/// A user action (or an internal completion signal) driving one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Interact,
    RunAll,
    Import,
    Jobs,
    SelectJob,
    Completed,
    Escape,
}

impl ControllerState {
    /// Advance to the next state for `action`. `Escape` is the only action
    /// whose destination depends on where it was fired from; every other
    /// action pushes a fixed leaf regardless of the current state.
    pub fn apply(self, action: Action) -> ControllerState {
        match action {
            Action::Escape => match self {
                ControllerState::JobDetail => ControllerState::JobList,
                _ => ControllerState::ConnectionList,
            },
            Action::Add => ControllerState::NewConnection,
            Action::Interact => ControllerState::Shell,
            Action::RunAll => ControllerState::RunAll,
            Action::Import => ControllerState::Import,
            Action::Jobs => ControllerState::JobList,
            Action::SelectJob => ControllerState::JobDetail,
            Action::Completed => ControllerState::ConnectionList,
        }
    }
}
