//! Component lifecycle state machine.
//!
//! Every component carries one `StateMachine`. The states and the transitions between
//! them form a closed table; firing a transition whose source does not match the current
//! state is rejected and leaves the machine untouched.
//!
//! # State Machine
//!
//! ```text
//!          Init            Enable            Run
//!   Off ─────────> Standby ───────> Idle ─────────> Running
//!    ▲               │  ▲            │  ▲ ▲            │ │
//!    └───── Stop ────┘  └─ Disable ──┘  │ └─ StopRun ──┘ │
//!                                  Err2 │                │ Err
//!                                   │   │ Recover        │
//!                                   ▼   │                ▼
//!                                  Error ◄───────────────┘
//! ```
//!
//! Hooks run synchronously inside [`StateMachine::fire`] in the order
//! `on_exit(source)`, `on_transition(t)`, state update, `on_enter(target)`.
//! The machine is not internally synchronized: callers serialize transitions.

use crate::error::{AppResult, DaoError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Constructed, nothing loaded
    Off,
    /// Static configuration loaded
    Standby,
    /// Dynamic configuration loaded, update thread live
    Idle,
    /// Processing workload running
    Running,
    /// Faulted; recoverable back to Idle
    Error,
}

impl State {
    /// All states, in declaration order.
    pub const ALL: [State; 5] = [
        State::Off,
        State::Standby,
        State::Idle,
        State::Running,
        State::Error,
    ];

    /// Name reported over the command channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Off => "Off",
            State::Standby => "Standby",
            State::Idle => "Idle",
            State::Running => "Running",
            State::Error => "Error",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, directed edge between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// `Off` to `Standby`
    Init,
    /// `Standby` to `Off`
    Stop,
    /// `Standby` to `Idle`
    Enable,
    /// `Idle` to `Standby`
    Disable,
    /// `Idle` to `Running`
    Run,
    /// `Running` to `Idle`
    StopRun,
    /// `Running` to `Error`
    Err,
    /// `Idle` to `Error`
    Err2,
    /// `Error` to `Idle`
    Recover,
}

/// (transition, source, target)
const TRANSITION_TABLE: [(Transition, State, State); 9] = [
    (Transition::Init, State::Off, State::Standby),
    (Transition::Stop, State::Standby, State::Off),
    (Transition::Enable, State::Standby, State::Idle),
    (Transition::Disable, State::Idle, State::Standby),
    (Transition::Run, State::Idle, State::Running),
    (Transition::StopRun, State::Running, State::Idle),
    (Transition::Err, State::Running, State::Error),
    (Transition::Err2, State::Idle, State::Error),
    (Transition::Recover, State::Error, State::Idle),
];

impl Transition {
    /// All transitions, in declaration order.
    pub const ALL: [Transition; 9] = [
        Transition::Init,
        Transition::Stop,
        Transition::Enable,
        Transition::Disable,
        Transition::Run,
        Transition::StopRun,
        Transition::Err,
        Transition::Err2,
        Transition::Recover,
    ];

    fn edge(&self) -> (State, State) {
        // The table covers every variant.
        let (_, source, target) = TRANSITION_TABLE[*self as usize];
        (source, target)
    }

    /// The only state this transition may be fired from.
    pub fn source(&self) -> State {
        self.edge().0
    }

    /// The state this transition leads to.
    pub fn target(&self) -> State {
        self.edge().1
    }

    /// Name used on the command channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Init => "Init",
            Transition::Stop => "Stop",
            Transition::Enable => "Enable",
            Transition::Disable => "Disable",
            Transition::Run => "Run",
            Transition::StopRun => "StopRun",
            Transition::Err => "Err",
            Transition::Err2 => "Err2",
            Transition::Recover => "Recover",
        }
    }

    /// Parse the transition names accepted by the EXEC command.
    ///
    /// `Idle` is the remote name of `StopRun`. Error transitions are not reachable
    /// remotely.
    pub fn from_exec_name(name: &str) -> Option<Self> {
        match name {
            "Init" => Some(Transition::Init),
            "Stop" => Some(Transition::Stop),
            "Enable" => Some(Transition::Enable),
            "Disable" => Some(Transition::Disable),
            "Run" => Some(Transition::Run),
            "Idle" => Some(Transition::StopRun),
            "Recover" => Some(Transition::Recover),
            _ => None,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = DaoError;

    fn from_str(s: &str) -> Result<Self, DaoError> {
        Transition::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DaoError::UnknownTransition(s.to_string()))
    }
}

/// Callbacks invoked while a transition is applied.
///
/// All hooks default to no-ops. A failing `on_exit` or `on_transition` aborts the
/// transition with the state unchanged; a failing `on_enter` happens after the state
/// has already moved to the target.
pub trait LifecycleHooks {
    /// Called first, with the source state.
    fn on_exit(&mut self, _state: State) -> AppResult<()> {
        Ok(())
    }

    /// Called second.
    fn on_transition(&mut self, _transition: Transition) -> AppResult<()> {
        Ok(())
    }

    /// Called last, with the target state already current.
    fn on_enter(&mut self, _state: State) -> AppResult<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl LifecycleHooks for NoHooks {}

/// The current lifecycle state plus the transition rules.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: State,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// A machine in the initial `Off` state.
    pub fn new() -> Self {
        Self { state: State::Off }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether `transition` is legal from the current state.
    pub fn can_fire(&self, transition: Transition) -> bool {
        transition.source() == self.state
    }

    /// Apply `transition`, running `hooks` around the state change.
    ///
    /// Returns the new state.
    pub fn fire<H>(&mut self, transition: Transition, hooks: &mut H) -> AppResult<State>
    where
        H: LifecycleHooks + ?Sized,
    {
        if !self.can_fire(transition) {
            return Err(DaoError::InvalidTransition {
                state: self.state,
                transition,
            });
        }

        let target = transition.target();
        tracing::trace!(from = %self.state, to = %target, %transition, "transition");

        hooks.on_exit(self.state)?;
        hooks.on_transition(transition)?;
        self.state = target;
        hooks.on_enter(target)?;

        Ok(target)
    }
}
