//! Element states and transitions.

use std::fmt;

use crate::error::StateChangeError;

/// Element state, totally ordered from NULL to PLAYING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    /// No resources allocated.
    #[default]
    Null,
    /// Resources acquired (device open, decoder context created).
    Ready,
    /// Pads active, data prerolled, clock stopped.
    Paused,
    /// Clock running, data flowing.
    Playing,
}

impl State {
    /// The state one step from `self` toward `target`.
    pub fn next_toward(self, target: State) -> State {
        use std::cmp::Ordering::*;
        match self.cmp(&target) {
            Less => self.up(),
            Greater => self.down(),
            Equal => self,
        }
    }

    fn up(self) -> State {
        match self {
            State::Null => State::Ready,
            State::Ready => State::Paused,
            State::Paused | State::Playing => State::Playing,
        }
    }

    fn down(self) -> State {
        match self {
            State::Playing => State::Paused,
            State::Paused => State::Ready,
            State::Ready | State::Null => State::Null,
        }
    }

    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            State::Null => "null",
            State::Ready => "ready",
            State::Paused => "paused",
            State::Playing => "playing",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single-step transition between adjacent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// NULL → READY.
    NullToReady,
    /// READY → PAUSED.
    ReadyToPaused,
    /// PAUSED → PLAYING.
    PausedToPlaying,
    /// PLAYING → PAUSED.
    PlayingToPaused,
    /// PAUSED → READY.
    PausedToReady,
    /// READY → NULL.
    ReadyToNull,
}

impl StateChange {
    /// The transition from `current` to `next`, if they are adjacent.
    pub fn new(current: State, next: State) -> Option<StateChange> {
        use State::*;
        match (current, next) {
            (Null, Ready) => Some(StateChange::NullToReady),
            (Ready, Paused) => Some(StateChange::ReadyToPaused),
            (Paused, Playing) => Some(StateChange::PausedToPlaying),
            (Playing, Paused) => Some(StateChange::PlayingToPaused),
            (Paused, Ready) => Some(StateChange::PausedToReady),
            (Ready, Null) => Some(StateChange::ReadyToNull),
            _ => None,
        }
    }

    /// State before the transition.
    pub fn current(self) -> State {
        match self {
            StateChange::NullToReady => State::Null,
            StateChange::ReadyToPaused | StateChange::ReadyToNull => State::Ready,
            StateChange::PausedToPlaying | StateChange::PausedToReady => State::Paused,
            StateChange::PlayingToPaused => State::Playing,
        }
    }

    /// State after the transition.
    pub fn next(self) -> State {
        match self {
            StateChange::ReadyToNull => State::Null,
            StateChange::NullToReady | StateChange::PausedToReady => State::Ready,
            StateChange::ReadyToPaused | StateChange::PlayingToPaused => State::Paused,
            StateChange::PausedToPlaying => State::Playing,
        }
    }

    /// Activation (true) or deactivation (false).
    pub fn is_upward(self) -> bool {
        self.next() > self.current()
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.current(), self.next())
    }
}

/// Non-failure outcomes of a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChangeSuccess {
    /// The state was reached synchronously.
    Success,
    /// The state will be reached later; completion is announced with an
    /// `AsyncDone` bus message.
    Async,
    /// Reached, but the element cannot preroll (live source).
    NoPreroll,
}

/// Outcome of a state transition.
pub type StateChangeResult = Result<StateChangeSuccess, StateChangeError>;
