//! Link State Machine
//!
//! Defines the legal connection state transitions. The supervisor drives a
//! [`LinkStateMachine`] under its lock so every observed `StateChanged`
//! sequence is a path in this graph:
//!
//! ```text
//!   None ──start──▶ Listening ──dial / accept──▶ Connecting ──promote──▶ Connected
//!                      ▲                            │   ▲                    │
//!                      └──────── dial failed ───────┘   └────── dial ────────┤
//!                      └──────────────────── link lost ──────────────────────┘
//!   any ──stop──▶ None
//! ```

use crate::ConnectionState;

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// `start()` on a fresh manager
    Started,
    /// `connect(address)` spawned a dialer
    DialRequested,
    /// The listener produced a port that is about to be promoted
    PortAccepted,
    /// A port was promoted and a link pump owns it
    Promoted,
    /// The dialer could not open a port
    DialFailed,
    /// The link pump hit an I/O error
    LinkLost,
    /// Permanent shutdown
    Stopped,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// State changed and observers must be told
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Event accepted but the state is the same
    Unchanged(ConnectionState),
    /// Event is not legal from the current state
    Invalid {
        from: ConnectionState,
        event: LinkEvent,
    },
}

/// Tracks the current link state and refuses illegal edges
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current_state: ConnectionState,
}

impl LinkStateMachine {
    /// Create a new state machine in `None`
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) if state == self.current_state => TransitionResult::Unchanged(state),
            Some(state) => {
                let from = self.current_state;
                self.current_state = state;
                TransitionResult::Changed { from, to: state }
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn get_next_state(&self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self.current_state, event) {
            (None, Started) => Some(Listening),
            (Listening | Connecting | Connected, Started) => Some(self.current_state),

            (Listening | Connecting | Connected, DialRequested) => Some(Connecting),

            // A connecting dialer and the listener race; either may win
            (Listening | Connecting, PortAccepted) => Some(Connecting),

            (Connecting, Promoted) => Some(Connected),

            (Connecting, DialFailed) => Some(Listening),
            (Connected, LinkLost) => Some(Listening),

            (_, Stopped) => Some(None),

            _ => Option::None,
        }
    }
}

/// Check if an observed `StateChanged` edge is legal
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    match (from, to) {
        (_, None) => from != None,
        (None, Listening) => true,
        (Listening, Connecting) => true,
        (Connecting, Connected) => true,
        (Connecting, Listening) => true,
        (Connected, Listening) => true,
        (Connected, Connecting) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_dial_and_lose_link() {
        let mut fsm = LinkStateMachine::new();
        assert_eq!(fsm.state(), None);

        let result = fsm.process_event(LinkEvent::Started);
        assert_eq!(result, TransitionResult::Changed { from: None, to: Listening });

        let result = fsm.process_event(LinkEvent::DialRequested);
        assert_eq!(result, TransitionResult::Changed { from: Listening, to: Connecting });

        let result = fsm.process_event(LinkEvent::Promoted);
        assert_eq!(result, TransitionResult::Changed { from: Connecting, to: Connected });

        let result = fsm.process_event(LinkEvent::LinkLost);
        assert_eq!(result, TransitionResult::Changed { from: Connected, to: Listening });
    }

    #[test]
    fn test_redirect_while_connecting_is_unchanged() {
        let mut fsm = LinkStateMachine::new();
        fsm.process_event(LinkEvent::Started);
        fsm.process_event(LinkEvent::DialRequested);

        let result = fsm.process_event(LinkEvent::DialRequested);
        assert_eq!(result, TransitionResult::Unchanged(Connecting));
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut fsm = LinkStateMachine::new();
        fsm.process_event(LinkEvent::Started);
        assert_eq!(
            fsm.process_event(LinkEvent::Started),
            TransitionResult::Unchanged(Listening)
        );
    }

    #[test]
    fn test_invalid_transition() {
        let mut fsm = LinkStateMachine::new();

        // Can't promote before anything is listening or dialing
        let result = fsm.process_event(LinkEvent::Promoted);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), None);

        // Can't lose a link that was never connected
        fsm.process_event(LinkEvent::Started);
        let result = fsm.process_event(LinkEvent::LinkLost);
        assert!(matches!(result, TransitionResult::Invalid { from: Listening, .. }));
    }

    #[test]
    fn test_stop_from_any_state() {
        for event in [LinkEvent::Started, LinkEvent::DialRequested, LinkEvent::Promoted] {
            let mut fsm = LinkStateMachine::new();
            fsm.process_event(LinkEvent::Started);
            fsm.process_event(event);
            let from = fsm.state();
            assert_eq!(
                fsm.process_event(LinkEvent::Stopped),
                TransitionResult::Changed { from, to: None }
            );
        }
    }

    #[test]
    fn test_valid_transition_graph() {
        assert!(is_valid_transition(None, Listening));
        assert!(is_valid_transition(Listening, Connecting));
        assert!(is_valid_transition(Connected, Listening));
        assert!(is_valid_transition(Connected, None));
        assert!(!is_valid_transition(None, None));
        assert!(!is_valid_transition(Listening, Connected));
        assert!(!is_valid_transition(Connected, Connected));
        assert!(!is_valid_transition(None, Connecting));
    }
}
