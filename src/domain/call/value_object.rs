//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Inbound call to a business number
    Inbound,
    /// Outbound call placed by the agent
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inbound" | "incoming" => Some(CallDirection::Inbound),
            "outbound" | "outgoing" => Some(CallDirection::Outbound),
            _ => None,
        }
    }
}

impl Default for CallDirection {
    fn default() -> Self {
        CallDirection::Inbound
    }
}

/// Call session state
///
/// ```text
/// INITIATED -> RINGING -> ANSWERED -> STREAMING <-> ON_HOLD
/// ANSWERED | STREAMING | ON_HOLD -> COMPLETED
/// any non-terminal -> BLOCKED -> COMPLETED
/// any non-terminal -> FAILED  -> COMPLETED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    /// First event seen for the call
    Initiated,
    /// Callee is being alerted
    Ringing,
    /// Call has been answered, bridge not yet running
    Answered,
    /// Audio is relayed to the speech pipeline
    Streaming,
    /// Audio relay paused
    OnHold,
    /// Admission denied, decline sequence issued
    Blocked,
    /// Carrier or pipeline failure
    Failed,
    /// Call closed out
    Completed,
}

impl CallState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: &CallState) -> bool {
        use CallState::*;

        match (self, new_state) {
            // Nothing leaves the terminal state
            (Completed, _) => false,

            // Denial and failure are reachable from any non-terminal state
            (Blocked, Completed) | (Failed, Completed) => true,
            (Blocked, _) | (Failed, _) => false,
            (_, Blocked) | (_, Failed) => true,

            (Initiated, Ringing) => true,
            // Inbound legs answered by us never report ringing
            (Initiated, Answered) => true,
            (Ringing, Answered) => true,

            (Answered, Streaming) => true,
            (Streaming, OnHold) => true,
            (OnHold, Streaming) => true,

            (Answered, Completed) | (Streaming, Completed) | (OnHold, Completed) => true,
            // Caller abandoned before answer
            (Initiated, Completed) | (Ringing, Completed) => true,

            _ => false,
        }
    }

    /// States the given target may be reached from
    pub fn sources_of(target: CallState) -> Vec<CallState> {
        CallState::all()
            .into_iter()
            .filter(|s| s.can_transition_to(&target))
            .collect()
    }

    pub fn all() -> [CallState; 8] {
        use CallState::*;
        [
            Initiated, Ringing, Answered, Streaming, OnHold, Blocked, Failed, Completed,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Completed)
    }

    /// Audio is (or may be) flowing to the pipeline
    pub fn is_live(&self) -> bool {
        matches!(self, CallState::Streaming | CallState::OnHold)
    }

    /// Bridge tasks stop once the call reaches one of these
    pub fn ends_bridge(&self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed | CallState::Blocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Initiated => "INITIATED",
            CallState::Ringing => "RINGING",
            CallState::Answered => "ANSWERED",
            CallState::Streaming => "STREAMING",
            CallState::OnHold => "ON_HOLD",
            CallState::Blocked => "BLOCKED",
            CallState::Failed => "FAILED",
            CallState::Completed => "COMPLETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        CallState::all().into_iter().find(|state| state.as_str() == s)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
