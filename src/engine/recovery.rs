//! Session recovery logic
//!
//! Decides which session a turn starts from, given what the store holds.

use super::traits::SessionRef;
use crate::flow::FlowGraph;
use crate::session::{Session, SnapshotError, StoredSession, SCHEMA_VERSION};

/// Result of loading a session
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryDecision {
    /// The session to run the turn on
    pub session: Session,
    /// Reason for the decision (for logging)
    pub reason: RecoveryReason,
}

/// Why we made a particular recovery decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryReason {
    /// Nothing stored for this id
    NewSession,
    /// Stored session resumed as is
    Resumed,
    /// Store or snapshot written under another schema; restarted at root
    VersionMismatch { stored: String },
    /// Snapshot could not be decoded; restarted at root
    CorruptSnapshot(String),
    /// Stored state no longer exists in the graph; context kept, state reset to root
    UnknownState { state: String },
}

impl RecoveryReason {
    /// Whether the turn runs on a brand new session
    pub fn is_fresh(&self) -> bool {
        matches!(
            self,
            Self::NewSession | Self::VersionMismatch { .. } | Self::CorruptSnapshot(_)
        )
    }
}

impl RecoveryDecision {
    fn fresh(
        address: &SessionRef,
        graph: &FlowGraph,
        max_depth: usize,
        reason: RecoveryReason,
    ) -> Self {
        Self {
            session: Session::new(
                address.session_id.as_str(),
                address.channel.as_str(),
                graph.root(),
                max_depth,
            ),
            reason,
        }
    }
}

/// Pick the session a turn starts from.
///
/// `store_version` is the process-wide schema marker of the store; a
/// mismatch there discards every stored session, not only this one.
pub fn recover(
    address: &SessionRef,
    stored: Option<&StoredSession>,
    store_version: Option<&str>,
    graph: &FlowGraph,
    max_depth: usize,
) -> RecoveryDecision {
    let Some(stored) = stored else {
        return RecoveryDecision::fresh(
            address,
            graph,
            max_depth,
            RecoveryReason::NewSession,
        );
    };

    if store_version != Some(SCHEMA_VERSION) {
        return RecoveryDecision::fresh(
            address,
            graph,
            max_depth,
            RecoveryReason::VersionMismatch {
                stored: store_version.unwrap_or_default().to_string(),
            },
        );
    }

    let mut session = match Session::from_stored(stored, max_depth) {
        Ok(session) => session,
        Err(SnapshotError::VersionMismatch { stored }) => {
            return RecoveryDecision::fresh(
                address,
                graph,
                max_depth,
                RecoveryReason::VersionMismatch { stored },
            )
        }
        Err(SnapshotError::Corrupt(e)) => {
            return RecoveryDecision::fresh(
                address,
                graph,
                max_depth,
                RecoveryReason::CorruptSnapshot(e),
            )
        }
    };
    if graph.get_state(&session.state_name).is_none() {
        let state = std::mem::replace(&mut session.state_name, graph.root().to_string());
        session.context.set_state(graph.root());
        return RecoveryDecision {
            session,
            reason: RecoveryReason::UnknownState { state },
        };
    }

    RecoveryDecision {
        session,
        reason: RecoveryReason::Resumed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{ActionRegistry, FlowDef, FlowSetDefinition, StateDef};

    fn graph() -> FlowGraph {
        let def = FlowSetDefinition::new().flow(
            "default",
            FlowDef::new()
                .state("root", StateDef::new())
                .state("ask_name", StateDef::new()),
        );
        FlowGraph::build(&def, &ActionRegistry::new(), "default.root").unwrap()
    }

    fn address() -> SessionRef {
        SessionRef::new("web", "s1")
    }

    fn stored(state: &str) -> StoredSession {
        let mut session = Session::new("s1", "web", state, 30);
        session.context.advance();
        session.context.set_value("name", "Ada");
        session.to_stored().unwrap()
    }

    #[test]
    fn test_nothing_stored_is_new_session() {
        let d = recover(&address(), None, None, &graph(), 30);
        assert_eq!(d.reason, RecoveryReason::NewSession);
        assert_eq!(d.session.state_name, "default.root");
        assert_eq!(d.session.context.counter(), 0);
        assert!(d.reason.is_fresh());
    }

    #[test]
    fn test_matching_version_resumes() {
        let s = stored("default.ask_name");
        let d = recover(&address(), Some(&s), Some(SCHEMA_VERSION), &graph(), 30);
        assert_eq!(d.reason, RecoveryReason::Resumed);
        assert_eq!(d.session.state_name, "default.ask_name");
        assert_eq!(d.session.context.counter(), 1);
    }

    #[test]
    fn test_store_marker_mismatch_restarts_at_root() {
        let s = stored("default.ask_name");
        let d = recover(&address(), Some(&s), Some("dialog/0"), &graph(), 30);
        assert_eq!(
            d.reason,
            RecoveryReason::VersionMismatch {
                stored: "dialog/0".into()
            }
        );
        assert_eq!(d.session.state_name, "default.root");
        assert!(!d.session.context.contains("name"));
    }

    #[test]
    fn test_corrupt_blob_restarts_at_root() {
        let mut s = stored("default.ask_name");
        s.context_blob = "{broken".into();
        let d = recover(&address(), Some(&s), Some(SCHEMA_VERSION), &graph(), 30);
        assert!(matches!(d.reason, RecoveryReason::CorruptSnapshot(_)));
        assert_eq!(d.session.state_name, "default.root");
    }

    #[test]
    fn test_removed_state_keeps_context() {
        let s = stored("old.flow_state");
        let d = recover(&address(), Some(&s), Some(SCHEMA_VERSION), &graph(), 30);
        assert_eq!(
            d.reason,
            RecoveryReason::UnknownState {
                state: "old.flow_state".into()
            }
        );
        assert_eq!(d.session.state_name, "default.root");
        assert_eq!(d.session.context.state(), Some("default.root"));
        assert!(d.session.context.contains("name"));
        assert!(!d.reason.is_fresh());
    }
}
