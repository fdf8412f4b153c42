//! Normalization of runtime lifecycle actions
//!
//! Every container action resolves to re-syncing the identity, forgetting
//! it, or nothing. The sync path re-inspects current truth, so "coming up"
//! and "going down" actions share one outcome.

/// What the engine does with one lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Re-inspect and sync; `clear_ignore` first drops a stale ignore entry
    Resync { clear_ignore: bool },
    /// The container no longer exists
    Gone,
    Ignore,
}

const EVENT_TABLE: &[(&str, EventAction)] = &[
    ("create", EventAction::Resync { clear_ignore: true }),
    ("start", EventAction::Resync { clear_ignore: false }),
    ("restart", EventAction::Resync { clear_ignore: false }),
    ("unpause", EventAction::Resync { clear_ignore: false }),
    ("stop", EventAction::Resync { clear_ignore: false }),
    ("pause", EventAction::Resync { clear_ignore: false }),
    ("die", EventAction::Resync { clear_ignore: false }),
    ("kill", EventAction::Resync { clear_ignore: false }),
    ("destroy", EventAction::Gone),
    ("remove", EventAction::Gone),
];

/// Look up the outcome for a runtime action.
///
/// Actions may carry a detail suffix (`exec_start: sh`, `health_status:
/// healthy`); only the part before the colon is matched.
pub fn classify(action: &str) -> EventAction {
    let verb = action.split(':').next().unwrap_or_default().trim();
    EVENT_TABLE
        .iter()
        .find(|(name, _)| *name == verb)
        .map(|(_, outcome)| *outcome)
        .unwrap_or(EventAction::Ignore)
}
