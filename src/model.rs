//! Core data model.
//!
//! A work item is one numerically addressed certificate. Its lifecycle state
//! lives in the shared queue table; everything extracted from a fetched page
//! (`Classification`) is transient and consumed by the media pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Cert Id
// ---------------------------------------------------------------------------

/// Numeric key addressing one unit of remote content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CertId(pub i64);

impl CertId {
    /// The adjacent identifier in chain direction.
    pub fn succ(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for CertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A row of the shared queue table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub cert_id: CertId,
    pub status: Status,
    /// Worker identity holding the claim, while non-terminal.
    pub claimed_by: Option<String>,
    /// Timestamp of the last transition; drives the requeue sweep.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Known identifier, not yet claimed.
    Pending,
    /// Exclusively claimed by one worker.
    InProgress,
    /// Media archived. Terminal.
    Done,
    /// Deliberately not harvested (ineligible content). Terminal.
    Skipped,
    /// Transient processing failure; recoverable via the requeue sweep.
    Error,
    /// Page failed to load or showed the wrong cert; recoverable.
    Stale,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, Done)
                | (InProgress, Skipped)
                | (InProgress, Error)
                | (InProgress, Stale)
                | (Error, Pending)      // requeue sweep
                | (Stale, Pending)      // requeue sweep
                | (InProgress, Pending) // orphan recovery, same sweep
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Skipped)
    }

    /// Eligible for the requeue sweep?
    pub fn is_recoverable(self) -> bool {
        matches!(self, Status::Error | Status::Stale)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Done => "done",
            Status::Skipped => "skipped",
            Status::Error => "error",
            Status::Stale => "stale",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "in_progress" => Ok(Status::InProgress),
            "done" => Ok(Status::Done),
            "skipped" => Ok(Status::Skipped),
            "error" => Ok(Status::Error),
            "stale" => Ok(Status::Stale),
            other => Err(crate::error::Error::Other(format!(
                "unknown work item status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-item outcome
// ---------------------------------------------------------------------------

/// What processing one claimed identifier concluded. Reported to the queue
/// store via `mark` before any worker state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// At least one side's media completed the pipeline.
    Done,
    /// Ineligible content; deliberate skip, not an error.
    Skipped,
    /// Page load failure or wrong page rendered; counts toward cooldown.
    Stale,
    /// Transient network/parse/upload failure; counts toward cooldown.
    Error,
}

impl ItemOutcome {
    pub fn status(self) -> Status {
        match self {
            ItemOutcome::Done => Status::Done,
            ItemOutcome::Skipped => Status::Skipped,
            ItemOutcome::Stale => Status::Stale,
            ItemOutcome::Error => Status::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Extracted record
// ---------------------------------------------------------------------------

/// Which physical side of the card a media reference shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Front => "front",
            Side::Back => "back",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Certification grade, 1–10 when detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grade(Option<u8>);

impl Grade {
    pub fn known(n: u8) -> Self {
        Self(Some(n))
    }

    pub fn unknown() -> Self {
        Self(None)
    }

    pub fn value(self) -> Option<u8> {
        self.0
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(n) => write!(f, "{n}"),
            None => write!(f, "unknown"),
        }
    }
}

/// One embedded image reference, tagged by side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub side: Side,
    pub url: String,
}

/// Why a fetched page was judged ineligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// Not the target franchise at all.
    NonTarget,
    /// Japanese/Asian/Chinese variant; these cluster, so they break chains.
    ExcludedLocale,
}

impl std::fmt::Display for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Exclusion::NonTarget => "non-target",
            Exclusion::ExcludedLocale => "excluded-locale",
        };
        write!(f, "{s}")
    }
}

/// Everything the classifier extracts from one fetched page. Transient:
/// consumed immediately by the media pipeline, never persisted.
#[derive(Debug, Clone)]
pub struct Classification {
    pub exclusion: Option<Exclusion>,
    pub grade: Grade,
    pub media: Vec<MediaRef>,
}

impl Classification {
    /// Eligible iff no exclusion applied.
    pub fn eligible(&self) -> bool {
        self.exclusion.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_mark_leaves_in_progress() {
        use Status::*;
        for to in [Done, Skipped, Error, Stale] {
            assert!(InProgress.can_transition_to(to));
        }
        assert!(!Pending.can_transition_to(Done));
        assert!(!Pending.can_transition_to(Skipped));
    }

    #[test]
    fn recoverable_statuses_requeue_terminal_do_not() {
        use Status::*;
        assert!(Error.can_transition_to(Pending));
        assert!(Stale.can_transition_to(Pending));
        assert!(InProgress.can_transition_to(Pending));
        assert!(!Done.can_transition_to(Pending));
        assert!(!Skipped.can_transition_to(Pending));
    }

    #[test]
    fn status_round_trips_through_text() {
        use Status::*;
        for s in [Pending, InProgress, Done, Skipped, Error, Stale] {
            let parsed: Status = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
        assert!("queued".parse::<Status>().is_err());
    }

    #[test]
    fn grade_displays_unknown_when_undetected() {
        assert_eq!(Grade::known(10).to_string(), "10");
        assert_eq!(Grade::unknown().to_string(), "unknown");
    }
}
