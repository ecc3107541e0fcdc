/// Item status definitions for tracking an item through the pipeline
///
/// The core only cares about whether an item failed or still needs to loop
/// back through the reactor; the stage workers drive the rest.
use std::fmt;

/// Represents where an item currently is in its pipeline journey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    // ===== Active States =====
    /// Item was just created and has not been preprocessed
    Fresh,

    /// URL was normalized and accepted by the preprocessor
    Preprocessed,

    /// Content was fetched and handed to the archive writer
    Archived,

    /// Fetch answered with a redirect; the item must be fed back
    Redirected,

    // ===== Terminal States =====
    /// Item went through every stage successfully
    Completed,

    /// Item failed somewhere along the way (see `Item::error`)
    Failed,
}

impl ItemStatus {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if this is an active state (item may still be processed)
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if the item failed
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns true if the finisher must feed the item back to the reactor
    pub fn needs_feedback(&self) -> bool {
        matches!(self, Self::Redirected)
    }

    /// Converts the status to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Preprocessed => "preprocessed",
            Self::Archived => "archived",
            Self::Redirected => "redirected",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fresh" => Some(Self::Fresh),
            "preprocessed" => Some(Self::Preprocessed),
            "archived" => Some(Self::Archived),
            "redirected" => Some(Self::Redirected),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
