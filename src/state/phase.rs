/// Crawl phase definitions
///
/// A crawl pass moves through a fixed sequence of phases, each feeding the
/// next through the store.
use std::fmt;

/// Represents the phase a crawl run is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    /// Primary query search, results go to the posts table
    Search,

    /// Selecting the top-engagement conversation roots
    RankRoots,

    /// Reply search for each selected root, results go to the replies table
    CrawlReplies,

    /// Looking for conversation roots seen only through replies
    FindGaps,

    /// Fetching those roots by id into the posts table
    BackfillRoots,

    /// All phases finished
    Complete,
}

impl CrawlPhase {
    /// Phases in execution order
    pub const ORDER: [CrawlPhase; 6] = [
        Self::Search,
        Self::RankRoots,
        Self::CrawlReplies,
        Self::FindGaps,
        Self::BackfillRoots,
        Self::Complete,
    ];

    /// The phase that follows this one, or None for `Complete`
    pub fn next(&self) -> Option<Self> {
        let idx = Self::ORDER.iter().position(|p| p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    /// Only forward moves to the immediately following phase are valid
    pub fn can_transition_to(&self, target: Self) -> bool {
        self.next() == Some(target)
    }

    /// Converts the phase to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::RankRoots => "rank_roots",
            Self::CrawlReplies => "crawl_replies",
            Self::FindGaps => "find_gaps",
            Self::BackfillRoots => "backfill_roots",
            Self::Complete => "complete",
        }
    }

    /// Parses a phase from its database string representation
    ///
    /// Returns None if the string doesn't match any known phase.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "search" => Some(Self::Search),
            "rank_roots" => Some(Self::RankRoots),
            "crawl_replies" => Some(Self::CrawlReplies),
            "find_gaps" => Some(Self::FindGaps),
            "backfill_roots" => Some(Self::BackfillRoots),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert_eq!(CrawlPhase::Search.next(), Some(CrawlPhase::RankRoots));
        assert_eq!(CrawlPhase::FindGaps.next(), Some(CrawlPhase::BackfillRoots));
        assert_eq!(CrawlPhase::Complete.next(), None);
    }

    #[test]
    fn test_only_adjacent_forward_transitions() {
        assert!(CrawlPhase::Search.can_transition_to(CrawlPhase::RankRoots));
        assert!(CrawlPhase::BackfillRoots.can_transition_to(CrawlPhase::Complete));

        assert!(!CrawlPhase::Search.can_transition_to(CrawlPhase::CrawlReplies));
        assert!(!CrawlPhase::RankRoots.can_transition_to(CrawlPhase::Search));
        assert!(!CrawlPhase::Complete.can_transition_to(CrawlPhase::Search));
        assert!(!CrawlPhase::Search.can_transition_to(CrawlPhase::Search));
    }

    #[test]
    fn test_db_string_roundtrip() {
        for phase in CrawlPhase::ORDER {
            assert_eq!(CrawlPhase::from_db_string(phase.to_db_string()), Some(phase));
        }
        assert_eq!(CrawlPhase::from_db_string("invalid"), None);
    }
}
