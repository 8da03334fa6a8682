use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortfolioId(pub u64);

/// Observation time as a day count (1 unit = 1 calendar day since the data
/// epoch). All point-in-time reasoning compares day counts; there is no
/// sub-day resolution anywhere in the pipeline. Use explicit offsets when
/// records must land on distinct days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Date(pub i64);

impl Date {
    /// Advance by a number of days.
    pub fn offset(self, days: i64) -> Self {
        Date(self.0 + days)
    }

    /// Days elapsed since `earlier` (negative if `earlier` is later).
    pub fn days_since(self, earlier: Date) -> i64 {
        self.0 - earlier.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_offset_and_days_since_agree() {
        let d = Date(100);
        assert_eq!(d.offset(30), Date(130));
        assert_eq!(d.offset(30).days_since(d), 30);
        assert_eq!(d.days_since(d.offset(5)), -5);
    }

    #[test]
    fn date_ordering_is_chronological() {
        assert!(Date(1) < Date(2));
        assert!(Date(-1) < Date(0));
    }
}
