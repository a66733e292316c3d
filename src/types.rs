//! Core types for the memo store.

use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of generated memo ids.
const MEMO_ID_LEN: usize = 20;

/// Opaque memo identifier (assigned by store).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemoId(pub String);

impl MemoId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MEMO_ID_LEN)
            .map(char::from)
            .collect();
        MemoId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MemoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoId({})", self.0)
    }
}

impl fmt::Display for MemoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemoId {
    fn from(value: &str) -> Self {
        MemoId(value.to_string())
    }
}

/// Identity of the user owning a memo.
///
/// Treated as an opaque key; the store only requires it to be non-blank.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id can key a collection filter.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        OwnerId(value.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        OwnerId(value)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// Next timestamp strictly after both `self` and the wall clock.
    ///
    /// Pinned at `i64::MAX`; ties there fall back to insertion order.
    pub fn next_after(self) -> Self {
        let now = Self::now();
        if now > self {
            now
        } else {
            Timestamp(self.0.saturating_add(1))
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Presentation tag for a memo card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoColor {
    Yellow,
    Pink,
    Cyan,
    Green,
    Orange,
}

impl MemoColor {
    /// The fixed palette memos are painted from.
    pub const PALETTE: [MemoColor; 5] = [
        MemoColor::Yellow,
        MemoColor::Pink,
        MemoColor::Cyan,
        MemoColor::Green,
        MemoColor::Orange,
    ];

    /// Pick a palette entry at random.
    pub fn random() -> Self {
        *Self::PALETTE
            .choose(&mut rand::thread_rng())
            .unwrap_or(&MemoColor::Yellow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoColor::Yellow => "yellow",
            MemoColor::Pink => "pink",
            MemoColor::Cyan => "cyan",
            MemoColor::Green => "green",
            MemoColor::Orange => "orange",
        }
    }
}

impl fmt::Display for MemoColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PALETTE
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown memo color: {s}"))
    }
}

/// A single memo document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    /// Unique identifier (assigned by store).
    pub id: MemoId,

    pub title: String,

    pub content: String,

    /// Picked at creation, never edited.
    pub color: MemoColor,

    /// Owning user.
    pub owner_id: OwnerId,

    /// When the memo was created (assigned by store, strictly increasing).
    pub created_at: Timestamp,
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub memo_count: u64,
    pub owner_count: u64,
    pub subscription_count: u64,
    pub journal_entries: u64,
    pub journal_size_bytes: u64,
    pub revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_id_shape() {
        let a = MemoId::generate();
        let b = MemoId::generate();
        assert_eq!(a.as_str().len(), MEMO_ID_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_owner_validity() {
        assert!(OwnerId::from("u1").is_valid());
        assert!(!OwnerId::from("").is_valid());
        assert!(!OwnerId::from("   ").is_valid());
    }

    #[test]
    fn test_timestamp_next_after_is_strict() {
        let far_future = Timestamp(i64::MAX - 10);
        assert_eq!(far_future.next_after(), Timestamp(i64::MAX - 9));

        let past = Timestamp(1);
        assert!(past.next_after() > past);

        assert_eq!(Timestamp(i64::MAX).next_after(), Timestamp(i64::MAX));
    }

    #[test]
    fn test_color_parse() {
        assert_eq!("yellow".parse::<MemoColor>().unwrap(), MemoColor::Yellow);
        assert_eq!(" Orange ".parse::<MemoColor>().unwrap(), MemoColor::Orange);
        assert!("purple".parse::<MemoColor>().is_err());
    }

    #[test]
    fn test_random_color_in_palette() {
        for _ in 0..50 {
            assert!(MemoColor::PALETTE.contains(&MemoColor::random()));
        }
    }

    #[test]
    fn test_color_serde_lowercase() {
        let json = serde_json::to_string(&MemoColor::Cyan).unwrap();
        assert_eq!(json, "\"cyan\"");
    }
}
