use serde::{Deserialize, Serialize};

/// Optimistic-concurrency token of a persisted snapshot.
///
/// `ETag::initial()` (0) means the snapshot has never been written.
/// Every accepted write stores `expected.next()`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ETag(i64);

impl ETag {
    /// Creates an ETag from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the ETag of a snapshot that was never persisted.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the ETag the next accepted write will carry.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if no write has been accepted yet.
    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ETag {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<ETag> for i64 {
    fn from(etag: ETag) -> Self {
        etag.0
    }
}
