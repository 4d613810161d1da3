use std::fmt;

/// Version tag of the extraction logic a link was last fetched with
///
/// Bumping [`FetchVersion::CURRENT`] makes every previously fetched link
/// eligible again, so pages get reparsed without being rediscovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchVersion(i64);

impl FetchVersion {
    pub const V1: Self = Self(1);

    /// Adds publication time, domain and description to documents
    pub const V2: Self = Self(2);

    /// URL parser fix
    pub const V3: Self = Self(3);

    /// Character set decoding fix
    pub const V4: Self = Self(4);

    /// Paywall detection
    pub const V5: Self = Self(5);

    pub const CURRENT: Self = Self::V5;

    pub const fn new(version: i64) -> Self {
        Self(version)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl Default for FetchVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for FetchVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
