use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// ULIDs are a millisecond timestamp followed by 80 random bits, so ids
/// created in the same millisecond on different requests do not collide.
///
/// # Examples
/// ```
/// let id = parkspot_common::id::prefixed_ulid("bk");
/// assert!(id.starts_with("bk_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const BOOKING: &str = "bk";
    pub const CONNECTION: &str = "conn";
    pub const TRANSACTION: &str = "txn";
    pub const MESSAGE: &str = "msg";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_ulid_format() {
        let id = prefixed_ulid("bk");
        assert!(id.starts_with("bk_"));
        // ULID is 26 chars, plus prefix + underscore
        assert_eq!(id.len(), 3 + 26);
    }

    #[test]
    fn test_uniqueness() {
        let a = prefixed_ulid("bk");
        let b = prefixed_ulid("bk");
        assert_ne!(a, b);
    }
}
