// Token and record identifiers.
//
// Token ids are UUIDv7: a millisecond timestamp followed by 74 random bits.
// Two ids minted in the same millisecond still differ in their random tail,
// so collisions within a token's lifetime are not a practical concern.
// User ids stay random v4 since nothing sorts on them.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Generate a unique token identifier (`jti`).
pub fn token_id() -> String {
    uuidv7().simple().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn uuidv7_is_valid() {
        let id = uuidv7();
        assert_eq!(id.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn uuidv7_is_monotonic() {
        let a = uuidv7();
        let b = uuidv7();
        assert!(b >= a);
    }

    #[test]
    fn token_ids_do_not_collide_in_a_burst() {
        let ids: HashSet<String> = (0..10_000).map(|_| token_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
