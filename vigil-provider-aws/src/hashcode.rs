//! Stable string hashing for set membership

/// Hash a string into a non-negative `i32` using CRC-32 (IEEE)
///
/// Checksums that land on a negative `i32` are negated; `i32::MIN` maps to 0.
///
/// This intentionally differs from Terraform's `hashcode.String`, which keeps
/// the checksum in a 64-bit int and so never folds it. Checksums at or above
/// `2^31` therefore hash to different values here, which changes the numbers
/// and the iteration order of tag sets but not which conditions are equal.
pub fn string(s: &str) -> i32 {
    let v = crc32fast::hash(s.as_bytes()) as i32;
    if v >= 0 {
        v
    } else {
        v.checked_neg().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_hash() {
        assert_eq!(string("STRINGEQUALS-env-prod-"), string("STRINGEQUALS-env-prod-"));
    }

    #[test]
    fn hash_is_never_negative() {
        for s in ["", "a", "STRINGEQUALS-env-prod-", "key-", "zzzzzzzzzzzzzzzzzzzz"] {
            assert!(string(s) >= 0, "hash of {:?} was negative", s);
        }
    }

    #[test]
    fn folds_negative_checksums() {
        // CRC-32 of "123456789" is 0xCBF43926, which is negative as i32
        assert_eq!(string("123456789"), -(0xCBF4_3926_u32 as i32));
        assert_eq!(string(""), 0);
    }

    #[test]
    fn high_checksums_differ_from_the_unfolded_value() {
        let unfolded = i64::from(0xCBF4_3926_u32);
        assert_ne!(i64::from(string("123456789")), unfolded);
        assert_eq!(i64::from(string("123456789")), (1_i64 << 32) - unfolded);
    }

    #[test]
    fn distinct_inputs_differ() {
        assert_ne!(string("STRINGEQUALS-env-prod-"), string("STRINGEQUALS-env-dev-"));
    }
}
