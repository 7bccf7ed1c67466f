//! Checksum discipline.
//!
//! `checksum(s)` is a durability contract: it must remain byte-exact
//! MD5-over-UTF8-bytes, hex-encoded lowercase, forever. Changing the
//! algorithm, encoding, or canonicalization invalidates every persisted
//! checksum.

/// Hex-encoded MD5 digest of the UTF-8 bytes of `s`.
pub fn checksum(s: &str) -> String {
    format!("{:x}", md5::compute(s.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durability_vectors() {
        assert_eq!(checksum("this is some string"), "0e1eb663ad4cbb70b7d262f813bfbec4");
        assert_eq!(checksum("this is another string"), "7cd1136eb26ea58d5ac6762168db7f7f");
        assert_eq!(checksum("foo bar baz"), "ab07acbb1e496801937adfa772424bf7");
    }
}
