//! Random, length-bounded pod names.
//!
//! `generate_name("web")` → `web-x7kq2bz9dm`. The base is truncated so the
//! full name fits in a DNS-1123 label.

use rand::Rng;

/// Maximum length of an object name.
pub const MAX_NAME_LENGTH: usize = 63;

/// Number of random characters appended to the base name.
pub const RANDOM_SUFFIX_LENGTH: usize = 10;

/// Longest base kept before the `-` separator and suffix.
pub const MAX_BASE_LENGTH: usize = MAX_NAME_LENGTH - RANDOM_SUFFIX_LENGTH - 1;

/// Suffix alphabet: no vowels and no `0`, `1`, `3`, so suffixes cannot
/// spell words.
const ALPHANUMS: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Generate a fresh name for `base` using the thread-local RNG.
pub fn generate_name(base: &str) -> String {
    generate_name_with(base, &mut rand::thread_rng())
}

/// Generate a fresh name for `base` drawing the suffix from `rng`.
pub fn generate_name_with<R: Rng>(base: &str, rng: &mut R) -> String {
    let base = truncate_bytes(base, MAX_BASE_LENGTH);
    let mut name = String::with_capacity(base.len() + 1 + RANDOM_SUFFIX_LENGTH);
    name.push_str(base);
    name.push('-');
    for _ in 0..RANDOM_SUFFIX_LENGTH {
        let idx = rng.gen_range(0..ALPHANUMS.len());
        name.push(ALPHANUMS[idx] as char);
    }
    name
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char
/// boundary. Name limits are in bytes.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    #[test]
    fn short_base_is_kept() {
        let name = generate_name("web");
        assert!(name.starts_with("web-"));
        assert_eq!(name.len(), 3 + 1 + RANDOM_SUFFIX_LENGTH);
    }

    #[test]
    fn long_base_is_truncated_to_fit() {
        let base = "a".repeat(100);
        let name = generate_name(&base);
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.starts_with(&"a".repeat(MAX_BASE_LENGTH)));
        assert_eq!(name.as_bytes()[MAX_BASE_LENGTH], b'-');
    }

    #[test]
    fn base_at_limit_is_not_truncated() {
        let base = "b".repeat(MAX_BASE_LENGTH);
        let name = generate_name(&base);
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.starts_with(&base));
    }

    #[test]
    fn multibyte_base_is_bounded_in_bytes() {
        // 31 two-byte chars: 62 bytes, accepted as an AppService name.
        let base = "é".repeat(31);
        let name = generate_name(&base);
        assert!(name.len() <= MAX_NAME_LENGTH, "{} bytes", name.len());
        // 26 whole chars fit in the 52-byte base budget.
        assert!(name.starts_with(&"é".repeat(26)));
        assert_eq!(name.len(), 52 + 1 + RANDOM_SUFFIX_LENGTH);

        // A boundary that falls mid-char backs off to the previous char.
        let odd = format!("a{}", "é".repeat(40));
        let name = generate_name(&odd);
        assert!(name.len() <= MAX_NAME_LENGTH);
        assert!(name.starts_with(&format!("a{}-", "é".repeat(25))));
    }

    #[test]
    fn suffix_uses_restricted_alphabet() {
        let name = generate_name("svc");
        let suffix = &name["svc-".len()..];
        assert_eq!(suffix.len(), RANDOM_SUFFIX_LENGTH);
        assert!(suffix.bytes().all(|b| ALPHANUMS.contains(&b)));
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let a = generate_name_with("web", &mut StdRng::seed_from_u64(7));
        let b = generate_name_with("web", &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn names_do_not_collide_at_expected_scale() {
        let names: HashSet<String> = (0..1000).map(|_| generate_name("web")).collect();
        assert_eq!(names.len(), 1000);
    }
}
