use rand::Rng;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";

/// Longest object name the store accepts for generated objects.
pub const MAX_NAME_LEN: usize = 63;

/// Returns a random lowercase alphanumeric string of `len` characters.
pub fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Joins `prefix` and `suffix` with a dash, truncating the prefix so the
/// result fits in [`MAX_NAME_LEN`]. The suffix is never truncated.
pub fn bounded_name(prefix: &str, suffix: &str) -> String {
    let budget = MAX_NAME_LEN.saturating_sub(suffix.len() + 1);
    let mut head: String = prefix.chars().take(budget).collect();
    while head.ends_with('-') {
        head.pop();
    }
    format!("{head}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod random_string {
        use super::*;

        #[test]
        fn has_requested_length() {
            assert_eq!(random_string(20).len(), 20);
            assert_eq!(random_string(0).len(), 0);
        }

        #[test]
        fn uses_lowercase_alphanumerics_only() {
            let s = random_string(200);
            assert!(s
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    mod bounded_name {
        use super::*;

        #[test]
        fn keeps_short_names_intact() {
            assert_eq!(bounded_name("cfg-pre", "abcde"), "cfg-pre-abcde");
        }

        #[test]
        fn truncates_long_prefix_and_keeps_suffix() {
            let prefix = "a".repeat(100);
            let name = bounded_name(&prefix, "xyz12");

            assert_eq!(name.len(), MAX_NAME_LEN);
            assert!(name.ends_with("-xyz12"));
        }

        #[test]
        fn drops_dangling_dash_after_truncation() {
            let prefix = format!("{}-tail", "b".repeat(56));
            let name = bounded_name(&prefix, "xyz12");

            assert!(!name.contains("--"));
            assert!(name.ends_with("b-xyz12"));
        }
    }
}
