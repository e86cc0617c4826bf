use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random `[A-Za-z0-9]` token of `len` characters.
///
/// Used for per-file keys and upload/deletion tokens (32) and for
/// metadata envelope IVs (12).
pub fn generate_random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_and_alphabet() {
        let s = generate_random_string(32);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(generate_random_string(32), generate_random_string(32));
    }

    #[test]
    fn zero_length() {
        assert!(generate_random_string(0).is_empty());
    }
}
