use std::time::{Duration, SystemTime};

/// Random lowercase hex suffix of `len` characters.
///
/// Falls back to a time/pid mix when the OS random source is unavailable.
pub fn random_hex_suffix(len: usize) -> String {
    let mut bytes = vec![0u8; len.div_ceil(2)];
    if getrandom::getrandom(&mut bytes).is_err() {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_nanos();
        let mix = now ^ (std::process::id() as u128);
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (mix >> ((i % 16) * 8)) as u8;
        }
    }
    let mut s: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    s.truncate(len);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_suffix_length_and_alphabet() {
        for len in [1usize, 7, 8, 16] {
            let s = random_hex_suffix(len);
            assert_eq!(s.len(), len);
            assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_random_hex_suffix_varies() {
        let a = random_hex_suffix(16);
        let b = random_hex_suffix(16);
        assert_ne!(a, b);
    }
}
