//! Random identifier generation.

use rand::Rng;

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Default length of generated short codes.
pub const DEFAULT_CODE_LEN: usize = 6;

/// Cryptographically random base62 string of the requested length.
pub fn short_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect()
}

/// Random lowercase hex string of the requested length.
///
/// Registry instance ids use an 8-character suffix.
pub fn hex_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = vec![0u8; len.div_ceil(2)];
    rng.fill(bytes.as_mut_slice());
    let mut s = hex::encode(bytes);
    s.truncate(len);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_code_alphabet_and_length() {
        let code = short_code(DEFAULT_CODE_LEN);
        assert_eq!(code.len(), DEFAULT_CODE_LEN);
        assert!(code.bytes().all(|b| BASE62.contains(&b)));
    }

    #[test]
    fn test_short_codes_vary() {
        let a = short_code(16);
        let b = short_code(16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_suffix() {
        let s = hex_suffix(8);
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hex_suffix_odd_length() {
        assert_eq!(hex_suffix(7).len(), 7);
    }
}
