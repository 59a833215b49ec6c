//! Initiator selection: for any pair of device addresses, both devices derive
//! the same initiator from the addresses alone, with no negotiation.

use sha2::{Digest, Sha256};

/// SHA-256 of `a` followed by `b` (UTF-8 bytes, no separator).
pub fn concat_and_hash(a: &str, b: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(a.as_bytes());
    hasher.update(b.as_bytes());
    hasher.finalize().into()
}

/// Most significant bit of the first byte. False for empty or missing input.
pub fn starts_with_one_bit(bytes: Option<&[u8]>) -> bool {
    matches!(bytes, Some([first, ..]) if first & 0x80 != 0)
}

/// Which of `a` and `b` initiates an exchange between them. `None` if either
/// address is missing. Symmetric: `which_initiates(a, b) == which_initiates(b, a)`.
///
/// The hash is taken over the lexicographically smaller address followed by
/// the larger one. A clear top bit selects the smaller address, a set bit the
/// larger.
pub fn which_initiates<'a>(a: Option<&'a str>, b: Option<&'a str>) -> Option<&'a str> {
    let (a, b) = (a?, b?);
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let digest = concat_and_hash(lo, hi);
    if starts_with_one_bit(Some(&digest)) {
        Some(hi)
    } else {
        Some(lo)
    }
}

/// Whether `local` should open the connection to `remote`.
pub fn local_initiates(local: &str, remote: &str) -> bool {
    which_initiates(Some(local), Some(remote)) == Some(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "AA:BB:CC:DD:EE:FF";
    const B: &str = "11:22:33:44:55:66";

    #[test]
    fn hash_is_plain_concatenation() {
        let digest = concat_and_hash(B, A);
        assert_eq!(digest[0], 0x41);
        assert_eq!(digest, concat_and_hash("11:22:33:44:55:66AA:BB", ":CC:DD:EE:FF"));
        assert_ne!(digest, concat_and_hash(A, B));
    }

    #[test]
    fn top_bit() {
        assert!(starts_with_one_bit(Some(&[0x80])));
        assert!(starts_with_one_bit(Some(&[0xff, 0x00])));
        assert!(!starts_with_one_bit(Some(&[0x7f, 0xff])));
        assert!(!starts_with_one_bit(Some(&[])));
        assert!(!starts_with_one_bit(None));
    }

    #[test]
    fn known_pair() {
        assert_eq!(which_initiates(Some(A), Some(B)), Some(B));
        assert_eq!(which_initiates(Some(B), Some(A)), Some(B));
        assert!(local_initiates(B, A));
        assert!(!local_initiates(A, B));
    }

    #[test]
    fn missing_input() {
        assert_eq!(which_initiates(Some(A), None), None);
        assert_eq!(which_initiates(None, Some(A)), None);
        assert_eq!(which_initiates(None, None), None);
    }

    #[test]
    fn symmetric_and_exactly_one_side() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let a: String = (0..6)
                .map(|_| format!("{:02X}", rng.gen::<u8>()))
                .collect::<Vec<_>>()
                .join(":");
            let b: String = (0..6)
                .map(|_| format!("{:02X}", rng.gen::<u8>()))
                .collect::<Vec<_>>()
                .join(":");
            let x = which_initiates(Some(&a), Some(&b));
            assert_eq!(x, which_initiates(Some(&b), Some(&a)));
            assert!(x == Some(a.as_str()) || x == Some(b.as_str()));
            if a != b {
                assert!(local_initiates(&a, &b) ^ local_initiates(&b, &a));
            }
        }
    }
}
