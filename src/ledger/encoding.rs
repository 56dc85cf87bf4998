//! Dual-range token identifiers
//!
//! The ledger shares one numeric space between two logical ranges. A token
//! id belongs to the "encoded" range when its high-order marker bit is set;
//! submissions always use the encoded form.

/// Marker bit distinguishing the encoded range
pub const ENCODED_FLAG: u128 = 1 << 127;

/// Set the marker bit (idempotent)
pub const fn encode(token_id: u128) -> u128 {
    token_id | ENCODED_FLAG
}

/// Clear the marker bit
pub const fn decode(token_id: u128) -> u128 {
    token_id & !ENCODED_FLAG
}

pub const fn is_encoded(token_id: u128) -> bool {
    token_id & ENCODED_FLAG != 0
}

/// Parse a decimal or `0x`-prefixed hexadecimal token id
pub fn parse_token_id(raw: &str) -> Option<u128> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_sets_marker() {
        assert!(!is_encoded(42));
        assert!(is_encoded(encode(42)));
        assert_eq!(decode(encode(42)), 42);
    }

    #[test]
    fn test_encoded_input_passes_through() {
        let already = ENCODED_FLAG | 9;
        assert_eq!(encode(already), already);
        assert_eq!(decode(already), 9);
    }

    #[test]
    fn test_parse_token_id() {
        assert_eq!(parse_token_id("123"), Some(123));
        assert_eq!(parse_token_id("0xff"), Some(255));
        assert_eq!(parse_token_id(" 7 "), Some(7));
        assert_eq!(parse_token_id("abc"), None);
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(n in 0u128..ENCODED_FLAG) {
            prop_assert_eq!(decode(encode(n)), n);
        }

        #[test]
        fn prop_encode_is_idempotent(n in any::<u128>()) {
            prop_assert_eq!(encode(encode(n)), encode(n));
        }
    }
}
