//! Encode-only standard base64 (`A-Z a-z 0-9 + /`, `=` padding).

use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine as _;

/// Encodes `src` as padded standard base64.
pub fn encode(src: &[u8]) -> String {
    STANDARD.encode(src)
}

/// Length of the encoded form of `len` input bytes.
pub const fn encoded_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}
