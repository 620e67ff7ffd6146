use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::codec::base64;

/// GUID appended to the client key when deriving `Sec-WebSocket-Accept`.
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC11B65";

/// Number of random bytes behind a `Sec-WebSocket-Key`.
pub const KEY_LEN: usize = 16;

/// Source of bytes for the handshake nonce and frame mask keys.
/// Need not be cryptographically strong.
pub trait RandomSource {
    fn fill_bytes(&mut self, dest: &mut [u8]);

    fn next_byte(&mut self) -> u8 {
        let mut b = [0u8; 1];
        self.fill_bytes(&mut b);
        b[0]
    }
}

impl<R: RandomSource + ?Sized> RandomSource for Box<R> {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        (**self).fill_bytes(dest)
    }
}

/// OS entropy through `ring`. If the system source ever fails, falls back to
/// an xorshift stream seeded from the clock.
pub struct SystemEntropy {
    rng: SystemRandom,
    fallback: u64,
}

impl SystemEntropy {
    pub fn new() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self {
            rng: SystemRandom::new(),
            fallback: seed | 1,
        }
    }

    fn xorshift(&mut self) -> u8 {
        let mut x = self.fallback;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.fallback = x;
        (x >> 24) as u8
    }
}

impl Default for SystemEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for SystemEntropy {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if self.rng.fill(dest).is_err() {
            log::warn!(target: crate::diag::TARGET, "system RNG unavailable, using fallback stream");
            for b in dest.iter_mut() {
                *b = self.xorshift();
            }
        }
    }
}

/// Builds a `Sec-WebSocket-Key`: base64 of 16 random bytes, drawn one at a
/// time from `rng`.
pub fn generate_key<R: RandomSource + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; KEY_LEN];
    for b in bytes.iter_mut() {
        *b = rng.next_byte();
    }
    base64::encode(&bytes)
}

/// The `Sec-WebSocket-Accept` value a conforming server answers `key` with:
/// base64(SHA-1(key + GUID)).
pub fn accept_key(key: &str) -> String {
    let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(key.as_bytes());
    ctx.update(ACCEPT_GUID.as_bytes());
    base64::encode(ctx.finish().as_ref())
}
