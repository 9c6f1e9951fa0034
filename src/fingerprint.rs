//! Content fingerprints for cell values.
//!
//! A [`Fingerprint`] stands in for a value without computing it. Fingerprints are built by
//! feeding every contributor of a value, in order, into a [`FingerprintHasher`].

use std::fmt;

/// Number of bytes in a [`Fingerprint`].
pub const FINGERPRINT_LEN: usize = 16;

/// A 128-bit BLAKE3-derived content hash.
///
/// Two equal fingerprints must always stand for bit-identical values; the value cache
/// relies on this.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Fingerprint a single byte buffer.
    pub fn of(buffer: impl AsRef<[u8]>) -> Self {
        let mut hasher = FingerprintHasher::new();
        hasher.append_bytes(buffer.as_ref());
        hasher.finish()
    }

    /// Raw bytes of this fingerprint.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Returns true if this is the default (all zero) fingerprint.
    pub fn is_default(&self) -> bool {
        self.0 == [0u8; FINGERPRINT_LEN]
    }

    /// Lowercase hexadecimal representation.
    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(FINGERPRINT_LEN * 2);

        for byte in self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl From<[u8; FINGERPRINT_LEN]> for Fingerprint {
    fn from(value: [u8; FINGERPRINT_LEN]) -> Self {
        Fingerprint(value)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Order-sensitive accumulator producing a [`Fingerprint`].
///
/// Variable-length contributors (strings, buffers) are length-prefixed so that
/// `("ab", "c")` and `("a", "bc")` never collide.
#[derive(Clone, Default)]
pub struct FingerprintHasher(blake3::Hasher);

impl FingerprintHasher {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    /// Create an accumulator seeded with a type discriminator.
    pub fn with_seed(seed: &str) -> Self {
        let mut hasher = Self::new();
        hasher.append_str(seed);
        hasher
    }

    /// Append raw bytes without a length prefix.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    /// Append a length-prefixed string.
    pub fn append_str(&mut self, value: &str) -> &mut Self {
        self.append_u64(value.len() as u64);
        self.append_bytes(value.as_bytes())
    }

    /// Append a single boolean byte.
    pub fn append_bool(&mut self, value: bool) -> &mut Self {
        self.append_bytes(&[value as u8])
    }

    /// Append a little-endian `u64`.
    pub fn append_u64(&mut self, value: u64) -> &mut Self {
        self.append_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian `i64`.
    pub fn append_i64(&mut self, value: i64) -> &mut Self {
        self.append_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian `i32`.
    pub fn append_i32(&mut self, value: i32) -> &mut Self {
        self.append_bytes(&value.to_le_bytes())
    }

    /// Append a float by its bit pattern, so `0.0` and `-0.0` hash differently.
    pub fn append_f32(&mut self, value: f32) -> &mut Self {
        self.append_bytes(&value.to_bits().to_le_bytes())
    }

    /// Append a length-prefixed float buffer.
    pub fn append_floats(&mut self, values: &[f32]) -> &mut Self {
        self.append_u64(values.len() as u64);

        let mut chunk = [0u8; 1024];
        for floats in values.chunks(chunk.len() / 4) {
            for (i, value) in floats.iter().enumerate() {
                chunk[i * 4..i * 4 + 4].copy_from_slice(&value.to_bits().to_le_bytes());
            }
            self.0.update(&chunk[..floats.len() * 4]);
        }

        self
    }

    /// Fold in an upstream fingerprint.
    pub fn append_fingerprint(&mut self, value: Fingerprint) -> &mut Self {
        self.append_bytes(value.as_bytes())
    }

    /// Finalize into a fingerprint. The accumulator can keep being used afterwards.
    pub fn finish(&self) -> Fingerprint {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&self.0.finalize().as_bytes()[..FINGERPRINT_LEN]);
        Fingerprint(bytes)
    }
}

impl From<&FingerprintHasher> for Fingerprint {
    fn from(value: &FingerprintHasher) -> Self {
        value.finish()
    }
}

impl std::hash::Hasher for FingerprintHasher {
    fn finish(&self) -> u64 {
        let mut output = [0u8; 8];
        self.0.finalize_xof().fill(&mut output);
        u64::from_le_bytes(output)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = FingerprintHasher::with_seed("seed").append_f32(1.5).finish();
        let b = FingerprintHasher::with_seed("seed").append_f32(1.5).finish();
        assert_eq!(a, b);
    }

    #[test]
    fn test_order_sensitive() {
        let a = FingerprintHasher::new().append_i32(1).append_i32(2).finish();
        let b = FingerprintHasher::new().append_i32(2).append_i32(1).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_strings_are_length_prefixed() {
        let a = FingerprintHasher::new().append_str("ab").append_str("c").finish();
        let b = FingerprintHasher::new().append_str("a").append_str("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_seed_discriminates() {
        let a = FingerprintHasher::with_seed("Float").append_bytes(&[0; 4]).finish();
        let b = FingerprintHasher::with_seed("Int").append_bytes(&[0; 4]).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_float_buffer_chunking() {
        let values: Vec<f32> = (0..1000).map(|i| i as f32 * 0.25).collect();
        let chunked = FingerprintHasher::new().append_floats(&values).finish();

        let mut manual = FingerprintHasher::new();
        manual.append_u64(values.len() as u64);
        for value in &values {
            manual.append_f32(*value);
        }
        assert_eq!(chunked, manual.finish());
    }

    #[test]
    fn test_hex() {
        let fingerprint = Fingerprint::from([0xab; FINGERPRINT_LEN]);
        assert_eq!(fingerprint.to_hex(), "ab".repeat(FINGERPRINT_LEN));
        assert!(Fingerprint::default().is_default());
    }
}
