use md5::{Digest, Md5};

/// Domain-separation prefix mixed into the key derivation. Fixed, 32
/// hex-character ASCII bytes, not secret — it exists only so this tunnel's
/// derived keys never collide with an MD5(token) computed by an unrelated
/// protocol.
const DOMAIN: &[u8; 32] = b"746370746e6e656c2d76312d6f666221";

/// Sentinel token values that disable encryption entirely.
pub fn is_plain_token(token: &str) -> bool {
    token.is_empty() || token == "no"
}

/// Derive the 32-byte AES-256 key for a token.
///
/// `key = hex(md5(DOMAIN || token))`, i.e. the 16-byte MD5 digest is
/// hex-encoded to 32 ASCII bytes and those bytes are used directly as key
/// material (not decoded back to binary) — this mirrors the original
/// implementation's `hex.EncodeToString(md5sum)` used verbatim as the AES
/// key, extended here with a domain-separation prefix.
pub fn derive_key(token: &str) -> [u8; 32] {
    let mut hasher = Md5::new();
    hasher.update(DOMAIN);
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    let hex_str = hex::encode(digest);
    let mut key = [0u8; 32];
    key.copy_from_slice(hex_str.as_bytes());
    key
}
