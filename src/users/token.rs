use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};

/// Random bytes per token (128 bits).
pub const TOKEN_BYTES: usize = 16;

/// Opaque URL-safe token, used for remember tokens and verification passes.
pub fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    Base64UrlUnpadded::encode_string(&buf)
}
