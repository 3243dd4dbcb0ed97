use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::BoxFuture;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;

use adbwire_frame::read_u32_le;

use crate::error::{BridgeError, Result};

/// An ADB client public key, as sent in `AUTH(RSAPUBLICKEY)`.
///
/// The blob is the base64 of Android's `RSAPublicKey` struct:
/// ```text
/// ┌───────────┬────────┬──────────────────┬──────────────────┬──────────┐
/// │ len (4B)  │ n0inv  │ modulus          │ rr               │ exponent │
/// │ words     │ (4B)   │ len words, LE    │ len words, LE    │ (4B)     │
/// └───────────┴────────┴──────────────────┴──────────────────┴──────────┘
/// ```
/// optionally followed by a space and a `user@host` comment.
#[derive(Clone)]
pub struct AdbPublicKey {
    key: RsaPublicKey,
    comment: Option<String>,
}

impl AdbPublicKey {
    /// Parse a key blob. Trailing NUL bytes are ignored.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let end = blob
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |pos| pos + 1);
        let text = std::str::from_utf8(&blob[..end])
            .map_err(|_| BridgeError::auth("public key is not valid UTF-8"))?
            .trim();
        if text.is_empty() {
            return Err(BridgeError::auth("empty public key"));
        }
        let (encoded, comment) = match text.split_once(' ') {
            Some((encoded, comment)) => (encoded, Some(comment.trim().to_string())),
            None => (text, None),
        };
        let raw = STANDARD
            .decode(encoded)
            .map_err(|err| BridgeError::auth(format!("public key is not base64: {err}")))?;
        let key = decode_struct(&raw)?;
        Ok(Self {
            key,
            comment: comment.filter(|c| !c.is_empty()),
        })
    }

    /// Wrap an RSA key.
    pub fn new(key: RsaPublicKey, comment: Option<String>) -> Self {
        Self { key, comment }
    }

    /// Check `signature` over the 20-byte challenge `token`.
    ///
    /// ADB clients sign the token as if it were a SHA-1 digest.
    pub fn verify(&self, token: &[u8], signature: &[u8]) -> bool {
        self.key
            .verify(Pkcs1v15Sign::new::<Sha1>(), token, signature)
            .is_ok()
    }

    /// The `user@host` comment that followed the key, if any.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn rsa(&self) -> &RsaPublicKey {
        &self.key
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.key.n().bits()
    }

    /// Encode in the client wire format, comment included.
    pub fn to_blob(&self) -> String {
        let n = self.key.n();
        let words = n.bits().div_ceil(32);
        let mut raw = Vec::with_capacity(12 + words * 8);
        raw.extend_from_slice(&(words as u32).to_le_bytes());

        let modulus = padded_le(n, words * 4);
        let n0 = read_u32_le(&modulus, 0);
        raw.extend_from_slice(&n0inv(n0).to_le_bytes());
        raw.extend_from_slice(&modulus);

        let r = BigUint::from(1u32) << (words * 32);
        let rr = (&r * &r) % n;
        raw.extend_from_slice(&padded_le(&rr, words * 4));

        raw.extend_from_slice(&padded_le(self.key.e(), 4));

        let mut blob = STANDARD.encode(raw);
        if let Some(comment) = &self.comment {
            blob.push(' ');
            blob.push_str(comment);
        }
        blob
    }
}

impl fmt::Debug for AdbPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdbPublicKey")
            .field("bits", &self.bits())
            .field("comment", &self.comment)
            .finish()
    }
}

fn decode_struct(raw: &[u8]) -> Result<RsaPublicKey> {
    if raw.len() < 4 {
        return Err(BridgeError::auth("public key is truncated"));
    }
    let words = read_u32_le(raw, 0) as usize;
    let expected = 4 + 4 + words * 4 * 2 + 4;
    if words == 0 || raw.len() != expected {
        return Err(BridgeError::auth(format!(
            "public key is {} bytes, expected {expected} for {words} words",
            raw.len()
        )));
    }
    let modulus_start = 8;
    let modulus = &raw[modulus_start..modulus_start + words * 4];
    let exponent = read_u32_le(raw, expected - 4);

    RsaPublicKey::new(BigUint::from_bytes_le(modulus), BigUint::from(exponent))
        .map_err(|err| BridgeError::auth(format!("invalid RSA public key: {err}")))
}

fn padded_le(value: &BigUint, len: usize) -> Vec<u8> {
    let mut bytes = value.to_bytes_le();
    bytes.resize(len, 0);
    bytes
}

/// `-1 / n0 mod 2^32`, for odd `n0`.
fn n0inv(n0: u32) -> u32 {
    let mut inv = n0;
    for _ in 0..5 {
        inv = inv.wrapping_mul(2u32.wrapping_sub(n0.wrapping_mul(inv)));
    }
    inv.wrapping_neg()
}

/// Decides whether a verified key may use the bridge.
pub trait Authorizer: Send + Sync {
    fn authorize<'a>(&'a self, key: &'a AdbPublicKey) -> BoxFuture<'a, bool>;
}

impl<F> Authorizer for F
where
    F: Fn(&AdbPublicKey) -> bool + Send + Sync,
{
    fn authorize<'a>(&'a self, key: &'a AdbPublicKey) -> BoxFuture<'a, bool> {
        let allowed = self(key);
        Box::pin(async move { allowed })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::OnceLock;

    use rsa::RsaPrivateKey;

    use super::*;

    pub(crate) fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
    }

    pub(crate) fn sign(key: &RsaPrivateKey, token: &[u8]) -> Vec<u8> {
        key.sign(Pkcs1v15Sign::new::<Sha1>(), token).unwrap()
    }

    pub(crate) fn blob(key: &RsaPrivateKey) -> Vec<u8> {
        let public = AdbPublicKey::new(key.to_public_key(), Some("tester@host".into()));
        let mut blob = public.to_blob().into_bytes();
        blob.push(0);
        blob
    }

    #[test]
    fn parses_blob_with_comment_and_nul() {
        let key = test_key();
        let parsed = AdbPublicKey::parse(&blob(key)).unwrap();
        assert_eq!(parsed.rsa(), &key.to_public_key());
        assert_eq!(parsed.comment(), Some("tester@host"));
        assert_eq!(parsed.bits(), 1024);
    }

    #[test]
    fn verifies_signature_over_token() {
        let key = test_key();
        let parsed = AdbPublicKey::parse(&blob(key)).unwrap();
        let token = [0x42u8; 20];
        let signature = sign(key, &token);
        assert!(parsed.verify(&token, &signature));
        assert!(!parsed.verify(&[0x43u8; 20], &signature));

        let mut tampered = signature.clone();
        tampered[5] ^= 0x10;
        assert!(!parsed.verify(&token, &tampered));
    }

    #[test]
    fn n0inv_is_negative_inverse() {
        for n0 in [1u32, 3, 0xffff_fffb, 0x8000_0001, 0x1234_5679] {
            assert_eq!(n0.wrapping_mul(n0inv(n0)), u32::MAX);
        }
    }

    #[test]
    fn rejects_malformed_blobs() {
        for blob in [&b""[..], b"\0\0", b"!!!not-base64", b"AAAA"] {
            let err = AdbPublicKey::parse(blob).unwrap_err();
            assert!(matches!(err, BridgeError::Auth { .. }), "{blob:?}");
        }
    }

    #[test]
    fn closures_are_authorizers() {
        let key = AdbPublicKey::new(test_key().to_public_key(), Some("ci@box".into()));
        let allow = |key: &AdbPublicKey| key.comment() == Some("ci@box");
        let deny = |_: &AdbPublicKey| false;
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(rt.block_on(allow.authorize(&key)));
        assert!(!rt.block_on(deny.authorize(&key)));
    }
}
