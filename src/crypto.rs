//! Key-conversion and key-derivation primitives shared by the authenticated
//! transport handshake.
//!
//! Ed25519 identity keys are converted to X25519 for the Diffie-Hellman
//! steps of the handshake (RFC 8032 §5.1.5 birational Edwards-to-Montgomery
//! map for public keys, RFC 7748 §5 SHA-512 clamp for the seed-derived
//! scalar), and session keys are derived from the resulting shared secrets
//! with HKDF-SHA256.

use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XSecret};

pub fn ed25519_seed_to_x25519(signing_key: &SigningKey) -> XSecret {
    let hash = Sha512::digest(signing_key.as_bytes());
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&hash[..32]);
    XSecret::from(scalar)
}

pub fn ed25519_pubkey_to_x25519(pubkey_bytes: &[u8; 32]) -> Option<XPublicKey> {
    let edwards_point = CompressedEdwardsY(*pubkey_bytes).decompress()?;
    let montgomery_point = edwards_point.to_montgomery();
    Some(XPublicKey::from(montgomery_point.to_bytes()))
}

/// Derive a 32-byte symmetric key from a handshake shared secret plus
/// protocol context, binding the key to both peers' identities.
pub fn derive_aead_key(shared_secret: &[u8], context: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut out = [0u8; 32];
    hk.expand(context, &mut out)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    out
}

/// The handshake's capability challenge: a network-wide shared secret
/// hashed together with both ephemeral public keys so a replayed handshake
/// from a different session cannot be accepted.
pub fn handshake_challenge(caps: &[u8], client_eph: &[u8; 32], server_eph: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(caps);
    hasher.update(client_eph);
    hasher.update(server_eph);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn ed25519_to_x25519_conversion_is_deterministic() {
        let key = SigningKey::generate(&mut OsRng);
        let a = ed25519_seed_to_x25519(&key);
        let b = ed25519_seed_to_x25519(&key);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn pubkey_conversion_matches_private_conversion() {
        let key = SigningKey::generate(&mut OsRng);
        let x_priv = ed25519_seed_to_x25519(&key);
        let x_pub_from_priv = XPublicKey::from(&x_priv);
        let x_pub_from_pub = ed25519_pubkey_to_x25519(key.verifying_key().as_bytes()).unwrap();
        assert_eq!(x_pub_from_priv.as_bytes(), x_pub_from_pub.as_bytes());
    }

    #[test]
    fn derive_aead_key_is_deterministic_and_context_bound() {
        let secret = [1u8; 32];
        let a = derive_aead_key(&secret, b"ctx-a");
        let b = derive_aead_key(&secret, b"ctx-a");
        let c = derive_aead_key(&secret, b"ctx-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
