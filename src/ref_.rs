//! Content-addressed references (`@feed.ed25519`, `%message.sha256`,
//! `&blob.sha256`) and detached signatures (`sig.ed25519`).
//!
//! Textual form, DB key encoding, and hash-check semantics follow the
//! original implementation's `Ref`/`Signature` types exactly.

use base64::Engine;
use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefError {
    #[error("invalid ref type sigil")]
    InvalidType,
    #[error("invalid ref algorithm")]
    InvalidAlgo,
    #[error("invalid ref encoding")]
    InvalidEncoding,
    #[error("hash does not match content")]
    InvalidHash,
    #[error("signature does not verify")]
    InvalidSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefType {
    Feed,
    Message,
    Blob,
}

impl RefType {
    fn sigil(self) -> char {
        match self {
            RefType::Feed => '@',
            RefType::Message => '%',
            RefType::Blob => '&',
        }
    }

    fn db_tag(self) -> u8 {
        match self {
            RefType::Feed => 1,
            RefType::Message => 2,
            RefType::Blob => 3,
        }
    }

    fn from_db_tag(tag: u8) -> Result<Self, RefError> {
        match tag {
            1 => Ok(RefType::Feed),
            2 => Ok(RefType::Message),
            3 => Ok(RefType::Blob),
            _ => Err(RefError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefAlgo {
    Sha256,
    Ed25519,
}

impl RefAlgo {
    fn name(self) -> &'static str {
        match self {
            RefAlgo::Sha256 => "sha256",
            RefAlgo::Ed25519 => "ed25519",
        }
    }

    fn db_tag(self) -> u8 {
        match self {
            RefAlgo::Sha256 => 1,
            RefAlgo::Ed25519 => 2,
        }
    }

    fn from_db_tag(tag: u8) -> Result<Self, RefError> {
        match tag {
            1 => Ok(RefAlgo::Sha256),
            2 => Ok(RefAlgo::Ed25519),
            _ => Err(RefError::InvalidAlgo),
        }
    }
}

/// A content-addressed reference: feed (public key), message (hash), or blob (hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ref {
    pub kind: RefType,
    pub algo: RefAlgo,
    pub data: Vec<u8>,
}

impl Ref {
    pub fn new(kind: RefType, algo: RefAlgo, data: Vec<u8>) -> Self {
        Ref { kind, algo, data }
    }

    pub fn feed(pubkey: [u8; 32]) -> Self {
        Ref::new(RefType::Feed, RefAlgo::Ed25519, pubkey.to_vec())
    }

    pub fn message(hash: [u8; 32]) -> Self {
        Ref::new(RefType::Message, RefAlgo::Sha256, hash.to_vec())
    }

    pub fn blob(hash: [u8; 32]) -> Self {
        Ref::new(RefType::Blob, RefAlgo::Sha256, hash.to_vec())
    }

    /// Byte key used as a prefix inside the embedded KV store: type tag,
    /// algo tag, then the raw reference bytes.
    pub fn db_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.data.len());
        out.push(self.kind.db_tag());
        out.push(self.algo.db_tag());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_db_key(bytes: &[u8]) -> Result<Self, RefError> {
        if bytes.len() < 2 {
            return Err(RefError::InvalidEncoding);
        }
        Ok(Ref {
            kind: RefType::from_db_tag(bytes[0])?,
            algo: RefAlgo::from_db_tag(bytes[1])?,
            data: bytes[2..].to_vec(),
        })
    }

    pub fn parse(s: &str) -> Result<Self, RefError> {
        let mut chars = s.chars();
        let sigil = chars.next().ok_or(RefError::InvalidType)?;
        let kind = match sigil {
            '@' => RefType::Feed,
            '%' => RefType::Message,
            '&' => RefType::Blob,
            _ => return Err(RefError::InvalidType),
        };
        let rest: String = chars.collect();
        let mut parts = rest.splitn(2, '.');
        let b64 = parts.next().ok_or(RefError::InvalidEncoding)?;
        let algo_name = parts.next().ok_or(RefError::InvalidAlgo)?;
        let algo = match algo_name.to_ascii_lowercase().as_str() {
            "sha256" => RefAlgo::Sha256,
            "ed25519" => RefAlgo::Ed25519,
            _ => return Err(RefError::InvalidAlgo),
        };
        let data = B64
            .decode(b64.as_bytes())
            .map_err(|_| RefError::InvalidEncoding)?;
        Ok(Ref { kind, algo, data })
    }

    pub fn to_string_form(&self) -> String {
        format!(
            "{}{}.{}",
            self.kind.sigil(),
            B64.encode(&self.data),
            self.algo.name()
        )
    }

    /// Verify that `content`'s sha256 digest equals this ref's data.
    pub fn check_hash(&self, content: &[u8]) -> Result<(), RefError> {
        match self.algo {
            RefAlgo::Sha256 => {
                let digest = Sha256::digest(content);
                if digest.as_slice() == self.data.as_slice() {
                    Ok(())
                } else {
                    Err(RefError::InvalidHash)
                }
            }
            _ => Err(RefError::InvalidHash),
        }
    }

    pub fn as_verifying_key(&self) -> Result<VerifyingKey, RefError> {
        if self.algo != RefAlgo::Ed25519 {
            return Err(RefError::InvalidAlgo);
        }
        let bytes: [u8; 32] = self
            .data
            .as_slice()
            .try_into()
            .map_err(|_| RefError::InvalidEncoding)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| RefError::InvalidEncoding)
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_form())
    }
}

impl serde::Serialize for Ref {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string_form())
    }
}

impl<'de> serde::Deserialize<'de> for Ref {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ref::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A detached `base64.sig.ed25519` signature over a message's canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn parse(s: &str) -> Result<Self, RefError> {
        let mut parts = s.splitn(3, '.');
        let b64 = parts.next().ok_or(RefError::InvalidEncoding)?;
        let tag = parts.next().ok_or(RefError::InvalidEncoding)?;
        let algo = parts.next().ok_or(RefError::InvalidAlgo)?;
        if tag != "sig" || !algo.eq_ignore_ascii_case("ed25519") {
            return Err(RefError::InvalidAlgo);
        }
        let raw = B64
            .decode(b64.as_bytes())
            .map_err(|_| RefError::InvalidEncoding)?;
        Ok(Signature(raw))
    }

    pub fn to_string_form(&self) -> String {
        format!("{}.sig.ed25519", B64.encode(&self.0))
    }

    pub fn verify(&self, content: &[u8], author: &Ref) -> Result<(), RefError> {
        let key = author.as_verifying_key()?;
        let sig_bytes: [u8; 64] = self
            .0
            .as_slice()
            .try_into()
            .map_err(|_| RefError::InvalidSignature)?;
        let sig = DalekSignature::from_bytes(&sig_bytes);
        key.verify(content, &sig)
            .map_err(|_| RefError::InvalidSignature)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_form())
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string_form())
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Signature::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_ref_round_trips_through_text() {
        let r = Ref::feed([7u8; 32]);
        let text = r.to_string_form();
        assert!(text.starts_with('@'));
        let parsed = Ref::parse(&text).unwrap();
        assert_eq!(r, parsed);
    }

    #[test]
    fn message_ref_round_trips_through_db_key() {
        let r = Ref::message([9u8; 32]);
        let key = r.db_key();
        let parsed = Ref::from_db_key(&key).unwrap();
        assert_eq!(r, parsed);
    }

    #[test]
    fn check_hash_rejects_tampered_content() {
        let digest = Sha256::digest(b"hello");
        let r = Ref::new(RefType::Message, RefAlgo::Sha256, digest.to_vec());
        assert!(r.check_hash(b"hello").is_ok());
        assert!(r.check_hash(b"goodbye").is_err());
    }

    #[test]
    fn parse_rejects_bad_sigil() {
        assert_eq!(Ref::parse("!abc.sha256").unwrap_err(), RefError::InvalidType);
    }
}
