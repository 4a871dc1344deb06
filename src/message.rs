//! Messages: the unsigned envelope (`previous`, `author`, `sequence`,
//! `timestamp`, `hash`, `content`) and the signed form that is actually
//! stored and gossiped.
//!
//! Field order, signing, and key-derivation follow the reference
//! implementation's `Message`/`SignedMessage` types: canonical-encode the
//! unsigned message, sign those bytes, and hash the canonical encoding of
//! the *signed* message (after the JS-binary transform) to derive the
//! message ref.

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::canonical;
use crate::compress::{self, CompressError};
use crate::ref_::{Ref, RefError, Signature};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Compress(#[from] CompressError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("signature does not verify")]
    BadSignature,
    #[error("unsupported hash algorithm {0}")]
    UnsupportedHash(String),
    #[error("message author does not match the feed's previous author")]
    WrongFeed,
    #[error("first message of a feed must be a genesis message (no previous, sequence 1)")]
    ExpectedGenesis,
    #[error("feed already has a genesis message; this one claims to be another")]
    UnexpectedGenesis,
    #[error("out of order: expected previous {expected}, got {got:?}")]
    OutOfOrder { expected: String, got: Option<String> },
    #[error("sequence did not advance by exactly one")]
    DuplicateSeq,
    #[error("timestamp did not advance")]
    NonMonotonicTime,
}

/// The unsigned envelope of a message, in wire field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub previous: Option<Ref>,
    pub author: Ref,
    pub sequence: u64,
    pub timestamp: i64,
    pub hash: String,
    pub content: Value,
}

impl Message {
    fn to_json_value(&self) -> Value {
        let previous = match &self.previous {
            Some(r) => Value::String(r.to_string_form()),
            None => Value::Null,
        };
        json!({
            "previous": previous,
            "author": self.author.to_string_form(),
            "sequence": self.sequence,
            "timestamp": self.timestamp,
            "hash": self.hash,
            "content": self.content,
        })
    }

    fn canonical_bytes(&self) -> Vec<u8> {
        canonical::encode(&self.to_json_value())
    }

    pub fn sign(self, key: &SigningKey) -> SignedMessage {
        let buf = self.canonical_bytes();
        let sig_bytes = key.sign(&buf).to_bytes();
        let signature = Signature(sig_bytes.to_vec());
        SignedMessage {
            message: self,
            signature,
        }
    }
}

/// A message plus its detached signature; this is the unit that gets
/// persisted and gossiped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub message: Message,
    pub signature: Signature,
}

impl SignedMessage {
    fn to_json_value(&self) -> Value {
        let mut v = self.message.to_json_value();
        v.as_object_mut()
            .expect("object")
            .insert("signature".into(), Value::String(self.signature.to_string_form()));
        v
    }

    /// Canonical JSON encoding of the full signed message.
    pub fn encode(&self) -> Vec<u8> {
        canonical::encode(&self.to_json_value())
    }

    /// The content-addressed message ref: sha256 of the JS-binary transform
    /// of the canonical encoding.
    pub fn key(&self) -> Result<Ref, MessageError> {
        if !self.message.hash.eq_ignore_ascii_case("sha256") {
            return Err(MessageError::UnsupportedHash(self.message.hash.clone()));
        }
        let buf = self.encode();
        let preimage = canonical::to_js_binary(&buf);
        let digest = Sha256::digest(&preimage);
        Ok(Ref::message(digest.into()))
    }

    /// Verify the signature and, if `previous` is given, the hash-chain
    /// linkage to it: same feed as its predecessor, correct genesis shape,
    /// contiguous sequence, and a strictly advancing timestamp.
    pub fn verify(&self, previous: Option<&SignedMessage>) -> Result<(), MessageError> {
        if let Some(prev) = previous {
            if self.message.author != prev.message.author {
                return Err(MessageError::WrongFeed);
            }
        }

        let buf = self.message.canonical_bytes();
        self.signature
            .verify(&buf, &self.message.author)
            .map_err(|_| MessageError::BadSignature)?;

        match (previous, &self.message.previous) {
            (None, None) => {
                if self.message.sequence != 1 {
                    return Err(MessageError::ExpectedGenesis);
                }
            }
            (None, Some(_)) => {
                return Err(MessageError::ExpectedGenesis);
            }
            (Some(_), None) => {
                return Err(MessageError::UnexpectedGenesis);
            }
            (Some(prev), Some(p)) => {
                let prev_key = prev.key()?;
                if *p != prev_key {
                    return Err(MessageError::OutOfOrder {
                        expected: prev_key.to_string_form(),
                        got: Some(p.to_string_form()),
                    });
                }
                if self.message.sequence <= prev.message.sequence {
                    return Err(MessageError::DuplicateSeq);
                }
                if self.message.sequence != prev.message.sequence + 1 {
                    return Err(MessageError::OutOfOrder {
                        expected: (prev.message.sequence + 1).to_string(),
                        got: Some(self.message.sequence.to_string()),
                    });
                }
                if self.message.timestamp <= prev.message.timestamp {
                    return Err(MessageError::NonMonotonicTime);
                }
            }
        }
        Ok(())
    }

    /// Serialize for storage/wire transfer with the given compression tag
    /// (0 = raw, 1 = deflate dict v1, 2 = deflate dict v2).
    pub fn to_wire(&self, tag: u8) -> Result<Vec<u8>, MessageError> {
        let body = self.encode();
        Ok(compress::encode_tagged(tag, &body)?)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, MessageError> {
        let body = compress::decode_tagged(bytes)?;
        let v: Value = serde_json::from_slice(&body)?;
        Self::from_json_value(&v)
    }

    fn from_json_value(v: &Value) -> Result<Self, MessageError> {
        let obj = v.as_object().ok_or_else(|| {
            MessageError::Json(serde::de::Error::custom("message is not an object"))
        })?;
        let previous = match obj.get("previous") {
            Some(Value::String(s)) => Some(Ref::parse(s)?),
            _ => None,
        };
        let author = obj
            .get("author")
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::Json(serde::de::Error::custom("missing author")))?;
        let author = Ref::parse(author)?;
        let sequence = obj.get("sequence").and_then(Value::as_u64).unwrap_or(0);
        let timestamp = obj.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
        let hash = obj
            .get("hash")
            .and_then(Value::as_str)
            .unwrap_or("sha256")
            .to_string();
        let content = obj.get("content").cloned().unwrap_or(Value::Null);
        let signature = obj
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::Json(serde::de::Error::custom("missing signature")))?;
        let signature = Signature::parse(signature)?;
        Ok(SignedMessage {
            message: Message {
                previous,
                author,
                sequence,
                timestamp,
                hash,
                content,
            },
            signature,
        })
    }
}

/// Serde-friendly mirror used only for RPC/JSON boundary (de)serialization;
/// internal logic works on [`SignedMessage`] directly.
#[derive(Debug, Serialize, Deserialize)]
pub struct SignedMessageJson {
    pub previous: Option<String>,
    pub author: String,
    pub sequence: u64,
    pub timestamp: i64,
    pub hash: String,
    pub content: Value,
    pub signature: String,
}

impl TryFrom<&SignedMessage> for SignedMessageJson {
    type Error = MessageError;

    fn try_from(m: &SignedMessage) -> Result<Self, Self::Error> {
        Ok(SignedMessageJson {
            previous: m.message.previous.as_ref().map(Ref::to_string_form),
            author: m.message.author.to_string_form(),
            sequence: m.message.sequence,
            timestamp: m.message.timestamp,
            hash: m.message.hash.clone(),
            content: m.message.content.clone(),
            signature: m.signature.to_string_form(),
        })
    }
}

impl TryFrom<&SignedMessageJson> for SignedMessage {
    type Error = MessageError;

    fn try_from(j: &SignedMessageJson) -> Result<Self, Self::Error> {
        Ok(SignedMessage {
            message: Message {
                previous: j.previous.as_deref().map(Ref::parse).transpose()?,
                author: Ref::parse(&j.author)?,
                sequence: j.sequence,
                timestamp: j.timestamp,
                hash: j.hash.clone(),
                content: j.content.clone(),
            },
            signature: Signature::parse(&j.signature)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn make_key() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let key = make_key();
        let author = Ref::feed(key.verifying_key().to_bytes());
        let m = Message {
            previous: None,
            author,
            sequence: 1,
            timestamp: 1000,
            hash: "sha256".into(),
            content: json!({"type": "post", "text": "hello"}),
        };
        let signed = m.sign(&key);
        assert!(signed.verify(None).is_ok());
    }

    #[test]
    fn tampered_signature_fails_verify() {
        let key = make_key();
        let author = Ref::feed(key.verifying_key().to_bytes());
        let m = Message {
            previous: None,
            author,
            sequence: 1,
            timestamp: 1000,
            hash: "sha256".into(),
            content: json!({"type": "post"}),
        };
        let mut signed = m.sign(&key);
        signed.signature.0[0] ^= 0xff;
        assert!(matches!(signed.verify(None), Err(MessageError::BadSignature)));
    }

    #[test]
    fn chained_message_must_reference_previous_key() {
        let key = make_key();
        let author = Ref::feed(key.verifying_key().to_bytes());
        let first = Message {
            previous: None,
            author: author.clone(),
            sequence: 1,
            timestamp: 1000,
            hash: "sha256".into(),
            content: json!({"type": "post"}),
        }
        .sign(&key);

        let second = Message {
            previous: Some(first.key().unwrap()),
            author: author.clone(),
            sequence: 2,
            timestamp: 2000,
            hash: "sha256".into(),
            content: json!({"type": "post"}),
        }
        .sign(&key);
        assert!(second.verify(Some(&first)).is_ok());

        let bad = Message {
            previous: Some(Ref::message([0u8; 32])),
            author,
            sequence: 2,
            timestamp: 2000,
            hash: "sha256".into(),
            content: json!({"type": "post"}),
        }
        .sign(&key);
        assert!(matches!(
            bad.verify(Some(&first)),
            Err(MessageError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn wire_round_trip_preserves_content() {
        let key = make_key();
        let author = Ref::feed(key.verifying_key().to_bytes());
        let signed = Message {
            previous: None,
            author,
            sequence: 1,
            timestamp: 1000,
            hash: "sha256".into(),
            content: json!({"type": "post", "text": "hi"}),
        }
        .sign(&key);

        for tag in [0u8, 1, 2] {
            let wire = signed.to_wire(tag).unwrap();
            let back = SignedMessage::from_wire(&wire).unwrap();
            assert_eq!(back.message.content, signed.message.content);
            assert_eq!(back.key().unwrap(), signed.key().unwrap());
        }
    }
}
