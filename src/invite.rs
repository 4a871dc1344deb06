//! Pub-invite acceptance.
//!
//! An invite code is `host:port:@key.ed25519~secretBase64` — in addition
//! to the pub's usual identity, it carries a one-time secret the pub used
//! to authorize this introduction. Accepting an invite dials the pub with
//! that secret standing in for the caps/capability key for the first
//! handshake, publishes a `follow` (`contact`) message for the pub on our
//! own feed, and records the pub in the dial table so future sessions use
//! the normal capability key.

use ed25519_dalek::SigningKey;
use serde_json::json;
use thiserror::Error;

use crate::index::pubs::{self, PubRecord};
use crate::ref_::{Ref, RefError};
use crate::store::Store;
use crate::transport::{self, TransportError};

#[derive(Debug, Error)]
pub enum InviteError {
    #[error("malformed invite code")]
    Malformed,
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] crate::error::Error),
}

pub struct ParsedInvite {
    pub host: String,
    pub port: u16,
    pub key: Ref,
    pub secret: Vec<u8>,
}

pub fn parse(code: &str) -> Result<ParsedInvite, InviteError> {
    let (addr_and_key, secret_b64) = code.split_once('~').ok_or(InviteError::Malformed)?;
    let mut parts = addr_and_key.splitn(3, ':');
    let host = parts.next().ok_or(InviteError::Malformed)?.to_string();
    let port: u16 = parts
        .next()
        .ok_or(InviteError::Malformed)?
        .parse()
        .map_err(|_| InviteError::Malformed)?;
    let key_str = parts.next().ok_or(InviteError::Malformed)?;
    let key = Ref::parse(key_str)?;
    let secret = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, secret_b64)
        .map_err(|_| InviteError::Malformed)?;
    Ok(ParsedInvite { host, port, key, secret })
}

/// Accept an invite: handshake using the invite's one-time secret as the
/// capability key, publish a follow for the pub, and remember it.
pub async fn accept(store: &Store, identity: &SigningKey, invite: ParsedInvite) -> Result<(), InviteError> {
    let addr = format!("{}:{}", invite.host, invite.port);
    let tcp = tokio::net::TcpStream::connect(&addr).await?;
    let _conn = transport::connect(tcp, identity, Some(&invite.key), &invite.secret).await?;

    store
        .publish(json!({
            "type": "contact",
            "contact": invite.key.to_string_form(),
            "following": true,
        }))
        .await?;

    pubs::add_pub(
        store.db(),
        &PubRecord {
            host: invite.host,
            port: invite.port,
            key: invite.key,
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_invite() {
        let key = Ref::feed([3u8; 32]);
        let code = format!(
            "pub.example.com:8008:{}~{}",
            key.to_string_form(),
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"secret")
        );
        let parsed = parse(&code).unwrap();
        assert_eq!(parsed.host, "pub.example.com");
        assert_eq!(parsed.port, 8008);
        assert_eq!(parsed.key, key);
        assert_eq!(parsed.secret, b"secret");
    }

    #[test]
    fn rejects_missing_secret_separator() {
        assert!(matches!(parse("host:8008:@x.ed25519"), Err(InviteError::Malformed)));
    }
}
