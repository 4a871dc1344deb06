//! Authenticated, encrypted transport: a secret-handshake-style mutual
//! authentication over TCP, then a boxed stream of length-prefixed
//! XChaCha20Poly1305-sealed frames carrying the mux-RPC protocol.
//!
//! Builds a sealed-sender-style envelope (ephemeral X25519 key exchange,
//! HKDF-derived AEAD key, nonce-prefixed ciphertext), but keeps the session
//! open as a stream instead of sealing one-shot messages, and layers mutual
//! authentication of both peers' long-term identity keys on top.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use x25519_dalek::{EphemeralSecret, PublicKey as XPublicKey};

use crate::crypto;
use crate::ref_::Ref;

/// Network-wide capability key: peers on different networks fail the
/// handshake even if they somehow exchange packets, because the challenge
/// it seeds will not match.
pub const DEFAULT_CAPS: &[u8] = b"delta-ssb-default-network-capability-key-v1";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("handshake challenge did not match")]
    ChallengeMismatch,
    #[error("peer identity signature did not verify")]
    BadIdentityProof,
    #[error("unexpected peer identity (wanted {wanted}, got {got})")]
    UnexpectedPeer { wanted: String, got: String },
    #[error("frame decryption failed")]
    DecryptFailed,
    #[error("peer closed connection mid-handshake")]
    Truncated,
}

struct DirectionalKey {
    cipher: XChaCha20Poly1305,
    counter: u64,
}

impl DirectionalKey {
    fn new(key_bytes: [u8; 32]) -> Self {
        DirectionalKey {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key_bytes)),
            counter: 0,
        }
    }

    fn next_nonce(&mut self) -> XNonce {
        let mut nonce = [0u8; 24];
        nonce[..8].copy_from_slice(&self.counter.to_le_bytes());
        self.counter += 1;
        *XNonce::from_slice(&nonce)
    }
}

/// An open, authenticated, encrypted connection. Implements framed
/// send/receive for the mux-RPC layer above it.
pub struct SecureConnection {
    stream: TcpStream,
    pub peer_identity: Ref,
    send_key: DirectionalKey,
    recv_key: DirectionalKey,
}

impl SecureConnection {
    pub async fn send_frame(&mut self, plaintext: &[u8]) -> Result<(), TransportError> {
        let nonce = self.send_key.next_nonce();
        let ciphertext = self
            .send_key
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| TransportError::DecryptFailed)?;
        let len = ciphertext.len() as u32;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&ciphertext).await?;
        Ok(())
    }

    pub async fn recv_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut ciphertext = vec![0u8; len];
        self.stream.read_exact(&mut ciphertext).await?;
        let nonce = self.recv_key.next_nonce();
        self.recv_key
            .cipher
            .decrypt(&nonce, ciphertext.as_slice())
            .map_err(|_| TransportError::DecryptFailed)
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

/// Client side of the handshake: we are dialing `expected_peer` (or any
/// peer, if `None`, for the inbound-listener case handled by
/// [`accept`]).
pub async fn connect(
    mut stream: TcpStream,
    identity: &SigningKey,
    expected_peer: Option<&Ref>,
    caps: &[u8],
) -> Result<SecureConnection, TransportError> {
    let eph_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let eph_public = XPublicKey::from(&eph_secret);

    stream.write_all(eph_public.as_bytes()).await?;
    let mut peer_eph_bytes = [0u8; 32];
    stream.read_exact(&mut peer_eph_bytes).await?;
    let peer_eph_public = XPublicKey::from(peer_eph_bytes);

    let challenge = crypto::handshake_challenge(caps, eph_public.as_bytes(), &peer_eph_bytes);
    let eph_shared = eph_secret.diffie_hellman(&peer_eph_public);

    let proof = identity.sign(&challenge);
    let identity_ref = Ref::feed(identity.verifying_key().to_bytes());
    send_plain_frame(&mut stream, identity.verifying_key().as_bytes()).await?;
    send_plain_frame(&mut stream, &proof.to_bytes()).await?;

    let peer_pubkey_bytes = recv_plain_frame(&mut stream).await?;
    let peer_proof_bytes = recv_plain_frame(&mut stream).await?;
    let peer_pubkey: [u8; 32] = peer_pubkey_bytes
        .try_into()
        .map_err(|_| TransportError::BadIdentityProof)?;
    let peer_verifying_key =
        VerifyingKey::from_bytes(&peer_pubkey).map_err(|_| TransportError::BadIdentityProof)?;
    let peer_sig_bytes: [u8; 64] = peer_proof_bytes
        .try_into()
        .map_err(|_| TransportError::BadIdentityProof)?;
    let peer_sig = ed25519_dalek::Signature::from_bytes(&peer_sig_bytes);
    peer_verifying_key
        .verify(&challenge, &peer_sig)
        .map_err(|_| TransportError::BadIdentityProof)?;

    let peer_identity = Ref::feed(peer_pubkey);
    if let Some(expected) = expected_peer {
        if *expected != peer_identity {
            return Err(TransportError::UnexpectedPeer {
                wanted: expected.to_string_form(),
                got: peer_identity.to_string_form(),
            });
        }
    }

    let shared_bytes = eph_shared.to_bytes();
    let client_to_server = crypto::derive_aead_key(&shared_bytes, b"client-to-server");
    let server_to_client = crypto::derive_aead_key(&shared_bytes, b"server-to-client");

    let _ = identity_ref;
    Ok(SecureConnection {
        stream,
        peer_identity,
        send_key: DirectionalKey::new(client_to_server),
        recv_key: DirectionalKey::new(server_to_client),
    })
}

/// Server/inbound side of the handshake: symmetric to [`connect`] except
/// the directional AEAD keys are swapped so each side encrypts with the
/// key the other decrypts with.
pub async fn accept(
    mut stream: TcpStream,
    identity: &SigningKey,
    caps: &[u8],
) -> Result<SecureConnection, TransportError> {
    let eph_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let eph_public = XPublicKey::from(&eph_secret);

    let mut peer_eph_bytes = [0u8; 32];
    stream.read_exact(&mut peer_eph_bytes).await?;
    stream.write_all(eph_public.as_bytes()).await?;
    let peer_eph_public = XPublicKey::from(peer_eph_bytes);

    let challenge = crypto::handshake_challenge(caps, &peer_eph_bytes, eph_public.as_bytes());
    let eph_shared = eph_secret.diffie_hellman(&peer_eph_public);

    let peer_pubkey_bytes = recv_plain_frame(&mut stream).await?;
    let peer_proof_bytes = recv_plain_frame(&mut stream).await?;
    let peer_pubkey: [u8; 32] = peer_pubkey_bytes
        .try_into()
        .map_err(|_| TransportError::BadIdentityProof)?;
    let peer_verifying_key =
        VerifyingKey::from_bytes(&peer_pubkey).map_err(|_| TransportError::BadIdentityProof)?;
    let peer_sig_bytes: [u8; 64] = peer_proof_bytes
        .try_into()
        .map_err(|_| TransportError::BadIdentityProof)?;
    let peer_sig = ed25519_dalek::Signature::from_bytes(&peer_sig_bytes);
    peer_verifying_key
        .verify(&challenge, &peer_sig)
        .map_err(|_| TransportError::BadIdentityProof)?;

    let proof = identity.sign(&challenge);
    send_plain_frame(&mut stream, identity.verifying_key().as_bytes()).await?;
    send_plain_frame(&mut stream, &proof.to_bytes()).await?;

    let peer_identity = Ref::feed(peer_pubkey);
    let shared_bytes = eph_shared.to_bytes();
    let client_to_server = crypto::derive_aead_key(&shared_bytes, b"client-to-server");
    let server_to_client = crypto::derive_aead_key(&shared_bytes, b"server-to-client");

    Ok(SecureConnection {
        stream,
        peer_identity,
        send_key: DirectionalKey::new(server_to_client),
        recv_key: DirectionalKey::new(client_to_server),
    })
}

async fn send_plain_frame(stream: &mut TcpStream, data: &[u8]) -> Result<(), TransportError> {
    let len = data.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(data).await?;
    Ok(())
}

async fn recv_plain_frame(stream: &mut TcpStream) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

#[allow(dead_code)]
fn random_bytes_32() -> [u8; 32] {
    let mut out = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn handshake_establishes_matching_session_and_verified_identities() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_key = SigningKey::generate(&mut OsRng);
        let client_key = SigningKey::generate(&mut OsRng);
        let client_identity = Ref::feed(client_key.verifying_key().to_bytes());
        let server_identity = Ref::feed(server_key.verifying_key().to_bytes());

        let server_task = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            accept(sock, &server_key, DEFAULT_CAPS).await.unwrap()
        });

        let client_sock = TcpStream::connect(addr).await.unwrap();
        let mut client_conn = connect(client_sock, &client_key, None, DEFAULT_CAPS)
            .await
            .unwrap();
        let mut server_conn = server_task.await.unwrap();

        assert_eq!(client_conn.peer_identity, server_identity);
        assert_eq!(server_conn.peer_identity, client_identity);

        client_conn.send_frame(b"hello from client").await.unwrap();
        let got = server_conn.recv_frame().await.unwrap();
        assert_eq!(got, b"hello from client");

        server_conn.send_frame(b"hello from server").await.unwrap();
        let got2 = client_conn.recv_frame().await.unwrap();
        assert_eq!(got2, b"hello from server");
    }
}
