//! A gossip-replicated, signed-append-only-log social network node.
//!
//! Every author owns one hash-chained, ed25519-signed log of JSON
//! messages (`message`); logs replicate peer-to-peer over an authenticated,
//! encrypted transport (`transport`) multiplexed with mux-RPC (`rpc`);
//! index plug-ins (`index`) derive queryable views — the follow graph,
//! channels, profiles, git forges, DNS claims, known pubs — from the
//! append-only log as it grows. `store` ties it together: `Store::feed`
//! and `Store::publish` are the two operations almost everything else
//! builds on.

pub mod blob;
pub mod body;
pub mod canonical;
pub mod compress;
pub mod config;
pub mod crypto;
pub mod error;
pub mod index;
pub mod invite;
pub mod jsonrpc;
pub mod kv;
pub mod message;
pub mod peers;
pub mod ref_;
pub mod replication;
pub mod rpc;
pub mod store;
pub mod topic;
pub mod transport;

pub use error::{Error, Result};
pub use message::{Message, SignedMessage};
pub use ref_::{Ref, RefType, Signature};
pub use store::{Store, StoreBuilder};

/// Open a store at `path` with every built-in index plug-in registered,
/// the common case for a node that wants the full feature set.
pub fn open_store(path: &std::path::Path, identity: ed25519_dalek::SigningKey) -> Result<Store> {
    let builder = index::register_all(StoreBuilder::new());
    builder.open(path, identity)
}
