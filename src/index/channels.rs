//! Channel subscription and per-channel post index.
//!
//! Keys messages by `channel-name\0author-db-key\0seq-be` so a channel's
//! posts can be prefix-scanned in insertion order, and separately by
//! `channels/<c>/time\0timestamp-be` (dense, tie-broken by incrementing the
//! millisecond suffix) so the most recent posts can be read back without
//! scanning every author's log. Explicit `channel` subscribe/unsubscribe
//! messages are tracked in the same table under a `\0sub\0` marker prefix.

use redb::{ReadableTable, WriteTransaction};

use crate::error::Result;
use crate::kv;
use crate::message::SignedMessage;
use crate::ref_::Ref;
use crate::store::hooks::Hook;

fn post_key(channel: &str, author_db_key: &[u8], sequence: u64) -> Vec<u8> {
    let mut key = channel.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(author_db_key);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn time_prefix(channel: &str) -> Vec<u8> {
    let mut key = b"\0time\0".to_vec();
    key.extend_from_slice(channel.as_bytes());
    key.push(0);
    key
}

fn subscription_key(channel: &str, author_db_key: &[u8]) -> Vec<u8> {
    let mut key = b"\0sub\0".to_vec();
    key.extend_from_slice(channel.as_bytes());
    key.push(0);
    key.extend_from_slice(author_db_key);
    key
}

pub struct ChannelsHook;

impl Hook for ChannelsHook {
    fn name(&self) -> &'static str {
        "channels"
    }

    fn on_message(&self, txn: &WriteTransaction, msg: &SignedMessage) -> Result<()> {
        let mut table = txn.open_table(kv::CHANNELS)?;
        let author_key = msg.message.author.db_key();
        match crate::body::Body::decode(&msg.message.content) {
            Some(crate::body::Body::Post { channel: Some(channel), .. }) => {
                let key = post_key(&channel, &author_key, msg.message.sequence);
                table.insert(key.as_slice(), &[][..])?;
                let msg_key = msg.key().map_err(|e| crate::error::Error::Validation(e.to_string()))?;
                let db_key = msg_key.db_key();
                kv::insert_dense_time(&mut table, &time_prefix(&channel), msg.message.timestamp, &db_key)?;
            }
            Some(crate::body::Body::Channel { channel, subscribed }) => {
                let key = subscription_key(&channel, &author_key);
                if subscribed {
                    table.insert(key.as_slice(), &[][..])?;
                } else {
                    table.remove(key.as_slice())?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn clear(&self, txn: &WriteTransaction) -> Result<()> {
        txn.delete_table(kv::CHANNELS)?;
        txn.open_table(kv::CHANNELS)?;
        Ok(())
    }
}

/// The `n` most recent posts to `channel`, newest first.
pub fn get_channel_latest(db: &redb::Database, channel: &str, n: usize) -> Result<Vec<Ref>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(kv::CHANNELS)?;
    let prefix = time_prefix(channel);
    let mut upper = prefix.clone();
    upper.push(0xff);
    let mut out = Vec::new();
    for entry in table.range(prefix.as_slice()..=upper.as_slice())?.rev() {
        if out.len() >= n {
            break;
        }
        let (_, v) = entry?;
        if let Ok(r) = Ref::from_db_key(v.value()) {
            out.push(r);
        }
    }
    Ok(out)
}
