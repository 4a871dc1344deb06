//! About-profile, vote, and thread indexes.
//!
//! `about` messages accumulate into a latest-wins profile record per
//! subject ref, but only when the subject is the message's own author — an
//! `about` posted by anyone else is gossip, not a profile update, and is
//! ignored. `vote` messages are kept one-per-voter-per-link so a later vote
//! from the same feed replaces its earlier one instead of being folded into
//! a blind running tally. `post` messages naming a `root` are additionally
//! filed into a per-thread index.

use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kv;
use crate::message::SignedMessage;
use crate::ref_::Ref;
use crate::store::hooks::Hook;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Profile {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRecord {
    pub voter: Ref,
    pub message_key: Ref,
    pub value: i32,
}

fn about_key(subject: &Ref) -> Vec<u8> {
    let mut key = b"\0about\0".to_vec();
    key.extend_from_slice(&subject.db_key());
    key
}

fn vote_prefix(link: &Ref) -> Vec<u8> {
    let mut key = b"\0vote\0".to_vec();
    key.extend_from_slice(&link.db_key());
    key
}

fn vote_key(link: &Ref, voter: &Ref) -> Vec<u8> {
    let mut key = vote_prefix(link);
    key.push(0);
    key.extend_from_slice(&voter.db_key());
    key
}

fn thread_log_key(root: &Ref, author_db_key: &[u8], sequence: u64) -> Vec<u8> {
    let mut key = b"\0thread\0log\0".to_vec();
    key.extend_from_slice(&root.db_key());
    key.push(0);
    key.extend_from_slice(author_db_key);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn thread_time_prefix(root: &Ref) -> Vec<u8> {
    let mut key = b"\0thread\0time\0".to_vec();
    key.extend_from_slice(&root.db_key());
    key.push(0);
    key
}

pub struct SocialHook;

impl Hook for SocialHook {
    fn name(&self) -> &'static str {
        "social"
    }

    fn on_message(&self, txn: &WriteTransaction, msg: &SignedMessage) -> Result<()> {
        let mut table = txn.open_table(kv::SOCIAL)?;
        match crate::body::Body::decode(&msg.message.content) {
            Some(crate::body::Body::About { about, name, description, image }) => {
                if msg.message.author != about {
                    return Ok(());
                }
                let key = about_key(&about);
                let mut profile: Profile = table
                    .get(key.as_slice())?
                    .and_then(|v| serde_json::from_slice(v.value()).ok())
                    .unwrap_or_default();
                if name.is_some() {
                    profile.name = name;
                }
                if description.is_some() {
                    profile.description = description;
                }
                if let Some(img) = image {
                    profile.image = Some(img.to_string_form());
                }
                let buf = serde_json::to_vec(&profile)?;
                table.insert(key.as_slice(), buf.as_slice())?;
            }
            Some(crate::body::Body::Vote { link, value, .. }) => {
                let key = vote_key(&link, &msg.message.author);
                let record = VoteRecord {
                    voter: msg.message.author.clone(),
                    message_key: msg.key().map_err(|e| crate::error::Error::Validation(e.to_string()))?,
                    value,
                };
                let buf = serde_json::to_vec(&record)?;
                table.insert(key.as_slice(), buf.as_slice())?;
            }
            Some(crate::body::Body::Post { root: Some(root), .. }) => {
                let author_key = msg.message.author.db_key();
                let log_key = thread_log_key(&root, &author_key, msg.message.sequence);
                let msg_key = msg.key().map_err(|e| crate::error::Error::Validation(e.to_string()))?;
                let db_key = msg_key.db_key();
                table.insert(log_key.as_slice(), db_key.as_slice())?;
                kv::insert_dense_time(&mut table, &thread_time_prefix(&root), msg.message.timestamp, &db_key)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn clear(&self, txn: &WriteTransaction) -> Result<()> {
        txn.delete_table(kv::SOCIAL)?;
        txn.open_table(kv::SOCIAL)?;
        Ok(())
    }
}

/// Current profile fields for `subject`, folded from every `about` message
/// it has posted about itself.
pub fn get_about(db: &redb::Database, subject: &Ref) -> Result<Option<Profile>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(kv::SOCIAL)?;
    let result = table
        .get(about_key(subject).as_slice())?
        .and_then(|v| serde_json::from_slice(v.value()).ok());
    Ok(result)
}

/// Every feed's latest vote on `link`, one record per voter.
pub fn get_votes(db: &redb::Database, link: &Ref) -> Result<Vec<VoteRecord>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(kv::SOCIAL)?;
    let prefix = vote_prefix(link);
    let mut upper = prefix.clone();
    upper.push(0xff);
    let mut out = Vec::new();
    for entry in table.range(prefix.as_slice()..=upper.as_slice())? {
        let (_, v) = entry?;
        if let Ok(record) = serde_json::from_slice::<VoteRecord>(v.value()) {
            out.push(record);
        }
    }
    Ok(out)
}

/// Message refs replying to `root`, oldest first.
pub fn get_thread(db: &redb::Database, root: &Ref) -> Result<Vec<Ref>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(kv::SOCIAL)?;
    let prefix = thread_time_prefix(root);
    let mut upper = prefix.clone();
    upper.push(0xff);
    let mut out = Vec::new();
    for entry in table.range(prefix.as_slice()..=upper.as_slice())? {
        let (_, v) = entry?;
        if let Ok(r) = Ref::from_db_key(v.value()) {
            out.push(r);
        }
    }
    Ok(out)
}
