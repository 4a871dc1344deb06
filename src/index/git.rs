//! Git-repo, git-update, and git-issue indexes, used by pub-hosted code
//! forges built on top of the feed store.

use redb::WriteTransaction;

use crate::error::Result;
use crate::kv;
use crate::message::SignedMessage;
use crate::store::hooks::Hook;

fn repo_key(repo: &crate::ref_::Ref) -> Vec<u8> {
    let mut key = b"\0repo\0".to_vec();
    key.extend_from_slice(&repo.db_key());
    key
}

pub struct GitHook;

impl Hook for GitHook {
    fn name(&self) -> &'static str {
        "git"
    }

    fn on_message(&self, txn: &WriteTransaction, msg: &SignedMessage) -> Result<()> {
        let mut table = txn.open_table(kv::GIT)?;
        let author_key = msg.message.author.db_key();
        match crate::body::Body::decode(&msg.message.content) {
            Some(crate::body::Body::GitRepo { .. }) => {
                let msg_key = msg
                    .key()
                    .map_err(|e| crate::error::Error::Validation(e.to_string()))?;
                let mut key = repo_key(&msg_key);
                key.extend_from_slice(&author_key);
                table.insert(key.as_slice(), &[][..])?;
            }
            Some(crate::body::Body::GitUpdate { repo }) => {
                let mut key = repo_key(&repo);
                key.push(b'u');
                key.extend_from_slice(&msg.message.sequence.to_be_bytes());
                table.insert(key.as_slice(), author_key.as_slice())?;
            }
            Some(crate::body::Body::GitIssue { repo, .. }) => {
                let mut key = repo_key(&repo);
                key.push(b'i');
                key.extend_from_slice(&msg.message.sequence.to_be_bytes());
                table.insert(key.as_slice(), author_key.as_slice())?;
            }
            _ => {}
        }
        Ok(())
    }

    fn clear(&self, txn: &WriteTransaction) -> Result<()> {
        txn.delete_table(kv::GIT)?;
        txn.open_table(kv::GIT)?;
        Ok(())
    }
}
