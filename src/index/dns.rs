//! DNS-name claim index: tracks which feed most recently claimed a given
//! name, last-claim-wins.

use redb::WriteTransaction;

use crate::error::Result;
use crate::kv;
use crate::message::SignedMessage;
use crate::store::hooks::Hook;

fn name_key(name: &str) -> Vec<u8> {
    let mut key = b"\0dns\0".to_vec();
    key.extend_from_slice(name.to_ascii_lowercase().as_bytes());
    key
}

pub struct DnsHook;

impl Hook for DnsHook {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn on_message(&self, txn: &WriteTransaction, msg: &SignedMessage) -> Result<()> {
        if let Some(crate::body::Body::Dns { name }) = crate::body::Body::decode(&msg.message.content) {
            let mut table = txn.open_table(kv::DNS)?;
            table.insert(name_key(&name).as_slice(), msg.message.author.db_key().as_slice())?;
        }
        Ok(())
    }

    fn clear(&self, txn: &WriteTransaction) -> Result<()> {
        txn.delete_table(kv::DNS)?;
        txn.open_table(kv::DNS)?;
        Ok(())
    }
}
