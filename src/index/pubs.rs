//! Known-pub dial table.
//!
//! Populated both from gossiped `"pub"` messages (any feed can announce a
//! pub) and directly via [`add_pub`] when accepting a pub invite. The
//! replication dial loop reads this table to find peers to connect to.

use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kv;
use crate::message::SignedMessage;
use crate::ref_::Ref;
use crate::store::hooks::Hook;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubRecord {
    pub host: String,
    pub port: u16,
    pub key: Ref,
}

fn pub_key(key: &Ref) -> Vec<u8> {
    key.db_key()
}

pub fn add_pub(db: &redb::Database, record: &PubRecord) -> Result<()> {
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(kv::PUBS)?;
        let buf = serde_json::to_vec(record)?;
        table.insert(pub_key(&record.key).as_slice(), buf.as_slice())?;
    }
    txn.commit()?;
    Ok(())
}

pub fn list_pubs(db: &redb::Database) -> Result<Vec<PubRecord>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(kv::PUBS)?;
    let mut out = Vec::new();
    for entry in table.iter()? {
        let (_, v) = entry?;
        if let Ok(record) = serde_json::from_slice(v.value()) {
            out.push(record);
        }
    }
    Ok(out)
}

pub struct PubsHook;

impl Hook for PubsHook {
    fn name(&self) -> &'static str {
        "pubs"
    }

    fn on_message(&self, txn: &WriteTransaction, msg: &SignedMessage) -> Result<()> {
        if let Some(crate::body::Body::Pub { address }) = crate::body::Body::decode(&msg.message.content) {
            let mut table = txn.open_table(kv::PUBS)?;
            let record = PubRecord {
                host: address.host,
                port: address.port,
                key: address.key.clone(),
            };
            let buf = serde_json::to_vec(&record)?;
            table.insert(pub_key(&address.key).as_slice(), buf.as_slice())?;
        }
        Ok(())
    }

    fn clear(&self, txn: &WriteTransaction) -> Result<()> {
        txn.delete_table(kv::PUBS)?;
        txn.open_table(kv::PUBS)?;
        Ok(())
    }
}
