//! Index plug-in hook pipeline.
//!
//! A plug-in registers a [`Hook`] at `OpenStore` time. Every hook runs
//! inside the same write transaction as the message insert that triggered
//! it; a hook returning an error aborts the whole transaction, so a
//! misbehaving index plug-in can never leave the store half-updated.

use redb::WriteTransaction;

use crate::error::Result;
use crate::message::SignedMessage;

pub trait Hook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once per newly inserted message, inside its write transaction.
    fn on_message(&self, txn: &WriteTransaction, msg: &SignedMessage) -> Result<()>;

    /// Called before replaying the global log during a rebuild so the
    /// plug-in can drop and recreate its own tables.
    fn clear(&self, txn: &WriteTransaction) -> Result<()>;
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub fn run_all(&self, txn: &WriteTransaction, msg: &SignedMessage) -> Result<()> {
        for hook in &self.hooks {
            hook.on_message(txn, msg)?;
        }
        Ok(())
    }

    pub fn clear_all(&self, txn: &WriteTransaction) -> Result<()> {
        for hook in &self.hooks {
            hook.clear(txn)?;
        }
        Ok(())
    }

    /// Run only the named hook. Returns `false` if no hook has that name.
    pub fn run_one(&self, txn: &WriteTransaction, name: &str, msg: &SignedMessage) -> Result<bool> {
        for hook in &self.hooks {
            if hook.name() == name {
                hook.on_message(txn, msg)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Clear only the named hook's tables. Returns `false` if no hook has
    /// that name.
    pub fn clear_one(&self, txn: &WriteTransaction, name: &str) -> Result<bool> {
        for hook in &self.hooks {
            if hook.name() == name {
                hook.clear(txn)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }
}
