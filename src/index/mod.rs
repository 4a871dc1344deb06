//! Index plug-ins: each owns one or more tables in the embedded database
//! and a [`crate::store::hooks::Hook`] that keeps them in sync with the
//! feed store as messages are appended.

pub mod channels;
pub mod dns;
pub mod git;
pub mod graph;
pub mod pubs;
pub mod social;

use crate::store::{Plugin, StoreBuilder};

/// Registers every built-in index plug-in. Consumers that want a subset can
/// build their own `StoreBuilder` with individual `Plugin`s instead.
pub fn register_all(builder: StoreBuilder) -> StoreBuilder {
    builder
        .with_plugin(Plugin { hook: Box::new(graph::GraphHook) })
        .with_plugin(Plugin { hook: Box::new(channels::ChannelsHook) })
        .with_plugin(Plugin { hook: Box::new(social::SocialHook) })
        .with_plugin(Plugin { hook: Box::new(git::GitHook) })
        .with_plugin(Plugin { hook: Box::new(dns::DnsHook) })
        .with_plugin(Plugin { hook: Box::new(pubs::PubsHook) })
}
