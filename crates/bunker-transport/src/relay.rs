//! Relay pool abstraction.
//!
//! The engine talks to relays through this trait: publish an envelope to a
//! set of relays, or subscribe to envelopes addressed to an identity.
//! Implementations may speak the real relay wire protocol; the in-memory
//! network below is enough for local wiring and tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use bunker_core::{PublicKey, SignedEvent};

use crate::error::Result;

/// What a subscription asks for: envelopes of one kind addressed to one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub kind: u16,
    pub recipient: PublicKey,
}

impl SubscribeFilter {
    /// Whether an event satisfies this filter.
    pub fn matches(&self, event: &SignedEvent) -> bool {
        event.kind == self.kind && event.recipient() == Some(self.recipient)
    }
}

/// Outcome of publishing to a set of relays.
#[derive(Debug, Clone, Default)]
pub struct PublishReceipt {
    /// Relays that accepted the event.
    pub acks: Vec<String>,
    /// Relays that did not, with the reason.
    pub fails: Vec<(String, String)>,
}

impl PublishReceipt {
    /// Delivery counts as successful if any relay accepted.
    pub fn ok(&self) -> bool {
        !self.acks.is_empty()
    }
}

/// A pool of relay connections.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RelayPool: Send + Sync {
    /// Publish an event to the given relays. Never fails outright on a
    /// partial outage; the receipt says who accepted.
    async fn publish(&self, relays: &[String], event: &SignedEvent) -> Result<PublishReceipt>;

    /// Subscribe on the given relays, delivering matching events into
    /// `sink` until the sink is dropped.
    ///
    /// Resolves once the subscription is live on at least one relay.
    async fn subscribe(
        &self,
        relays: &[String],
        filter: SubscribeFilter,
        sink: mpsc::Sender<SignedEvent>,
    ) -> Result<()>;
}

/// An in-memory relay network for tests and local wiring.
pub mod memory {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    struct Subscription {
        relays: HashSet<String>,
        filter: SubscribeFilter,
        sink: mpsc::Sender<SignedEvent>,
    }

    /// A set of named relays that forward published events to matching
    /// subscribers. Relays can be taken down and brought back to simulate
    /// outages.
    pub struct MemoryRelayNetwork {
        live: RwLock<HashSet<String>>,
        subscriptions: RwLock<Vec<Subscription>>,
    }

    impl MemoryRelayNetwork {
        /// Create a network with the given relays live.
        pub fn new<I, S>(relays: I) -> Arc<Self>
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Arc::new(Self {
                live: RwLock::new(relays.into_iter().map(Into::into).collect()),
                subscriptions: RwLock::new(Vec::new()),
            })
        }

        /// Bring a relay up.
        pub async fn add_relay(&self, relay: impl Into<String>) {
            self.live.write().await.insert(relay.into());
        }

        /// Take a relay down. Existing subscriptions stay registered and
        /// resume receiving if it comes back.
        pub async fn remove_relay(&self, relay: &str) {
            self.live.write().await.remove(relay);
        }
    }

    #[async_trait]
    impl RelayPool for MemoryRelayNetwork {
        async fn publish(&self, relays: &[String], event: &SignedEvent) -> Result<PublishReceipt> {
            let live = self.live.read().await;
            let mut receipt = PublishReceipt::default();
            for relay in relays {
                if live.contains(relay) {
                    receipt.acks.push(relay.clone());
                } else {
                    receipt
                        .fails
                        .push((relay.clone(), "relay unreachable".into()));
                }
            }
            drop(live);

            if receipt.ok() {
                let mut subscriptions = self.subscriptions.write().await;
                // Each subscriber sees the event at most once, no matter how
                // many relays it shares with the publisher.
                subscriptions.retain(|sub| !sub.sink.is_closed());
                for sub in subscriptions.iter() {
                    let reachable = receipt.acks.iter().any(|r| sub.relays.contains(r));
                    if reachable && sub.filter.matches(event) {
                        let _ = sub.sink.send(event.clone()).await;
                    }
                }
            }
            Ok(receipt)
        }

        async fn subscribe(
            &self,
            relays: &[String],
            filter: SubscribeFilter,
            sink: mpsc::Sender<SignedEvent>,
        ) -> Result<()> {
            self.subscriptions.write().await.push(Subscription {
                relays: relays.iter().cloned().collect(),
                filter,
                sink,
            });
            Ok(())
        }
    }
}
