//! # Balance Resolver
//!
//! Best-effort cross-node balance read. Not part of the commit path and never
//! writes to the account store.
//!
//! The resolver seeds its answer with the local snapshot, asks every peer for
//! theirs and waits until all answered, `max_balance_responses` answers came
//! in, or the balance timeout passed. The highest-height snapshot wins.
//!
//! When some peer reported an older snapshot (or none), the winner is pushed
//! out as a signed `BalanceUpdate`. Receivers keep it in their
//! [`BalanceCache`], which is a read cache only.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::NodeContext;
use crate::identity::AccountId;
use crate::ledger::Account;
use crate::network::bus::{deadline_after, Topic};
use crate::network::messages::{BalanceRequest, BalanceResponse, BalanceUpdate, Message, Signed};
use crate::transfer::TransferError;

// ---------------------------------------------------------------------------
// BalanceCache
// ---------------------------------------------------------------------------

/// Bounded map of the freshest snapshots seen through balance traffic.
#[derive(Debug)]
pub struct BalanceCache {
    entries: DashMap<AccountId, (Account, Instant)>,
    capacity: usize,
}

impl BalanceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// Keep `account` unless a snapshot at the same or a greater height is
    /// already cached. Evicts the oldest entry when full.
    pub fn insert(&self, account: Account) -> bool {
        if !self.entries.contains_key(&account.id) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        match self.entries.entry(account.id) {
            Entry::Occupied(mut entry) => {
                if entry.get().0.height >= account.height {
                    return false;
                }
                entry.insert((account, Instant::now()));
                true
            }
            Entry::Vacant(slot) => {
                slot.insert((account, Instant::now()));
                true
            }
        }
    }

    pub fn get(&self, id: &AccountId) -> Option<Account> {
        self.entries.get(id).map(|entry| entry.0.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().1)
            .map(|entry| *entry.key());
        if let Some(id) = oldest {
            self.entries.remove(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// BalanceResolver
// ---------------------------------------------------------------------------

pub struct BalanceResolver {
    ctx: Arc<NodeContext>,
    cache: BalanceCache,
}

impl BalanceResolver {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        let cache = BalanceCache::new(ctx.config.balance_cache_capacity);
        Self { ctx, cache }
    }

    /// Freshest snapshot of `account` known to this node or its peers.
    pub async fn resolve(&self, account: &AccountId) -> Result<Option<Account>, TransferError> {
        let local = self.ctx.accounts.find(account);
        let mut waiting: HashSet<_> = self.ctx.topology.peer_ids().into_iter().collect();
        if waiting.is_empty() {
            return Ok(local);
        }

        let correlation = Uuid::new_v4();
        let mut replies = self.ctx.replies.subscribe(correlation);
        let request = self
            .ctx
            .seal(BalanceRequest {
                correlation,
                account: *account,
                requester: self.ctx.node_id().clone(),
            })
            .map_err(TransferError::system)?;
        if let Err(e) = self
            .ctx
            .bus
            .publish(Topic::BalanceRequest, Message::Balance(request))
            .await
        {
            warn!(account = %account, error = %e, "balance query not published, answering locally");
            return Ok(local);
        }

        let limit = self.ctx.config.max_balance_responses;
        let deadline = deadline_after(self.ctx.config.balance_timeout());
        let mut reported: Vec<Option<Account>> = Vec::new();
        while !waiting.is_empty() && reported.len() < limit {
            let Some(message) = replies.recv_until(deadline).await else {
                break;
            };
            let Message::BalanceReply(reply) = message else {
                continue;
            };
            if reply.body.account != *account || !waiting.contains(&reply.signer) {
                continue;
            }
            if let Err(e) = self.ctx.authenticate(&reply) {
                warn!(account = %account, error = %e, "dropping unauthenticated balance response");
                continue;
            }
            waiting.remove(&reply.signer);
            reported.push(reply.body.snapshot.filter(|s| s.id == *account));
        }

        let best = local
            .iter()
            .chain(reported.iter().flatten())
            .max_by_key(|snapshot| snapshot.height)
            .cloned();
        debug!(
            account = %account,
            responses = reported.len(),
            height = best.as_ref().map(|b| b.height),
            "balance resolved"
        );

        if let Some(best) = &best {
            let behind = reported
                .iter()
                .any(|s| s.as_ref().map_or(true, |s| s.height < best.height));
            if behind {
                self.push_update(best).await;
            }
            self.cache.insert(best.clone());
        }
        Ok(best)
    }

    /// Latest snapshot seen through balance traffic.
    pub fn cached(&self, account: &AccountId) -> Option<Account> {
        self.cache.get(account)
    }

    async fn push_update(&self, account: &Account) {
        let update = match self.ctx.seal(BalanceUpdate {
            account: account.clone(),
        }) {
            Ok(signed) => signed,
            Err(e) => {
                error!(error = %e, "failed to sign balance update");
                return;
            }
        };
        if let Err(e) = self
            .ctx
            .bus
            .publish(Topic::BalanceUpdate, Message::BalanceUpdate(update))
            .await
        {
            warn!(account = %account.id, error = %e, "failed to publish balance update");
        }
    }

    // -----------------------------------------------------------------------
    // Peer side
    // -----------------------------------------------------------------------

    pub async fn handle_request(&self, request: Signed<BalanceRequest>) {
        if let Err(e) = self.ctx.authenticate(&request) {
            warn!(signer = %request.signer, error = %e, "dropping unauthenticated balance request");
            return;
        }
        if request.body.requester != request.signer {
            warn!(
                signer = %request.signer,
                requester = %request.body.requester,
                "balance request names a different requester"
            );
            return;
        }

        let reply = BalanceResponse {
            correlation: request.body.correlation,
            account: request.body.account,
            snapshot: self.ctx.accounts.find(&request.body.account),
        };
        let reply = match self.ctx.seal(reply) {
            Ok(signed) => signed,
            Err(e) => {
                error!(error = %e, "failed to sign balance response");
                return;
            }
        };
        if let Err(e) = self
            .ctx
            .bus
            .send_to(&request.body.requester, Message::BalanceReply(reply))
            .await
        {
            warn!(to = %request.body.requester, error = %e, "failed to deliver balance response");
        }
    }

    pub fn handle_update(&self, update: &Signed<BalanceUpdate>) {
        if let Err(e) = self.ctx.authenticate(update) {
            warn!(signer = %update.signer, error = %e, "dropping unauthenticated balance update");
            return;
        }
        self.cache.insert(update.body.account.clone());
    }
}
