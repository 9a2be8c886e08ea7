//! # Account Lock Cache
//!
//! At most one transfer may be in flight per account on this node. A lock
//! remembers which transfer owns it, so a late outcome for transfer A can
//! never free an account that transfer B has since locked.
//!
//! Locks are taken in two places:
//!
//! - the coordinating node locks the sender before it talks to anyone,
//!   through an [`AccountLockGuard`] that releases on every exit path;
//! - peers lock the accounts referenced by prepare and confirmation
//!   requests, and release them when the settlement or failure record for
//!   that transfer arrives.
//!
//! A peer whose coordinator died never sees an outcome, so
//! [`AccountLockCache::expire_stale`] sweeps locks older than a TTL.
//!
//! There is no ordering across accounts. Two transfers on disjoint accounts
//! proceed independently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::identity::AccountId;
use crate::transfer::TransferId;

#[derive(Debug, Clone)]
struct LockEntry {
    owner: TransferId,
    locked_at: Instant,
}

#[derive(Debug, Default)]
pub struct AccountLockCache {
    locks: DashMap<AccountId, LockEntry>,
}

impl AccountLockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark `account` as in progress for `owner`.
    ///
    /// Returns `true` if the lock was taken, or was already held by the same
    /// transfer. Returns `false` if another transfer holds it.
    pub fn try_lock(&self, account: &AccountId, owner: &TransferId) -> bool {
        match self.locks.entry(*account) {
            Entry::Occupied(entry) => entry.get().owner == *owner,
            Entry::Vacant(slot) => {
                slot.insert(LockEntry {
                    owner: owner.clone(),
                    locked_at: Instant::now(),
                });
                debug!(account = %account, transfer = %owner, "account locked");
                true
            }
        }
    }

    /// Unconditionally clear the lock on `account`.
    pub fn unlock(&self, account: &AccountId) {
        if self.locks.remove(account).is_some() {
            debug!(account = %account, "account unlocked");
        }
    }

    /// Clear the lock on `account` only if `owner` holds it.
    pub fn release(&self, account: &AccountId, owner: &TransferId) -> bool {
        let released = self
            .locks
            .remove_if(account, |_, entry| entry.owner == *owner)
            .is_some();
        if released {
            debug!(account = %account, transfer = %owner, "account lock released");
        }
        released
    }

    /// The transfer currently holding `account`, if any.
    pub fn holder(&self, account: &AccountId) -> Option<TransferId> {
        self.locks.get(account).map(|entry| entry.owner.clone())
    }

    pub fn is_locked(&self, account: &AccountId) -> bool {
        self.locks.contains_key(account)
    }

    /// Whether `account` is held by a transfer other than `owner`.
    pub fn is_locked_by_other(&self, account: &AccountId, owner: &TransferId) -> bool {
        self.locks
            .get(account)
            .map(|entry| entry.owner != *owner)
            .unwrap_or(false)
    }

    /// Drop every lock older than `ttl`. Returns how many were swept.
    pub fn expire_stale(&self, ttl: Duration) -> usize {
        let before = self.locks.len();
        self.locks.retain(|account, entry| {
            let keep = entry.locked_at.elapsed() < ttl;
            if !keep {
                warn!(account = %account, transfer = %entry.owner, "sweeping stale account lock");
            }
            keep
        });
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Take the lock and return a guard that releases it on drop.
    pub fn guard(
        self: &Arc<Self>,
        account: &AccountId,
        owner: &TransferId,
    ) -> Option<AccountLockGuard> {
        if !self.try_lock(account, owner) {
            return None;
        }
        Some(AccountLockGuard {
            cache: Arc::clone(self),
            account: *account,
            owner: owner.clone(),
        })
    }
}

/// Releases its account lock when dropped, unless the lock has meanwhile
/// been handed to another transfer.
#[derive(Debug)]
pub struct AccountLockGuard {
    cache: Arc<AccountLockCache>,
    account: AccountId,
    owner: TransferId,
}

impl AccountLockGuard {
    pub fn account(&self) -> &AccountId {
        &self.account
    }
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        self.cache.release(&self.account, &self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;
    use crate::identity::Curve;

    fn account() -> AccountId {
        AccountId::from_public_key(Curve::Ed25519, &Keypair::generate().public_key())
    }

    fn transfer() -> TransferId {
        TransferId::new(Keypair::generate().sign(b"t"))
    }

    #[test]
    fn second_transfer_cannot_lock() {
        let cache = AccountLockCache::new();
        let (acct, a, b) = (account(), transfer(), transfer());
        assert!(cache.try_lock(&acct, &a));
        assert!(!cache.try_lock(&acct, &b));
        assert_eq!(cache.holder(&acct), Some(a.clone()));
        assert!(cache.is_locked_by_other(&acct, &b));
        assert!(!cache.is_locked_by_other(&acct, &a));
    }

    #[test]
    fn relock_by_owner_is_idempotent() {
        let cache = AccountLockCache::new();
        let (acct, a) = (account(), transfer());
        assert!(cache.try_lock(&acct, &a));
        assert!(cache.try_lock(&acct, &a));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn release_requires_matching_owner() {
        let cache = AccountLockCache::new();
        let (acct, a, b) = (account(), transfer(), transfer());
        cache.try_lock(&acct, &a);
        assert!(!cache.release(&acct, &b));
        assert!(cache.is_locked(&acct));
        assert!(cache.release(&acct, &a));
        assert!(!cache.is_locked(&acct));
    }

    #[test]
    fn unlock_is_unconditional() {
        let cache = AccountLockCache::new();
        let (acct, a) = (account(), transfer());
        cache.try_lock(&acct, &a);
        cache.unlock(&acct);
        assert!(cache.is_empty());
    }

    #[test]
    fn distinct_accounts_lock_independently() {
        let cache = AccountLockCache::new();
        let (x, y, a, b) = (account(), account(), transfer(), transfer());
        assert!(cache.try_lock(&x, &a));
        assert!(cache.try_lock(&y, &b));
    }

    #[test]
    fn guard_releases_on_drop() {
        let cache = Arc::new(AccountLockCache::new());
        let (acct, a, b) = (account(), transfer(), transfer());
        {
            let guard = cache.guard(&acct, &a).unwrap();
            assert_eq!(guard.account(), &acct);
            assert!(cache.guard(&acct, &b).is_none());
        }
        assert!(!cache.is_locked(&acct));
    }

    #[test]
    fn guard_does_not_free_a_lock_it_no_longer_owns() {
        let cache = Arc::new(AccountLockCache::new());
        let (acct, a, b) = (account(), transfer(), transfer());
        let guard = cache.guard(&acct, &a).unwrap();
        cache.release(&acct, &a);
        assert!(cache.try_lock(&acct, &b));
        drop(guard);
        assert_eq!(cache.holder(&acct), Some(b));
    }

    #[test]
    fn expire_stale_sweeps_old_locks() {
        let cache = AccountLockCache::new();
        cache.try_lock(&account(), &transfer());
        cache.try_lock(&account(), &transfer());
        assert_eq!(cache.expire_stale(Duration::from_secs(3600)), 0);
        assert_eq!(cache.expire_stale(Duration::ZERO), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_lockers_get_exactly_one_winner() {
        let cache = Arc::new(AccountLockCache::new());
        let acct = account();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let owner = transfer();
                std::thread::spawn(move || cache.try_lock(&acct, &owner))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
