//! Owner lookup used when merging schedule records.

use std::collections::{HashMap, HashSet};

use database::Account;

use crate::merge::MergeResult;

/// Accounts by handle.
#[derive(Debug, Clone, Default)]
pub struct OwnerIndex {
    by_handle: HashMap<String, Account>,
    /// Handles whose account the pass purges.
    purged: HashSet<String>,
}

impl OwnerIndex {
    /// Index a set of accounts.
    pub fn from_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            by_handle: accounts
                .into_iter()
                .map(|account| (account.handle.clone(), account))
                .collect(),
            purged: HashSet::new(),
        }
    }

    /// Index the accounts as they will be once an account merge is committed:
    /// purged accounts are dropped and materialised ones added.
    pub fn after_merge(accounts: Vec<Account>, merged: &MergeResult<Account>) -> Self {
        let mut index = Self::from_accounts(accounts);
        for account in merged.updates.iter().chain(&merged.inserts) {
            index
                .by_handle
                .insert(account.handle.clone(), account.clone());
        }
        for account in &merged.deletes {
            index.by_handle.remove(&account.handle);
            index.purged.insert(account.handle.clone());
        }
        index
    }

    /// Whether the account behind `handle` is purged by this pass, taking
    /// its schedule with it.
    pub fn is_purged(&self, handle: &str) -> bool {
        self.purged.contains(handle.trim())
    }

    pub fn get(&self, handle: &str) -> Option<&Account> {
        self.by_handle.get(handle.trim())
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}
