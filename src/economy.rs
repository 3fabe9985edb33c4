//! Economy ledger
//!
//! Per-user balances keyed by username. Balances are unsigned and every
//! debit is checked before it is applied, so a failed debit never touches the
//! stored amount.

use crate::errors::{CommandError, CommandResult};
use crate::identity::user_key;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    name: String,
    balance: u64,
}

/// Balance ledger for every user the room has ever seen
#[derive(Debug)]
pub struct Ledger {
    starting_balance: u64,
    accounts: HashMap<String, Account>,
    beg_counts: HashMap<String, u32>,
    dirty: bool,
}

impl Ledger {
    pub fn new(starting_balance: u64) -> Self {
        Self {
            starting_balance,
            accounts: HashMap::new(),
            beg_counts: HashMap::new(),
            dirty: false,
        }
    }

    /// Rebuild a ledger from persisted balances
    pub fn restore(starting_balance: u64, balances: BTreeMap<String, u64>) -> Self {
        let mut ledger = Self::new(starting_balance);
        for (name, balance) in balances {
            ledger
                .accounts
                .insert(user_key(&name), Account { name, balance });
        }
        ledger
    }

    pub fn starting_balance(&self) -> u64 {
        self.starting_balance
    }

    fn account(&mut self, user: &str) -> &mut Account {
        let starting = self.starting_balance;
        let dirty = &mut self.dirty;
        self.accounts.entry(user_key(user)).or_insert_with(|| {
            *dirty = true;
            Account {
                name: user.to_string(),
                balance: starting,
            }
        })
    }

    /// Current balance, creating the account with the starting balance on first use
    pub fn balance(&mut self, user: &str) -> u64 {
        self.account(user).balance
    }

    /// Stored spelling of the account name, opening the account with `user`'s
    /// spelling on first use
    pub fn display_name(&mut self, user: &str) -> String {
        self.account(user).name.clone()
    }

    /// Balance without creating an account
    pub fn peek(&self, user: &str) -> u64 {
        self.accounts
            .get(&user_key(user))
            .map_or(self.starting_balance, |a| a.balance)
    }

    pub fn credit(&mut self, user: &str, amount: u64) -> CommandResult<u64> {
        if amount == 0 {
            return Err(CommandError::InvalidAmount);
        }
        let account = self.account(user);
        account.balance = account.balance.saturating_add(amount);
        let balance = account.balance;
        self.dirty = true;
        debug!(user, amount, balance, "credit");
        Ok(balance)
    }

    /// Remove funds; fails without mutation when the balance is too low
    pub fn debit(&mut self, user: &str, amount: u64) -> CommandResult<u64> {
        if amount == 0 {
            return Err(CommandError::InvalidAmount);
        }
        let account = self.account(user);
        if account.balance < amount {
            return Err(CommandError::InsufficientFunds {
                balance: account.balance,
            });
        }
        account.balance -= amount;
        let balance = account.balance;
        self.dirty = true;
        debug!(user, amount, balance, "debit");
        Ok(balance)
    }

    pub fn transfer(&mut self, from: &str, to: &str, amount: u64) -> CommandResult<()> {
        self.debit(from, amount)?;
        self.credit(to, amount)?;
        Ok(())
    }

    /// All known balances, richest first
    pub fn leaderboard(&self) -> Vec<(String, u64)> {
        let mut rows: Vec<(String, u64)> = self
            .accounts
            .values()
            .map(|a| (a.name.clone(), a.balance))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.accounts
            .values()
            .map(|a| (a.name.clone(), a.balance))
            .collect()
    }

    /// Returns true once after any mutation
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn record_beg(&mut self, user: &str) -> u32 {
        let count = self.beg_counts.entry(user_key(user)).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset_beg(&mut self, user: &str) {
        self.beg_counts.insert(user_key(user), 0);
    }
}

/// Parse a strictly positive whole-dollar amount
pub fn parse_amount(raw: &str) -> CommandResult<u64> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(CommandError::InvalidAmount),
        Ok(n) => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lazy_starting_balance() {
        let mut ledger = Ledger::new(20);
        assert_eq!(ledger.peek("alice"), 20);
        assert_eq!(ledger.balance("Alice"), 20);
        assert!(ledger.take_dirty());
        assert_eq!(ledger.balance("ALICE"), 20);
        assert!(!ledger.take_dirty());
    }

    #[test]
    fn test_failed_debit_is_atomic() {
        let mut ledger = Ledger::new(20);
        assert_eq!(
            ledger.debit("bob", 21),
            Err(CommandError::InsufficientFunds { balance: 20 })
        );
        assert_eq!(ledger.balance("bob"), 20);
        assert_eq!(ledger.debit("bob", 20), Ok(0));
        assert_eq!(ledger.debit("bob", 0), Err(CommandError::InvalidAmount));
    }

    #[test]
    fn test_transfer_fails_without_touching_either_side() {
        let mut ledger = Ledger::new(20);
        assert!(ledger.transfer("a", "b", 25).is_err());
        assert_eq!(ledger.balance("a"), 20);
        assert_eq!(ledger.balance("b"), 20);

        ledger.transfer("a", "b", 5).unwrap();
        assert_eq!(ledger.balance("a"), 15);
        assert_eq!(ledger.balance("b"), 25);
    }

    proptest! {
        #[test]
        fn prop_balance_equals_net_of_successful_mutations(
            ops in prop::collection::vec((any::<bool>(), 1u64..15), 0..200)
        ) {
            let mut ledger = Ledger::new(20);
            let mut expected: u64 = 20;
            for (is_credit, amount) in ops {
                if is_credit {
                    ledger.credit("carol", amount).unwrap();
                    expected += amount;
                } else if ledger.debit("carol", amount).is_ok() {
                    expected -= amount;
                } else {
                    prop_assert!(expected < amount);
                }
                prop_assert_eq!(ledger.peek("carol"), expected);
            }
        }
    }

    #[test]
    fn test_restore_preserves_display_names() {
        let mut balances = BTreeMap::new();
        balances.insert("Dana".to_string(), 99);
        let ledger = Ledger::restore(20, balances);
        assert_eq!(ledger.peek("dana"), 99);
        assert_eq!(ledger.leaderboard(), vec![("Dana".to_string(), 99)]);
    }

    #[test]
    fn test_display_name_keeps_first_spelling() {
        let mut ledger = Ledger::new(20);
        assert_eq!(ledger.display_name("Dana"), "Dana");
        assert!(ledger.take_dirty());
        assert_eq!(ledger.display_name("DANA"), "Dana");
        assert!(!ledger.take_dirty());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("10"), Ok(10));
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("ten").is_err());
    }
}
