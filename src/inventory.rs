//! Inventories, equipped titles and the appraisal workflow
//!
//! Owned instances are kept in display order (titles, collectibles, effects,
//! consumables, vehicles) so a 1-based index from a listing always resolves to
//! the same instance. An instance under appraisal lives only in the pending
//! set until it is valued, and is then returned to its owner with the
//! appraisal attached.

use crate::catalog::{self, CatalogItem, Category, Uniqueness};
use crate::config::AppraisalConfig;
use crate::economy::Ledger;
use crate::errors::{CommandError, CommandResult};
use crate::identity::user_key;
use crate::storage::{RecordSet, Snapshot};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appraisal {
    pub value: u64,
    pub reason: String,
}

/// One owned instance of a catalog item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedItem {
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appraisal: Option<Appraisal>,
}

impl OwnedItem {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            appraisal: None,
        }
    }

    pub fn catalog(&self) -> Option<&'static CatalogItem> {
        catalog::item(&self.item_id)
    }

    /// Appraised value if there is one, otherwise the resale value
    pub fn sell_value(&self) -> u64 {
        match (&self.appraisal, self.catalog()) {
            (Some(appraisal), _) => appraisal.value,
            (None, Some(item)) => item.resale_value(),
            (None, None) => 0,
        }
    }

    fn rank(&self) -> u8 {
        self.catalog()
            .map_or(u8::MAX, |item| item.category.display_rank())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAppraisal {
    pub id: String,
    pub username: String,
    pub item: OwnedItem,
    pub original_price: u64,
    pub fee: u64,
    pub return_at: DateTime<Utc>,
}

impl PendingAppraisal {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.return_at <= now
    }

    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.return_at - now).num_seconds().max(0) as u64
    }
}

/// Which part of an inventory a command works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shelf {
    /// Everything except vehicles
    Items,
    Vehicles,
    All,
}

impl Shelf {
    fn holds(self, item: &OwnedItem) -> bool {
        let is_vehicle = item
            .catalog()
            .is_some_and(|c| c.category == Category::Vehicle);
        match self {
            Shelf::Items => !is_vehicle,
            Shelf::Vehicles => is_vehicle,
            Shelf::All => true,
        }
    }
}

/// A listed instance with its 1-based position on the shelf
#[derive(Debug, Clone, Copy)]
pub struct Listed<'a> {
    pub index: usize,
    pub owned: &'a OwnedItem,
    pub item: &'static CatalogItem,
}

#[derive(Debug, Clone)]
struct Holder {
    name: String,
    items: Vec<OwnedItem>,
}

#[derive(Debug, Clone)]
struct Equip {
    name: String,
    item_id: String,
}

/// Result of a successful sale
#[derive(Debug, Clone, PartialEq)]
pub struct Sale {
    pub item: &'static CatalogItem,
    pub price: u64,
    pub appraised: bool,
    pub balance: u64,
}

#[derive(Debug, Default)]
pub struct Inventories {
    holders: HashMap<String, Holder>,
    equipped: HashMap<String, Equip>,
    pending: BTreeMap<String, PendingAppraisal>,
    dirty: BTreeSet<RecordSet>,
}

impl Inventories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records, dropping ids the catalog no longer knows
    pub fn restore(snapshot: &Snapshot) -> Self {
        let mut inv = Self::new();
        for (name, items) in &snapshot.inventories {
            for owned in items {
                if owned.catalog().is_none() {
                    warn!(user = %name, item = %owned.item_id, "Dropping unknown catalog item");
                    continue;
                }
                inv.add(name, owned.clone());
            }
        }
        for (name, item_id) in &snapshot.equipped {
            if inv.has_item(name, item_id) {
                inv.equipped.insert(
                    user_key(name),
                    Equip {
                        name: name.clone(),
                        item_id: item_id.clone(),
                    },
                );
            }
        }
        for (id, pending) in &snapshot.pending_appraisals {
            if pending.item.catalog().is_none() {
                warn!(appraisal = %id, item = %pending.item.item_id, "Dropping appraisal of unknown item");
                continue;
            }
            inv.pending.insert(id.clone(), pending.clone());
        }
        inv.dirty.clear();
        inv
    }

    /// Write every record set this store owns into `snapshot`
    pub fn fill_snapshot(&self, snapshot: &mut Snapshot) {
        snapshot.inventories = self
            .holders
            .values()
            .filter(|h| !h.items.is_empty())
            .map(|h| (h.name.clone(), h.items.clone()))
            .collect();
        snapshot.equipped = self
            .equipped
            .values()
            .map(|e| (e.name.clone(), e.item_id.clone()))
            .collect();
        snapshot.pending_appraisals = self.pending.clone();
    }

    /// Record sets changed since the last call
    pub fn take_dirty(&mut self) -> BTreeSet<RecordSet> {
        std::mem::take(&mut self.dirty)
    }

    fn holder_mut(&mut self, user: &str) -> &mut Holder {
        self.holders.entry(user_key(user)).or_insert_with(|| Holder {
            name: user.to_string(),
            items: Vec::new(),
        })
    }

    fn items_of(&self, user: &str) -> &[OwnedItem] {
        self.holders
            .get(&user_key(user))
            .map_or(&[][..], |h| h.items.as_slice())
    }

    /// Owned instances on a shelf, in display order
    pub fn list(&self, user: &str, shelf: Shelf) -> Vec<Listed<'_>> {
        self.items_of(user)
            .iter()
            .filter(|owned| shelf.holds(owned))
            .filter_map(|owned| owned.catalog().map(|item| (owned, item)))
            .enumerate()
            .map(|(i, (owned, item))| Listed {
                index: i + 1,
                owned,
                item,
            })
            .collect()
    }

    /// Every user with a non-empty shelf, by display name
    pub fn everyone(&self, shelf: Shelf) -> Vec<(String, Vec<Listed<'_>>)> {
        let mut all: Vec<_> = self
            .holders
            .values()
            .map(|h| (h.name.clone(), self.list(&h.name, shelf)))
            .filter(|(_, items)| !items.is_empty())
            .collect();
        all.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));
        all
    }

    pub fn has_item(&self, user: &str, item_id: &str) -> bool {
        self.items_of(user).iter().any(|o| o.item_id == item_id)
    }

    /// Current owner of an item id, including items out for appraisal
    pub fn owner_of(&self, item_id: &str) -> Option<String> {
        self.holders
            .values()
            .find(|h| h.items.iter().any(|o| o.item_id == item_id))
            .map(|h| h.name.clone())
            .or_else(|| {
                self.pending
                    .values()
                    .find(|p| p.item.item_id == item_id)
                    .map(|p| p.username.clone())
            })
    }

    /// Apply the catalog's uniqueness policy for `user` acquiring `item`
    pub fn check_acquire(&self, user: &str, item: &CatalogItem) -> CommandResult {
        match item.category.uniqueness() {
            Uniqueness::Unlimited => Ok(()),
            Uniqueness::PerUser => {
                let pending = self
                    .pending
                    .values()
                    .any(|p| user_key(&p.username) == user_key(user) && p.item.item_id == item.id);
                if self.has_item(user, item.id) || pending {
                    Err(CommandError::AlreadyOwned(item.name.to_string()))
                } else {
                    Ok(())
                }
            }
            Uniqueness::Global => match self.owner_of(item.id) {
                Some(owner) if user_key(&owner) == user_key(user) => {
                    Err(CommandError::AlreadyOwned(item.name.to_string()))
                }
                Some(owner) => Err(CommandError::OwnedByOther {
                    name: item.name.to_string(),
                    owner,
                }),
                None => Ok(()),
            },
        }
    }

    /// Insert keeping display order; within a category, newest last
    pub fn add(&mut self, user: &str, owned: OwnedItem) {
        let rank = owned.rank();
        let holder = self.holder_mut(user);
        let at = holder
            .items
            .iter()
            .position(|o| o.rank() > rank)
            .unwrap_or(holder.items.len());
        holder.items.insert(at, owned);
        self.dirty.insert(RecordSet::Inventories);
    }

    /// Position in the user's full item list of the shelf entry `query` names:
    /// a 1-based index first, then an exact name or id, then a substring
    pub fn resolve(&self, user: &str, shelf: Shelf, query: &str) -> Option<usize> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        let items = self.items_of(user);
        let on_shelf: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, o)| shelf.holds(o) && o.catalog().is_some())
            .map(|(i, _)| i)
            .collect();

        if let Ok(n) = query.parse::<usize>() {
            if n >= 1 && n <= on_shelf.len() {
                return Some(on_shelf[n - 1]);
            }
        }

        let needle = query.to_lowercase();
        let matches = |exact: bool| {
            on_shelf.iter().copied().find(|&i| {
                let owned = &items[i];
                let name = owned
                    .catalog()
                    .map(|c| c.name.to_lowercase())
                    .unwrap_or_default();
                if exact {
                    name == needle || owned.item_id == needle
                } else {
                    name.contains(&needle) || owned.item_id.contains(&needle)
                }
            })
        };
        matches(true).or_else(|| matches(false))
    }

    /// The owned instance `query` names
    pub fn find(&self, user: &str, shelf: Shelf, query: &str) -> Option<&OwnedItem> {
        let pos = self.resolve(user, shelf, query)?;
        self.items_of(user).get(pos)
    }

    /// Remove the instance at `pos`, clearing the equipped title if it was the
    /// last copy
    fn take_at(&mut self, user: &str, pos: usize) -> Option<OwnedItem> {
        let key = user_key(user);
        let holder = self.holders.get_mut(&key)?;
        if pos >= holder.items.len() {
            return None;
        }
        let owned = holder.items.remove(pos);
        let still_owned = holder.items.iter().any(|o| o.item_id == owned.item_id);
        self.dirty.insert(RecordSet::Inventories);
        if !still_owned
            && self
                .equipped
                .get(&key)
                .is_some_and(|e| e.item_id == owned.item_id)
        {
            self.equipped.remove(&key);
            self.dirty.insert(RecordSet::Equipped);
        }
        Some(owned)
    }

    /// Remove the first instance matching `query` (index, name or id)
    pub fn remove(&mut self, user: &str, shelf: Shelf, query: &str) -> Option<OwnedItem> {
        let pos = self.resolve(user, shelf, query)?;
        self.take_at(user, pos)
    }

    pub fn equip(&mut self, user: &str, query: &str) -> CommandResult<&'static CatalogItem> {
        let pos = self
            .resolve(user, Shelf::Items, query)
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        let owned = &self.items_of(user)[pos];
        let item = owned
            .catalog()
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        if item.category != Category::Title {
            return Err(CommandError::Invalid(format!(
                "{} is not a title. Only titles can be equipped.",
                item.name
            )));
        }
        self.equipped.insert(
            user_key(user),
            Equip {
                name: user.to_string(),
                item_id: item.id.to_string(),
            },
        );
        self.dirty.insert(RecordSet::Equipped);
        Ok(item)
    }

    pub fn unequip(&mut self, user: &str) -> Option<&'static CatalogItem> {
        let equip = self.equipped.remove(&user_key(user))?;
        self.dirty.insert(RecordSet::Equipped);
        catalog::item(&equip.item_id)
    }

    pub fn equipped(&self, user: &str) -> Option<&'static CatalogItem> {
        self.equipped
            .get(&user_key(user))
            .and_then(|e| catalog::item(&e.item_id))
    }

    pub fn title_prefix(&self, user: &str) -> Option<&'static str> {
        self.equipped(user).and_then(|item| item.prefix)
    }

    /// Catalog vehicles nobody owns or has out for appraisal
    pub fn unowned_vehicles(&self) -> Vec<&'static CatalogItem> {
        catalog::vehicles()
            .filter(|car| self.owner_of(car.id).is_none())
            .collect()
    }

    /// Check uniqueness and funds, then debit and hand over the item
    pub fn buy(
        &mut self,
        ledger: &mut Ledger,
        user: &str,
        item: &'static CatalogItem,
    ) -> CommandResult<u64> {
        self.check_acquire(user, item)?;
        let balance = ledger.debit(user, item.price)?;
        self.add(user, OwnedItem::new(item.id));
        info!(user, item = item.id, price = item.price, "🛒 Purchase");
        Ok(balance)
    }

    pub fn sell(
        &mut self,
        ledger: &mut Ledger,
        user: &str,
        shelf: Shelf,
        query: &str,
    ) -> CommandResult<Sale> {
        let pos = self
            .resolve(user, shelf, query)
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        let price = self.items_of(user)[pos].sell_value();
        let owned = self
            .take_at(user, pos)
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        let item = owned
            .catalog()
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        let balance = if price > 0 {
            ledger.credit(user, price)?
        } else {
            ledger.balance(user)
        };
        Ok(Sale {
            item,
            price,
            appraised: owned.appraisal.is_some(),
            balance,
        })
    }

    /// Move one instance, appraisal included, from `from` to `to`
    pub fn gift(
        &mut self,
        from: &str,
        to: &str,
        shelf: Shelf,
        query: &str,
    ) -> CommandResult<OwnedItem> {
        if user_key(from) == user_key(to) {
            return Err(CommandError::Invalid("You can't gift to yourself!".into()));
        }
        let pos = self
            .resolve(from, shelf, query)
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        let item = self.items_of(from)[pos]
            .catalog()
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        // The giver's own copy does not block a global item from moving
        if item.category.uniqueness() == Uniqueness::PerUser {
            self.check_acquire(to, item)?;
        }
        let owned = self
            .take_at(from, pos)
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        self.add(to, owned.clone());
        Ok(owned)
    }

    /// Charge the fee, pull the item and open a pending appraisal
    #[allow(clippy::too_many_arguments)]
    pub fn request_appraisal<R: Rng + ?Sized>(
        &mut self,
        ledger: &mut Ledger,
        config: &AppraisalConfig,
        rng: &mut R,
        user: &str,
        shelf: Shelf,
        query: &str,
        now: DateTime<Utc>,
    ) -> CommandResult<PendingAppraisal> {
        let pos = self
            .resolve(user, shelf, query)
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        let item = self.items_of(user)[pos]
            .catalog()
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        let fee = config.fee_for(item.price);
        ledger.debit(user, fee)?;
        let owned = self
            .take_at(user, pos)
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;

        let delay = rng.gen_range(config.min_delay_secs..=config.max_delay_secs);
        let pending = PendingAppraisal {
            id: Uuid::new_v4().to_string(),
            username: self
                .holders
                .get(&user_key(user))
                .map_or_else(|| user.to_string(), |h| h.name.clone()),
            item: owned,
            original_price: item.price,
            fee,
            return_at: now + chrono::Duration::seconds(delay as i64),
        };
        self.pending.insert(pending.id.clone(), pending.clone());
        self.dirty.insert(RecordSet::PendingAppraisals);
        info!(user, item = item.id, fee, delay, "🔍 Appraisal requested");
        Ok(pending)
    }

    /// Return an appraised item to its owner; a no-op when `id` is unknown
    pub fn complete_appraisal(&mut self, id: &str, appraisal: Appraisal) -> Option<PendingAppraisal> {
        let mut pending = self.pending.remove(id)?;
        pending.item.appraisal = Some(appraisal);
        let owner = pending.username.clone();
        self.add(&owner, pending.item.clone());
        self.dirty.insert(RecordSet::PendingAppraisals);
        Some(pending)
    }

    pub fn pending(&self, id: &str) -> Option<&PendingAppraisal> {
        self.pending.get(id)
    }

    pub fn pending_for(&self, user: &str) -> Vec<&PendingAppraisal> {
        let key = user_key(user);
        self.pending
            .values()
            .filter(|p| user_key(&p.username) == key)
            .collect()
    }

    pub fn all_pending(&self) -> impl Iterator<Item = &PendingAppraisal> {
        self.pending.values()
    }
}
