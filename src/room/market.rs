//! Economy, store, inventory and garage commands

use super::Room;
use crate::catalog::{self, CatalogItem, Category};
use crate::clock::TimerEvent;
use crate::errors::{CommandError, CommandResult};
use crate::events::ServerEvent;
use crate::identity::{user_key, ConnId};
use crate::inventory::{Listed, PendingAppraisal, Shelf};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

const RULE: &str = "├────────────────────────────────────────────┤";
const TOP: &str = "┌────────────────────────────────────────────┐";
const BOTTOM: &str = "└────────────────────────────────────────────┘";
const BOX_WIDTH: usize = 44;

const BEGGING: [&str; 5] = [
    "is begging for money... 🙏",
    "needs some cash! Anyone feeling generous?",
    "is down on their luck and asking for help",
    "asks: \"Spare some change?\"",
    "rattles an empty cup hopefully",
];

/// `1234567` -> `1,234,567`
pub(super) fn format_price(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn heading(title: &str) -> String {
    let title: String = title.chars().take(BOX_WIDTH).collect();
    let len = title.chars().count();
    let left = (BOX_WIDTH - len) / 2;
    format!("│{}{}{}│", " ".repeat(left), title, " ".repeat(BOX_WIDTH - len - left))
}

fn short_name(name: &str) -> String {
    if name.chars().count() > 18 {
        let cut: String = name.chars().take(16).collect();
        format!("{}..", cut)
    } else {
        name.to_string()
    }
}

fn category_heading(category: Category) -> &'static str {
    match category {
        Category::Title => "TITLES",
        Category::Collectible => "COLLECTIBLES",
        Category::Effect => "EFFECTS",
        Category::Consumable => "CONSUMABLES",
        Category::Vehicle => "VEHICLES",
    }
}

fn countdown(secs: u64) -> String {
    format!("{}m {}s", secs / 60, secs % 60)
}

/// 1-based index into `listing`, else a name or id lookup among `names`
fn pick<'a>(
    listing: &[&'a CatalogItem],
    names: &[&'a CatalogItem],
    query: &str,
) -> Option<&'a CatalogItem> {
    if let Ok(n) = query.trim().parse::<usize>() {
        if n >= 1 && n <= listing.len() {
            return Some(listing[n - 1]);
        }
    }
    catalog::find_in(names, query)
}

fn pending_lines(pending: &[&PendingAppraisal], now: DateTime<Utc>) -> Vec<String> {
    pending
        .iter()
        .filter_map(|p| {
            let item = p.item.catalog()?;
            Some(format!(
                "   {} - {} remaining",
                item.label(),
                countdown(p.remaining_secs(now))
            ))
        })
        .collect()
}

impl Room {
    fn tell_all(&self, conn: ConnId, lines: &[String]) {
        for line in lines {
            self.out.tell(conn, line);
        }
    }

    fn online_user(&self, name: &str) -> CommandResult<String> {
        self.sessions
            .find_online(name)
            .ok_or_else(|| CommandError::UnknownUser(name.to_string()))
    }

    pub(super) fn show_balances(&mut self, user: &str) -> CommandResult {
        let online: HashSet<String> = self
            .sessions
            .usernames()
            .iter()
            .map(|name| user_key(name))
            .collect();
        let rows: Vec<(String, u64)> = self
            .ledger
            .leaderboard()
            .into_iter()
            .filter(|(name, _)| online.contains(&user_key(name)))
            .collect();
        let text = rows
            .iter()
            .map(|(name, balance)| format!("{}: ${}", name, format_price(*balance)))
            .collect::<Vec<_>>()
            .join(" | ");
        self.out.broadcast(ServerEvent::Chat {
            user: user.to_string(),
            text: format!("[BALANCES] {}", text),
            title: self.inventories.title_prefix(user).map(str::to_string),
            time: crate::events::timestamp(),
        });
        self.repaint = true;
        Ok(())
    }

    pub(super) fn give(&mut self, user: &str, to: &str, amount: u64) -> CommandResult {
        let recipient = self.online_user(to)?;
        if user_key(&recipient) == user_key(user) {
            return Err(CommandError::Invalid(
                "You can't give money to yourself".into(),
            ));
        }
        self.ledger.transfer(user, &recipient, amount)?;
        info!(from = user, to = %recipient, amount, "💸 Transfer");
        self.out.announce(&format!(
            "{} gave ${} to {}",
            user,
            format_price(amount),
            recipient
        ));
        Ok(())
    }

    pub(super) fn beg(&mut self, user: &str) -> CommandResult {
        let count = self.ledger.record_beg(user);
        let line = BEGGING.choose(&mut self.rng).copied().unwrap_or(BEGGING[0]);
        self.out.broadcast(ServerEvent::Chat {
            user: user.to_string(),
            text: format!("{} {}", user, line),
            title: self.inventories.title_prefix(user).map(str::to_string),
            time: crate::events::timestamp(),
        });

        let threshold = self.rng.gen_range(3..=5);
        if count >= threshold {
            let reward = self.rng.gen_range(1..=3);
            self.ledger.credit(user, reward)?;
            self.ledger.reset_beg(user);
            self.clock.defer(
                Duration::from_secs(1),
                TimerEvent::Announce {
                    text: format!("A kind stranger gave {} ${}!", user, reward),
                },
            );
        }
        Ok(())
    }

    fn current_store(&self) -> Vec<&'static CatalogItem> {
        catalog::store_items(catalog::rotation_seed(Utc::now(), self.store_salt))
    }

    pub(super) fn show_store(&mut self, conn: ConnId, user: &str) -> CommandResult {
        let balance = self.ledger.balance(user);
        let mut lines = vec![
            TOP.to_string(),
            heading("WANCHAT STORE"),
            RULE.to_string(),
            format!("   Your balance: ${}", format_price(balance)),
            RULE.to_string(),
        ];
        for (i, item) in self.current_store().iter().enumerate() {
            let owned = if self.inventories.has_item(user, item.id) {
                " [OWNED]"
            } else {
                ""
            };
            lines.push(format!(
                "  {:>2}. {} {:<18} {:>12} {}{}",
                i + 1,
                item.emoji.unwrap_or(" "),
                short_name(item.name),
                format!("${}", format_price(item.price)),
                item.rarity.symbol(),
                owned
            ));
        }
        lines.push(RULE.to_string());
        lines.push("   /buy [#]  /sell [#]  /inventory".to_string());
        lines.push(format!(
            "   Stock refreshes in {}",
            countdown(u64::from(catalog::seconds_until_rotation(Utc::now())))
        ));
        lines.push(BOTTOM.to_string());
        self.tell_all(conn, &lines);
        Ok(())
    }

    pub(super) fn buy(&mut self, user: &str, query: &str) -> CommandResult {
        let stock = self.current_store();
        let item = pick(&stock, &stock, query)
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        self.inventories.buy(&mut self.ledger, user, item)?;
        self.out.announce(&format!(
            "{} purchased {} for ${}!",
            user,
            item.label(),
            format_price(item.price)
        ));
        Ok(())
    }

    pub(super) fn buy_car(&mut self, user: &str, query: &str) -> CommandResult {
        let available = self.inventories.unowned_vehicles();
        let every: Vec<&'static CatalogItem> = catalog::vehicles().collect();
        let car = pick(&available, &every, query)
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        self.inventories.buy(&mut self.ledger, user, car)?;
        self.out.announce(&format!(
            "🎉 {} just bought a {} for ${}!",
            user,
            car.label(),
            format_price(car.price)
        ));
        Ok(())
    }

    /// Refuse to let a car leave the garage while it is entered in a drag race
    fn ensure_not_racing(&self, user: &str, shelf: Shelf, query: &str) -> CommandResult {
        if shelf != Shelf::Vehicles {
            return Ok(());
        }
        let entered = self
            .inventories
            .find(user, shelf, query)
            .is_some_and(|owned| self.arena.drag.has_entered(user, &owned.item_id));
        if entered {
            return Err(CommandError::Invalid(
                "That car is entered in the drag race!".to_string(),
            ));
        }
        Ok(())
    }

    pub(super) fn sell(&mut self, user: &str, shelf: Shelf, query: &str) -> CommandResult {
        self.ensure_not_racing(user, shelf, query)?;
        let sale = self
            .inventories
            .sell(&mut self.ledger, user, shelf, query)?;
        info!(user, item = sale.item.id, price = sale.price, "💰 Sale");
        let basis = if sale.appraised {
            "appraised value"
        } else {
            "50% of original price"
        };
        self.out.announce(&format!(
            "💰 {} sold their {} for ${} ({})",
            user,
            sale.item.label(),
            format_price(sale.price),
            basis
        ));
        Ok(())
    }

    pub(super) fn gift(&mut self, user: &str, to: &str, shelf: Shelf, query: &str) -> CommandResult {
        let recipient = self.online_user(to)?;
        self.ensure_not_racing(user, shelf, query)?;
        let owned = self.inventories.gift(user, &recipient, shelf, query)?;
        let Some(item) = owned.catalog() else {
            return Ok(());
        };
        info!(from = user, to = %recipient, item = item.id, "🎁 Gift");
        let appraisal = owned
            .appraisal
            .as_ref()
            .map(|a| format!(" (appraised at ${})", format_price(a.value)))
            .unwrap_or_default();
        self.out.announce(&format!(
            "🎁 {} gave their {} to {}!{}",
            user,
            item.label(),
            recipient,
            appraisal
        ));
        Ok(())
    }

    pub(super) fn equip(&mut self, conn: ConnId, user: &str, query: &str) -> CommandResult {
        let title = self.inventories.equip(user, query)?;
        let prefix = title.prefix.unwrap_or(title.name);
        self.out.tell(
            conn,
            &format!(
                "Equipped {} title! Your name will now show as: {} {}",
                prefix, prefix, user
            ),
        );
        Ok(())
    }

    pub(super) fn unequip(&mut self, conn: ConnId, user: &str) -> CommandResult {
        let title = self
            .inventories
            .unequip(user)
            .ok_or_else(|| CommandError::Invalid("You don't have a title equipped".into()))?;
        self.out.tell(
            conn,
            &format!("Unequipped {} title.", title.prefix.unwrap_or(title.name)),
        );
        Ok(())
    }

    pub(super) fn appraise(&mut self, user: &str, shelf: Shelf, query: &str) -> CommandResult {
        self.ensure_not_racing(user, shelf, query)?;
        let now = Utc::now();
        let pending = self.inventories.request_appraisal(
            &mut self.ledger,
            &self.config.appraisal,
            &mut self.rng,
            user,
            shelf,
            query,
            now,
        )?;
        let Some(item) = pending.item.catalog() else {
            return Ok(());
        };
        let delay = pending.remaining_secs(now);
        self.schedule_appraisal(&pending.id, Duration::from_secs(delay));
        self.out.broadcast(ServerEvent::AppraisalStarted {
            user: pending.username.clone(),
            item: item.name.to_string(),
            fee: pending.fee,
            return_in_secs: delay,
        });
        self.out.announce(&format!(
            "🔍 {} sent their {} to be appraised! (Fee: ${}) Back in {}.",
            user,
            item.label(),
            format_price(pending.fee),
            countdown(delay)
        ));
        Ok(())
    }

    pub(super) fn show_pending_appraisals(&mut self, conn: ConnId, user: &str) -> CommandResult {
        let pending = self.inventories.pending_for(user);
        if pending.is_empty() {
            self.out.tell(conn, "Usage: /appraise [number or item name]");
            self.out.tell(conn, "You have no items currently being appraised.");
            return Ok(());
        }
        let mut lines = vec![TOP.to_string(), heading("PENDING APPRAISALS"), RULE.to_string()];
        lines.extend(pending_lines(&pending, Utc::now()));
        lines.push(BOTTOM.to_string());
        self.tell_all(conn, &lines);
        Ok(())
    }

    pub(super) fn show_inventory(&mut self, conn: ConnId, user: &str, target: &str) -> CommandResult {
        let own = user_key(target) == user_key(user);
        let listed = self.inventories.list(target, Shelf::Items);
        let pending = self.inventories.pending_for(target);
        if listed.is_empty() && pending.is_empty() {
            let lines = [
                TOP.to_string(),
                heading("INVENTORY EMPTY"),
                RULE.to_string(),
                "   Use /store to shop!".to_string(),
                BOTTOM.to_string(),
            ];
            self.tell_all(conn, &lines);
            return Ok(());
        }

        let title = if own {
            "YOUR INVENTORY".to_string()
        } else {
            format!("{}'S INVENTORY", target.to_uppercase())
        };
        let equipped = self.inventories.equipped(target).map(|item| item.id);
        let mut lines = vec![TOP.to_string(), heading(&title), RULE.to_string()];
        let mut section = None;
        for Listed { index, owned, item } in &listed {
            if section != Some(item.category) {
                section = Some(item.category);
                lines.push(format!("  {}", category_heading(item.category)));
            }
            let marker = if equipped == Some(item.id) { '*' } else { ' ' };
            let appraised = if owned.appraisal.is_some() { " 🔍" } else { "" };
            lines.push(format!(
                "  {}{:>2}. {} {:<18} (${}){}",
                marker,
                index,
                item.emoji.unwrap_or(" "),
                short_name(item.name),
                format_price(owned.sell_value()),
                appraised
            ));
        }
        let items_only: Vec<_> = pending
            .into_iter()
            .filter(|p| p.item.catalog().is_some_and(|c| c.category != Category::Vehicle))
            .collect();
        if !items_only.is_empty() {
            lines.push(RULE.to_string());
            lines.push("   🔍 BEING APPRAISED:".to_string());
            lines.extend(pending_lines(&items_only, Utc::now()));
        }
        lines.push(RULE.to_string());
        if own && listed.iter().any(|l| l.item.category == Category::Title) {
            lines.push("   /equip [#] to equip a title".to_string());
            lines.push("   /unequip to remove title".to_string());
        }
        lines.push("   /sell [#] to sell  /appraise [#] to appraise".to_string());
        lines.push("   * = currently equipped".to_string());
        lines.push(BOTTOM.to_string());
        self.tell_all(conn, &lines);
        Ok(())
    }

    pub(super) fn show_everyone(&mut self, conn: ConnId, shelf: Shelf) -> CommandResult {
        let (title, noun, empty) = match shelf {
            Shelf::Vehicles => ("ALL GARAGES", "car", "No one owns any cars yet!"),
            _ => ("ALL INVENTORIES", "item", "No one owns anything yet!"),
        };
        let mut lines = vec![TOP.to_string(), heading(title), RULE.to_string()];
        let everyone = self.inventories.everyone(shelf);
        if everyone.is_empty() {
            lines.push(format!("   {}", empty));
        }
        for (owner, items) in &everyone {
            let worth: u64 = items.iter().map(|l| l.owned.sell_value()).sum();
            lines.push(format!(
                "   {}: {} {}{} (worth ~${})",
                owner,
                items.len(),
                noun,
                if items.len() == 1 { "" } else { "s" },
                format_price(worth)
            ));
        }
        lines.push(BOTTOM.to_string());
        self.tell_all(conn, &lines);
        Ok(())
    }

    pub(super) fn show_dealership(&mut self, conn: ConnId, user: &str) -> CommandResult {
        let balance = self.ledger.balance(user);
        let mut lines = vec![
            TOP.to_string(),
            heading("🚗 DEALERSHIP 🚗"),
            RULE.to_string(),
            format!("   Your balance: ${}", format_price(balance)),
            RULE.to_string(),
        ];
        let available = self.inventories.unowned_vehicles();
        if available.is_empty() {
            lines.push("   No cars available! Check back later.".to_string());
        }
        for (i, car) in available.iter().enumerate() {
            lines.push(format!(
                "  {:>2}. {} {} {:<20} ${}",
                i + 1,
                car.rarity.symbol(),
                car.emoji.unwrap_or(" "),
                car.name,
                format_price(car.price)
            ));
            lines.push(format!("       {}", car.description));
        }
        lines.push(RULE.to_string());
        lines.push("   /buycar [#] to purchase  /garage to view your cars".to_string());
        lines.push(BOTTOM.to_string());
        self.tell_all(conn, &lines);
        Ok(())
    }

    pub(super) fn show_garage(&mut self, conn: ConnId, user: &str, target: &str) -> CommandResult {
        let own = user_key(target) == user_key(user);
        let title = if own {
            "🏎️ YOUR GARAGE 🏎️".to_string()
        } else {
            format!("🏎️ {}'S GARAGE 🏎️", target.to_uppercase())
        };
        let mut lines = vec![TOP.to_string(), heading(&title), RULE.to_string()];
        let cars = self.inventories.list(target, Shelf::Vehicles);
        if cars.is_empty() {
            lines.push(if own {
                "   Your garage is empty!".to_string()
            } else {
                "   This garage is empty!".to_string()
            });
            lines.push("   Visit /dealership to browse cars.".to_string());
        }
        for Listed { index, owned, item } in &cars {
            let value = match &owned.appraisal {
                Some(a) => format!("${} (appraised)", format_price(a.value)),
                None => format!("${}", format_price(item.price)),
            };
            lines.push(format!(
                "  {:>2}. {} {} {:<20} {}",
                index,
                item.rarity.symbol(),
                item.emoji.unwrap_or(" "),
                item.name,
                value
            ));
        }

        let in_shop: Vec<_> = self
            .inventories
            .pending_for(target)
            .into_iter()
            .filter(|p| p.item.catalog().is_some_and(|c| c.category == Category::Vehicle))
            .collect();
        if !in_shop.is_empty() {
            lines.push(RULE.to_string());
            lines.push("   🔍 CARS BEING APPRAISED:".to_string());
            lines.extend(pending_lines(&in_shop, Utc::now()));
        }
        lines.push(RULE.to_string());
        lines.push("   /sellcar [#]  /appraisecar [#]  /givecar [user] [#]".to_string());
        lines.push(BOTTOM.to_string());
        self.tell_all(conn, &lines);
        Ok(())
    }

    pub(super) fn show_car_specs(&mut self, conn: ConnId, user: &str, query: &str) -> CommandResult {
        let car = self
            .inventories
            .find(user, Shelf::Vehicles, query)
            .and_then(|owned| owned.catalog())
            .ok_or_else(|| CommandError::UnknownItem(query.to_string()))?;
        let Some(specs) = car.specs else {
            return Err(CommandError::Invalid(format!(
                "{} doesn't have detailed specs",
                car.name
            )));
        };
        let lines = [
            TOP.to_string(),
            format!("│ {} - SECRET SPECS", car.label().to_uppercase()),
            RULE.to_string(),
            format!("│ 🏎️ True Top Speed:    {} mph", specs.top_speed_mph),
            format!("│ ⚡ True Acceleration:  {}/100", specs.acceleration),
            format!("│ 🎯 True Handling:      {}/100", specs.handling),
            format!("│ 🔧 Reliability:        {}/100", specs.reliability),
            format!("│ ⚖️  Weight:            {} lbs", specs.weight_lbs),
            format!("│ 🚀 Nitro Charges:      {}", specs.boost_charges),
            RULE.to_string(),
            format!("│ ⭐ Quirk: {}", specs.quirk.name()),
            format!("│    \"{}\"", specs.quirk.description()),
            RULE.to_string(),
            "│ These specs affect drag racing performance!".to_string(),
            BOTTOM.to_string(),
        ];
        self.tell_all(conn, &lines);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(0), "0");
        assert_eq!(format_price(999), "999");
        assert_eq!(format_price(1000), "1,000");
        assert_eq!(format_price(2_000_000), "2,000,000");
    }

    #[test]
    fn test_heading_is_box_width() {
        let line = heading("WANCHAT STORE");
        assert_eq!(line.chars().count(), BOX_WIDTH + 2);
    }

    #[test]
    fn test_pick_prefers_index() {
        let stock = catalog::store_items(7);
        assert_eq!(pick(&stock, &stock, "1").map(|i| i.id), Some(stock[0].id));
        assert_eq!(
            pick(&stock, &stock, "pet rock").map(|i| i.id),
            Some("collectible_rock")
        );
        assert!(pick(&stock, &stock, "99").is_none());
    }
}
