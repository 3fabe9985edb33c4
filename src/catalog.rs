//! Static catalog data
//!
//! Store items, vehicles and the rotation that decides which store items are
//! on sale right now. Catalog entries are `'static`; owned instances refer to
//! them by id.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Items that are on sale in every rotation slot
pub const ALWAYS_AVAILABLE: [&str; 2] = ["title_noob", "collectible_rock"];

/// Number of rotating store slots
pub const ROTATING_SLOTS: usize = 8;

/// Length of one store rotation slot in minutes
pub const ROTATION_MINUTES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Title,
    Collectible,
    Effect,
    Consumable,
    Vehicle,
}

/// How many instances of one catalog id may exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uniqueness {
    /// One per user, any number of users
    PerUser,
    /// No limit
    Unlimited,
    /// One in the whole room, pending appraisals included
    Global,
}

impl Category {
    pub fn uniqueness(self) -> Uniqueness {
        match self {
            Category::Title | Category::Collectible | Category::Effect => Uniqueness::PerUser,
            Category::Consumable => Uniqueness::Unlimited,
            Category::Vehicle => Uniqueness::Global,
        }
    }

    /// Position in inventory listings
    pub fn display_rank(self) -> u8 {
        match self {
            Category::Title => 0,
            Category::Collectible => 1,
            Category::Effect => 2,
            Category::Consumable => 3,
            Category::Vehicle => 4,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Title => "title",
            Category::Collectible => "collectible",
            Category::Effect => "effect",
            Category::Consumable => "consumable",
            Category::Vehicle => "vehicle",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Legendary,
    Mythic,
    Ultra,
}

impl Rarity {
    pub fn symbol(self) -> &'static str {
        match self {
            Rarity::Common => "⚪",
            Rarity::Uncommon => "🟢",
            Rarity::Rare => "🔵",
            Rarity::Legendary => "🟣",
            Rarity::Mythic => "🟠",
            Rarity::Ultra => "🔴",
        }
    }
}

/// Drag race performance modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quirk {
    None,
    SlowStart,
    HiddenPower,
    FastFragile,
    PotholeResist,
    BadLuck,
    BetterNitro,
}

impl Quirk {
    pub fn name(self) -> &'static str {
        match self {
            Quirk::None => "None",
            Quirk::SlowStart => "Slow Start",
            Quirk::HiddenPower => "Hidden Power",
            Quirk::FastFragile => "Fast but Fragile",
            Quirk::PotholeResist => "Pothole Resistant",
            Quirk::BadLuck => "Bad Luck",
            Quirk::BetterNitro => "Better Nitro",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Quirk::None => "Nothing special under the hood.",
            Quirk::SlowStart => "Sluggish off the line.",
            Quirk::HiddenPower => "Makes more power than the sticker claims.",
            Quirk::FastFragile => "A little quicker, a little more delicate.",
            Quirk::PotholeResist => "Shrugs off potholes.",
            Quirk::BadLuck => "Finds every pothole on the road.",
            Quirk::BetterNitro => "Nitro hits harder than usual.",
        }
    }
}

/// Hidden vehicle performance numbers, visible only to the owner
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VehicleSpecs {
    pub top_speed_mph: u32,
    /// 0..=100
    pub acceleration: u32,
    /// 0..=100
    pub handling: u32,
    pub reliability: u32,
    pub weight_lbs: u32,
    pub boost_charges: u32,
    pub quirk: Quirk,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogItem {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub price: u64,
    pub category: Category,
    pub rarity: Rarity,
    pub emoji: Option<&'static str>,
    /// Chat prefix shown when a title is equipped
    pub prefix: Option<&'static str>,
    #[serde(skip)]
    pub specs: Option<VehicleSpecs>,
}

impl CatalogItem {
    /// Payout when sold without an appraisal
    pub fn resale_value(&self) -> u64 {
        self.price / 2
    }

    pub fn label(&self) -> String {
        match self.emoji {
            Some(emoji) => format!("{} {}", emoji, self.name),
            None => self.name.to_string(),
        }
    }
}

const fn title(
    id: &'static str,
    name: &'static str,
    prefix: &'static str,
    price: u64,
    rarity: Rarity,
) -> CatalogItem {
    CatalogItem {
        id,
        name,
        description: "Display a title before your name",
        price,
        category: Category::Title,
        rarity,
        emoji: None,
        prefix: Some(prefix),
        specs: None,
    }
}

const fn thing(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    price: u64,
    category: Category,
    rarity: Rarity,
    emoji: &'static str,
) -> CatalogItem {
    CatalogItem {
        id,
        name,
        description,
        price,
        category,
        rarity,
        emoji: Some(emoji),
        prefix: None,
        specs: None,
    }
}

#[allow(clippy::too_many_arguments)]
const fn vehicle(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    price: u64,
    rarity: Rarity,
    emoji: &'static str,
    top_speed_mph: u32,
    acceleration: u32,
    handling: u32,
    weight_lbs: u32,
    boost_charges: u32,
    quirk: Quirk,
) -> CatalogItem {
    CatalogItem {
        id,
        name,
        description,
        price,
        category: Category::Vehicle,
        rarity,
        emoji: Some(emoji),
        prefix: None,
        specs: Some(VehicleSpecs {
            top_speed_mph,
            acceleration,
            handling,
            reliability: 50 + handling / 2,
            weight_lbs,
            boost_charges,
            quirk,
        }),
    }
}

use Category::{Collectible, Consumable, Effect};
use Rarity::{Common, Legendary, Mythic, Rare, Ultra, Uncommon};

static ITEMS: &[CatalogItem] = &[
    title("title_broke", "Broke Title", "[Broke]", 1, Common),
    title("title_noob", "Noob Title", "[Noob]", 5, Common),
    title("title_lurker", "Lurker Title", "[Lurker]", 10, Common),
    title("title_chatter", "Chatter Title", "[Chatter]", 15, Common),
    title("title_gamer", "Gamer Title", "[Gamer]", 25, Uncommon),
    title("title_simp", "Simp Title", "[Simp]", 35, Uncommon),
    title("title_degen", "Degen Title", "[Degen]", 40, Uncommon),
    title("title_chad", "Chad Title", "[Chad]", 50, Uncommon),
    title("title_based", "Based Title", "[Based]", 69, Uncommon),
    title("title_champion", "Champion Title", "[Champion]", 100, Rare),
    title("title_legend", "Legend Title", "[Legend]", 200, Rare),
    title("title_og", "OG Title", "[OG]", 300, Rare),
    title("title_elite", "Elite Title", "[Elite]", 420, Rare),
    title("title_whale", "Whale Title", "[Whale]", 500, Rare),
    thing("collectible_rock", "Pet Rock", "Your new best friend.", 10, Collectible, Common, "🪨"),
    thing("collectible_stick", "Good Stick", "A very good stick.", 3, Collectible, Common, "🪵"),
    thing("collectible_rubber_duck", "Rubber Duck", "Squeaks when stressed.", 12, Collectible, Common, "🦆"),
    thing("collectible_lucky_coin", "Lucky Coin", "Heads every time. Allegedly.", 30, Collectible, Uncommon, "🪙"),
    thing("collectible_golden_ticket", "Golden Ticket", "Admits one to somewhere.", 75, Collectible, Uncommon, "🎫"),
    thing("collectible_vampire_fang", "Vampire Fang", "Still sharp.", 333, Collectible, Rare, "🧛"),
    thing("collectible_mermaid_scale", "Mermaid Scale", "Shimmers in moonlight.", 380, Collectible, Rare, "🧜"),
    thing("collectible_phoenix_feather", "Phoenix Feather", "Still warm.", 450, Collectible, Rare, "🔶"),
    thing("collectible_singularity", "Singularity", "Infinitely dense.", 1234, Collectible, Legendary, "⚪"),
    thing("collectible_antimatter", "Antimatter Vial", "Handle with extreme care.", 3500, Collectible, Legendary, "⚗️"),
    thing("collectible_dark_matter", "Dark Matter", "You cant see it but its there.", 4200, Collectible, Legendary, "🌑"),
    thing("collectible_dragons_heart", "Dragons Heart", "Still beating.", 9000, Collectible, Legendary, "❤️‍🔥"),
    thing("collectible_big_bang_remnant", "Big Bang Remnant", "From the beginning of everything.", 20000, Collectible, Mythic, "🌟"),
    thing("collectible_soul_gem", "Soul Gem", "Contains... something.", 88888, Collectible, Mythic, "💎"),
    thing("collectible_meaning_of_life", "Meaning of Life", "Its 42.", 420000, Collectible, Ultra, "📖"),
    thing("collectible_everything", "Literally Everything", "All that is, was, or will be.", 999999, Collectible, Ultra, "🎁"),
    thing("effect_sparkle", "Sparkle Aura", "Your messages glitter.", 60, Effect, Uncommon, "✨"),
    thing("effect_fire", "Fire Aura", "Your messages are on fire.", 150, Effect, Rare, "🔥"),
    thing("effect_rainbow", "Rainbow Aura", "Taste the spectrum.", 800, Effect, Legendary, "🌈"),
    thing("consumable_energy_drink", "Energy Drink", "Tastes like batteries.", 4, Consumable, Common, "🥤"),
    thing("consumable_mystery_snack", "Mystery Snack", "Best before: unknown.", 8, Consumable, Common, "🍪"),
    thing("consumable_party_popper", "Party Popper", "Single use celebration.", 15, Consumable, Uncommon, "🎉"),
    vehicle("car_rust_bucket", "Rust Bucket", "Runs on hope and duct tape.", 150, Common, "🚙", 85, 20, 30, 3200, 1, Quirk::BadLuck),
    vehicle("car_grandma_sedan", "Grandma's Sedan", "Only driven to church on Sundays.", 900, Common, "🚗", 110, 35, 55, 3100, 1, Quirk::PotholeResist),
    vehicle("car_family_wagon", "Family Wagon", "Room for everyone and the dog.", 1800, Common, "🚐", 115, 30, 50, 3900, 1, Quirk::SlowStart),
    vehicle("car_pickup", "Work Pickup", "Hauls anything, including potholes.", 3500, Uncommon, "🛻", 120, 45, 45, 4500, 2, Quirk::PotholeResist),
    vehicle("car_hot_hatch", "Hot Hatch", "Small, angry and loud.", 6000, Uncommon, "🚘", 145, 65, 75, 2700, 2, Quirk::HiddenPower),
    vehicle("car_muscle", "Muscle Coupe", "All engine, no brakes.", 14000, Rare, "🏁", 170, 80, 40, 3700, 2, Quirk::BetterNitro),
    vehicle("car_sports", "Sports Roadster", "Top down, hair everywhere.", 25000, Rare, "🏎️", 175, 75, 85, 2600, 2, Quirk::None),
    vehicle("car_luxury", "Executive Saloon", "The seats have seats.", 40000, Rare, "🚖", 160, 60, 70, 4300, 3, Quirk::None),
    vehicle("car_supercar", "Midship Supercar", "Terrifying in the rain.", 120000, Legendary, "🏎️", 210, 90, 80, 3100, 3, Quirk::FastFragile),
    vehicle("car_hypercar", "Electric Hypercar", "Silent and brutal.", 450000, Mythic, "⚡", 250, 98, 88, 3900, 3, Quirk::SlowStart),
    vehicle("car_vintage", "Barn Find Classic", "Nobody knows what's under the hood.", 75000, Legendary, "🚓", 140, 55, 60, 2900, 2, Quirk::HiddenPower),
    vehicle("car_rocket", "Land Rocket", "Technically street legal.", 2000000, Ultra, "🚀", 300, 100, 60, 5200, 4, Quirk::BetterNitro),
];

/// Every catalog entry
pub fn all() -> &'static [CatalogItem] {
    ITEMS
}

pub fn item(id: &str) -> Option<&'static CatalogItem> {
    ITEMS.iter().find(|item| item.id == id)
}

pub fn vehicles() -> impl Iterator<Item = &'static CatalogItem> {
    ITEMS.iter().filter(|item| item.category == Category::Vehicle)
}

fn store_stock() -> impl Iterator<Item = &'static CatalogItem> {
    ITEMS.iter().filter(|item| item.category != Category::Vehicle)
}

/// Seed for the rotation slot containing `now`, mixed with a per-process salt
pub fn rotation_seed(now: DateTime<Utc>, salt: u64) -> u64 {
    let slot = u64::from(now.minute() / ROTATION_MINUTES);
    let stamp = (now.year() as u64) * 100_000_000
        + u64::from(now.month()) * 1_000_000
        + u64::from(now.day()) * 10_000
        + u64::from(now.hour()) * 100
        + slot;
    stamp ^ salt
}

/// Seconds until the store rotates again
pub fn seconds_until_rotation(now: DateTime<Utc>) -> u32 {
    let into_slot = (now.minute() % ROTATION_MINUTES) * 60 + now.second();
    ROTATION_MINUTES * 60 - into_slot
}

/// Items on sale for a rotation seed: the always-available pair, one
/// guaranteed title, then the rest of the rotating slots from the shuffled mix
pub fn store_items(seed: u64) -> Vec<&'static CatalogItem> {
    let mut rng = StdRng::seed_from_u64(seed);
    let rotating: Vec<&'static CatalogItem> = store_stock()
        .filter(|item| !ALWAYS_AVAILABLE.contains(&item.id))
        .collect();

    let mut titles: Vec<_> = rotating
        .iter()
        .copied()
        .filter(|item| item.category == Category::Title)
        .collect();
    titles.shuffle(&mut rng);

    let guaranteed: Vec<_> = titles.iter().copied().take(1).collect();
    let mut rest: Vec<_> = titles
        .iter()
        .copied()
        .skip(1)
        .chain(rotating.iter().copied().filter(|i| i.category != Category::Title))
        .collect();
    rest.shuffle(&mut rng);

    ALWAYS_AVAILABLE
        .iter()
        .filter_map(|id| item(id))
        .chain(guaranteed)
        .chain(rest.into_iter().take(ROTATING_SLOTS - 1))
        .collect()
}

/// Case-insensitive lookup by id or name among `candidates`, exact match first
pub fn find_in<'a>(
    candidates: &[&'a CatalogItem],
    query: &str,
) -> Option<&'a CatalogItem> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return None;
    }
    candidates
        .iter()
        .find(|item| item.id == query || item.name.to_lowercase() == query)
        .or_else(|| {
            candidates.iter().find(|item| {
                item.name.to_lowercase().contains(&query) || item.id.contains(&query)
            })
        })
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_ids_are_unique() {
        let ids: HashSet<_> = all().iter().map(|i| i.id).collect();
        assert_eq!(ids.len(), all().len());
    }

    #[test]
    fn test_vehicles_have_specs() {
        assert!(vehicles().count() > 0);
        for car in vehicles() {
            assert!(car.specs.is_some(), "{} has no specs", car.id);
        }
        assert!(store_stock().all(|i| i.specs.is_none()));
    }

    #[test]
    fn test_store_rotation_shape() {
        for seed in 0..50 {
            let items = store_items(seed);
            assert_eq!(items.len(), ALWAYS_AVAILABLE.len() + ROTATING_SLOTS);
            assert_eq!(items[0].id, "title_noob");
            assert_eq!(items[1].id, "collectible_rock");
            assert_eq!(items[2].category, Category::Title);
            let ids: HashSet<_> = items.iter().map(|i| i.id).collect();
            assert_eq!(ids.len(), items.len());
        }
    }

    #[test]
    fn test_store_rotation_is_deterministic_per_seed() {
        assert_eq!(store_items(42), store_items(42));
    }

    #[test]
    fn test_find_prefers_exact_match() {
        let stock: Vec<_> = all().iter().collect();
        assert_eq!(find_in(&stock, "pet rock").map(|i| i.id), Some("collectible_rock"));
        assert_eq!(find_in(&stock, "COLLECTIBLE_ROCK").map(|i| i.id), Some("collectible_rock"));
        assert_eq!(find_in(&stock, "duck").map(|i| i.id), Some("collectible_rubber_duck"));
        assert!(find_in(&stock, "").is_none());
    }

    #[test]
    fn test_uniqueness_by_category() {
        assert_eq!(Category::Consumable.uniqueness(), Uniqueness::Unlimited);
        assert_eq!(Category::Vehicle.uniqueness(), Uniqueness::Global);
        assert_eq!(Category::Title.uniqueness(), Uniqueness::PerUser);
    }
}
