//! Slash command parsing
//!
//! `/name arg1 arg2...`: the name is lowercased, arguments split on
//! whitespace. Commands that take an item or car name join the remaining
//! arguments back together so multi-word names work.

use crate::economy::parse_amount;
use crate::errors::{CommandError, CommandResult};
use crate::games::drag_race::LaneShift;

pub const MARKER: char = '/';

pub const HELP_LINES: &[&str] = &[
    "=== COMMANDS ===",
    "System: /help /users /clear /clearall /killall",
    "Money: /balance /give [user] [amount] /beg",
    "Store: /store /buy [#] /sell [#] /inventory [user] /inventories",
    "Titles: /equip [#] /unequip",
    "Items: /gift [user] [#] /appraise [#]",
    "Cars: /dealership /buycar [#] /sellcar [#] /givecar [user] [#] /appraisecar [#]",
    "Garage: /garage [user] /garages /carspecs [#]",
    "Blackjack: /deal /bet [amount] /fold /hit /stand /double /split",
    "Racing: /race /horse [1-5] [amount] /pass",
    "Drag: /drag /dragbet [amount] [car] /dragpass /dragstart /dragcancel",
    "Games: /snake",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Users,
    Clear,
    ClearAll,
    Killall,

    Balance,
    Give { to: String, amount: u64 },
    Beg,

    Store,
    Buy(String),
    Sell(String),
    Inventory(Option<String>),
    Inventories,
    Equip(String),
    Unequip,
    Gift { to: String, item: String },
    /// No argument lists pending appraisals
    Appraise(Option<String>),

    Dealership,
    BuyCar(String),
    SellCar(String),
    GiveCar { to: String, car: String },
    AppraiseCar(String),
    Garage(Option<String>),
    Garages,
    CarSpecs(String),

    Deal,
    Bet(u64),
    Fold,
    Hit,
    Stand,
    Double,
    Split,

    Race,
    Horse { number: usize, amount: u64 },
    Pass,

    Snake,

    Drag,
    DragBet { amount: u64, car: String },
    DragPass,
    DragStart,
    DragCancel,
    Lane(LaneShift),
    Nitro,
}

/// True if `text` should be routed as a command rather than chat
pub fn is_command(text: &str) -> bool {
    text.trim_start().starts_with(MARKER)
}

fn rest(args: &[&str], usage: &'static str) -> CommandResult<String> {
    if args.is_empty() {
        Err(CommandError::Usage(usage))
    } else {
        Ok(args.join(" "))
    }
}

fn optional(args: &[&str]) -> Option<String> {
    (!args.is_empty()).then(|| args.join(" "))
}

/// A recipient followed by an item name
fn recipient_and_rest(args: &[&str], usage: &'static str) -> CommandResult<(String, String)> {
    match args {
        [to, item @ ..] if !item.is_empty() => Ok((to.to_string(), item.join(" "))),
        _ => Err(CommandError::Usage(usage)),
    }
}

impl Command {
    pub fn parse(input: &str) -> CommandResult<Command> {
        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix(MARKER)
            .ok_or_else(|| CommandError::UnknownCommand(trimmed.to_string()))?;
        let mut parts = body.split_whitespace();
        let name = parts.next().unwrap_or("").to_lowercase();
        let args: Vec<&str> = parts.collect();

        let cmd = match name.as_str() {
            "help" => Command::Help,
            "users" => Command::Users,
            "clear" => Command::Clear,
            "clearall" => Command::ClearAll,
            "killall" => Command::Killall,

            "balance" => Command::Balance,
            "give" => match args.as_slice() {
                [to, amount, ..] => Command::Give {
                    to: to.to_string(),
                    amount: parse_amount(amount)?,
                },
                _ => return Err(CommandError::Usage("/give [username] [amount]")),
            },
            "beg" => Command::Beg,

            "store" => Command::Store,
            "buy" => Command::Buy(rest(&args, "/buy [number or item name]")?),
            "sell" => Command::Sell(rest(&args, "/sell [number or item name]")?),
            "inventory" | "inv" => Command::Inventory(optional(&args)),
            "inventories" | "invs" => Command::Inventories,
            "equip" => Command::Equip(rest(&args, "/equip [title name or number from /inventory]")?),
            "unequip" => Command::Unequip,
            "gift" | "giveitem" => {
                let (to, item) = recipient_and_rest(&args, "/gift [username] [number or item name]")?;
                Command::Gift { to, item }
            }
            "appraise" => Command::Appraise(optional(&args)),

            "dealership" => Command::Dealership,
            "buycar" => Command::BuyCar(rest(&args, "/buycar [number or car name]")?),
            "sellcar" => Command::SellCar(rest(&args, "/sellcar [number or car name]")?),
            "givecar" => {
                let (to, car) = recipient_and_rest(&args, "/givecar [username] [number or car name]")?;
                Command::GiveCar { to, car }
            }
            "appraisecar" => Command::AppraiseCar(rest(&args, "/appraisecar [number or car name]")?),
            "garage" => Command::Garage(optional(&args)),
            "garages" => Command::Garages,
            "carspecs" => Command::CarSpecs(rest(&args, "/carspecs [number or car name]")?),

            "deal" => Command::Deal,
            "bet" => match args.first() {
                Some(amount) => Command::Bet(parse_amount(amount)?),
                None => return Err(CommandError::Usage("/bet [amount]")),
            },
            "fold" => Command::Fold,
            "hit" => Command::Hit,
            "stand" => Command::Stand,
            "double" => Command::Double,
            "split" => Command::Split,

            "race" => Command::Race,
            "horse" => match args.as_slice() {
                [number, amount, ..] => Command::Horse {
                    number: number.parse().map_err(|_| {
                        CommandError::Invalid("Horse number must be between 1 and 5".into())
                    })?,
                    amount: parse_amount(amount)?,
                },
                _ => return Err(CommandError::Usage("/horse [1-5] [amount]")),
            },
            "pass" => Command::Pass,

            "snake" => Command::Snake,

            "drag" => Command::Drag,
            "dragbet" => match args.as_slice() {
                [amount, car @ ..] if !car.is_empty() => Command::DragBet {
                    amount: parse_amount(amount)?,
                    car: car.join(" "),
                },
                _ => return Err(CommandError::Usage("/dragbet [amount] [car name]")),
            },
            "dragpass" => Command::DragPass,
            "dragstart" => Command::DragStart,
            "dragcancel" => Command::DragCancel,
            "left" => Command::Lane(LaneShift::Left),
            "right" => Command::Lane(LaneShift::Right),
            "nitro" => Command::Nitro,

            _ => {
                let shown = trimmed.split_whitespace().next().unwrap_or(trimmed);
                return Err(CommandError::UnknownCommand(shown.to_lowercase()));
            }
        };
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        assert_eq!(Command::parse("/HELP"), Ok(Command::Help));
        assert_eq!(Command::parse("  /Inv  "), Ok(Command::Inventory(None)));
        assert_eq!(Command::parse("/invs"), Ok(Command::Inventories));
    }

    #[test]
    fn test_multi_word_arguments() {
        assert_eq!(
            Command::parse("/buy  Golden   Rock"),
            Ok(Command::Buy("Golden Rock".into()))
        );
        assert_eq!(
            Command::parse("/gift Bob sports roadster"),
            Ok(Command::Gift {
                to: "Bob".into(),
                item: "sports roadster".into()
            })
        );
        assert_eq!(
            Command::parse("/dragbet 10 rust bucket"),
            Ok(Command::DragBet {
                amount: 10,
                car: "rust bucket".into()
            })
        );
        assert_eq!(
            Command::parse("/inventory bob"),
            Ok(Command::Inventory(Some("bob".into())))
        );
    }

    #[test]
    fn test_amount_validation() {
        assert_eq!(Command::parse("/bet 10"), Ok(Command::Bet(10)));
        assert_eq!(Command::parse("/bet 0"), Err(CommandError::InvalidAmount));
        assert_eq!(Command::parse("/bet -5"), Err(CommandError::InvalidAmount));
        assert_eq!(Command::parse("/bet ten"), Err(CommandError::InvalidAmount));
        assert_eq!(Command::parse("/bet"), Err(CommandError::Usage("/bet [amount]")));
        assert_eq!(
            Command::parse("/give bob 5"),
            Ok(Command::Give {
                to: "bob".into(),
                amount: 5
            })
        );
        assert!(matches!(Command::parse("/give bob"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_horse_arguments() {
        assert_eq!(
            Command::parse("/horse 2 5"),
            Ok(Command::Horse {
                number: 2,
                amount: 5
            })
        );
        assert!(matches!(Command::parse("/horse x 5"), Err(CommandError::Invalid(_))));
        assert!(matches!(Command::parse("/horse 2"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_unknown_and_missing_arguments() {
        assert_eq!(
            Command::parse("/Fart loudly"),
            Err(CommandError::UnknownCommand("/fart".into()))
        );
        assert!(matches!(Command::parse("/sell"), Err(CommandError::Usage(_))));
        assert!(matches!(Command::parse("/gift bob"), Err(CommandError::Usage(_))));
        assert_eq!(Command::parse("/appraise"), Ok(Command::Appraise(None)));
        assert_eq!(Command::parse("/left"), Ok(Command::Lane(LaneShift::Left)));
    }

    #[test]
    fn test_is_command() {
        assert!(is_command("/help"));
        assert!(is_command("  /help"));
        assert!(!is_command("hello /help"));
    }
}
