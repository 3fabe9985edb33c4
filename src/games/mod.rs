//! Game session arena
//!
//! Four structurally different games share one rule: at most one of them is
//! outside its idle phase at any moment. `Arena` is the single admission gate
//! for that rule. Each game owns its own timer handle and epoch counter and
//! exposes the same `GameSession` capability so the gate never needs to know
//! the shape of a game's state.

pub mod blackjack;
pub mod cards;
pub mod drag_race;
pub mod horse_race;
pub mod snake;

use crate::clock::{Clock, TimerEvent};
use crate::config::GamesConfig;
use crate::economy::Ledger;
use crate::errors::{CommandError, CommandResult};
use crate::events::Outbox;
use crate::identity::{ConnId, Sessions};
use crate::inventory::Inventories;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub use blackjack::Blackjack;
pub use drag_race::DragRace;
pub use horse_race::HorseRace;
pub use snake::Snake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Blackjack,
    Race,
    Drag,
    Snake,
}

impl GameKind {
    pub const ALL: [GameKind; 4] = [
        GameKind::Blackjack,
        GameKind::Race,
        GameKind::Drag,
        GameKind::Snake,
    ];
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameKind::Blackjack => "blackjack",
            GameKind::Race => "race",
            GameKind::Drag => "drag race",
            GameKind::Snake => "snake",
        };
        f.write_str(name)
    }
}

/// Everything a game may touch while handling one event
pub struct GameCtx<'a> {
    pub ledger: &'a mut Ledger,
    pub sessions: &'a Sessions,
    pub inventories: &'a Inventories,
    pub out: &'a dyn Outbox,
    pub clock: &'a Clock,
    pub rng: &'a mut StdRng,
    pub config: &'a GamesConfig,
}

impl GameCtx<'_> {
    /// Username behind a live connection, or `NotJoined`
    pub fn user(&self, conn: ConnId) -> CommandResult<String> {
        self.sessions
            .username(conn)
            .map(str::to_string)
            .ok_or(CommandError::NotJoined)
    }
}

/// Uniform capability every game variant exposes to the arena
pub trait GameSession {
    fn kind(&self) -> GameKind;

    /// Short phase name for status output and logs
    fn phase_name(&self) -> &'static str;

    /// True in any phase other than idle
    fn is_active(&self) -> bool;

    /// Cancel the game's timer and return to idle; safe to call in any state
    fn reset(&mut self);

    /// One-line human readable status
    fn describe(&self) -> String;
}

/// The four games and the single-active-game gate over them
#[derive(Debug, Default)]
pub struct Arena {
    pub blackjack: Blackjack,
    pub race: HorseRace,
    pub drag: DragRace,
    pub snake: Snake,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> [&dyn GameSession; 4] {
        [&self.blackjack, &self.race, &self.drag, &self.snake]
    }

    pub fn is_any_game_active(&self) -> bool {
        self.sessions().iter().any(|g| g.is_active())
    }

    pub fn active_game(&self) -> Option<GameKind> {
        self.sessions()
            .iter()
            .find(|g| g.is_active())
            .map(|g| g.kind())
    }

    /// Phase name of the running game, if any
    pub fn active_phase(&self) -> Option<&'static str> {
        self.sessions()
            .iter()
            .find(|g| g.is_active())
            .map(|g| g.phase_name())
    }

    /// Refuse to start `wanted` while any game is running
    pub fn ensure_idle(&self, wanted: GameKind) -> CommandResult {
        match self.active_game() {
            Some(active) => Err(CommandError::GameActive { wanted, active }),
            None => Ok(()),
        }
    }

    pub fn describe(&self) -> String {
        match self.sessions().iter().find(|g| g.is_active()) {
            Some(game) => game.describe(),
            None => "No game in progress".to_string(),
        }
    }

    pub fn reset_all(&mut self) {
        self.blackjack.reset();
        self.race.reset();
        self.drag.reset();
        self.snake.reset();
    }

    /// Route a game timer to its owner
    pub fn on_timer(&mut self, ctx: &mut GameCtx<'_>, event: &TimerEvent) {
        let TimerEvent::Game { game, epoch, kind } = *event else {
            return;
        };
        debug!(%game, epoch, ?kind, "game timer");
        match game {
            GameKind::Blackjack => self.blackjack.on_timer(ctx, epoch, kind),
            GameKind::Race => self.race.on_timer(ctx, epoch, kind),
            GameKind::Drag => self.drag.on_timer(ctx, epoch, kind),
            GameKind::Snake => self.snake.on_timer(ctx, epoch, kind),
        }
    }

    /// Fold a closed connection into whichever game is running
    pub fn on_disconnect(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId, user: &str) {
        match self.active_game() {
            Some(GameKind::Blackjack) => self.blackjack.on_disconnect(ctx, conn),
            Some(GameKind::Race) => self.race.on_disconnect(ctx, conn),
            Some(GameKind::Drag) => self.drag.on_disconnect(ctx, conn, user),
            Some(GameKind::Snake) => self.snake.on_disconnect(ctx, conn),
            None => {}
        }
    }
}

/// Shared fixture for game unit tests
#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use crate::events::{RecordingOutbox, ServerEvent};
    use crate::room::RoomEvent;
    use rand::SeedableRng;
    use tokio::sync::mpsc;

    pub struct Table {
        pub ledger: Ledger,
        pub sessions: Sessions,
        pub inventories: Inventories,
        pub out: RecordingOutbox,
        pub clock: Clock,
        pub timers: mpsc::UnboundedReceiver<RoomEvent>,
        pub rng: StdRng,
        pub config: GamesConfig,
    }

    impl Table {
        /// Must be created inside a tokio runtime
        pub fn new(users: &[&str]) -> Self {
            let (tx, timers) = mpsc::unbounded_channel();
            let mut sessions = Sessions::new();
            for (i, name) in users.iter().enumerate() {
                sessions.join(ConnId(i as u64 + 1), name.to_string());
            }
            Self {
                ledger: Ledger::new(20),
                sessions,
                inventories: Inventories::new(),
                out: RecordingOutbox::new(),
                clock: Clock::new(tx),
                timers,
                rng: StdRng::seed_from_u64(0x5eed),
                config: GamesConfig::default(),
            }
        }

        pub fn ctx(&mut self) -> GameCtx<'_> {
            GameCtx {
                ledger: &mut self.ledger,
                sessions: &self.sessions,
                inventories: &self.inventories,
                out: &self.out,
                clock: &self.clock,
                rng: &mut self.rng,
                config: &self.config,
            }
        }

        pub fn broadcasts(&self) -> Vec<ServerEvent> {
            self.out.broadcasts()
        }

        /// Timer events delivered so far
        pub fn fired(&mut self) -> Vec<TimerEvent> {
            let mut fired = Vec::new();
            while let Ok(ev) = self.timers.try_recv() {
                if let RoomEvent::Timer(t) = ev {
                    fired.push(t);
                }
            }
            fired
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testkit::Table;
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Start(GameKind),
        Reset(GameKind),
    }

    fn arb_kind() -> impl Strategy<Value = GameKind> {
        prop::sample::select(GameKind::ALL.to_vec())
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        prop_oneof![arb_kind().prop_map(Step::Start), arb_kind().prop_map(Step::Reset)]
    }

    fn start(arena: &mut Arena, table: &mut Table, kind: GameKind) -> CommandResult {
        arena.ensure_idle(kind)?;
        let mut ctx = table.ctx();
        match kind {
            GameKind::Blackjack => arena.blackjack.start(&mut ctx, ConnId(1)),
            GameKind::Race => arena.race.start(&mut ctx, ConnId(1)),
            GameKind::Drag => arena.drag.start(&mut ctx, ConnId(1)),
            GameKind::Snake => arena.snake.start(&mut ctx, ConnId(1)),
        }
    }

    #[tokio::test]
    async fn test_second_game_is_refused() {
        let mut table = Table::new(&["amy", "bob"]);
        let mut arena = Arena::new();
        assert_eq!(arena.active_game(), None);

        start(&mut arena, &mut table, GameKind::Blackjack).unwrap();
        assert_eq!(
            start(&mut arena, &mut table, GameKind::Race),
            Err(CommandError::GameActive {
                wanted: GameKind::Race,
                active: GameKind::Blackjack
            })
        );
        assert_eq!(arena.active_game(), Some(GameKind::Blackjack));
        assert!(!arena.race.is_active());

        arena.reset_all();
        assert!(!arena.is_any_game_active());
        assert_eq!(arena.describe(), "No game in progress");
    }

    proptest! {
        #[test]
        fn prop_at_most_one_game_active(steps in prop::collection::vec(arb_step(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            rt.block_on(async {
                let mut table = Table::new(&["amy"]);
                let mut arena = Arena::new();
                for step in steps {
                    match step {
                        Step::Start(kind) => {
                            let _ = start(&mut arena, &mut table, kind);
                        }
                        Step::Reset(GameKind::Blackjack) => arena.blackjack.reset(),
                        Step::Reset(GameKind::Race) => arena.race.reset(),
                        Step::Reset(GameKind::Drag) => arena.drag.reset(),
                        Step::Reset(GameKind::Snake) => arena.snake.reset(),
                    }
                    let active = arena.sessions().iter().filter(|g| g.is_active()).count();
                    assert!(active <= 1);
                }
                arena.reset_all();
            });
        }
    }
}
