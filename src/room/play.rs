//! Game commands and raw control input
//!
//! Every game start goes through the arena gate first. Everything else is
//! delegated to the game that owns the phase; each game rejects commands
//! that arrive outside its phase on its own.

use super::Room;
use crate::commands::Command;
use crate::errors::{CommandError, CommandResult};
use crate::events::ControlEvent;
use crate::games::GameKind;
use crate::identity::ConnId;
use tracing::info;

impl Room {
    fn start_game(&mut self, conn: ConnId, kind: GameKind) -> CommandResult {
        self.arena.ensure_idle(kind)?;
        self.play(|arena, ctx| match kind {
            GameKind::Blackjack => arena.blackjack.start(ctx, conn),
            GameKind::Race => arena.race.start(ctx, conn),
            GameKind::Drag => arena.drag.start(ctx, conn),
            GameKind::Snake => arena.snake.start(ctx, conn),
        })?;
        self.metrics.record_game_started(kind);
        info!(%conn, game = %kind, "🎮 Game started");
        Ok(())
    }

    pub(super) fn execute_game(&mut self, conn: ConnId, cmd: Command) -> CommandResult {
        match cmd {
            Command::Deal => self.start_game(conn, GameKind::Blackjack),
            Command::Race => self.start_game(conn, GameKind::Race),
            Command::Drag => self.start_game(conn, GameKind::Drag),
            Command::Snake => self.start_game(conn, GameKind::Snake),

            Command::Bet(amount) => self.play(|a, ctx| a.blackjack.bet(ctx, conn, amount)),
            Command::Fold => self.play(|a, ctx| a.blackjack.fold(ctx, conn)),
            Command::Hit => self.play(|a, ctx| a.blackjack.hit(ctx, conn)),
            Command::Stand => self.play(|a, ctx| a.blackjack.stand(ctx, conn)),
            Command::Double => self.play(|a, ctx| a.blackjack.double(ctx, conn)),
            Command::Split => self.play(|a, ctx| a.blackjack.split(ctx, conn)),

            Command::Horse { number, amount } => {
                self.play(|a, ctx| a.race.bet(ctx, conn, number, amount))
            }
            Command::Pass => self.play(|a, ctx| a.race.pass(ctx, conn)),

            Command::DragBet { amount, car } => {
                self.play(|a, ctx| a.drag.join(ctx, conn, amount, &car))
            }
            Command::DragPass => self.play(|a, ctx| a.drag.spectate(ctx, conn)),
            Command::DragStart => self.play(|a, ctx| a.drag.launch(ctx, conn)),
            Command::DragCancel => self.play(|a, ctx| a.drag.cancel(ctx, conn)),
            Command::Lane(shift) => self.apply_control(conn, ControlEvent::DragLane(shift)),
            Command::Nitro => self.apply_control(conn, ControlEvent::DragNitro),

            other => Err(CommandError::Invalid(format!(
                "{:?} is not a game command",
                other
            ))),
        }
    }

    /// Real-time input from the active game's controller
    pub(super) fn apply_control(&mut self, conn: ConnId, control: ControlEvent) -> CommandResult {
        match control {
            ControlEvent::SnakeTurn(dir) => self.arena.snake.turn(conn, dir),
            ControlEvent::SnakeQuit => self.play(|a, ctx| a.snake.quit(ctx, conn)),
            ControlEvent::DragLane(shift) => self.arena.drag.shift_lane(conn, shift),
            ControlEvent::DragNitro => self.play(|a, ctx| a.drag.nitro(ctx, conn)).map(|_| ()),
        }
    }
}
