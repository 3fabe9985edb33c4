//! Pari-mutuel horse race over a fixed five-horse roster

use super::{GameCtx, GameKind, GameSession};
use crate::clock::{TimerEvent, TimerHandle, TimerKind};
use crate::errors::{CommandError, CommandResult};
use crate::events::{HorseView, Payout, ServerEvent};
use crate::identity::ConnId;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

pub const FINISH_LINE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horse {
    pub name: &'static str,
    pub odds: u64,
}

pub const HORSES: [Horse; 5] = [
    Horse { name: "Lightning", odds: 2 },
    Horse { name: "Thunder", odds: 3 },
    Horse { name: "Shadow", odds: 4 },
    Horse { name: "Storm", odds: 5 },
    Horse { name: "Blaze", odds: 6 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RacePhase {
    #[default]
    Idle,
    CollectingBets,
    Running,
}

#[derive(Debug, Clone)]
struct Bet {
    conn: ConnId,
    user: String,
    /// None for a pass
    horse: Option<usize>,
    amount: u64,
}

/// One tick of movement: lower odds run faster on average
pub fn stride<R: Rng + ?Sized>(horse: &Horse, rng: &mut R) -> u32 {
    let base = 6 - horse.odds as i64;
    (base + rng.gen_range(0..6)).max(1) as u32
}

#[derive(Debug, Default)]
pub struct HorseRace {
    phase: RacePhase,
    epoch: u64,
    bets: Vec<Bet>,
    positions: [u32; 5],
    timer: Option<TimerHandle>,
}

impl HorseRace {
    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn positions(&self) -> [u32; 5] {
        self.positions
    }

    fn stamp(&self, kind: TimerKind) -> TimerEvent {
        TimerEvent::Game {
            game: GameKind::Race,
            epoch: self.epoch,
            kind,
        }
    }

    pub fn start(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let host = ctx.user(conn)?;
        if self.is_active() {
            return Err(CommandError::WrongPhase("A race is already in progress"));
        }
        self.epoch += 1;
        self.phase = RacePhase::CollectingBets;
        let window = ctx.config.wager_window();
        self.timer = Some(ctx.clock.after(window, self.stamp(TimerKind::WagerDeadline)));

        info!(host = %host, epoch = self.epoch, "🏇 Horse race opened");
        ctx.out.broadcast(ServerEvent::RaceStarted {
            horses: HORSES
                .iter()
                .enumerate()
                .map(|(i, h)| HorseView {
                    number: i + 1,
                    name: h.name.to_string(),
                    odds: h.odds,
                })
                .collect(),
            window_secs: window.as_secs(),
        });
        ctx.out.announce("=== HORSE RACE ===");
        ctx.out.announce(&format!(
            "{} is starting a horse race! Place your bets with /horse [1-5] [amount] or /pass to skip",
            host
        ));
        for (i, h) in HORSES.iter().enumerate() {
            ctx.out.announce(&format!("  {}. {} ({}:1 odds)", i + 1, h.name, h.odds));
        }
        Ok(())
    }

    fn collecting_check(&self, conn: ConnId) -> CommandResult {
        if self.phase != RacePhase::CollectingBets {
            return Err(CommandError::WrongPhase(
                "No race is accepting bets. Use /race to start one.",
            ));
        }
        if self.bets.iter().any(|b| b.conn == conn) {
            return Err(CommandError::AlreadyResponded);
        }
        Ok(())
    }

    /// Bet on horse `number` (1-based)
    pub fn bet(
        &mut self,
        ctx: &mut GameCtx<'_>,
        conn: ConnId,
        number: usize,
        amount: u64,
    ) -> CommandResult {
        let user = ctx.user(conn)?;
        self.collecting_check(conn)?;
        let index = number
            .checked_sub(1)
            .filter(|i| *i < HORSES.len())
            .ok_or_else(|| CommandError::Invalid("Horse number must be between 1 and 5".into()))?;
        ctx.ledger.debit(&user, amount)?;

        let horse = HORSES[index];
        self.bets.push(Bet {
            conn,
            user: user.clone(),
            horse: Some(index),
            amount,
        });
        ctx.out.broadcast(ServerEvent::RaceBet {
            user: user.clone(),
            horse: Some(horse.name.to_string()),
            amount,
        });
        ctx.out.announce(&format!("{} bets ${} on {}", user, amount, horse.name));
        self.run_if_everyone_responded(ctx);
        Ok(())
    }

    pub fn pass(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let user = ctx.user(conn)?;
        self.collecting_check(conn)?;
        self.bets.push(Bet {
            conn,
            user: user.clone(),
            horse: None,
            amount: 0,
        });
        ctx.out.broadcast(ServerEvent::RaceBet {
            user: user.clone(),
            horse: None,
            amount: 0,
        });
        ctx.out.announce(&format!("{} passes on this race", user));
        self.run_if_everyone_responded(ctx);
        Ok(())
    }

    fn run_if_everyone_responded(&mut self, ctx: &mut GameCtx<'_>) {
        if self.phase != RacePhase::CollectingBets {
            return;
        }
        let everyone = ctx
            .sessions
            .connections()
            .all(|conn| self.bets.iter().any(|b| b.conn == conn));
        if everyone {
            self.run(ctx);
        }
    }

    fn run(&mut self, ctx: &mut GameCtx<'_>) {
        self.timer = None;
        if self.bets.iter().all(|b| b.horse.is_none()) {
            ctx.out.broadcast(ServerEvent::RaceCancelled {
                reason: "No bets placed".to_string(),
            });
            ctx.out.announce("No bets placed. Race cancelled.");
            self.reset();
            return;
        }
        self.phase = RacePhase::Running;
        self.positions = [0; 5];
        self.timer = Some(
            ctx.clock
                .every(ctx.config.race_tick(), self.stamp(TimerKind::RaceStep)),
        );
        info!(bets = self.bets.len(), "🏇 And they're off");
        ctx.out.announce("=== AND THEY'RE OFF! ===");
    }

    pub fn on_timer(&mut self, ctx: &mut GameCtx<'_>, epoch: u64, kind: TimerKind) {
        if epoch != self.epoch {
            return;
        }
        match (self.phase, kind) {
            (RacePhase::CollectingBets, TimerKind::WagerDeadline) => self.run(ctx),
            (RacePhase::Running, TimerKind::RaceStep) => self.step(ctx),
            _ => {}
        }
    }

    fn step(&mut self, ctx: &mut GameCtx<'_>) {
        for (pos, horse) in self.positions.iter_mut().zip(HORSES.iter()) {
            *pos = (*pos + stride(horse, ctx.rng)).min(FINISH_LINE);
        }
        ctx.out.broadcast(ServerEvent::RaceTick {
            positions: self.positions.to_vec(),
        });

        let crossed: Vec<usize> = (0..HORSES.len())
            .filter(|&i| self.positions[i] >= FINISH_LINE)
            .collect();
        if let Some(&winner) = crossed.choose(ctx.rng) {
            self.finish(ctx, winner);
        }
    }

    /// Pay every bettor on `winner` and return to idle
    fn finish(&mut self, ctx: &mut GameCtx<'_>, winner: usize) {
        let horse = HORSES[winner];
        ctx.out.announce(&format!("🏆 {} wins!", horse.name));

        let mut payouts = Vec::new();
        for bet in self.bets.iter().filter(|b| b.horse.is_some()) {
            if bet.horse == Some(winner) {
                let amount = bet.amount * horse.odds;
                let _ = ctx.ledger.credit(&bet.user, amount);
                ctx.out.announce(&format!("{} wins ${}!", bet.user, amount));
                payouts.push(Payout {
                    user: bet.user.clone(),
                    amount,
                });
            } else {
                ctx.out.announce(&format!("{} loses ${}", bet.user, bet.amount));
            }
        }
        info!(winner = horse.name, paid = payouts.len(), "🏇 Race finished");
        ctx.out.broadcast(ServerEvent::RaceResult {
            winner: horse.name.to_string(),
            odds: horse.odds,
            payouts,
        });
        ctx.out.announce("=== RACE OVER ===");
        self.reset();
    }

    pub fn on_disconnect(&mut self, ctx: &mut GameCtx<'_>, _conn: ConnId) {
        self.run_if_everyone_responded(ctx);
    }
}

impl GameSession for HorseRace {
    fn kind(&self) -> GameKind {
        GameKind::Race
    }

    fn phase_name(&self) -> &'static str {
        match self.phase {
            RacePhase::Idle => "idle",
            RacePhase::CollectingBets => "collecting_bets",
            RacePhase::Running => "running",
        }
    }

    fn is_active(&self) -> bool {
        self.phase != RacePhase::Idle
    }

    fn reset(&mut self) {
        self.timer = None;
        if self.phase != RacePhase::Idle {
            self.epoch += 1;
        }
        self.phase = RacePhase::Idle;
        self.bets.clear();
        self.positions = [0; 5];
    }

    fn describe(&self) -> String {
        match self.phase {
            RacePhase::Idle => "Race: idle".to_string(),
            RacePhase::CollectingBets => format!("Race: taking bets ({} responded)", self.bets.len()),
            RacePhase::Running => format!("Race: running {:?}", self.positions),
        }
    }
}
