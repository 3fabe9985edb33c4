//! Host-run drag race between owned vehicles
//!
//! The host opens the race, racers join with a stake and one of their cars,
//! and the race either starts on the host's word or automatically at the
//! deadline when at least two racers have joined. Racing is a fixed-step
//! simulation; lane changes and nitro arrive as live control events.

use super::{GameCtx, GameKind, GameSession};
use crate::catalog::{Quirk, VehicleSpecs};
use crate::clock::{TimerEvent, TimerHandle, TimerKind};
use crate::errors::{CommandError, CommandResult};
use crate::events::{PotholeView, RacerView, ServerEvent};
use crate::identity::{user_key, ConnId};
use crate::inventory::Shelf;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const TRACK_LENGTH: f64 = 100.0;
pub const MIN_RACERS: usize = 2;

const POTHOLE_SPAWN_CHANCE: f64 = 0.08;
const POTHOLE_SPAWN_AT: f64 = 105.0;
const POTHOLE_SCROLL: f64 = 3.0;
const POTHOLE_DISCARD_BELOW: f64 = -10.0;
const POTHOLE_REACH: f64 = 5.0;
const MIN_SPEED_AFTER_POTHOLE: f64 = 0.5;
const MIN_ACCELERATION: f64 = 0.05;
const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneShift {
    Left,
    Right,
}

impl LaneShift {
    fn lane(self) -> u8 {
        match self {
            LaneShift::Left => 0,
            LaneShift::Right => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragPhase {
    #[default]
    Idle,
    Collecting,
    Countdown,
    Running,
}

/// Top speed in track units per tick
pub fn max_speed(specs: &VehicleSpecs) -> f64 {
    let base = specs.top_speed_mph as f64 / 300.0 * 5.0;
    match specs.quirk {
        Quirk::HiddenPower => base * 1.15,
        Quirk::FastFragile => base * 1.1,
        _ => base,
    }
}

/// Speed gained per tick at `position`
pub fn acceleration(specs: &VehicleSpecs, position: f64) -> f64 {
    let weight_penalty = (specs.weight_lbs as f64 - 2500.0) / 10_000.0;
    let mut accel = specs.acceleration as f64 / 100.0 * 2.0 - weight_penalty;
    if specs.quirk == Quirk::SlowStart && position < 20.0 {
        accel *= 0.6;
    }
    accel.max(MIN_ACCELERATION)
}

/// Speed lost on hitting a pothole
pub fn pothole_slowdown(specs: &VehicleSpecs) -> f64 {
    let base = 1.5 - specs.handling as f64 / 100.0;
    match specs.quirk {
        Quirk::PotholeResist => base * 0.4,
        Quirk::BadLuck => base * 1.5,
        _ => base,
    }
}

pub fn nitro_boost(specs: &VehicleSpecs) -> f64 {
    if specs.quirk == Quirk::BetterNitro {
        3.5
    } else {
        2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pothole {
    lane: u8,
    position: f64,
}

#[derive(Debug, Clone)]
struct Racer {
    conn: ConnId,
    user: String,
    car: String,
    car_id: &'static str,
    specs: VehicleSpecs,
    stake: u64,
    lane: u8,
    position: f64,
    speed: f64,
    boosts: u32,
    finished: bool,
    dnf: bool,
}

impl Racer {
    fn racing(&self) -> bool {
        !self.finished && !self.dnf
    }

    /// One tick of movement; returns true if a pothole was hit
    fn step(&mut self, potholes: &mut Vec<Pothole>) -> bool {
        let top = max_speed(&self.specs);
        if self.speed < top {
            self.speed = (self.speed + acceleration(&self.specs, self.position)).min(top);
        }
        let hit = potholes.iter().position(|p| {
            p.lane == self.lane && (p.position - self.position).abs() <= POTHOLE_REACH
        });
        if let Some(i) = hit {
            potholes.remove(i);
            self.speed = (self.speed - pothole_slowdown(&self.specs)).max(MIN_SPEED_AFTER_POTHOLE);
        }
        self.position += self.speed;
        if self.position >= TRACK_LENGTH {
            self.finished = true;
        }
        hit.is_some()
    }

    fn view(&self) -> RacerView {
        RacerView {
            user: self.user.clone(),
            car: self.car.clone(),
            lane: self.lane,
            position: self.position.min(TRACK_LENGTH),
            speed: self.speed,
            boosts: self.boosts,
            finished: self.finished,
            dnf: self.dnf,
        }
    }
}

fn place_label(place: usize) -> String {
    match place {
        1 => "1ST".to_string(),
        2 => "2ND".to_string(),
        3 => "3RD".to_string(),
        n => format!("{}TH", n),
    }
}

#[derive(Debug, Default)]
pub struct DragRace {
    phase: DragPhase,
    epoch: u64,
    host: Option<(ConnId, String)>,
    racers: Vec<Racer>,
    potholes: Vec<Pothole>,
    finish_order: Vec<String>,
    countdown: u32,
    timer: Option<TimerHandle>,
}

impl DragRace {
    pub fn phase(&self) -> DragPhase {
        self.phase
    }

    /// Whether `user` has entered the car `item_id` in the current race
    pub fn has_entered(&self, user: &str, item_id: &str) -> bool {
        self.phase != DragPhase::Idle
            && self
                .racers
                .iter()
                .any(|r| r.car_id == item_id && user_key(&r.user) == user_key(user))
    }

    pub fn pot(&self) -> u64 {
        self.racers.iter().map(|r| r.stake).sum()
    }

    fn stamp(&self, kind: TimerKind) -> TimerEvent {
        TimerEvent::Game {
            game: GameKind::Drag,
            epoch: self.epoch,
            kind,
        }
    }

    fn is_host(&self, conn: ConnId, user: &str) -> bool {
        self.host
            .as_ref()
            .is_some_and(|(c, name)| *c == conn || user_key(name) == user_key(user))
    }

    /// Open the race; the host must own a car to organise one
    pub fn start(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let host = ctx.user(conn)?;
        if self.is_active() {
            return Err(CommandError::WrongPhase("A drag race is already in progress"));
        }
        let has_car = ctx
            .inventories
            .list(&host, Shelf::Vehicles)
            .iter()
            .any(|l| l.item.specs.is_some());
        if !has_car {
            return Err(CommandError::Invalid(
                "You need a car to start a drag race! Buy one from /dealership first.".into(),
            ));
        }

        self.epoch += 1;
        self.phase = DragPhase::Collecting;
        self.host = Some((conn, host.clone()));
        let window = ctx.config.drag_window();
        self.timer = Some(ctx.clock.after(window, self.stamp(TimerKind::DragDeadline)));

        info!(host = %host, epoch = self.epoch, "🏁 Drag race opened");
        ctx.out.broadcast(ServerEvent::DragStarted {
            host: host.clone(),
            window_secs: window.as_secs(),
        });
        ctx.out.announce("=== DRAG RACE ===");
        ctx.out.announce(&format!("{} is organizing a drag race!", host));
        ctx.out
            .announce("Use /dragbet [amount] [car name] to join, or /dragpass to spectate");
        Ok(())
    }

    /// Join with a stake and one of the caller's cars
    pub fn join(
        &mut self,
        ctx: &mut GameCtx<'_>,
        conn: ConnId,
        amount: u64,
        car_query: &str,
    ) -> CommandResult {
        let user = ctx.user(conn)?;
        if self.phase != DragPhase::Collecting {
            return Err(CommandError::WrongPhase(
                "No drag race is accepting bets right now. Start one with /drag",
            ));
        }
        if self
            .racers
            .iter()
            .any(|r| r.conn == conn || user_key(&r.user) == user_key(&user))
        {
            return Err(CommandError::Invalid("You're already in this race!".into()));
        }
        let (car, specs) = ctx
            .inventories
            .find(&user, Shelf::Vehicles, car_query)
            .and_then(|owned| owned.catalog())
            .and_then(|item| item.specs.map(|s| (item, s)))
            .ok_or_else(|| {
                CommandError::Invalid(format!(
                    "You don't own a car matching \"{}\". Check /garage to see your cars.",
                    car_query
                ))
            })?;
        ctx.ledger.debit(&user, amount)?;

        self.racers.push(Racer {
            conn,
            user: user.clone(),
            car: car.name.to_string(),
            car_id: car.id,
            specs,
            stake: amount,
            lane: 0,
            position: 0.0,
            speed: 0.0,
            boosts: specs.boost_charges.max(1),
            finished: false,
            dnf: false,
        });
        let pot = self.pot();
        ctx.out.broadcast(ServerEvent::DragJoined {
            user: user.clone(),
            car: car.name.to_string(),
            amount,
            pot,
        });
        ctx.out.announce(&format!(
            "{} enters with {} ${} bet",
            user,
            car.label(),
            amount
        ));
        Ok(())
    }

    pub fn spectate(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let user = ctx.user(conn)?;
        if self.phase != DragPhase::Collecting {
            return Err(CommandError::WrongPhase("No drag race is accepting bets."));
        }
        ctx.out.announce(&format!("{} is spectating this race", user));
        Ok(())
    }

    /// Host forces the start
    pub fn launch(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let user = ctx.user(conn)?;
        if self.phase != DragPhase::Collecting {
            return Err(CommandError::WrongPhase("No drag race to start."));
        }
        if !self.is_host(conn, &user) {
            return Err(CommandError::NotHost);
        }
        if self.racers.len() < MIN_RACERS {
            return Err(CommandError::Invalid("Need at least 2 racers to start!".into()));
        }
        self.begin_countdown(ctx);
        Ok(())
    }

    /// Host calls the race off; every stake is refunded
    pub fn cancel(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let user = ctx.user(conn)?;
        if !self.is_active() {
            return Err(CommandError::WrongPhase("No drag race to cancel."));
        }
        if !self.is_host(conn, &user) {
            return Err(CommandError::NotHost);
        }
        self.cancel_and_refund(ctx, "Drag race cancelled! All bets refunded.");
        Ok(())
    }

    fn cancel_and_refund(&mut self, ctx: &mut GameCtx<'_>, reason: &str) {
        for racer in &self.racers {
            let _ = ctx.ledger.credit(&racer.user, racer.stake);
        }
        info!(racers = self.racers.len(), "🏁 Drag race cancelled: {}", reason);
        ctx.out.announce(reason);
        ctx.out.broadcast(ServerEvent::DragCancelled {
            reason: reason.to_string(),
        });
        self.reset();
    }

    fn begin_countdown(&mut self, ctx: &mut GameCtx<'_>) {
        self.timer = None;
        self.phase = DragPhase::Countdown;
        self.countdown = ctx.config.drag_countdown_secs;
        ctx.out.announce("=== RACE STARTING ===");
        ctx.out.announce("Controls: W/Up = Left lane, S/Down = Right lane, Space/E = Nitro");
        if self.countdown == 0 {
            self.go(ctx);
            return;
        }
        ctx.out.broadcast(ServerEvent::DragCountdown {
            remaining: self.countdown,
        });
        self.timer = Some(ctx.clock.every(COUNTDOWN_STEP, self.stamp(TimerKind::DragCountdown)));
    }

    fn count_down(&mut self, ctx: &mut GameCtx<'_>) {
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            ctx.out.announce(&format!("{}...", self.countdown));
            ctx.out.broadcast(ServerEvent::DragCountdown {
                remaining: self.countdown,
            });
        } else {
            self.go(ctx);
        }
    }

    fn go(&mut self, ctx: &mut GameCtx<'_>) {
        self.phase = DragPhase::Running;
        self.potholes.clear();
        ctx.out.announce("GO!!!");
        ctx.out.broadcast(ServerEvent::DragGo);
        self.timer = Some(ctx.clock.every(ctx.config.drag_tick(), self.stamp(TimerKind::DragStep)));
    }

    pub fn on_timer(&mut self, ctx: &mut GameCtx<'_>, epoch: u64, kind: TimerKind) {
        if epoch != self.epoch {
            return;
        }
        match (self.phase, kind) {
            (DragPhase::Collecting, TimerKind::DragDeadline) => {
                self.timer = None;
                if self.racers.len() >= MIN_RACERS {
                    self.begin_countdown(ctx);
                } else {
                    self.cancel_and_refund(ctx, "Not enough racers. Drag race cancelled.");
                }
            }
            (DragPhase::Countdown, TimerKind::DragCountdown) => self.count_down(ctx),
            (DragPhase::Running, TimerKind::DragStep) => self.step(ctx),
            _ => {}
        }
    }

    fn step(&mut self, ctx: &mut GameCtx<'_>) {
        if ctx.rng.gen_bool(POTHOLE_SPAWN_CHANCE) {
            let lane = if ctx.rng.gen_bool(0.5) { 0 } else { 1 };
            self.potholes.push(Pothole {
                lane,
                position: POTHOLE_SPAWN_AT,
            });
        }
        self.potholes.retain_mut(|p| {
            p.position -= POTHOLE_SCROLL;
            p.position > POTHOLE_DISCARD_BELOW
        });

        for racer in self.racers.iter_mut().filter(|r| r.racing()) {
            if racer.step(&mut self.potholes) {
                debug!(user = %racer.user, "pothole");
                ctx.out.unicast(
                    racer.conn,
                    ServerEvent::DragPothole {
                        user: racer.user.clone(),
                    },
                );
            }
            if racer.finished {
                self.finish_order.push(racer.user.clone());
                ctx.out.announce(&format!(
                    "{} - {} finishes!",
                    place_label(self.finish_order.len()),
                    racer.user
                ));
            }
        }

        ctx.out.broadcast(ServerEvent::DragTick {
            racers: self.racers.iter().map(Racer::view).collect(),
            potholes: self
                .potholes
                .iter()
                .map(|p| PotholeView {
                    lane: p.lane,
                    position: p.position,
                })
                .collect(),
        });

        if self.racers.iter().all(|r| !r.racing()) {
            self.finish(ctx);
        }
    }

    fn finish(&mut self, ctx: &mut GameCtx<'_>) {
        let pot = self.pot();
        let winner = self.finish_order.first().cloned();
        ctx.out.announce("=== RACE FINISHED ===");
        match &winner {
            Some(name) => {
                let _ = ctx.ledger.credit(name, pot);
                ctx.out.announce(&format!("🏆 {} WINS ${}!", name, pot));
            }
            None => {
                // Nobody crossed the line, so nobody keeps the pot
                for racer in &self.racers {
                    let _ = ctx.ledger.credit(&racer.user, racer.stake);
                }
                ctx.out.announce("No finishers. All bets refunded.");
            }
        }
        info!(winner = ?winner, pot, "🏁 Drag race finished");
        ctx.out.broadcast(ServerEvent::DragResult {
            winner,
            pot,
            order: self.finish_order.clone(),
        });
        self.reset();
    }

    fn live_racer(&mut self, conn: ConnId) -> Option<&mut Racer> {
        if self.phase != DragPhase::Running {
            return None;
        }
        self.racers
            .iter_mut()
            .find(|r| r.conn == conn && r.racing())
    }

    /// Move to a lane; only while racing
    pub fn shift_lane(&mut self, conn: ConnId, shift: LaneShift) -> CommandResult {
        let racer = self.live_racer(conn).ok_or(CommandError::WrongPhase(
            "No active race or you are not racing.",
        ))?;
        racer.lane = shift.lane();
        Ok(())
    }

    /// Spend a boost charge; returns charges left
    pub fn nitro(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult<u32> {
        let racer = self
            .live_racer(conn)
            .filter(|r| r.boosts > 0)
            .ok_or(CommandError::WrongPhase(
                "No active race, not racing, or out of nitro.",
            ))?;
        racer.boosts -= 1;
        racer.speed += nitro_boost(&racer.specs);
        let left = racer.boosts;
        ctx.out.unicast(
            conn,
            ServerEvent::DragNitro {
                user: racer.user.clone(),
                boosts_left: left,
            },
        );
        Ok(left)
    }

    /// Host leaving cancels; a racer leaving is refunded before the start and
    /// marked did-not-finish after it
    pub fn on_disconnect(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId, user: &str) {
        if !self.is_active() {
            return;
        }
        if self.host.as_ref().is_some_and(|(c, _)| *c == conn) {
            self.cancel_and_refund(ctx, "The host left. Drag race cancelled, all bets refunded.");
            return;
        }
        match self.phase {
            DragPhase::Collecting => {
                let (left, stayed): (Vec<Racer>, Vec<Racer>) =
                    self.racers.drain(..).partition(|r| r.conn == conn);
                self.racers = stayed;
                for racer in left {
                    let _ = ctx.ledger.credit(&racer.user, racer.stake);
                    ctx.out.announce(&format!("{} left the race and was refunded", user));
                }
            }
            DragPhase::Countdown | DragPhase::Running => {
                for racer in self.racers.iter_mut().filter(|r| r.conn == conn) {
                    racer.dnf = true;
                    ctx.out.announce(&format!("{} left the race (DNF)", user));
                }
            }
            DragPhase::Idle => {}
        }
    }
}

impl GameSession for DragRace {
    fn kind(&self) -> GameKind {
        GameKind::Drag
    }

    fn phase_name(&self) -> &'static str {
        match self.phase {
            DragPhase::Idle => "idle",
            DragPhase::Collecting => "collecting_bets",
            DragPhase::Countdown => "countdown",
            DragPhase::Running => "racing",
        }
    }

    fn is_active(&self) -> bool {
        self.phase != DragPhase::Idle
    }

    fn reset(&mut self) {
        self.timer = None;
        if self.phase != DragPhase::Idle {
            self.epoch += 1;
        }
        self.phase = DragPhase::Idle;
        self.host = None;
        self.racers.clear();
        self.potholes.clear();
        self.finish_order.clear();
        self.countdown = 0;
    }

    fn describe(&self) -> String {
        let host = self.host.as_ref().map_or("?", |(_, name)| name.as_str());
        match self.phase {
            DragPhase::Idle => "Drag race: idle".to_string(),
            DragPhase::Collecting => format!(
                "Drag race: {} taking entries ({} racers, ${} pot)",
                host,
                self.racers.len(),
                self.pot()
            ),
            DragPhase::Countdown => format!("Drag race: starting in {}", self.countdown),
            DragPhase::Running => format!(
                "Drag race: {} of {} finished",
                self.finish_order.len(),
                self.racers.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::Table;
    use super::*;
    use crate::catalog;
    use crate::inventory::OwnedItem;

    fn specs(id: &str) -> VehicleSpecs {
        catalog::item(id).and_then(|i| i.specs).unwrap()
    }

    fn garage_table() -> Table {
        let mut table = Table::new(&["amy", "bob", "cat"]);
        table.inventories.add("amy", OwnedItem::new("car_sports"));
        table.inventories.add("bob", OwnedItem::new("car_rust_bucket"));
        table
    }

    fn open_with_two(table: &mut Table, drag: &mut DragRace) {
        drag.start(&mut table.ctx(), ConnId(1)).unwrap();
        drag.join(&mut table.ctx(), ConnId(1), 10, "sports").unwrap();
        drag.join(&mut table.ctx(), ConnId(2), 5, "1").unwrap();
        assert_eq!(drag.pot(), 15);
    }

    fn run_to_end(table: &mut Table, drag: &mut DragRace) {
        let epoch = drag.epoch;
        for _ in 0..10_000 {
            if drag.phase() == DragPhase::Idle {
                return;
            }
            drag.on_timer(&mut table.ctx(), epoch, TimerKind::DragStep);
        }
        panic!("race never finished");
    }

    #[test]
    fn test_physics_formulas() {
        let sports = specs("car_sports");
        assert!((max_speed(&sports) - 175.0 / 300.0 * 5.0).abs() < 1e-9);
        assert!((acceleration(&sports, 0.0) - (1.5 - 0.01)).abs() < 1e-9);
        assert!((pothole_slowdown(&sports) - 0.65).abs() < 1e-9);
        assert_eq!(nitro_boost(&sports), 2.0);

        let muscle = specs("car_muscle");
        assert_eq!(nitro_boost(&muscle), 3.5);

        let heavy = VehicleSpecs {
            acceleration: 0,
            weight_lbs: 9000,
            ..sports
        };
        assert_eq!(acceleration(&heavy, 50.0), MIN_ACCELERATION);

        let slow_start = VehicleSpecs {
            quirk: Quirk::SlowStart,
            ..sports
        };
        assert!(acceleration(&slow_start, 10.0) < acceleration(&slow_start, 30.0));
    }

    #[test]
    fn test_pothole_hit_slows_and_is_consumed() {
        let mut racer = Racer {
            conn: ConnId(1),
            user: "amy".into(),
            car: "Sports Roadster".into(),
            car_id: "car_sports",
            specs: specs("car_sports"),
            stake: 1,
            lane: 1,
            position: 40.0,
            speed: 2.0,
            boosts: 1,
            finished: false,
            dnf: false,
        };
        let mut potholes = vec![
            Pothole { lane: 0, position: 41.0 },
            Pothole { lane: 1, position: 43.0 },
        ];
        assert!(racer.step(&mut potholes));
        assert_eq!(potholes, vec![Pothole { lane: 0, position: 41.0 }]);
        // Accelerates to the top speed cap, then loses 0.65
        let expected = max_speed(&racer.specs) - 0.65;
        assert!((racer.speed - expected).abs() < 1e-9);
        assert!((racer.position - (40.0 + expected)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_join_requires_owned_car_and_funds() {
        let mut table = garage_table();
        let mut drag = DragRace::default();
        assert!(matches!(
            drag.start(&mut table.ctx(), ConnId(3)),
            Err(CommandError::Invalid(_))
        ));
        drag.start(&mut table.ctx(), ConnId(1)).unwrap();
        assert!(drag.join(&mut table.ctx(), ConnId(3), 5, "sports").is_err());
        assert_eq!(
            drag.join(&mut table.ctx(), ConnId(2), 50, "rust"),
            Err(CommandError::InsufficientFunds { balance: 20 })
        );
        drag.join(&mut table.ctx(), ConnId(2), 5, "rust").unwrap();
        assert!(drag.join(&mut table.ctx(), ConnId(2), 5, "rust").is_err());
        assert_eq!(table.ledger.peek("bob"), 15);
        assert!(drag.has_entered("BOB", "car_rust_bucket"));
        assert!(!drag.has_entered("amy", "car_sports"));
        drag.reset();
        assert!(!drag.has_entered("bob", "car_rust_bucket"));
    }

    #[tokio::test]
    async fn test_only_host_starts_and_needs_two_racers() {
        let mut table = garage_table();
        let mut drag = DragRace::default();
        drag.start(&mut table.ctx(), ConnId(1)).unwrap();
        drag.join(&mut table.ctx(), ConnId(1), 10, "sports").unwrap();
        assert!(matches!(
            drag.launch(&mut table.ctx(), ConnId(1)),
            Err(CommandError::Invalid(_))
        ));
        drag.join(&mut table.ctx(), ConnId(2), 5, "rust").unwrap();
        assert_eq!(drag.launch(&mut table.ctx(), ConnId(2)), Err(CommandError::NotHost));
        drag.launch(&mut table.ctx(), ConnId(1)).unwrap();
        assert_eq!(drag.phase(), DragPhase::Countdown);
        drag.reset();
    }

    #[tokio::test]
    async fn test_cancel_refunds_everyone() {
        let mut table = garage_table();
        let mut drag = DragRace::default();
        open_with_two(&mut table, &mut drag);
        assert_eq!(drag.cancel(&mut table.ctx(), ConnId(2)), Err(CommandError::NotHost));
        drag.cancel(&mut table.ctx(), ConnId(1)).unwrap();
        assert_eq!(table.ledger.peek("amy"), 20);
        assert_eq!(table.ledger.peek("bob"), 20);
        assert_eq!(drag.phase(), DragPhase::Idle);
    }

    #[tokio::test]
    async fn test_deadline_with_one_racer_refunds() {
        let mut table = garage_table();
        let mut drag = DragRace::default();
        drag.start(&mut table.ctx(), ConnId(1)).unwrap();
        drag.join(&mut table.ctx(), ConnId(2), 5, "rust").unwrap();
        let epoch = drag.epoch;
        drag.on_timer(&mut table.ctx(), epoch, TimerKind::DragDeadline);
        assert_eq!(drag.phase(), DragPhase::Idle);
        assert_eq!(table.ledger.peek("bob"), 20);
    }

    #[tokio::test]
    async fn test_countdown_then_race_pays_winner_the_pot() {
        let mut table = garage_table();
        let mut drag = DragRace::default();
        open_with_two(&mut table, &mut drag);
        drag.launch(&mut table.ctx(), ConnId(1)).unwrap();
        let epoch = drag.epoch;

        for _ in 0..3 {
            drag.on_timer(&mut table.ctx(), epoch, TimerKind::DragCountdown);
        }
        assert_eq!(drag.phase(), DragPhase::Running);
        assert!(drag.shift_lane(ConnId(3), LaneShift::Right).is_err());
        drag.shift_lane(ConnId(1), LaneShift::Right).unwrap();
        assert_eq!(drag.nitro(&mut table.ctx(), ConnId(1)), Ok(1));

        run_to_end(&mut table, &mut drag);
        let (winner, pot, order) = table
            .broadcasts()
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::DragResult { winner, pot, order } => Some((winner, pot, order)),
                _ => None,
            })
            .unwrap();
        assert_eq!(pot, 15);
        assert_eq!(order.len(), 2);
        let winner = winner.unwrap();
        assert_eq!(winner, order[0]);
        let total = table.ledger.peek("amy") + table.ledger.peek("bob");
        assert_eq!(total, 40);
        assert!(table.ledger.peek(&winner) >= 25);
    }

    #[tokio::test]
    async fn test_nitro_runs_out() {
        let mut table = garage_table();
        let mut drag = DragRace::default();
        table.config.drag_countdown_secs = 0;
        open_with_two(&mut table, &mut drag);
        assert!(drag.nitro(&mut table.ctx(), ConnId(2)).is_err());
        drag.launch(&mut table.ctx(), ConnId(1)).unwrap();
        assert_eq!(drag.phase(), DragPhase::Running);
        // Rust bucket carries a single charge
        let charges = specs("car_rust_bucket").boost_charges.max(1);
        for left in (0..charges).rev() {
            assert_eq!(drag.nitro(&mut table.ctx(), ConnId(2)), Ok(left));
        }
        assert!(drag.nitro(&mut table.ctx(), ConnId(2)).is_err());
        drag.reset();
    }

    #[tokio::test]
    async fn test_racer_disconnect_before_start_is_refunded() {
        let mut table = garage_table();
        let mut drag = DragRace::default();
        open_with_two(&mut table, &mut drag);
        drag.on_disconnect(&mut table.ctx(), ConnId(2), "bob");
        assert_eq!(table.ledger.peek("bob"), 20);
        assert_eq!(drag.pot(), 10);
        assert_eq!(drag.phase(), DragPhase::Collecting);
        drag.reset();
    }

    #[tokio::test]
    async fn test_racer_disconnect_mid_race_is_dnf() {
        let mut table = garage_table();
        table.config.drag_countdown_secs = 0;
        let mut drag = DragRace::default();
        open_with_two(&mut table, &mut drag);
        drag.launch(&mut table.ctx(), ConnId(1)).unwrap();
        drag.on_disconnect(&mut table.ctx(), ConnId(2), "bob");
        run_to_end(&mut table, &mut drag);
        assert_eq!(table.ledger.peek("amy"), 25);
        assert_eq!(table.ledger.peek("bob"), 15);
    }

    #[tokio::test]
    async fn test_host_disconnect_cancels() {
        let mut table = garage_table();
        table.config.drag_countdown_secs = 0;
        let mut drag = DragRace::default();
        open_with_two(&mut table, &mut drag);
        drag.launch(&mut table.ctx(), ConnId(1)).unwrap();
        drag.on_disconnect(&mut table.ctx(), ConnId(1), "amy");
        assert_eq!(drag.phase(), DragPhase::Idle);
        assert_eq!(table.ledger.peek("amy"), 20);
        assert_eq!(table.ledger.peek("bob"), 20);
    }
}
