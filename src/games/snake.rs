//! Single-player snake; the host steers, everyone watches

use super::{GameCtx, GameKind, GameSession};
use crate::clock::{TimerEvent, TimerHandle, TimerKind};
use crate::errors::{CommandError, CommandResult};
use crate::events::ServerEvent;
use crate::identity::ConnId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::info;

pub const WIDTH: i32 = 30;
pub const HEIGHT: i32 = 20;
pub const MAX_FOOD_VALUE: u64 = 10;
const FOOD_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    fn moved(self, dir: Direction) -> Point {
        let (dx, dy) = dir.delta();
        Point::new(self.x + dx, self.y + dy)
    }

    fn in_bounds(self) -> bool {
        (0..WIDTH).contains(&self.x) && (0..HEIGHT).contains(&self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Wall,
    SelfHit,
    Quit,
    HostLeft,
}

impl EndReason {
    fn as_str(self) -> &'static str {
        match self {
            EndReason::Wall => "wall",
            EndReason::SelfHit => "self",
            EndReason::Quit => "quit",
            EndReason::HostLeft => "disconnect",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            EndReason::Wall => "hit a wall",
            EndReason::SelfHit => "hit itself",
            EndReason::Quit => "quit",
            EndReason::HostLeft => "left the game",
        }
    }
}

#[derive(Debug, Default)]
pub struct Snake {
    active: bool,
    epoch: u64,
    host: Option<(ConnId, String)>,
    /// Head first
    body: VecDeque<Point>,
    heading: Option<Direction>,
    next_heading: Option<Direction>,
    food: Option<Point>,
    score: u64,
    food_value: u64,
    tick: Duration,
    timer: Option<TimerHandle>,
}

impl Snake {
    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn body(&self) -> Vec<Point> {
        self.body.iter().copied().collect()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    fn arm(&mut self, ctx: &GameCtx<'_>) {
        self.timer = Some(ctx.clock.every(
            self.tick,
            TimerEvent::Game {
                game: GameKind::Snake,
                epoch: self.epoch,
                kind: TimerKind::SnakeStep,
            },
        ));
    }

    pub fn start(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let host = ctx.user(conn)?;
        if self.active {
            return Err(CommandError::WrongPhase("A snake game is already in progress"));
        }
        self.epoch += 1;
        self.active = true;
        self.host = Some((conn, host.clone()));
        let (cx, cy) = (WIDTH / 2, HEIGHT / 2);
        self.body = (0..3).map(|i| Point::new(cx - i, cy)).collect();
        self.heading = Some(Direction::Right);
        self.next_heading = Some(Direction::Right);
        self.score = 0;
        self.food_value = 1;
        self.tick = Duration::from_millis(ctx.config.snake_base_tick_ms);
        self.place_food(ctx.rng);
        self.arm(ctx);

        info!(host = %host, epoch = self.epoch, "🐍 Snake started");
        ctx.out.broadcast(ServerEvent::SnakeStarted {
            host: host.clone(),
            width: WIDTH,
            height: HEIGHT,
        });
        ctx.out.announce("=== SNAKE ===");
        ctx.out.announce(&format!(
            "{} started a game of Snake! Use WASD or Arrow keys to control",
            host
        ));
        Ok(())
    }

    fn place_food<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut food = Point::new(0, 0);
        for _ in 0..FOOD_ATTEMPTS {
            food = Point::new(rng.gen_range(0..WIDTH), rng.gen_range(0..HEIGHT));
            if !self.body.contains(&food) {
                break;
            }
        }
        self.food = Some(food);
    }

    fn is_host(&self, conn: ConnId) -> bool {
        self.active && self.host.as_ref().is_some_and(|(c, _)| *c == conn)
    }

    /// Buffer a heading change for the next step; reversals are ignored
    pub fn turn(&mut self, conn: ConnId, dir: Direction) -> CommandResult {
        if !self.is_host(conn) {
            return Err(CommandError::NotHost);
        }
        if self.heading.map(Direction::opposite) != Some(dir) {
            self.next_heading = Some(dir);
        }
        Ok(())
    }

    pub fn quit(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        if !self.is_host(conn) {
            return Err(CommandError::NotHost);
        }
        self.end(ctx, EndReason::Quit);
        Ok(())
    }

    pub fn on_timer(&mut self, ctx: &mut GameCtx<'_>, epoch: u64, kind: TimerKind) {
        if self.active && epoch == self.epoch && kind == TimerKind::SnakeStep {
            self.step(ctx);
        }
    }

    fn step(&mut self, ctx: &mut GameCtx<'_>) {
        self.heading = self.next_heading;
        let (Some(heading), Some(&head)) = (self.heading, self.body.front()) else {
            return;
        };
        let next = head.moved(heading);
        if !next.in_bounds() {
            self.end(ctx, EndReason::Wall);
            return;
        }
        if self.body.contains(&next) {
            self.end(ctx, EndReason::SelfHit);
            return;
        }

        self.body.push_front(next);
        if self.food == Some(next) {
            self.score += self.food_value;
            self.food_value = (self.food_value + 1).min(MAX_FOOD_VALUE);
            self.place_food(ctx.rng);
            let floor = Duration::from_millis(ctx.config.snake_min_tick_ms);
            if self.tick > floor {
                self.tick = self
                    .tick
                    .saturating_sub(Duration::from_millis(ctx.config.snake_tick_step_ms))
                    .max(floor);
                self.arm(ctx);
            }
        } else {
            self.body.pop_back();
        }

        ctx.out.broadcast(ServerEvent::SnakeTick {
            body: self.body(),
            food: self.food.unwrap_or(Point::new(0, 0)),
            score: self.score,
            food_value: self.food_value,
        });
    }

    fn end(&mut self, ctx: &mut GameCtx<'_>, reason: EndReason) {
        let host = self
            .host
            .as_ref()
            .map(|(_, name)| name.clone())
            .unwrap_or_default();
        let score = self.score;
        if score > 0 {
            let _ = ctx.ledger.credit(&host, score);
        }
        info!(host = %host, score, reason = reason.as_str(), "🐍 Snake over");
        ctx.out.announce(&format!(
            "{} {}! Final score: {}",
            host,
            reason.describe(),
            score
        ));
        if score > 0 {
            ctx.out.announce(&format!("{} earned ${}!", host, score));
        }
        ctx.out.broadcast(ServerEvent::SnakeOver {
            host,
            score,
            reason: reason.as_str().to_string(),
        });
        ctx.out.announce("=== GAME OVER ===");
        self.reset();
    }

    pub fn on_disconnect(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) {
        if self.is_host(conn) {
            self.end(ctx, EndReason::HostLeft);
        }
    }
}

impl GameSession for Snake {
    fn kind(&self) -> GameKind {
        GameKind::Snake
    }

    fn phase_name(&self) -> &'static str {
        if self.active {
            "active"
        } else {
            "idle"
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn reset(&mut self) {
        self.timer = None;
        if self.active {
            self.epoch += 1;
        }
        self.active = false;
        self.host = None;
        self.body.clear();
        self.heading = None;
        self.next_heading = None;
        self.food = None;
        self.score = 0;
        self.food_value = 1;
    }

    fn describe(&self) -> String {
        match (&self.host, self.active) {
            (Some((_, host)), true) => format!("Snake: {} playing, score {}", host, self.score),
            _ => "Snake: idle".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::Table;
    use super::*;

    fn step(snake: &mut Snake, table: &mut Table) {
        let epoch = snake.epoch;
        snake.on_timer(&mut table.ctx(), epoch, TimerKind::SnakeStep);
    }

    #[tokio::test]
    async fn test_eating_grows_and_scores() {
        let mut table = Table::new(&["amy"]);
        let mut snake = Snake::default();
        snake.start(&mut table.ctx(), ConnId(1)).unwrap();
        assert_eq!(snake.body().len(), 3);
        assert_eq!(snake.body()[0], Point::new(15, 10));

        snake.food = Some(Point::new(16, 10));
        step(&mut snake, &mut table);
        assert_eq!(snake.score(), 1);
        assert_eq!(snake.body().len(), 4);
        assert_eq!(snake.food_value, 2);
        assert_eq!(snake.tick_interval(), Duration::from_millis(148));

        // A plain move keeps the length
        snake.food = Some(Point::new(0, 0));
        step(&mut snake, &mut table);
        assert_eq!(snake.body().len(), 4);
        assert_eq!(snake.body()[0], Point::new(17, 10));
        snake.reset();
    }

    #[tokio::test]
    async fn test_reversal_is_ignored_and_turns_are_buffered() {
        let mut table = Table::new(&["amy", "bob"]);
        let mut snake = Snake::default();
        snake.start(&mut table.ctx(), ConnId(1)).unwrap();
        snake.food = Some(Point::new(0, 0));

        snake.turn(ConnId(1), Direction::Left).unwrap();
        assert_eq!(snake.turn(ConnId(2), Direction::Up), Err(CommandError::NotHost));
        step(&mut snake, &mut table);
        assert_eq!(snake.body()[0], Point::new(16, 10));

        snake.turn(ConnId(1), Direction::Up).unwrap();
        step(&mut snake, &mut table);
        assert_eq!(snake.body()[0], Point::new(16, 9));
        snake.reset();
    }

    #[tokio::test]
    async fn test_wall_ends_game_and_awards_score() {
        let mut table = Table::new(&["amy"]);
        let mut snake = Snake::default();
        snake.start(&mut table.ctx(), ConnId(1)).unwrap();
        snake.food = Some(Point::new(16, 10));
        step(&mut snake, &mut table);
        snake.food = Some(Point::new(0, 0));
        snake.turn(ConnId(1), Direction::Up).unwrap();
        for _ in 0..HEIGHT {
            if !snake.is_active() {
                break;
            }
            step(&mut snake, &mut table);
        }
        assert!(!snake.is_active());
        assert_eq!(table.ledger.peek("amy"), 21);
        let reason = table.broadcasts().into_iter().find_map(|e| match e {
            ServerEvent::SnakeOver { reason, score, .. } => Some((reason, score)),
            _ => None,
        });
        assert_eq!(reason, Some(("wall".to_string(), 1)));
    }

    #[tokio::test]
    async fn test_self_collision() {
        let mut table = Table::new(&["amy"]);
        let mut snake = Snake::default();
        snake.start(&mut table.ctx(), ConnId(1)).unwrap();
        snake.body = [(5, 5), (6, 5), (6, 6), (5, 6), (4, 6)]
            .into_iter()
            .map(|(x, y)| Point::new(x, y))
            .collect();
        snake.heading = Some(Direction::Up);
        snake.next_heading = Some(Direction::Down);
        step(&mut snake, &mut table);
        assert!(!snake.is_active());
    }

    #[tokio::test]
    async fn test_quit_and_host_disconnect() {
        let mut table = Table::new(&["amy", "bob"]);
        let mut snake = Snake::default();
        snake.start(&mut table.ctx(), ConnId(1)).unwrap();
        assert_eq!(snake.quit(&mut table.ctx(), ConnId(2)), Err(CommandError::NotHost));
        snake.on_disconnect(&mut table.ctx(), ConnId(2));
        assert!(snake.is_active());
        snake.on_disconnect(&mut table.ctx(), ConnId(1));
        assert!(!snake.is_active());

        snake.start(&mut table.ctx(), ConnId(2)).unwrap();
        snake.quit(&mut table.ctx(), ConnId(2)).unwrap();
        assert!(!snake.is_active());
        assert_eq!(table.ledger.peek("bob"), 20);
    }

    #[tokio::test]
    async fn test_speed_floor() {
        let mut table = Table::new(&["amy"]);
        let mut snake = Snake::default();
        snake.start(&mut table.ctx(), ConnId(1)).unwrap();
        snake.tick = Duration::from_millis(81);
        snake.food = Some(Point::new(16, 10));
        step(&mut snake, &mut table);
        assert_eq!(snake.tick_interval(), Duration::from_millis(80));
        snake.food = Some(Point::new(17, 10));
        step(&mut snake, &mut table);
        assert_eq!(snake.tick_interval(), Duration::from_millis(80));
        snake.reset();
    }

    #[tokio::test]
    async fn test_reset_twice_stops_ticking() {
        let mut table = Table::new(&["amy"]);
        table.config.snake_base_tick_ms = 1;
        let mut snake = Snake::default();
        snake.start(&mut table.ctx(), ConnId(1)).unwrap();
        snake.reset();
        snake.reset();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(table.fired().is_empty());
        assert!(!snake.is_active());
    }
}
