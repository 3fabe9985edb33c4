//! The room actor
//!
//! One tokio task owns every piece of mutable state: sessions, ledger,
//! inventories and the game arena. Everything that can change that state
//! arrives as a `RoomEvent` on a single channel and is handled to completion
//! before the next event is looked at, so no handler ever observes another
//! one half-way through.
//!
//! After each event the room flushes: changed record sets are written to the
//! store and, if any balance moved, every client gets a fresh balance
//! snapshot.

mod market;
mod play;

use crate::appraisal::{AppraisalRequest, Appraiser, Valuation};
use crate::clock::{Clock, TimerEvent, TimerHandle};
use crate::commands::{is_command, Command, HELP_LINES};
use crate::config::WanchatConfig;
use crate::economy::Ledger;
use crate::errors::{CommandError, CommandResult, WanchatResult};
use crate::events::{ControlEvent, Outbox, ServerEvent};
use crate::games::{Arena, GameCtx};
use crate::identity::{normalize_username, ConnId, Sessions, MAX_USERNAME_LEN};
use crate::inventory::{Inventories, Shelf};
use crate::metrics::RoomMetrics;
use crate::storage::{RecordSet, Snapshot, Store};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Everything the room reacts to
#[derive(Debug)]
pub enum RoomEvent {
    Join { conn: ConnId, username: String },
    /// Chat line or slash command
    Chat { conn: ConnId, text: String },
    Control { conn: ConnId, control: ControlEvent },
    Disconnect { conn: ConnId },
    Timer(TimerEvent),
    AppraisalValued { id: String, valuation: Valuation },
    /// Read-only query from the HTTP side
    Status { reply: oneshot::Sender<RoomStatus> },
}

/// Point-in-time view of the room for `/status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomStatus {
    pub users: Vec<String>,
    pub active_game: Option<String>,
    pub phase: Option<&'static str>,
    pub pending_appraisals: usize,
    pub shutting_down: bool,
}

/// Cloneable sender side of the room's event channel
#[derive(Debug, Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomEvent>,
}

impl RoomHandle {
    /// Queue an event; false once the room has stopped
    pub fn send(&self, event: RoomEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Ask the room for a status snapshot; None once it has stopped
    pub async fn status(&self) -> Option<RoomStatus> {
        let (reply, rx) = oneshot::channel();
        if !self.send(RoomEvent::Status { reply }) {
            return None;
        }
        rx.await.ok()
    }
}

/// Whether the event loop keeps going after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Room {
    config: WanchatConfig,
    sessions: Sessions,
    ledger: Ledger,
    inventories: Inventories,
    arena: Arena,
    out: Arc<dyn Outbox>,
    store: Box<dyn Store>,
    clock: Clock,
    rng: StdRng,
    appraiser: Appraiser,
    metrics: Arc<RoomMetrics>,
    tx: mpsc::UnboundedSender<RoomEvent>,
    rx: mpsc::UnboundedReceiver<RoomEvent>,
    appraisal_timers: HashMap<String, TimerHandle>,
    valuing: HashSet<String>,
    store_salt: u64,
    repaint: bool,
    shutting_down: bool,
}

impl Room {
    /// Load persisted state and build the room; fails if the store is corrupt
    pub fn new(
        config: WanchatConfig,
        store: Box<dyn Store>,
        out: Arc<dyn Outbox>,
        appraiser: Appraiser,
        metrics: Arc<RoomMetrics>,
    ) -> WanchatResult<(Room, RoomHandle)> {
        let snapshot = store.load()?;
        let ledger = Ledger::restore(config.economy.starting_balance, snapshot.balances.clone());
        let inventories = Inventories::restore(&snapshot);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rng = StdRng::from_entropy();
        let store_salt = rng.gen();

        info!(
            accounts = snapshot.balances.len(),
            pending_appraisals = snapshot.pending_appraisals.len(),
            "🏠 Room state restored"
        );
        let room = Room {
            config,
            sessions: Sessions::new(),
            ledger,
            inventories,
            arena: Arena::new(),
            out,
            store,
            clock: Clock::new(tx.clone()),
            rng,
            appraiser,
            metrics,
            tx: tx.clone(),
            rx,
            appraisal_timers: HashMap::new(),
            valuing: HashSet::new(),
            store_salt,
            repaint: false,
            shutting_down: false,
        };
        Ok((room, RoomHandle { tx }))
    }

    /// Fix the random source, for reproducible tests
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn handle(&self) -> RoomHandle {
        RoomHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drive the room until shutdown or until every sender is gone
    pub async fn run(mut self) {
        self.restore_appraisals();
        info!("🚀 Room event loop started");
        while let Some(event) = self.rx.recv().await {
            if self.handle_event(event) == Flow::Stop {
                break;
            }
        }
        self.arena.reset_all();
        self.flush();
        info!("🛑 Room event loop stopped");
    }

    /// Handle one event to completion, then flush
    pub fn handle_event(&mut self, event: RoomEvent) -> Flow {
        let flow = match event {
            RoomEvent::Join { conn, username } => {
                self.on_join(conn, &username);
                Flow::Continue
            }
            RoomEvent::Chat { conn, text } => {
                self.on_chat(conn, &text);
                Flow::Continue
            }
            RoomEvent::Control { conn, control } => {
                self.on_control(conn, control);
                Flow::Continue
            }
            RoomEvent::Disconnect { conn } => {
                self.on_disconnect(conn);
                Flow::Continue
            }
            RoomEvent::Timer(timer) => self.on_timer(timer),
            RoomEvent::AppraisalValued { id, valuation } => {
                self.on_appraisal_valued(&id, valuation);
                Flow::Continue
            }
            RoomEvent::Status { reply } => {
                let _ = reply.send(self.status());
                return Flow::Continue;
            }
        };
        self.flush();
        flow
    }

    /// Split the arena from the state games are allowed to touch
    fn play<T>(&mut self, f: impl FnOnce(&mut Arena, &mut GameCtx<'_>) -> T) -> T {
        let Room {
            arena,
            ledger,
            sessions,
            inventories,
            out,
            clock,
            rng,
            config,
            ..
        } = self;
        let mut ctx = GameCtx {
            ledger,
            sessions,
            inventories,
            out: out.as_ref(),
            clock,
            rng,
            config: &config.games,
        };
        f(arena, &mut ctx)
    }

    fn on_join(&mut self, conn: ConnId, raw: &str) {
        if self.shutting_down {
            return;
        }
        if let Some(current) = self.sessions.username(conn) {
            let line = format!("You are already joined as {}", current);
            self.out.tell(conn, &line);
            return;
        }
        let Some(name) = normalize_username(raw) else {
            self.out.tell(
                conn,
                &format!(
                    "Invalid username. Use 1-{} characters without spaces.",
                    MAX_USERNAME_LEN
                ),
            );
            return;
        };

        let name = self.ledger.display_name(&name);
        self.sessions.join(conn, name.clone());
        self.metrics.record_connect();
        self.repaint = true;
        info!(%conn, user = %name, "👋 User joined");

        self.out
            .tell(conn, &format!("Welcome, {}! Type /help for commands.", name));
        self.out.announce(&format!("{} joined the chat", name));
        self.broadcast_users();
    }

    fn on_disconnect(&mut self, conn: ConnId) {
        let Some(user) = self.sessions.leave(conn) else {
            return;
        };
        self.metrics.record_disconnect();
        info!(%conn, user = %user, "👋 User left");
        self.out.announce(&format!("{} left the chat", user));
        self.broadcast_users();
        self.play(|arena, ctx| arena.on_disconnect(ctx, conn, &user));
    }

    fn on_chat(&mut self, conn: ConnId, text: &str) {
        let Some(user) = self.sessions.username(conn).map(str::to_string) else {
            self.out.tell(conn, &CommandError::NotJoined.to_string());
            return;
        };
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !is_command(text) {
            self.metrics.record_chat();
            self.out.broadcast(ServerEvent::Chat {
                user: user.clone(),
                text: text.to_string(),
                title: self.inventories.title_prefix(&user).map(str::to_string),
                time: crate::events::timestamp(),
            });
            return;
        }

        let result = Command::parse(text).and_then(|cmd| {
            debug!(%conn, user = %user, ?cmd, "command");
            self.execute(conn, &user, cmd)
        });
        self.metrics.record_command(result.is_ok());
        if let Err(e) = result {
            debug!(%conn, user = %user, "command rejected: {}", e);
            self.out.tell(conn, &e.to_string());
        }
    }

    fn execute(&mut self, conn: ConnId, user: &str, cmd: Command) -> CommandResult {
        match cmd {
            Command::Help => {
                for line in HELP_LINES {
                    self.out.tell(conn, line);
                }
                Ok(())
            }
            Command::Users => {
                let users = self.sessions.usernames();
                self.out.tell(
                    conn,
                    &format!("Online users ({}): {}", users.len(), users.join(", ")),
                );
                Ok(())
            }
            Command::Clear => {
                self.out.unicast(conn, ServerEvent::ClearLocal);
                Ok(())
            }
            Command::ClearAll => {
                self.out.broadcast(ServerEvent::ClearAll);
                self.out
                    .announce(&format!("{} cleared the chat for everyone", user));
                Ok(())
            }
            Command::Killall => {
                self.killall(user);
                Ok(())
            }

            Command::Balance => self.show_balances(user),
            Command::Give { to, amount } => self.give(user, &to, amount),
            Command::Beg => self.beg(user),

            Command::Store => self.show_store(conn, user),
            Command::Buy(query) => self.buy(user, &query),
            Command::Sell(query) => self.sell(user, Shelf::Items, &query),
            Command::Inventory(target) => {
                self.show_inventory(conn, user, target.as_deref().unwrap_or(user))
            }
            Command::Inventories => self.show_everyone(conn, Shelf::Items),
            Command::Equip(query) => self.equip(conn, user, &query),
            Command::Unequip => self.unequip(conn, user),
            Command::Gift { to, item } => self.gift(user, &to, Shelf::Items, &item),
            Command::Appraise(None) => self.show_pending_appraisals(conn, user),
            Command::Appraise(Some(query)) => {
                self.appraise(user, Shelf::All, &query)
            }

            Command::Dealership => self.show_dealership(conn, user),
            Command::BuyCar(query) => self.buy_car(user, &query),
            Command::SellCar(query) => self.sell(user, Shelf::Vehicles, &query),
            Command::GiveCar { to, car } => {
                self.gift(user, &to, Shelf::Vehicles, &car)
            }
            Command::AppraiseCar(query) => {
                self.appraise(user, Shelf::Vehicles, &query)
            }
            Command::Garage(target) => {
                self.show_garage(conn, user, target.as_deref().unwrap_or(user))
            }
            Command::Garages => self.show_everyone(conn, Shelf::Vehicles),
            Command::CarSpecs(query) => self.show_car_specs(conn, user, &query),

            game => self.execute_game(conn, game),
        }
    }

    fn on_control(&mut self, conn: ConnId, control: ControlEvent) {
        if !self.sessions.is_connected(conn) {
            return;
        }
        // Live input is rate-unbounded; rejects are dropped silently
        if let Err(e) = self.apply_control(conn, control) {
            debug!(%conn, ?control, "control ignored: {}", e);
        }
    }

    fn on_timer(&mut self, timer: TimerEvent) -> Flow {
        match timer {
            TimerEvent::Game { .. } => {
                self.play(|arena, ctx| arena.on_timer(ctx, &timer));
            }
            TimerEvent::AppraisalDue { id } => {
                self.appraisal_timers.remove(&id);
                self.value_appraisal(&id);
            }
            TimerEvent::Announce { text } => self.out.announce(&text),
            TimerEvent::Shutdown => {
                info!("💀 Shutdown grace period over");
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn killall(&mut self, user: &str) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        warn!(user, "💀 Killall requested");
        self.out.broadcast(ServerEvent::Killall {
            by: user.to_string(),
        });
        self.out
            .announce(&format!("{} killed the server. Goodbye!", user));
        let grace = Duration::from_millis(self.config.server.shutdown_grace_ms);
        self.clock.defer(grace, TimerEvent::Shutdown);
    }

    /// Re-arm every persisted appraisal; overdue ones are valued right away
    pub fn restore_appraisals(&mut self) {
        let now = Utc::now();
        let pending: Vec<(String, bool, u64)> = self
            .inventories
            .all_pending()
            .map(|p| (p.id.clone(), p.is_due(now), p.remaining_secs(now)))
            .collect();
        let (mut due, mut later) = (0, 0);
        for (id, is_due, remaining) in pending {
            if is_due {
                due += 1;
                self.value_appraisal(&id);
            } else {
                later += 1;
                self.schedule_appraisal(&id, Duration::from_secs(remaining));
            }
        }
        if due + later > 0 {
            info!(due, rescheduled = later, "🔍 Pending appraisals restored");
        }
    }

    fn schedule_appraisal(&mut self, id: &str, delay: Duration) {
        let handle = self.clock.after(
            delay,
            TimerEvent::AppraisalDue { id: id.to_string() },
        );
        self.appraisal_timers.insert(id.to_string(), handle);
    }

    /// Ask the appraiser for a value off the event loop
    fn value_appraisal(&mut self, id: &str) {
        let Some(pending) = self.inventories.pending(id) else {
            return;
        };
        let Some(item) = pending.item.catalog() else {
            return;
        };
        if !self.valuing.insert(id.to_string()) {
            return;
        }
        let request = AppraisalRequest::for_item(item);
        let appraiser = self.appraiser.clone();
        let tx = self.tx.clone();
        let id = id.to_string();
        debug!(appraisal = %id, item = item.id, "valuing appraisal");
        tokio::spawn(async move {
            let valuation = appraiser.value(&request).await;
            let _ = tx.send(RoomEvent::AppraisalValued { id, valuation });
        });
    }

    fn on_appraisal_valued(&mut self, id: &str, valuation: Valuation) {
        self.valuing.remove(id);
        let Some(done) = self
            .inventories
            .complete_appraisal(id, valuation.appraisal.clone())
        else {
            return;
        };
        self.metrics.record_appraisal(valuation.from_fallback);
        let Some(item) = done.item.catalog() else {
            return;
        };
        let appraisal = valuation.appraisal;
        info!(
            user = %done.username,
            item = item.id,
            value = appraisal.value,
            fallback = valuation.from_fallback,
            "🔍 Appraisal complete"
        );
        self.out.broadcast(ServerEvent::AppraisalComplete {
            user: done.username.clone(),
            item: item.name.to_string(),
            original_price: done.original_price,
            value: appraisal.value,
            reason: appraisal.reason.clone(),
        });
        self.out.announce(&format!(
            "🔍 APPRAISAL: {}'s {} is worth ${} (paid ${}). {}",
            done.username,
            item.label(),
            market::format_price(appraisal.value),
            market::format_price(done.original_price),
            appraisal.reason
        ));
    }

    pub fn status(&self) -> RoomStatus {
        RoomStatus {
            users: self.sessions.usernames(),
            active_game: self.arena.active_game().map(|kind| kind.to_string()),
            phase: self.arena.active_phase(),
            pending_appraisals: self.inventories.all_pending().count(),
            shutting_down: self.shutting_down,
        }
    }

    fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            balances: self.ledger.snapshot(),
            ..Snapshot::default()
        };
        self.inventories.fill_snapshot(&mut snapshot);
        snapshot
    }

    /// Persist what changed and repaint balances if money moved
    fn flush(&mut self) {
        let money_moved = self.ledger.take_dirty();
        let mut sets = self.inventories.take_dirty();
        if money_moved {
            sets.insert(RecordSet::Balances);
        }
        let repaint = std::mem::take(&mut self.repaint);
        if money_moved || repaint {
            self.broadcast_balances();
        }
        if sets.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for set in sets {
            if let Err(e) = self.store.save(set, &snapshot) {
                self.metrics.record_storage_failure();
                warn!(file = set.file_name(), "⚠️ Failed to persist record set: {}", e);
            }
        }
    }

    fn online_balances(&self) -> BTreeMap<String, u64> {
        self.sessions
            .usernames()
            .into_iter()
            .map(|name| {
                let balance = self.ledger.peek(&name);
                (name, balance)
            })
            .collect()
    }

    fn broadcast_balances(&self) {
        self.out.broadcast(ServerEvent::BalanceUpdate {
            balances: self.online_balances(),
        });
    }

    fn broadcast_users(&self) {
        self.out.broadcast(ServerEvent::Users {
            users: self.sessions.usernames(),
        });
    }
}
