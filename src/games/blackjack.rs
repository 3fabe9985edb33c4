//! Multi-seat blackjack against the house
//!
//! Idle → collecting wagers → playing (seats in wager order) → dealer →
//! payout → idle. Dealing, the dealer's draw and payout all happen inside a
//! single event, so the only externally visible phases are collecting and
//! playing.

use super::cards::{can_split, format_hand, hand_value, is_natural, Card, Deck};
use super::{GameCtx, GameKind, GameSession};
use crate::clock::{TimerEvent, TimerHandle, TimerKind};
use crate::errors::{CommandError, CommandResult};
use crate::events::{HandOutcome, HandResult, HandView, ServerEvent};
use crate::identity::ConnId;
use rand::rngs::StdRng;
use tracing::info;

const DEALER_STANDS_AT: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlackjackPhase {
    #[default]
    Idle,
    Collecting,
    Playing,
}

/// A response in the wager phase; zero means the player folded
#[derive(Debug, Clone)]
struct Wager {
    conn: ConnId,
    user: String,
    amount: u64,
}

#[derive(Debug, Clone)]
struct Hand {
    cards: Vec<Card>,
    wager: u64,
    from_split: bool,
    acted: bool,
    done: bool,
}

impl Hand {
    fn new(wager: u64) -> Self {
        Self {
            cards: Vec::with_capacity(4),
            wager,
            from_split: false,
            acted: false,
            done: false,
        }
    }

    fn value(&self) -> u32 {
        hand_value(&self.cards)
    }

    fn is_natural(&self) -> bool {
        !self.from_split && is_natural(&self.cards)
    }
}

#[derive(Debug, Clone)]
struct Seat {
    conn: ConnId,
    user: String,
    hands: Vec<Hand>,
    forfeited: bool,
}

impl Seat {
    fn open_hand(&self) -> Option<usize> {
        if self.forfeited {
            return None;
        }
        self.hands.iter().position(|h| !h.done)
    }
}

/// Outcome and total return for one finished hand
pub fn settle(
    cards: &[Card],
    wager: u64,
    natural: bool,
    forfeited: bool,
    dealer: &[Card],
) -> (HandOutcome, u64) {
    let value = hand_value(cards);
    let house = hand_value(dealer);
    if forfeited {
        (HandOutcome::Forfeit, 0)
    } else if value > 21 {
        (HandOutcome::Bust, 0)
    } else if natural && !is_natural(dealer) {
        (HandOutcome::Natural, wager * 5 / 2)
    } else if house > 21 || value > house {
        (HandOutcome::Win, wager * 2)
    } else if value == house {
        (HandOutcome::Push, wager)
    } else {
        (HandOutcome::Lose, 0)
    }
}

#[derive(Debug, Default)]
pub struct Blackjack {
    phase: BlackjackPhase,
    epoch: u64,
    host: Option<String>,
    wagers: Vec<Wager>,
    seats: Vec<Seat>,
    turn: usize,
    dealer: Vec<Card>,
    deck: Deck,
    stacked: Option<Deck>,
    timer: Option<TimerHandle>,
}

impl Blackjack {
    pub fn phase(&self) -> BlackjackPhase {
        self.phase
    }

    /// Use `deck` for the next deal instead of a fresh shuffle
    pub fn stack_next_deck(&mut self, deck: Deck) {
        self.stacked = Some(deck);
    }

    /// Open the wager phase
    pub fn start(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let host = ctx.user(conn)?;
        if self.is_active() {
            return Err(CommandError::WrongPhase("A blackjack game is already in progress"));
        }
        self.epoch += 1;
        self.phase = BlackjackPhase::Collecting;
        self.host = Some(host.clone());
        let window = ctx.config.wager_window();
        self.timer = Some(ctx.clock.after(
            window,
            TimerEvent::Game {
                game: GameKind::Blackjack,
                epoch: self.epoch,
                kind: TimerKind::WagerDeadline,
            },
        ));
        info!(host = %host, epoch = self.epoch, "🃏 Blackjack opened");
        ctx.out.broadcast(ServerEvent::BjStarted {
            host: host.clone(),
            window_secs: window.as_secs(),
        });
        ctx.out.announce(&format!(
            "🃏 {} is dealing blackjack! Type /bet [amount] or /fold within {} seconds.",
            host,
            window.as_secs()
        ));
        Ok(())
    }

    fn responded(&self, conn: ConnId) -> bool {
        self.wagers.iter().any(|w| w.conn == conn)
    }

    fn collecting_check(&self, conn: ConnId) -> CommandResult {
        if self.phase != BlackjackPhase::Collecting {
            return Err(CommandError::WrongPhase(
                "No blackjack game is accepting bets right now. Use /deal to start one.",
            ));
        }
        if self.responded(conn) {
            return Err(CommandError::AlreadyResponded);
        }
        Ok(())
    }

    /// Place a wager; the stake is debited immediately
    pub fn bet(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId, amount: u64) -> CommandResult {
        let user = ctx.user(conn)?;
        self.collecting_check(conn)?;
        ctx.ledger.debit(&user, amount)?;
        self.wagers.push(Wager {
            conn,
            user: user.clone(),
            amount,
        });
        ctx.out.broadcast(ServerEvent::BjWager {
            user: user.clone(),
            amount,
        });
        ctx.out.announce(&format!("{} bets ${}", user, amount));
        self.deal_if_everyone_responded(ctx);
        Ok(())
    }

    /// Sit this hand out
    pub fn fold(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let user = ctx.user(conn)?;
        self.collecting_check(conn)?;
        self.wagers.push(Wager {
            conn,
            user: user.clone(),
            amount: 0,
        });
        ctx.out.broadcast(ServerEvent::BjWager {
            user: user.clone(),
            amount: 0,
        });
        ctx.out.announce(&format!("{} sits this one out", user));
        self.deal_if_everyone_responded(ctx);
        Ok(())
    }

    fn deal_if_everyone_responded(&mut self, ctx: &mut GameCtx<'_>) {
        if self.phase != BlackjackPhase::Collecting {
            return;
        }
        let everyone = ctx.sessions.connections().all(|conn| self.responded(conn));
        if everyone {
            self.deal(ctx);
        }
    }

    pub fn on_timer(&mut self, ctx: &mut GameCtx<'_>, epoch: u64, kind: TimerKind) {
        if epoch != self.epoch || self.phase != BlackjackPhase::Collecting {
            return;
        }
        if kind == TimerKind::WagerDeadline {
            self.timer = None;
            self.deal(ctx);
        }
    }

    fn draw(&mut self, rng: &mut StdRng) -> Card {
        loop {
            if let Some(card) = self.deck.draw() {
                return card;
            }
            self.deck = Deck::shuffled(rng);
        }
    }

    fn deal(&mut self, ctx: &mut GameCtx<'_>) {
        self.timer = None;
        let wagering: Vec<Wager> = self.wagers.iter().filter(|w| w.amount > 0).cloned().collect();
        if wagering.is_empty() {
            ctx.out.broadcast(ServerEvent::BjCancelled {
                reason: "No bets placed".to_string(),
            });
            ctx.out.announce("No bets placed. Blackjack cancelled.");
            self.reset();
            return;
        }

        self.deck = match self.stacked.take() {
            Some(deck) => deck,
            None => Deck::shuffled(ctx.rng),
        };
        self.seats = wagering
            .into_iter()
            .map(|w| Seat {
                conn: w.conn,
                user: w.user,
                hands: vec![Hand::new(w.amount)],
                forfeited: !ctx.sessions.is_connected(w.conn),
            })
            .collect();
        self.dealer.clear();

        for _ in 0..2 {
            for i in 0..self.seats.len() {
                let card = self.draw(ctx.rng);
                self.seats[i].hands[0].cards.push(card);
            }
            let card = self.draw(ctx.rng);
            self.dealer.push(card);
        }

        self.phase = BlackjackPhase::Playing;
        self.turn = 0;

        for seat in &mut self.seats {
            if seat.forfeited || seat.hands[0].is_natural() {
                seat.hands[0].done = true;
            }
        }

        ctx.out.broadcast(ServerEvent::BjDeal {
            hands: self.hand_views(),
            dealer_up: self.dealer[0],
        });
        ctx.out.announce(&format!("Dealer shows {} and one hidden card", self.dealer[0]));
        for seat in &self.seats {
            if seat.forfeited {
                ctx.out.announce(&format!("{} left the table and forfeits", seat.user));
            } else if seat.hands[0].is_natural() {
                ctx.out.announce(&format!("🎉 {} has BLACKJACK!", seat.user));
            }
        }
        info!(seats = self.seats.len(), "🃏 Blackjack dealt");
        self.advance(ctx);
    }

    fn hand_views(&self) -> Vec<HandView> {
        self.seats
            .iter()
            .flat_map(|seat| {
                seat.hands.iter().enumerate().map(move |(i, hand)| HandView {
                    user: seat.user.clone(),
                    hand_index: i,
                    cards: hand.cards.clone(),
                    value: hand.value(),
                    wager: hand.wager,
                })
            })
            .collect()
    }

    /// Prompt the next open hand, or play the dealer when none is left
    fn advance(&mut self, ctx: &mut GameCtx<'_>) {
        let next = (self.turn..self.seats.len())
            .find_map(|i| self.seats[i].open_hand().map(|h| (i, h)));
        let Some((seat_index, hand_index)) = next else {
            self.finish(ctx);
            return;
        };
        self.turn = seat_index;
        let seat = &self.seats[seat_index];
        let hand = &seat.hands[hand_index];
        let balance = ctx.ledger.peek(&seat.user);

        let mut options = vec!["hit".to_string(), "stand".to_string()];
        if hand.cards.len() == 2 && !hand.acted && balance >= hand.wager {
            options.push("double".to_string());
            if seat.hands.len() == 1 && can_split(&hand.cards) {
                options.push("split".to_string());
            }
        }
        ctx.out.broadcast(ServerEvent::BjTurn {
            user: seat.user.clone(),
            hand_index,
            cards: hand.cards.clone(),
            value: hand.value(),
            options: options.clone(),
        });
        ctx.out.announce(&format!(
            "{}'s turn{}: {} ({}) - /{}",
            seat.user,
            if seat.hands.len() > 1 {
                format!(" (hand {})", hand_index + 1)
            } else {
                String::new()
            },
            format_hand(&hand.cards),
            hand.value(),
            options.join(" /")
        ));
    }

    /// Current seat and hand for an action from `conn`
    fn acting(&self, conn: ConnId) -> CommandResult<(usize, usize)> {
        if self.phase != BlackjackPhase::Playing {
            return Err(CommandError::WrongPhase("No blackjack game in progress"));
        }
        let seat = self
            .seats
            .get(self.turn)
            .filter(|s| s.conn == conn)
            .ok_or(CommandError::NotYourTurn)?;
        let hand = seat.open_hand().ok_or(CommandError::NotYourTurn)?;
        Ok((self.turn, hand))
    }

    fn report(&self, ctx: &GameCtx<'_>, seat: usize, hand: usize, action: &str) {
        let seat = &self.seats[seat];
        let h = &seat.hands[hand];
        ctx.out.broadcast(ServerEvent::BjAction {
            user: seat.user.clone(),
            hand_index: hand,
            action: action.to_string(),
            cards: h.cards.clone(),
            value: h.value(),
        });
    }

    pub fn hit(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let (s, h) = self.acting(conn)?;
        let card = self.draw(ctx.rng);
        let hand = &mut self.seats[s].hands[h];
        hand.cards.push(card);
        hand.acted = true;
        let value = hand.value();
        hand.done = value >= 21;
        self.report(ctx, s, h, if value > 21 { "bust" } else { "hit" });
        if value > 21 {
            ctx.out.announce(&format!("💥 {} busts with {}!", self.seats[s].user, value));
        }
        self.advance(ctx);
        Ok(())
    }

    pub fn stand(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let (s, h) = self.acting(conn)?;
        let hand = &mut self.seats[s].hands[h];
        hand.acted = true;
        hand.done = true;
        self.report(ctx, s, h, "stand");
        self.advance(ctx);
        Ok(())
    }

    /// Double the stake, take exactly one card and stand
    pub fn double(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let (s, h) = self.acting(conn)?;
        let hand = &self.seats[s].hands[h];
        if hand.cards.len() != 2 || hand.acted {
            return Err(CommandError::WrongPhase("Can only double on your first two cards"));
        }
        let extra = hand.wager;
        ctx.ledger.debit(&self.seats[s].user, extra)?;
        let card = self.draw(ctx.rng);
        let hand = &mut self.seats[s].hands[h];
        hand.wager += extra;
        hand.cards.push(card);
        hand.acted = true;
        hand.done = true;
        self.report(ctx, s, h, "double");
        self.advance(ctx);
        Ok(())
    }

    /// Split a pair into two hands, each carrying the original stake
    pub fn split(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) -> CommandResult {
        let (s, h) = self.acting(conn)?;
        let seat = &self.seats[s];
        let hand = &seat.hands[h];
        if seat.hands.len() != 1 || hand.acted || !can_split(&hand.cards) {
            return Err(CommandError::Invalid("Cannot split - cards must be a pair".into()));
        }
        let wager = hand.wager;
        ctx.ledger.debit(&seat.user, wager)?;

        let first = self.draw(ctx.rng);
        let second = self.draw(ctx.rng);
        let seat = &mut self.seats[s];
        let moved = seat.hands[0].cards.pop();
        let mut other = Hand::new(wager);
        other.cards.extend(moved);
        other.cards.push(second);
        other.from_split = true;

        let hand = &mut seat.hands[0];
        hand.cards.push(first);
        hand.from_split = true;
        seat.hands.push(other);
        for hand in &mut seat.hands {
            if hand.value() == 21 {
                hand.done = true;
            }
        }

        ctx.out.announce(&format!("{} splits their hand!", seat.user));
        self.report(ctx, s, 0, "split");
        self.report(ctx, s, 1, "split");
        self.advance(ctx);
        Ok(())
    }

    /// Forfeit a departed seat, or recount responses while collecting
    pub fn on_disconnect(&mut self, ctx: &mut GameCtx<'_>, conn: ConnId) {
        match self.phase {
            BlackjackPhase::Idle => {}
            BlackjackPhase::Collecting => self.deal_if_everyone_responded(ctx),
            BlackjackPhase::Playing => {
                let mut was_turn = false;
                for (i, seat) in self.seats.iter_mut().enumerate() {
                    if seat.conn == conn && !seat.forfeited {
                        seat.forfeited = true;
                        seat.hands.iter_mut().for_each(|h| h.done = true);
                        was_turn |= i == self.turn;
                        ctx.out.announce(&format!("{} left the table and forfeits", seat.user));
                    }
                }
                if was_turn {
                    self.advance(ctx);
                }
            }
        }
    }

    fn finish(&mut self, ctx: &mut GameCtx<'_>) {
        while hand_value(&self.dealer) < DEALER_STANDS_AT {
            let card = self.draw(ctx.rng);
            self.dealer.push(card);
        }
        let dealer_value = hand_value(&self.dealer);
        ctx.out.broadcast(ServerEvent::BjDealer {
            cards: self.dealer.clone(),
            value: dealer_value,
        });
        ctx.out.announce(&format!(
            "Dealer reveals {} ({}){}",
            format_hand(&self.dealer),
            dealer_value,
            if dealer_value > 21 { " - BUST!" } else { "" }
        ));

        let mut results = Vec::new();
        for seat in &self.seats {
            for (i, hand) in seat.hands.iter().enumerate() {
                let (outcome, payout) = settle(
                    &hand.cards,
                    hand.wager,
                    hand.is_natural(),
                    seat.forfeited,
                    &self.dealer,
                );
                if payout > 0 {
                    // Payout is non-zero so credit cannot fail
                    let _ = ctx.ledger.credit(&seat.user, payout);
                }
                results.push(HandResult {
                    user: seat.user.clone(),
                    hand_index: i,
                    value: hand.value(),
                    outcome,
                    payout,
                });
            }
        }
        for r in &results {
            let line = match r.outcome {
                HandOutcome::Natural => format!("🎉 {} wins ${} with blackjack!", r.user, r.payout),
                HandOutcome::Win => format!("{} wins ${}", r.user, r.payout),
                HandOutcome::Push => format!("{} pushes (${} returned)", r.user, r.payout),
                HandOutcome::Lose => format!("{} loses", r.user),
                HandOutcome::Bust => format!("{} busted", r.user),
                HandOutcome::Forfeit => format!("{} forfeited", r.user),
            };
            ctx.out.announce(&line);
        }
        info!(hands = results.len(), dealer = dealer_value, "🃏 Blackjack settled");
        ctx.out.broadcast(ServerEvent::BjResult { results });
        self.reset();
    }
}

impl GameSession for Blackjack {
    fn kind(&self) -> GameKind {
        GameKind::Blackjack
    }

    fn phase_name(&self) -> &'static str {
        match self.phase {
            BlackjackPhase::Idle => "idle",
            BlackjackPhase::Collecting => "collecting_wagers",
            BlackjackPhase::Playing => "playing",
        }
    }

    fn is_active(&self) -> bool {
        self.phase != BlackjackPhase::Idle
    }

    fn reset(&mut self) {
        self.timer = None;
        if self.phase != BlackjackPhase::Idle {
            self.epoch += 1;
        }
        self.phase = BlackjackPhase::Idle;
        self.host = None;
        self.wagers.clear();
        self.seats.clear();
        self.dealer.clear();
        self.turn = 0;
    }

    fn describe(&self) -> String {
        match self.phase {
            BlackjackPhase::Idle => "Blackjack: idle".to_string(),
            BlackjackPhase::Collecting => format!(
                "Blackjack: {} collecting wagers ({} responded)",
                self.host.as_deref().unwrap_or("?"),
                self.wagers.len()
            ),
            BlackjackPhase::Playing => format!(
                "Blackjack: waiting on {}",
                self.seats
                    .get(self.turn)
                    .map_or("?", |s| s.user.as_str())
            ),
        }
    }
}
