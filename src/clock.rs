//! Cancellable timers that post back into the room's event loop
//!
//! A timer never touches room state itself. It sleeps on its own tokio task
//! and sends a `RoomEvent::Timer` to the room, which handles it like any
//! other event. Games stamp their timer events with an epoch so a tick that
//! was already queued when the game reset is recognised as stale.

use crate::games::GameKind;
use crate::room::RoomEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// What a game timer means to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    WagerDeadline,
    RaceStep,
    DragDeadline,
    DragCountdown,
    DragStep,
    SnakeStep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Game {
        game: GameKind,
        epoch: u64,
        kind: TimerKind,
    },
    AppraisalDue {
        id: String,
    },
    /// Delayed broadcast line
    Announce {
        text: String,
    },
    Shutdown,
}

/// Owned handle to a scheduled timer; dropping it cancels the timer
#[derive(Debug)]
pub struct TimerHandle(AbortHandle);

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone)]
pub struct Clock {
    tx: mpsc::UnboundedSender<RoomEvent>,
}

impl Clock {
    pub fn new(tx: mpsc::UnboundedSender<RoomEvent>) -> Self {
        Self { tx }
    }

    /// Fire `event` once after `delay`
    pub fn after(&self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(RoomEvent::Timer(event));
        });
        TimerHandle(task.abort_handle())
    }

    /// Fire `event` every `period`, first firing one period from now
    pub fn every(&self, period: Duration, event: TimerEvent) -> TimerHandle {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(RoomEvent::Timer(event.clone())).is_err() {
                    break;
                }
            }
        });
        TimerHandle(task.abort_handle())
    }

    /// Fire `event` once after `delay` with no way to cancel it
    pub fn defer(&self, delay: Duration, event: TimerEvent) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(RoomEvent::Timer(event));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_tick(epoch: u64) -> TimerEvent {
        TimerEvent::Game {
            game: GameKind::Race,
            epoch,
            kind: TimerKind::RaceStep,
        }
    }

    #[tokio::test]
    async fn test_after_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let clock = Clock::new(tx);
        let _handle = clock.after(Duration::from_millis(10), game_tick(1));

        match rx.recv().await {
            Some(RoomEvent::Timer(ev)) => assert_eq!(ev, game_tick(1)),
            other => panic!("unexpected {:?}", other),
        }
        time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_every_repeats_until_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let clock = Clock::new(tx);
        let handle = clock.every(Duration::from_millis(5), game_tick(2));

        for _ in 0..3 {
            assert!(matches!(rx.recv().await, Some(RoomEvent::Timer(_))));
        }
        drop(handle);
        time::sleep(Duration::from_millis(20)).await;
        while rx.try_recv().is_ok() {}
        time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_before_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let clock = Clock::new(tx);
        drop(clock.after(Duration::from_millis(10), TimerEvent::Shutdown));
        time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }
}
