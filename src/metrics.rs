//! Room counters and their Prometheus text export

use crate::games::GameKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared between the room task and the HTTP handlers
#[derive(Debug)]
pub struct RoomMetrics {
    start_time: Instant,
    pub commands_total: AtomicU64,
    pub command_errors_total: AtomicU64,
    pub chat_messages_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_total: AtomicU64,
    pub storage_failures_total: AtomicU64,
    pub appraisals_completed_total: AtomicU64,
    pub generator_fallbacks_total: AtomicU64,
    blackjack_started: AtomicU64,
    race_started: AtomicU64,
    drag_started: AtomicU64,
    snake_started: AtomicU64,
}

impl Default for RoomMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            commands_total: AtomicU64::new(0),
            command_errors_total: AtomicU64::new(0),
            chat_messages_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            storage_failures_total: AtomicU64::new(0),
            appraisals_completed_total: AtomicU64::new(0),
            generator_fallbacks_total: AtomicU64::new(0),
            blackjack_started: AtomicU64::new(0),
            race_started: AtomicU64::new(0),
            drag_started: AtomicU64::new(0),
            snake_started: AtomicU64::new(0),
        }
    }

    fn games(&self, kind: GameKind) -> &AtomicU64 {
        match kind {
            GameKind::Blackjack => &self.blackjack_started,
            GameKind::Race => &self.race_started,
            GameKind::Drag => &self.drag_started,
            GameKind::Snake => &self.snake_started,
        }
    }

    pub fn record_command(&self, ok: bool) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.command_errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_chat(&self) {
        self.chat_messages_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_game_started(&self, kind: GameKind) {
        self.games(kind).fetch_add(1, Ordering::Relaxed);
    }

    pub fn games_started(&self, kind: GameKind) -> u64 {
        self.games(kind).load(Ordering::Relaxed)
    }

    pub fn record_connect(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        // Never wraps below zero
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_appraisal(&self, from_fallback: bool) {
        self.appraisals_completed_total.fetch_add(1, Ordering::Relaxed);
        if from_fallback {
            self.generator_fallbacks_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generate Prometheus metrics format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        let counter = |out: &mut String, name: &str, help: &str, kind: &str, value: u64| {
            out.push_str(&format!(
                "# HELP wanchat_{name} {help}\n\
                 # TYPE wanchat_{name} {kind}\n\
                 wanchat_{name} {value}\n\n"
            ));
        };

        counter(&mut output, "commands_total", "Slash commands handled", "counter",
            self.commands_total.load(Ordering::Relaxed));
        counter(&mut output, "command_errors_total", "Slash commands rejected", "counter",
            self.command_errors_total.load(Ordering::Relaxed));
        counter(&mut output, "chat_messages_total", "Chat lines broadcast", "counter",
            self.chat_messages_total.load(Ordering::Relaxed));
        counter(&mut output, "connections_active", "Joined connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        counter(&mut output, "connections_total", "Connections joined since start", "counter",
            self.connections_total.load(Ordering::Relaxed));
        counter(&mut output, "storage_failures_total", "Failed record set writes", "counter",
            self.storage_failures_total.load(Ordering::Relaxed));
        counter(&mut output, "appraisals_completed_total", "Appraisals returned to owners", "counter",
            self.appraisals_completed_total.load(Ordering::Relaxed));
        counter(&mut output, "generator_fallbacks_total", "Appraisals valued by the local table", "counter",
            self.generator_fallbacks_total.load(Ordering::Relaxed));

        output.push_str(
            "# HELP wanchat_games_started_total Games started by kind\n\
             # TYPE wanchat_games_started_total counter\n",
        );
        for kind in GameKind::ALL {
            output.push_str(&format!(
                "wanchat_games_started_total{{game=\"{:?}\"}} {}\n",
                kind,
                self.games_started(kind)
            ));
        }
        output.push('\n');

        output.push_str(&format!(
            "# HELP wanchat_uptime_seconds Seconds since the room started\n\
             # TYPE wanchat_uptime_seconds gauge\n\
             wanchat_uptime_seconds {}\n",
            self.uptime().as_secs()
        ));
        output
    }
}
