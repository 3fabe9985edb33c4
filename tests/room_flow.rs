//! End-to-end room behaviour through the running actor and real timers

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use wanchat::appraisal::Appraiser;
use wanchat::config::WanchatConfig;
use wanchat::events::{RecordingOutbox, ServerEvent};
use wanchat::identity::ConnId;
use wanchat::metrics::RoomMetrics;
use wanchat::room::{Room, RoomEvent, RoomHandle};
use wanchat::storage::MemoryStore;

const AMY: ConnId = ConnId(1);
const BOB: ConnId = ConnId(2);

fn start(config: WanchatConfig) -> (RoomHandle, Arc<RecordingOutbox>, tokio::task::JoinHandle<()>) {
    let out = Arc::new(RecordingOutbox::new());
    let (room, handle) = Room::new(
        config,
        Box::new(MemoryStore::new()),
        out.clone(),
        Appraiser::offline(),
        Arc::new(RoomMetrics::new()),
    )
    .unwrap();
    let task = tokio::spawn(room.with_seed(3).run());
    (handle, out, task)
}

fn join(room: &RoomHandle, conn: ConnId, name: &str) {
    assert!(room.send(RoomEvent::Join {
        conn,
        username: name.to_string(),
    }));
}

fn say(room: &RoomHandle, conn: ConnId, text: &str) {
    assert!(room.send(RoomEvent::Chat {
        conn,
        text: text.to_string(),
    }));
}

/// Poll the outbox until `pick` finds something or the deadline passes
async fn wait_for<T>(
    out: &RecordingOutbox,
    mut pick: impl FnMut(&[ServerEvent]) -> Option<T>,
) -> T {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(found) = pick(&out.broadcasts()) {
            return found;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for room");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn last_balances(events: &[ServerEvent]) -> Option<BTreeMap<String, u64>> {
    events.iter().rev().find_map(|ev| match ev {
        ServerEvent::BalanceUpdate { balances } => Some(balances.clone()),
        _ => None,
    })
}

#[tokio::test]
async fn test_horse_race_runs_to_a_payout() {
    let mut config = WanchatConfig::default();
    config.games.race_tick_ms = 1;
    let (room, out, task) = start(config);

    join(&room, AMY, "amy");
    join(&room, BOB, "bob");
    say(&room, AMY, "/race");
    say(&room, AMY, "/horse 1 5");
    say(&room, BOB, "/horse 5 5");

    let payouts = wait_for(&out, |events| {
        events.iter().find_map(|ev| match ev {
            ServerEvent::RaceResult { payouts, .. } => Some(payouts.clone()),
            _ => None,
        })
    })
    .await;
    assert!(payouts.len() <= 1);

    let status = room.status().await.unwrap();
    assert_eq!(status.active_game, None);

    let balances = last_balances(&out.broadcasts()).unwrap();
    for user in ["amy", "bob"] {
        let won = payouts
            .iter()
            .find(|p| p.user == user)
            .map(|p| p.amount)
            .unwrap_or(0);
        assert_eq!(balances.get(user), Some(&(15 + won)));
    }
    task.abort();
}

#[tokio::test]
async fn test_unanswered_wager_window_cancels_race() {
    let mut config = WanchatConfig::default();
    config.games.wager_window_secs = 1;
    let (room, out, task) = start(config);

    join(&room, AMY, "amy");
    join(&room, BOB, "bob");
    say(&room, AMY, "/race");

    let reason = wait_for(&out, |events| {
        events.iter().find_map(|ev| match ev {
            ServerEvent::RaceCancelled { reason } => Some(reason.clone()),
            _ => None,
        })
    })
    .await;
    assert!(!reason.is_empty());
    assert_eq!(room.status().await.unwrap().active_game, None);
    task.abort();
}

#[tokio::test]
async fn test_begging_eventually_pays_with_a_delayed_announcement() {
    let (room, out, task) = start(WanchatConfig::default());
    join(&room, AMY, "amy");
    for _ in 0..5 {
        say(&room, AMY, "/beg");
    }

    let text = wait_for(&out, |events| {
        events.iter().find_map(|ev| match ev {
            ServerEvent::System { text, .. } if text.starts_with("A kind stranger") => {
                Some(text.clone())
            }
            _ => None,
        })
    })
    .await;
    assert!(text.contains("amy"));

    let balance = last_balances(&out.broadcasts()).unwrap()["amy"];
    assert!((21..=23).contains(&balance), "balance was {}", balance);
    task.abort();
}

#[tokio::test]
async fn test_killall_stops_the_room_after_grace() {
    let mut config = WanchatConfig::default();
    config.server.shutdown_grace_ms = 20;
    let (room, out, task) = start(config);

    join(&room, AMY, "amy");
    say(&room, AMY, "/killall");

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("room did not stop")
        .unwrap();
    assert!(out
        .broadcasts()
        .contains(&ServerEvent::Killall { by: "amy".to_string() }));
    assert!(room.is_closed());
    assert!(room.status().await.is_none());
}

#[tokio::test]
async fn test_one_game_at_a_time_across_games() {
    let (room, out, task) = start(WanchatConfig::default());
    join(&room, AMY, "amy");
    join(&room, BOB, "bob");
    say(&room, AMY, "/snake");
    say(&room, BOB, "/deal");

    let status = room.status().await.unwrap();
    assert_eq!(status.active_game.as_deref(), Some("snake"));
    assert!(out
        .lines_to(BOB)
        .contains(&"Cannot start blackjack - snake is already in progress".to_string()));
    task.abort();
}
