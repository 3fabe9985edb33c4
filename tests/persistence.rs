//! State survives a restart through the JSON file store

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wanchat::appraisal::Appraiser;
use wanchat::config::WanchatConfig;
use wanchat::events::{RecordingOutbox, ServerEvent};
use wanchat::identity::ConnId;
use wanchat::inventory::{OwnedItem, PendingAppraisal};
use wanchat::metrics::RoomMetrics;
use wanchat::room::{Room, RoomEvent};
use wanchat::storage::{JsonFileStore, RecordSet, Snapshot, Store};

const AMY: ConnId = ConnId(1);

fn open_room(dir: &TempDir) -> (Room, Arc<RecordingOutbox>) {
    let out = Arc::new(RecordingOutbox::new());
    let store = JsonFileStore::open(dir.path()).unwrap();
    let (room, _handle) = Room::new(
        WanchatConfig::default(),
        Box::new(store),
        out.clone(),
        Appraiser::offline(),
        Arc::new(RoomMetrics::new()),
    )
    .unwrap();
    (room, out)
}

fn chat(room: &mut Room, text: &str) {
    room.handle_event(RoomEvent::Chat {
        conn: AMY,
        text: text.to_string(),
    });
}

#[tokio::test]
async fn test_balances_items_and_titles_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let (mut room, _out) = open_room(&dir);
        room.handle_event(RoomEvent::Join {
            conn: AMY,
            username: "Amy".to_string(),
        });
        chat(&mut room, "/buy noob title");
        chat(&mut room, "/equip noob");
    }

    let store = JsonFileStore::open(dir.path()).unwrap();
    for set in [RecordSet::Balances, RecordSet::Inventories, RecordSet::Equipped] {
        assert!(store.path_of(set).exists(), "{} missing", set.file_name());
    }
    let snapshot = store.load().unwrap();
    let balance = snapshot.balances["Amy"];
    assert!(balance < 20);
    assert_eq!(snapshot.equipped.get("Amy").map(String::as_str), Some("title_noob"));

    // Same user, different capitalisation, new process
    let (mut room, out) = open_room(&dir);
    room.handle_event(RoomEvent::Join {
        conn: AMY,
        username: "amy".to_string(),
    });
    let balances = out
        .broadcasts()
        .into_iter()
        .rev()
        .find_map(|ev| match ev {
            ServerEvent::BalanceUpdate { balances } => Some(balances),
            _ => None,
        })
        .unwrap();
    assert_eq!(balances.values().copied().collect::<Vec<_>>(), vec![balance]);
    assert_eq!(balances.keys().map(String::as_str).collect::<Vec<_>>(), vec!["Amy"]);

    out.take();
    chat(&mut room, "hi");
    let title = out.broadcasts().into_iter().find_map(|ev| match ev {
        ServerEvent::Chat { title, .. } => title,
        _ => None,
    });
    assert_eq!(title.as_deref(), Some("[Noob]"));
}

#[tokio::test]
async fn test_overdue_appraisal_completes_after_restart() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::open(dir.path()).unwrap();
    let mut snapshot = Snapshot::default();
    snapshot.balances.insert("amy".to_string(), 5);
    snapshot.pending_appraisals.insert(
        "appraisal-1".to_string(),
        PendingAppraisal {
            id: "appraisal-1".to_string(),
            username: "amy".to_string(),
            item: OwnedItem::new("collectible_rock"),
            original_price: 10,
            fee: 10,
            return_at: Utc::now() - chrono::Duration::minutes(10),
        },
    );
    for set in RecordSet::ALL {
        store.save(set, &snapshot).unwrap();
    }

    let (room, out) = open_room(&dir);
    let handle = room.handle();
    let task = tokio::spawn(room.run());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = handle.status().await.unwrap();
        if status.pending_appraisals == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "appraisal never completed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(out
        .broadcasts()
        .iter()
        .any(|ev| matches!(ev, ServerEvent::AppraisalComplete { user, .. } if user == "amy")));
    task.abort();

    let restored = store.load().unwrap();
    assert!(restored.pending_appraisals.is_empty());
    let rock = &restored.inventories["amy"][0];
    assert_eq!(rock.item_id, "collectible_rock");
    let value = rock.appraisal.as_ref().map(|a| a.value).unwrap();
    assert!((1..=100_000_000).contains(&value));
}

#[test]
fn test_corrupt_record_file_fails_startup() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::open(dir.path()).unwrap();
    std::fs::write(store.path_of(RecordSet::Balances), "{ not json").unwrap();

    let result = Room::new(
        WanchatConfig::default(),
        Box::new(store),
        Arc::new(RecordingOutbox::new()),
        Appraiser::offline(),
        Arc::new(RoomMetrics::new()),
    );
    assert!(result.is_err());
}
