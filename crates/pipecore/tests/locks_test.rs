use pipecore::{LockCoordinator, LockStore, MemoryLockStore, Options};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_set_nx_has_one_winner() {
    let store = Arc::new(MemoryLockStore::new());

    let mut racers = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        racers.push(tokio::spawn(async move {
            store.set_nx_ex("record:42", Duration::from_secs(30)).await
        }));
    }

    let mut winners = 0;
    for racer in racers {
        if racer.await.unwrap().unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one caller may create the key");
    assert!(store.contains("record:42"));
}

#[tokio::test]
async fn test_expired_lock_can_be_taken_again() {
    let store = MemoryLockStore::new();

    assert!(store.set_nx_ex("k", Duration::from_millis(20)).await.unwrap());
    assert!(!store.set_nx_ex("k", Duration::from_millis(20)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(!store.contains("k"));
    assert!(store.set_nx_ex("k", Duration::from_secs(1)).await.unwrap());
}

#[tokio::test]
async fn test_expired_keys_are_evicted_on_later_sets() {
    let store = MemoryLockStore::with_sweep_interval(Duration::from_millis(10));
    for n in 0..10_000 {
        let key = format!("record:{}", n);
        assert!(store.set_nx_ex(&key, Duration::from_millis(1)).await.unwrap());
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(store.set_nx_ex("fresh", Duration::from_secs(30)).await.unwrap());

    // The sweep already ran, nothing expired is left behind
    assert_eq!(store.purge_expired(), 0);
    assert_eq!(store.len(), 1);
    assert!(store.contains("fresh"));
}

#[tokio::test]
async fn test_purge_expired_keeps_live_keys() {
    let store = MemoryLockStore::new();
    assert!(store.set_nx_ex("short", Duration::from_millis(5)).await.unwrap());
    assert!(store.set_nx_ex("long", Duration::from_secs(30)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.purge_expired(), 1);
    assert!(store.contains("long"));
    assert_eq!(store.purge_expired(), 0);
}

#[tokio::test]
async fn test_get_lock_records_key_on_success_only() {
    let locks = LockCoordinator::in_memory();
    let mut first = Options::new();
    let mut second = Options::new();

    assert!(locks.get_lock("job", Duration::from_secs(5), &mut first).await.unwrap());
    assert!(!locks.get_lock("job", Duration::from_secs(5), &mut second).await.unwrap());

    assert_eq!(first.locks, vec!["job".to_string()]);
    assert!(second.locks.is_empty());
}

#[tokio::test]
async fn test_delete_lock_of_absent_key_is_noop() {
    let locks = LockCoordinator::in_memory();
    assert!(!locks.delete_lock("missing", "task").await.unwrap());
}

#[tokio::test]
async fn test_delete_all_locks_drains_options() {
    let store = Arc::new(MemoryLockStore::new());
    let locks = LockCoordinator::new(store.clone());
    let mut opt = Options::new();

    for key in ["a", "b", "c"] {
        assert!(locks.get_lock(key, Duration::from_secs(5), &mut opt).await.unwrap());
    }
    assert_eq!(store.len(), 3);

    let released = locks.delete_all_locks(&mut opt, "task").await;

    assert_eq!(released, 3);
    assert!(opt.locks.is_empty());
    assert!(store.is_empty());

    // Released keys are free again
    let mut again = Options::new();
    assert!(locks.get_lock("a", Duration::from_secs(5), &mut again).await.unwrap());
}
