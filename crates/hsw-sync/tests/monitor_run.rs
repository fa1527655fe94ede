//! Monitor task lifecycle against the in-memory node
#![cfg(feature = "test-helpers")]

use hsw_storage_sqlite::Database;
use hsw_sync::testing::MockNode;
use hsw_sync::{BlockMonitor, BlockNotification, CancelToken, MonitorConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(10),
        ..MonitorConfig::default()
    }
}

#[tokio::test]
async fn test_safety_stop_ends_task_and_closes_channels() {
    let node = Arc::new(MockNode::new());
    node.mine_empty(20);
    let db = Database::open_in_memory().unwrap().into_shared();
    let monitor = Arc::new(BlockMonitor::new(node.clone(), db, fast_config()).unwrap());
    let mut rx = monitor.subscribe();
    let task = tokio::spawn(monitor.clone().run(CancelToken::new()));

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, BlockNotification { chain_tip: 20, common_tip: 20 });

    // Rewrite history below the whole window
    node.reorg(2);
    node.mine_empty(19);

    let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_safety_stop());
    while rx.recv().await.is_some() {}
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let node = Arc::new(MockNode::new());
    node.mine_empty(12);
    let db = Database::open_in_memory().unwrap().into_shared();
    let monitor = Arc::new(BlockMonitor::new(node.clone(), db, fast_config()).unwrap());
    let mut rx = monitor.subscribe();
    node.fail_next(3);
    let cancel = CancelToken::new();
    let task = tokio::spawn(monitor.clone().run(cancel.clone()));

    let n = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(n.chain_tip, 12);
    assert_eq!(monitor.counters().errors, 3);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_poke_triggers_immediate_poll() {
    let node = Arc::new(MockNode::new());
    node.mine_empty(12);
    let db = Database::open_in_memory().unwrap().into_shared();
    let config = MonitorConfig {
        poll_interval: Duration::from_secs(3600),
        ..MonitorConfig::default()
    };
    let monitor = Arc::new(BlockMonitor::new(node.clone(), db, config).unwrap());
    let mut rx = monitor.subscribe();
    let cancel = CancelToken::new();
    let task = tokio::spawn(monitor.clone().run(cancel.clone()));

    // First poll seeds the window without notifying
    monitor.poke();
    let n = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(n.chain_tip, 12);

    node.mine_empty(1);
    monitor.poke();
    let n = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(n, BlockNotification { chain_tip: 13, common_tip: 13 });

    cancel.cancel();
    task.await.unwrap().unwrap();
}
