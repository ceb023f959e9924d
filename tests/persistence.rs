//! Topics restored from the on-disk journal.

use std::sync::Arc;
use tempfile::TempDir;
use topicast::{
    Broker, BrokerConfig, BrokerError, ChannelSubscriber, Message, ObjectStore, Strategy,
    StoreConfig, Ts,
};

fn store_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("store"),
        cache_size: 64,
        create_if_missing: true,
    }
}

fn broker(dir: &TempDir, strategy: Strategy) -> Broker {
    Broker::new(BrokerConfig {
        strategy,
        workers: 2,
        store: Some(store_config(dir)),
    })
    .unwrap()
}

fn ts_of(msgs: &[Arc<Message>]) -> Vec<i64> {
    msgs.iter().map(|m| m.ts.0).collect()
}

#[test]
fn test_restart_restores_history() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    for strategy in [Strategy::Spreader, Strategy::Topic] {
        let dir = TempDir::new().unwrap();

        {
            let broker = broker(&dir, strategy);
            broker.publish("t", Message::full("t", 10, b"F".to_vec()).shared()).unwrap();
            broker.publish("t", Message::diff("t", 12, b"b".to_vec()).shared()).unwrap();
            broker.publish("t", Message::diff("t", 11, b"a".to_vec()).shared()).unwrap();
            broker.wait();
        }

        let broker = broker(&dir, strategy);
        let (sub, handle) = ChannelSubscriber::unbounded();
        broker.subscribe("t", sub, Ts::EARLIEST).unwrap();
        broker.wait();

        let msgs = handle.drain();
        assert_eq!(ts_of(&msgs), vec![10, 11, 12]);
        assert_eq!(msgs[0].payload, b"F");
        assert_eq!(msgs[1].payload, b"a");
    }
}

#[test]
fn test_restart_resume_from_cursor() {
    let dir = TempDir::new().unwrap();

    {
        let broker = broker(&dir, Strategy::Spreader);
        broker.publish("t", Message::full("t", 1, Vec::new()).shared()).unwrap();
        for ts in 2..=6 {
            broker.publish("t", Message::diff("t", ts, Vec::new()).shared()).unwrap();
        }
        broker.wait();
    }

    let broker = broker(&dir, Strategy::Spreader);
    let (sub, handle) = ChannelSubscriber::unbounded();
    broker.subscribe("t", sub, Ts(4)).unwrap();
    broker.wait();
    assert_eq!(ts_of(&handle.drain()), vec![5, 6]);
}

#[test]
fn test_compact_drops_superseded_objects() {
    let dir = TempDir::new().unwrap();

    {
        let broker = broker(&dir, Strategy::Topic);
        broker.publish("t", Message::full("t", 1, Vec::new()).shared()).unwrap();
        broker.publish("t", Message::diff("t", 2, Vec::new()).shared()).unwrap();
        broker.publish("t", Message::full("t", 3, Vec::new()).shared()).unwrap();
        broker.publish("t", Message::diff("t", 4, Vec::new()).shared()).unwrap();
        broker.compact("t").unwrap();
    }

    let store = ObjectStore::open(store_config(&dir)).unwrap();
    assert_eq!(store.count("t/full"), 1);
    assert_eq!(store.count("t/diff"), 1);
    assert_eq!(store.find_latest("t/full").unwrap().ts, Ts(3));
}

#[test]
fn test_second_broker_on_same_store_is_locked() {
    let dir = TempDir::new().unwrap();
    let _first = broker(&dir, Strategy::Spreader);

    let result = Broker::new(BrokerConfig {
        store: Some(store_config(&dir)),
        ..Default::default()
    });
    assert!(matches!(result, Err(BrokerError::Locked)));
}

#[test]
fn test_store_shared_with_broker() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ObjectStore::open_or_create(store_config(&dir)).unwrap());

    let broker = Broker::with_store(BrokerConfig::default(), Some(Arc::clone(&store)));
    broker.publish("scores", Message::full("scores", 5, b"x".to_vec()).shared()).unwrap();
    broker.wait();

    assert_eq!(store.types(), vec!["scores/full".to_string()]);
    let latest = store.find_latest("scores/full").unwrap();
    assert_eq!(latest.ts, Ts(5));
}
