mod support;

use std::time::Duration;
use stomp_link::{Command, Connection};
use support::{decode_frames, spawn_broker};

#[tokio::test]
async fn disconnect_sends_headers_then_closes() {
    let broker = spawn_broker(|b| {
        b.accept_login();
        let disconnect = b.read_frame().unwrap();
        assert_eq!(disconnect.command, Command::Disconnect);
        assert_eq!(disconnect.get_header("receipt"), Some("bye"));
        // The socket is closed right after DISCONNECT.
        assert!(b.read_frame().is_none());
    });

    let conn = Connection::connect("127.0.0.1", broker.port, "ser", "ser")
        .await
        .unwrap();
    conn.disconnect(vec![("receipt".to_string(), "bye".to_string())])
        .await;
    assert!(conn.is_closed());
    broker.finish();
}

#[tokio::test]
async fn disconnect_twice_is_harmless() {
    let broker = spawn_broker(|b| {
        b.accept_login();
    });
    let conn = Connection::connect("127.0.0.1", broker.port, "ser", "ser")
        .await
        .unwrap();
    let other = conn.clone();

    conn.disconnect(Vec::new()).await;
    other.disconnect(Vec::new()).await;
    assert!(conn.is_closed() && other.is_closed());

    let disconnects = decode_frames(&broker.finish())
        .iter()
        .filter(|f| f.command == Command::Disconnect)
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn disconnect_after_broker_hang_up_still_releases() {
    let broker = spawn_broker(|b| {
        b.accept_login();
        b.hang_up();
    });
    let conn = Connection::connect("127.0.0.1", broker.port, "ser", "ser")
        .await
        .unwrap();

    // Wait for the receiver to notice the hang-up.
    for _ in 0..100 {
        if !conn.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!conn.is_connected());

    tokio::time::timeout(Duration::from_secs(3), conn.disconnect(Vec::new()))
        .await
        .expect("disconnect should not hang");
    assert!(conn.is_closed());
    broker.finish();
}

#[tokio::test]
async fn disconnect_closes_subscription_channels() {
    let broker = spawn_broker(|b| {
        b.accept_login();
    });
    let conn = Connection::connect("127.0.0.1", broker.port, "ser", "ser")
        .await
        .unwrap();
    let mut sub = conn.subscribe("/queue/a").await.unwrap();
    conn.disconnect(Vec::new()).await;
    broker.finish();

    drop(conn);
    let next = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("subscription should not hang after the session ends");
    assert!(next.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_disconnect_waits_for_the_first() {
    // The broker stops reading for a while, so a large SEND holds the
    // writer and the first disconnect stalls behind it.
    let broker = spawn_broker(|b| {
        b.accept_login();
        std::thread::sleep(Duration::from_millis(500));
    });
    let conn = Connection::connect("127.0.0.1", broker.port, "ser", "ser")
        .await
        .unwrap();

    let big = "x".repeat(16 << 20);
    let sender = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.send("/queue/big", &big).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.disconnect(Vec::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    conn.disconnect(Vec::new()).await;
    assert!(conn.is_closed());

    first.await.unwrap();
    sender.await.unwrap();
    let disconnects = decode_frames(&broker.finish())
        .iter()
        .filter(|f| f.command == Command::Disconnect)
        .count();
    assert_eq!(disconnects, 1);
}
