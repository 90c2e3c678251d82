mod support;

use std::sync::{Arc, Mutex};
use stomp_link::{ConnError, ConnectOptions, Connection, SendLog, SentMessage};
use support::{closed_port, spawn_broker};

#[derive(Default)]
struct Recorder(Mutex<Vec<SentMessage>>);

impl SendLog for Recorder {
    fn record(&self, message: &SentMessage) {
        self.0.lock().unwrap().push(message.clone());
    }
}

#[tokio::test]
async fn custom_send_log_sees_every_send() {
    let broker = spawn_broker(|b| {
        b.accept_login();
    });
    let recorder = Arc::new(Recorder::default());
    let options = ConnectOptions::default().send_log(recorder.clone());
    let conn = Connection::connect_with_options("127.0.0.1", broker.port, "ser", "ser", options)
        .await
        .unwrap();

    conn.send("/queue/a", "first").await;
    conn.send("/queue/b", "second").await;
    conn.disconnect(Vec::new()).await;
    broker.finish();

    let seen = recorder.0.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            SentMessage {
                login: "ser".to_string(),
                destination: "/queue/a".to_string(),
                body: "first".to_string(),
            },
            SentMessage {
                login: "ser".to_string(),
                destination: "/queue/b".to_string(),
                body: "second".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn file_send_log_appends_each_message() {
    let path = std::env::temp_dir().join(format!("stomp-link-{}.log", rand::random::<u64>()));
    let broker = spawn_broker(|b| {
        b.accept_login();
    });
    let options = ConnectOptions::default().send_log_file(&path);
    let conn = Connection::connect_with_options("127.0.0.1", broker.port, "ser", "ser", options)
        .await
        .unwrap();

    conn.send("/queue/logged", "hello").await;
    conn.disconnect(Vec::new()).await;
    broker.finish();

    let contents = std::fs::read_to_string(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert!(
        contents.contains("Message sent:\ndestination:/queue/logged\n\nhello\n"),
        "log contents: {:?}",
        contents
    );
}

#[tokio::test]
async fn unopenable_send_log_fails_connect() {
    let path = std::env::temp_dir()
        .join(format!("stomp-link-missing-{}", rand::random::<u64>()))
        .join("sent.log");

    // Nothing listens on the port, so reaching the socket would be an Io error.
    let port = closed_port();
    let options = ConnectOptions::default().send_log_file(&path);
    match Connection::connect_with_options("127.0.0.1", port, "ser", "ser", options).await {
        Err(ConnError::SendLog { path: reported, .. }) => assert_eq!(reported, path),
        Err(other) => panic!("expected SendLog, got {:?}", other),
        Ok(_) => panic!("expected failure"),
    }
}
