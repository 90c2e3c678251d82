//! Login handshake outcomes against a scripted broker.

mod support;

use std::time::{Duration, Instant};
use stomp_link::{Command, ConnError, ConnectOptions, Connection};
use support::{closed_port, decode_frames, spawn_broker};

#[tokio::test]
async fn connected_reply_yields_live_connection() {
    let broker = spawn_broker(|b| {
        let connect = b.accept_login();
        assert_eq!(connect.command, Command::Connect);
        assert_eq!(connect.get_header("login"), Some("ser"));
        assert_eq!(connect.get_header("passcode"), Some("ser"));
    });

    let conn = Connection::connect("127.0.0.1", broker.port, "ser", "ser")
        .await
        .expect("login should succeed");
    assert!(conn.is_connected());
    assert!(!conn.is_closed());
    assert_eq!(conn.login(), "ser");

    conn.disconnect(Vec::new()).await;
    assert!(conn.is_closed());
    assert!(!conn.is_connected());

    let frames = decode_frames(&broker.finish());
    let commands: Vec<Command> = frames.iter().map(|f| f.command).collect();
    assert_eq!(commands, vec![Command::Connect, Command::Disconnect]);
}

#[tokio::test]
async fn error_reply_yields_login_error() {
    let broker = spawn_broker(|b| {
        b.read_frame().unwrap();
        b.reply("ERROR\nmessage:bad credentials\n\nunknown user ser\0");
    });

    let result = Connection::connect("127.0.0.1", broker.port, "ser", "wrong").await;
    match result {
        Err(ConnError::Login(err)) => {
            assert_eq!(err.message, "bad credentials");
            let server_error = err.server_error.expect("broker ERROR should be attached");
            assert_eq!(server_error.body.as_deref(), Some("unknown user ser"));
        }
        Err(other) => panic!("expected Login, got {:?}", other),
        Ok(_) => panic!("expected login failure"),
    }

    // Not connected at the time of failure, so no DISCONNECT is sent.
    let frames = decode_frames(&broker.finish());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, Command::Connect);
}

#[tokio::test]
async fn error_without_message_header_uses_body() {
    let broker = spawn_broker(|b| {
        b.read_frame().unwrap();
        b.reply("ERROR\n\nbad credentials\0");
    });

    let err = Connection::connect("127.0.0.1", broker.port, "ser", "wrong")
        .await
        .err()
        .expect("login should fail");
    match err {
        ConnError::Login(login) => assert_eq!(login.message, "bad credentials"),
        other => panic!("expected Login, got {:?}", other),
    }
    broker.finish();
}

#[tokio::test]
async fn refused_socket_yields_io_error() {
    let port = closed_port();
    let result = Connection::connect("127.0.0.1", port, "ser", "ser").await;
    assert!(matches!(result, Err(ConnError::Io(_))), "got {:?}", result.err());
}

#[tokio::test]
async fn close_before_connected_yields_login_error() {
    let broker = spawn_broker(|b| {
        b.read_frame().unwrap();
        b.hang_up();
    });

    let result = Connection::connect("127.0.0.1", broker.port, "ser", "ser").await;
    match result {
        Err(ConnError::Login(err)) => {
            assert!(err.server_error.is_none());
            assert!(err.message.contains("closed"), "message: {}", err.message);
        }
        Err(other) => panic!("expected Login, got {:?}", other),
        Ok(_) => panic!("expected login failure"),
    }
    broker.finish();
}

#[tokio::test]
async fn silent_broker_hits_handshake_timeout() {
    let broker = spawn_broker(|b| {
        b.read_frame().unwrap();
    });

    let limit = Duration::from_millis(200);
    let started = Instant::now();
    let result = Connection::connect_with_options(
        "127.0.0.1",
        broker.port,
        "ser",
        "ser",
        ConnectOptions::default().handshake_timeout(limit),
    )
    .await;

    match result {
        Err(ConnError::HandshakeTimeout(d)) => assert_eq!(d, limit),
        Err(other) => panic!("expected HandshakeTimeout, got {:?}", other),
        Ok(_) => panic!("expected timeout"),
    }
    assert!(started.elapsed() >= limit);
    // The failed attempt released its socket, so the broker sees EOF.
    broker.finish();
}

#[tokio::test]
async fn connect_options_shape_the_connect_frame() {
    let broker = spawn_broker(|b| {
        let connect = b.accept_login();
        assert_eq!(connect.get_header("accept-version"), Some("1.2"));
        assert_eq!(connect.get_header("host"), Some("/vhost"));
        assert_eq!(connect.get_header("client-id"), Some("c-1"));
        // Extra headers come after the credentials.
        let keys: Vec<&str> = connect.headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["accept-version", "host", "login", "passcode", "client-id"]);
    });

    let options = ConnectOptions::default()
        .accept_version("1.2")
        .host("/vhost")
        .header("client-id", "c-1");
    let conn = Connection::connect_with_options("127.0.0.1", broker.port, "ser", "ser", options)
        .await
        .unwrap();
    conn.disconnect(Vec::new()).await;
    broker.finish();
}
