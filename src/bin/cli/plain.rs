use std::io::{self, BufRead, Write};
use std::time::Duration;
use stomp_link::{ConnError, ConnectOptions, Connection, Frame};
use tokio::sync::{broadcast, mpsc};

use super::args::Cli;
use super::commands::{CommandResult, execute_command, print_help};
use super::session::{SharedSession, new_shared_session};

/// Run the interactive line-oriented client
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let address = format!("{}:{}", cli.server, cli.port);
    println!("Connecting to {}...", address);

    let mut options = ConnectOptions::default()
        .host(cli.server.clone())
        .handshake_timeout(Duration::from_millis(cli.connect_timeout));
    if let Some(path) = &cli.log_file {
        options = options.send_log_file(path.clone());
    }

    let conn = Connection::connect_with_options(
        &cli.server,
        cli.port,
        &cli.login,
        &cli.passcode,
        options,
    )
    .await
    .map_err(|e| format_connection_error(&e, &address))?;

    println!("Connected.");

    let session = new_shared_session(address, cli.login.clone());

    for dest in &cli.subscribe {
        subscribe_destination(&conn, dest, session.clone())
            .await
            .map_err(|msg| (msg, super::exit_codes::PROTOCOL_ERROR))?;
    }

    // Report ERROR frames, whether the broker sent them or a send failed locally.
    let mut errors = conn.errors();
    let session_err = session.clone();
    tokio::spawn(async move {
        loop {
            match errors.recv().await {
                Ok(err) => {
                    session_err.lock().await.record_error();
                    eprintln!("\n[ERROR] {}", err);
                    for (k, v) in &err.frame.headers {
                        eprintln!("  {}: {}", k, v);
                    }
                    print!("> ");
                    let _ = io::stdout().flush();
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("\n[ERROR] {} error frames dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Messages no subscription claimed
    let conn_inbound = conn.clone();
    let session_inbound = session.clone();
    tokio::spawn(async move {
        while let Some(frame) = conn_inbound.next_message().await {
            let dest = frame.get_header("destination").unwrap_or("(unknown)").to_string();
            handle_message(&dest, &frame, session_inbound.clone()).await;
        }
    });

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);

    // stdin is blocking; read it on its own thread
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        // EOF on stdin ends the session like `quit`
        let Some(line) = cmd_rx.recv().await else {
            break;
        };

        match execute_command(&line, &conn, session.clone()).await {
            CommandResult::Ok => {}
            CommandResult::Quit => break,
            CommandResult::Info(msg) => println!("{}", msg),
            CommandResult::Error(msg) => eprintln!("{}", msg),
        }
    }

    println!("Disconnecting...");
    if cli.summary {
        println!("{}", session.lock().await.summary());
    }
    conn.disconnect(Vec::new()).await;
    Ok(())
}

/// Subscribe to a destination and spawn a task printing its messages.
///
/// Returns the subscription id.
pub async fn subscribe_destination(
    conn: &Connection,
    dest: &str,
    session: SharedSession,
) -> Result<String, String> {
    let sub = conn
        .subscribe(dest)
        .await
        .map_err(|e| format!("Failed to subscribe to '{}': {}", dest, e))?;
    let id = sub.id().to_string();

    println!("Subscribed to: {} (id {})", dest, id);
    session.lock().await.register_subscription(dest);

    let dest = dest.to_string();
    let mut rx = sub.into_receiver();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            handle_message(&dest, &frame, session.clone()).await;
        }
    });

    Ok(id)
}

async fn handle_message(dest: &str, frame: &Frame, session: SharedSession) {
    session.lock().await.record_message(dest);

    println!("\n[{}] MESSAGE received:", dest);
    for (k, v) in &frame.headers {
        println!("  {}: {}", k, v);
    }
    if !frame.body.is_empty() {
        match frame.body_text() {
            Some(s) => println!("  Body: {}", s),
            None => println!("  Body: ({} bytes, binary)", frame.body.len()),
        }
    }
    print!("> ");
    let _ = io::stdout().flush();
}

/// Map a connection error to a user-facing message and exit code.
fn format_connection_error(err: &ConnError, address: &str) -> (String, u8) {
    use super::exit_codes::*;
    match err {
        ConnError::Io(io_err) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", address),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", address),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, NETWORK_ERROR)
        }
        ConnError::Login(login) => {
            let mut message = format!("Authentication failed: {}", login.message);
            if let Some(body) = login.server_error.as_ref().and_then(|e| e.body.as_ref()) {
                if body != &login.message {
                    message.push_str(&format!(" ({})", body));
                }
            }
            (message, AUTH_ERROR)
        }
        ConnError::HandshakeTimeout(limit) => (
            format!("No answer to CONNECT from {} within {:?}", address, limit),
            PROTOCOL_ERROR,
        ),
        ConnError::SendLog { .. } => (err.to_string(), CONFIG_ERROR),
        other => (other.to_string(), PROTOCOL_ERROR),
    }
}
