use std::time::Duration;
use stomp_link::Connection;

use super::session::SharedSession;

const RECEIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Message for the user
    Info(String),
    /// Error executing command
    Error(String),
}

/// Parse and execute one line of user input.
pub async fn execute_command(line: &str, conn: &Connection, session: SharedSession) -> CommandResult {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return CommandResult::Ok;
    }

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "send" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: send <destination> <message>".to_string());
            }
            conn.send(parts[1], parts[2]).await;
            session.lock().await.record_sent();
            CommandResult::Ok
        }

        "sendr" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: sendr <destination> <message>".to_string());
            }
            match conn.send_with_receipt(parts[1], parts[2], RECEIPT_TIMEOUT).await {
                Ok(()) => {
                    session.lock().await.record_sent();
                    CommandResult::Info("Receipt confirmed".to_string())
                }
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }

        "sub" | "subscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: sub <destination>".to_string());
            }
            match super::plain::subscribe_destination(conn, parts[1], session).await {
                Ok(id) => CommandResult::Info(format!("Subscribed to {} (id {})", parts[1], id)),
                Err(msg) => CommandResult::Error(msg),
            }
        }

        "unsub" | "unsubscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: unsub <subscription-id>".to_string());
            }
            match conn.unsubscribe(parts[1]).await {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(e.to_string()),
            }
        }

        "status" => CommandResult::Info(format!(
            "connected: {}, last error: {}",
            conn.is_connected(),
            conn.last_error()
                .map(|e| e.message)
                .unwrap_or_else(|| "none".to_string())
        )),

        "summary" => CommandResult::Info(session.lock().await.summary()),

        "help" | "?" => {
            print_help();
            CommandResult::Ok
        }

        _ => CommandResult::Error(format!(
            "Unknown command: {}. Type 'help' for commands.",
            parts[0]
        )),
    }
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>   - Send a message");
    println!("  sendr <destination> <message>  - Send and wait for a broker receipt");
    println!("  sub <destination>              - Subscribe to a destination");
    println!("  unsub <subscription-id>        - Cancel a subscription");
    println!("  status                         - Show connection state");
    println!("  summary                        - Print session summary");
    println!("  quit                           - Disconnect and exit");
}
