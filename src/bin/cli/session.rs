use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Counters for one interactive session.
pub struct Session {
    pub start_time: DateTime<Local>,
    pub address: String,
    pub user: String,
    /// destination -> messages received
    pub received: HashMap<String, u64>,
    pub sent: u64,
    pub errors: u64,
}

impl Session {
    pub fn new(address: String, user: String) -> Self {
        Self {
            start_time: Local::now(),
            address,
            user,
            received: HashMap::new(),
            sent: 0,
            errors: 0,
        }
    }

    pub fn register_subscription(&mut self, destination: &str) {
        self.received.entry(destination.to_string()).or_default();
    }

    pub fn record_message(&mut self, destination: &str) {
        *self.received.entry(destination.to_string()).or_default() += 1;
    }

    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn summary(&self) -> String {
        let end_time = Local::now();
        let total_secs = end_time.signed_duration_since(self.start_time).num_seconds();

        let mut lines = vec![
            format!("Session {}@{}", self.user, self.address),
            format!("  Started:  {}", self.start_time.format("%Y-%m-%d %H:%M:%S")),
            format!("  Ended:    {}", end_time.format("%Y-%m-%d %H:%M:%S")),
            format!("  Duration: {}m {}s", total_secs / 60, total_secs % 60),
            format!("  Sent:     {}", self.sent),
            format!("  Errors:   {}", self.errors),
            "  Received:".to_string(),
        ];

        let mut dests: Vec<_> = self.received.iter().collect();
        dests.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (dest, count) in dests {
            lines.push(format!("    {:<40} {:>6}", dest, count));
        }
        lines.join("\n")
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

pub fn new_shared_session(address: String, user: String) -> SharedSession {
    Arc::new(Mutex::new(Session::new(address, user)))
}
