//! Per-connection session state and event delivery.
//!
//! A `ServerClient` is shared between the session's three tasks (transport
//! read/write, forwarder, ping) and the dispatcher, so its small mutable
//! fields are atomics and the display name sits behind a mutex. Outbound
//! events are serialized here, per the client's format flag, and queued on
//! the bounded events channel that the transport writer drains.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicI8, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use shared::Event;
use tokio::sync::{mpsc, watch};

/// Account marker: not yet logged in. Every command except the login
/// variants is rejected in this state.
pub const ACCOUNT_PENDING: i8 = -1;

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

/// Sticky termination signal shared by a session's tasks.
///
/// The first caller's reason wins; a non-empty reason is delivered to the
/// peer as a best-effort final notice frame before the socket closes.
#[derive(Debug)]
pub struct Termination {
    flag: watch::Sender<bool>,
    reason: Mutex<Option<String>>,
}

impl Termination {
    fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag,
            reason: Mutex::new(None),
        }
    }

    fn terminate(&self, reason: &str) {
        let mut stored = self.reason.lock().unwrap_or_else(|e| e.into_inner());
        if *self.flag.borrow() {
            return;
        }
        if !reason.is_empty() {
            *stored = Some(reason.to_string());
        }
        self.flag.send_replace(true);
    }

    fn terminated(&self) -> bool {
        *self.flag.borrow()
    }

    fn reason(&self) -> Option<String> {
        self.reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// One connected user session.
pub struct ServerClient {
    pub id: u32,
    /// -1 = not logged in, 0 = logged in, 1 = logged in with a password.
    account: AtomicI8,
    name: Mutex<String>,
    json: AtomicBool,
    /// 0 when not in a match, otherwise the seat (1 or 2).
    player_number: AtomicU8,
    pub connected: i64,
    last_active: AtomicI64,
    last_ping: AtomicI64,
    events: mpsc::Sender<Vec<u8>>,
    termination: Termination,
}

impl ServerClient {
    pub fn new(id: u32, events: mpsc::Sender<Vec<u8>>) -> Self {
        let now = unix_now();
        Self {
            id,
            account: AtomicI8::new(ACCOUNT_PENDING),
            name: Mutex::new(String::new()),
            json: AtomicBool::new(false),
            player_number: AtomicU8::new(0),
            connected: now,
            last_active: AtomicI64::new(now),
            last_ping: AtomicI64::new(0),
            events,
            termination: Termination::new(),
        }
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock().unwrap_or_else(|e| e.into_inner()) = name.to_string();
    }

    pub fn account(&self) -> i8 {
        self.account.load(Ordering::Relaxed)
    }

    pub fn set_account(&self, account: i8) {
        self.account.store(account, Ordering::Relaxed);
    }

    pub fn logged_in(&self) -> bool {
        self.account() != ACCOUNT_PENDING
    }

    pub fn json(&self) -> bool {
        self.json.load(Ordering::Relaxed)
    }

    pub fn set_json(&self, json: bool) {
        self.json.store(json, Ordering::Relaxed);
    }

    pub fn player_number(&self) -> u8 {
        self.player_number.load(Ordering::Relaxed)
    }

    pub fn set_player_number(&self, number: u8) {
        self.player_number.store(number, Ordering::Relaxed);
    }

    /// Refreshes the activity timestamp; called for every inbound frame.
    pub fn touch(&self) {
        self.last_active.store(unix_now(), Ordering::Relaxed);
    }

    pub fn last_active(&self) -> i64 {
        self.last_active.load(Ordering::Relaxed)
    }

    /// Stamps an outgoing ping and returns the timestamp it carries.
    pub fn record_ping(&self) -> i64 {
        let now = unix_now();
        self.last_ping.store(now, Ordering::Relaxed);
        now
    }

    /// Queues a raw outbound frame. Errors (the writer is gone) are
    /// ignored; the session is already tearing down.
    pub async fn send_raw(&self, frame: Vec<u8>) {
        let _ = self.events.send(frame).await;
    }

    pub async fn send_event(&self, event: &Event) {
        self.send_raw(event.encode(self.json())).await;
    }

    pub async fn send_notice(&self, message: &str) {
        self.send_event(&Event::Notice {
            message: message.to_string(),
        })
        .await;
    }

    pub fn terminate(&self, reason: &str) {
        self.termination.terminate(reason);
    }

    pub fn terminated(&self) -> bool {
        self.termination.terminated()
    }

    pub fn termination_reason(&self) -> Option<String> {
        self.termination.reason()
    }

    /// A receiver that resolves when the session is terminated.
    pub fn termination_subscribe(&self) -> watch::Receiver<bool> {
        self.termination.flag.subscribe()
    }

    /// The client's name for logging, or its id before login.
    pub fn label(&self) -> String {
        let name = self.name();
        if name.is_empty() {
            self.id.to_string()
        } else {
            name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> (ServerClient, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(32);
        (ServerClient::new(1, tx), rx)
    }

    #[test]
    fn test_new_client_state() {
        let (client, _rx) = test_client();
        assert_eq!(client.account(), ACCOUNT_PENDING);
        assert!(!client.logged_in());
        assert!(client.name().is_empty());
        assert_eq!(client.player_number(), 0);
        assert!(!client.json());
        assert!(!client.terminated());
    }

    #[test]
    fn test_label_falls_back_to_id() {
        let (client, _rx) = test_client();
        assert_eq!(client.label(), "1");
        client.set_name("alice");
        assert_eq!(client.label(), "alice");
    }

    #[test]
    fn test_termination_is_sticky_and_first_reason_wins() {
        let (client, _rx) = test_client();
        client.terminate("first reason");
        client.terminate("second reason");
        assert!(client.terminated());
        assert_eq!(client.termination_reason().as_deref(), Some("first reason"));
    }

    #[test]
    fn test_empty_termination_reason_is_silent() {
        let (client, _rx) = test_client();
        client.terminate("");
        assert!(client.terminated());
        assert_eq!(client.termination_reason(), None);
    }

    #[tokio::test]
    async fn test_termination_wakes_subscribers() {
        let (client, _rx) = test_client();
        let mut sub = client.termination_subscribe();
        client.terminate("gone");
        sub.changed().await.unwrap();
        assert!(*sub.borrow());
    }

    #[tokio::test]
    async fn test_send_event_respects_format_flag() {
        let (client, mut rx) = test_client();
        let ev = Event::Notice {
            message: "hi".to_string(),
        };
        client.send_event(&ev).await;
        assert_eq!(rx.recv().await.unwrap(), b"notice hi".to_vec());

        client.set_json(true);
        client.send_event(&ev).await;
        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["type"], "notice");
        assert_eq!(value["message"], "hi");
    }

    #[tokio::test]
    async fn test_send_after_writer_gone_is_ignored() {
        let (client, rx) = test_client();
        drop(rx);
        // Must not panic or block.
        client.send_notice("anyone there").await;
    }
}
