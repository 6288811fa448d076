//! Integration tests for the match server.
//!
//! These tests drive the full listener -> session -> dispatcher -> event
//! path over real TCP sockets.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use server::network;
use server::server::Server;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> SocketAddr {
    let server = Server::new();
    network::listen_tcp(server, "127.0.0.1:0")
        .await
        .expect("failed to bind test listener")
}

/// A line-oriented test client.
struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connects and consumes the hello greeting.
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(reader).lines(),
            writer,
        };
        let hello = client.recv().await;
        assert!(
            hello.starts_with("hello "),
            "expected greeting, got {:?}",
            hello
        );
        client
    }

    async fn login(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.send(&format!("login {}", name)).await;
        let welcome = client.recv().await;
        assert!(welcome.starts_with(&format!("welcome {} ", name)));
        client
    }

    async fn send(&mut self, command: &str) {
        self.writer.write_all(command.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a frame")
            .expect("read failed")
            .expect("connection closed early")
    }

    /// Receives frames until one starts with `prefix`, discarding the rest.
    async fn recv_until(&mut self, prefix: &str) -> String {
        loop {
            let line = self.recv().await;
            if line.starts_with(prefix) {
                return line;
            }
        }
    }

    /// True once the server has closed the connection.
    async fn closed(&mut self) -> bool {
        matches!(
            timeout(WAIT, self.lines.next_line()).await,
            Ok(Ok(None)) | Ok(Err(_))
        )
    }

    /// Requests a board snapshot and returns its JSON payload.
    async fn board(&mut self) -> Value {
        self.send("board").await;
        let line = self.recv_until("board ").await;
        serde_json::from_str(line.strip_prefix("board ").unwrap()).unwrap()
    }
}

/// Rolls the opening for both players, rerolling ties, and returns the
/// number of the player who takes the first turn.
async fn resolve_opening(player1: &mut TestClient, player2: &mut TestClient) -> u8 {
    loop {
        player1.send("roll").await;
        player1.recv_until("rolled").await;
        player1.recv_until("board ").await;
        player2.recv_until("rolled").await;
        player2.recv_until("board ").await;

        player2.send("roll").await;
        player2.recv_until("rolled").await;
        player1.recv_until("rolled").await;
        let snapshot: Value = {
            let line = player1.recv_until("board ").await;
            serde_json::from_str(line.strip_prefix("board ").unwrap()).unwrap()
        };
        player2.recv_until("board ").await;

        let turn = snapshot["turn"].as_u64().unwrap() as u8;
        if turn != 0 {
            return turn;
        }
        // Tied opening roll: both dice cleared, both players roll again.
    }
}

#[tokio::test]
async fn guest_login_is_assigned_a_name() {
    let addr = start_server().await;
    let mut client = TestClient::connect(addr).await;

    client.send("login").await;
    let welcome = client.recv().await;
    let name = welcome
        .strip_prefix("welcome ")
        .and_then(|r| r.split(' ').next())
        .expect("malformed welcome");
    let n: u32 = name
        .strip_prefix("Guest")
        .expect("guest name expected")
        .parse()
        .unwrap();
    assert!((100..=999).contains(&n));
    assert!(welcome.ends_with("there are 1 clients playing 0 matches."));
}

#[tokio::test]
async fn commands_before_login_terminate_the_session() {
    let addr = start_server().await;
    let mut client = TestClient::connect(addr).await;

    client.send("list").await;
    let notice = client.recv().await;
    assert_eq!(notice, "notice You must login before using other commands.");
    assert!(client.closed().await);
}

#[tokio::test]
async fn create_list_and_join_a_public_match() {
    let addr = start_server().await;
    let mut alice = TestClient::login(addr, "alice").await;

    alice.send("create public Friendly").await;
    assert_eq!(alice.recv_until("joined").await, "joined 1 1 alice");

    let mut bob = TestClient::login(addr, "bob").await;
    bob.send("list").await;
    let line = bob.recv_until("list ").await;
    let listings: Value = serde_json::from_str(line.strip_prefix("list ").unwrap()).unwrap();
    assert_eq!(listings[0]["name"], "Friendly");
    assert_eq!(listings[0]["players"], 1);
    assert_eq!(listings[0]["password"], false);

    bob.send("join 1").await;
    assert_eq!(bob.recv_until("joined").await, "joined 1 2 bob");
    assert_eq!(alice.recv_until("joined").await, "joined 1 2 bob");
}

#[tokio::test]
async fn private_matches_require_the_password() {
    let addr = start_server().await;
    let mut alice = TestClient::login(addr, "alice").await;
    alice.send("create private secret Hidden").await;
    alice.recv_until("joined").await;

    let mut bob = TestClient::login(addr, "bob").await;
    bob.send("join 1 wrong").await;
    assert_eq!(bob.recv_until("failedjoin").await, "failedjoin Invalid password.");

    bob.send("join 1 secret").await;
    assert_eq!(bob.recv_until("joined").await, "joined 1 2 bob");
}

#[tokio::test]
async fn joining_an_unknown_match_fails() {
    let addr = start_server().await;
    let mut carol = TestClient::login(addr, "carol").await;
    carol.send("join 99").await;
    assert_eq!(
        carol.recv_until("failedjoin").await,
        "failedjoin Match not found."
    );
}

#[tokio::test]
async fn illegal_moves_are_rejected_and_leave_the_board_unchanged() {
    let addr = start_server().await;
    let mut alice = TestClient::login(addr, "alice").await;
    alice.send("create public").await;
    alice.recv_until("joined").await;
    let mut bob = TestClient::login(addr, "bob").await;
    bob.send("join 1").await;
    bob.recv_until("joined").await;
    alice.recv_until("joined").await;

    let turn = resolve_opening(&mut alice, &mut bob).await;
    let mover = if turn == 1 { &mut alice } else { &mut bob };

    // Point 1 always holds two opposing checkers at the start, so 6/1 is
    // illegal for either player with any opening dice.
    let before = mover.board().await;
    mover.send("move 6/1").await;
    assert_eq!(
        mover.recv_until("failedmove").await,
        "failedmove 0 0 Illegal move."
    );
    let after = mover.board().await;
    assert_eq!(before["board"], after["board"]);
    assert_eq!(before["turn"], after["turn"]);
}
