//! Process-wide registry and the command dispatcher.
//!
//! Every client session forwards its inbound frames into one bounded
//! command queue; a single dispatcher task drains the queue and owns all
//! match state outright. Session teardown and the periodic reaper are
//! routed through the same queue as control items, so match state is only
//! ever touched from the dispatcher and needs no locks. The client set is
//! the one shared structure, guarded by a mutex for the accept loops, the
//! login name check, and join-by-name lookups.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use shared::game;
use shared::Event;
use tokio::sync::mpsc;
use tokio::time;

use crate::client::{unix_now, ServerClient};
use crate::game::ServerGame;

/// Idle limit enforced by the ping task via `last_active`.
pub const CLIENT_TIMEOUT_SECONDS: i64 = 10 * 60;
const PING_INTERVAL: Duration = Duration::from_secs(4 * 60);
const REAP_INTERVAL: Duration = Duration::from_secs(60);
/// Capacity of the server-wide command queue.
const COMMAND_QUEUE_BUFFER: usize = 10;

const HELP_TEXT: &str = "Available commands: help, json, say, list, create, join, leave, roll, move, reset, ok, rematch, board, pong, disconnect";

/// Items drained by the dispatcher task, in strict arrival order.
enum ServerCommand {
    /// A raw frame from a client session.
    Frame {
        client: Arc<ServerClient>,
        frame: Vec<u8>,
    },
    /// A session's transport has exited; detach it from any match.
    Hangup { client: Arc<ServerClient> },
    /// Reaper tick: compact terminated matches.
    Sweep,
}

/// Shared registry handle. Match state lives in the dispatcher task, not
/// here; see the module docs.
pub struct Server {
    clients: Mutex<Vec<Arc<ServerClient>>>,
    commands: mpsc::Sender<ServerCommand>,
    next_client_id: AtomicU32,
}

impl Server {
    /// Creates the registry and spawns the dispatcher and reaper tasks.
    pub fn new() -> Arc<Server> {
        let (commands, queue) = mpsc::channel(COMMAND_QUEUE_BUFFER);
        let server = Arc::new(Server {
            clients: Mutex::new(Vec::new()),
            commands,
            next_client_id: AtomicU32::new(1),
        });

        let dispatcher = Dispatcher {
            server: server.clone(),
            games: Vec::new(),
            next_game_id: 1,
        };
        tokio::spawn(dispatcher.run(queue));
        tokio::spawn(Self::run_reaper(server.clone()));
        server
    }

    pub fn next_client_id(&self) -> u32 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn client_count(&self) -> usize {
        self.clients_guard().len()
    }

    /// Adds the session to the registry and spawns its ping and forwarder
    /// tasks. The caller runs the transport read/write and calls
    /// `unregister_client` when it returns.
    pub fn register_client(
        self: &Arc<Self>,
        client: Arc<ServerClient>,
        commands_rx: mpsc::Receiver<Vec<u8>>,
    ) {
        self.clients_guard().push(client.clone());
        info!("Client {} connected", client.label());
        tokio::spawn(self.clone().run_ping(client.clone()));
        tokio::spawn(self.clone().run_forwarder(client, commands_rx));
    }

    /// Detaches the session from any match (through the dispatcher),
    /// removes it from the registry, and terminates its transport.
    pub async fn unregister_client(&self, client: &Arc<ServerClient>) {
        let _ = self
            .commands
            .send(ServerCommand::Hangup {
                client: client.clone(),
            })
            .await;
        self.clients_guard().retain(|c| c.id != client.id);
        client.terminate("");
        info!("Client {} disconnected", client.label());
    }

    /// Multiplexes one session's frames into the server-wide queue. This
    /// is the serialization point: the dispatcher sees a single ordered
    /// stream across all clients.
    async fn run_forwarder(
        self: Arc<Self>,
        client: Arc<ServerClient>,
        mut commands_rx: mpsc::Receiver<Vec<u8>>,
    ) {
        while let Some(frame) = commands_rx.recv().await {
            client.touch();
            let item = ServerCommand::Frame {
                client: client.clone(),
                frame,
            };
            if self.commands.send(item).await.is_err() {
                return;
            }
        }
    }

    async fn run_ping(self: Arc<Self>, client: Arc<ServerClient>) {
        let mut ticker = time::interval(PING_INTERVAL);
        ticker.tick().await; // the first tick completes immediately
        loop {
            ticker.tick().await;

            if client.terminated() {
                return;
            }
            if client.name().is_empty() {
                // Message retained for protocol compatibility even though
                // the ticker interval is longer.
                client.terminate("User did not send login command within 2 minutes.");
                return;
            }
            if unix_now() - client.last_active() > CLIENT_TIMEOUT_SECONDS {
                client.terminate("Closing connection due to inactivity.");
                return;
            }

            let stamp = client.record_ping();
            client
                .send_event(&Event::Ping {
                    message: stamp.to_string(),
                })
                .await;
        }
    }

    async fn run_reaper(server: Arc<Server>) {
        let mut ticker = time::interval(REAP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if server.commands.send(ServerCommand::Sweep).await.is_err() {
                return;
            }
        }
    }

    fn clients_guard(&self) -> MutexGuard<'_, Vec<Arc<ServerClient>>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find_client_by_name(&self, name: &str) -> Option<Arc<ServerClient>> {
        let lower = name.to_lowercase();
        self.clients_guard()
            .iter()
            .find(|c| c.name().to_lowercase() == lower)
            .cloned()
    }
}

fn name_available(clients: &[Arc<ServerClient>], name: &str) -> bool {
    let lower = name.to_lowercase();
    !clients.iter().any(|c| c.name().to_lowercase() == lower)
}

/// Picks an unused `Guest<100-999>` name. Retries until free; the name set
/// is small enough in practice for this to terminate quickly.
fn random_username(clients: &[Arc<ServerClient>]) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let name = format!("Guest{}", rng.gen_range(100..1000));
        if name_available(clients, &name) {
            return name;
        }
    }
}

/// Owns all match state; runs as a single task draining the command queue.
struct Dispatcher {
    server: Arc<Server>,
    games: Vec<ServerGame>,
    next_game_id: u32,
}

impl Dispatcher {
    async fn run(mut self, mut queue: mpsc::Receiver<ServerCommand>) {
        while let Some(item) = queue.recv().await {
            match item {
                ServerCommand::Frame { client, frame } => self.handle_frame(client, frame).await,
                ServerCommand::Hangup { client } => {
                    if let Some(i) = self.game_index_of(&client) {
                        self.games[i].remove_client(&client).await;
                    }
                }
                ServerCommand::Sweep => self.sweep_games(),
            }
        }
    }

    fn sweep_games(&mut self) {
        let before = self.games.len();
        self.games.retain(|g| !g.terminated());
        let reaped = before - self.games.len();
        if reaped > 0 {
            debug!("Reaped {} terminated match(es)", reaped);
        }
    }

    fn game_index_of(&self, client: &ServerClient) -> Option<usize> {
        self.games.iter().position(|g| g.has_client(client))
    }

    fn take_game_id(&mut self) -> u32 {
        let id = self.next_game_id;
        self.next_game_id += 1;
        id
    }

    async fn handle_frame(&mut self, client: Arc<ServerClient>, frame: Vec<u8>) {
        // Frames may still be queued behind a session's hangup; a
        // terminated session must never re-attach to a match.
        if client.terminated() {
            return;
        }
        let text = String::from_utf8_lossy(&frame);
        let trimmed = text.trim();
        let (keyword, rest) = match trimmed.split_once(' ') {
            Some((k, rest)) => (k, rest),
            None => (trimmed, ""),
        };
        if keyword.is_empty() {
            return;
        }
        let keyword = keyword.to_lowercase();
        let params: Vec<&str> = rest.split_whitespace().collect();

        // Require users to send the login command first.
        if !client.logged_in() {
            match keyword.as_str() {
                shared::COMMAND_LOGIN | shared::COMMAND_LOGIN_JSON | "l" | "lj" => {
                    if keyword == shared::COMMAND_LOGIN_JSON || keyword == "lj" {
                        client.set_json(true);
                    }
                    self.handle_login(&client, &params).await;
                }
                _ => client.terminate("You must login before using other commands."),
            }
            return;
        }

        match keyword.as_str() {
            shared::COMMAND_HELP | "h" => {
                client
                    .send_event(&Event::Help {
                        topic: String::new(),
                        message: HELP_TEXT.to_string(),
                    })
                    .await;
            }
            shared::COMMAND_JSON => self.handle_json(&client, &params).await,
            shared::COMMAND_SAY | "s" => self.handle_say(&client, &params).await,
            shared::COMMAND_LIST | "ls" => self.handle_list(&client).await,
            shared::COMMAND_CREATE | "c" => self.handle_create(&client, &params).await,
            shared::COMMAND_JOIN | "j" => self.handle_join(&client, &params).await,
            shared::COMMAND_LEAVE | "l" => self.handle_leave(&client).await,
            shared::COMMAND_ROLL | "r" => self.handle_roll(&client).await,
            shared::COMMAND_MOVE | "m" | "mv" => self.handle_move(&client, &params).await,
            shared::COMMAND_RESET => self.handle_reset(&client).await,
            shared::COMMAND_OK | "k" => self.handle_ok(&client).await,
            shared::COMMAND_REMATCH | "rm" => self.handle_rematch(&client).await,
            shared::COMMAND_BOARD | "b" => self.handle_board(&client).await,
            shared::COMMAND_DISCONNECT => {
                if let Some(i) = self.game_index_of(&client) {
                    self.games[i].remove_client(&client).await;
                }
                client.terminate("Client disconnected");
            }
            shared::COMMAND_PONG => {
                // Nothing to do; the forwarder already refreshed last_active.
            }
            "endgame" => self.handle_endgame(&client).await,
            _ => {
                debug!(
                    "Received unknown command from client {}: {}",
                    client.label(),
                    trimmed
                );
            }
        }
    }

    async fn handle_login(&mut self, client: &Arc<ServerClient>, params: &[&str]) {
        let mut password = String::new();
        let name;
        {
            // Hold the client-set lock across the availability check and
            // the assignment so racing logins cannot share a name.
            let clients = self.server.clients_guard();
            if params.is_empty() {
                name = random_username(&clients);
            } else {
                let requested = params[0];
                if requested.chars().all(|c| c.is_ascii_digit()) {
                    client.terminate(
                        "Invalid username: must contain at least one non-numeric character.",
                    );
                    return;
                }
                if !name_available(&clients, requested) {
                    client.terminate("Username unavailable.");
                    return;
                }
                name = requested.to_string();
                if params.len() > 1 {
                    password = params[1..].join(" ");
                }
            }
            client.set_name(&name);
        }

        client.set_account(if password.is_empty() { 0 } else { 1 });
        client
            .send_event(&Event::Welcome {
                player: name.clone(),
                clients: self.server.client_count(),
                games: self.games.len(),
            })
            .await;
        info!("Client {} logged in as {}", client.id, name);
    }

    async fn handle_json(&mut self, client: &Arc<ServerClient>, params: &[&str]) {
        if params.len() != 1 {
            self.send_json_usage(client).await;
            return;
        }
        match params[0].to_lowercase().as_str() {
            "on" => {
                client.set_json(true);
                client.send_notice("JSON formatted messages enabled.").await;
            }
            "off" => {
                client.set_json(false);
                client.send_notice("JSON formatted messages disabled.").await;
            }
            _ => self.send_json_usage(client).await,
        }
    }

    async fn send_json_usage(&self, client: &Arc<ServerClient>) {
        client
            .send_notice("To enable JSON formatted messages, send 'json on'. To disable JSON formatted messages, send 'json off'.")
            .await;
    }

    async fn handle_say(&mut self, client: &Arc<ServerClient>, params: &[&str]) {
        if params.is_empty() {
            return;
        }
        let Some(i) = self.game_index_of(client) else {
            client
                .send_notice("Message not sent: You are not currently in a match.")
                .await;
            return;
        };
        let Some(opponent) = self.games[i].opponent(client) else {
            client
                .send_notice("Message not sent: There is no one else in the match.")
                .await;
            return;
        };
        opponent
            .send_event(&Event::Say {
                player: client.name(),
                message: params.join(" "),
            })
            .await;
    }

    async fn handle_list(&mut self, client: &Arc<ServerClient>) {
        let games = self
            .games
            .iter()
            .filter(|g| !g.terminated())
            .map(|g| g.listing())
            .collect();
        client.send_event(&Event::List { games }).await;
    }

    async fn handle_create(&mut self, client: &Arc<ServerClient>, params: &[&str]) {
        if self.game_index_of(client).is_some() {
            client
                .send_notice("Please leave the match you are in before creating another.")
                .await;
            return;
        }
        let usage = "To create a match please specify whether it is public or private. When creating a private match, a password must also be provided.";
        let Some(game_type) = params.first().map(|p| p.to_lowercase()) else {
            client.send_notice(usage).await;
            return;
        };
        let password;
        let mut game_name;
        match game_type.as_str() {
            "public" => {
                password = String::new();
                game_name = params[1..].join(" ");
            }
            "private" => {
                if params.len() < 2 {
                    client.send_notice(usage).await;
                    return;
                }
                password = params[1].to_string();
                game_name = params[2..].join(" ");
            }
            _ => {
                client.send_notice(usage).await;
                return;
            }
        }

        if game_name.trim().is_empty() {
            let name = client.name();
            let abbr = if name.ends_with('s') || name.ends_with('S') {
                "'"
            } else {
                "'s"
            };
            game_name = format!("{}{} match", name, abbr);
        }

        let id = self.take_game_id();
        let mut game = ServerGame::new(id);
        game.name = game_name;
        game.password = password;
        if let Err(reason) = game.add_client(client).await {
            // A freshly created match refusing its creator is an invariant
            // violation, not a user error.
            panic!(
                "failed to add client {} to newly created game {}: {}",
                client.label(),
                id,
                reason
            );
        }
        info!("Client {} created match {}", client.label(), id);
        self.games.push(game);
    }

    async fn handle_join(&mut self, client: &Arc<ServerClient>, params: &[&str]) {
        if self.game_index_of(client).is_some() {
            client
                .send_event(&Event::FailedJoin {
                    reason: "Please leave the match you are in before joining another."
                        .to_string(),
                })
                .await;
            return;
        }
        let usage = "To join a match please specify its ID or the name of a player in the match. To join a private match, a password must also be specified.";
        if params.is_empty() {
            client.send_notice(usage).await;
            return;
        }

        // A numeric target is a match id; anything else names a connected
        // player whose match to join.
        let join_game_id = if params[0].chars().all(|c| c.is_ascii_digit()) {
            match params[0].parse::<u32>() {
                Ok(id) if id > 0 => id,
                _ => {
                    client.send_notice(usage).await;
                    return;
                }
            }
        } else {
            let found = self
                .server
                .find_client_by_name(params[0])
                .and_then(|other| self.game_index_of(&other))
                .map(|i| self.games[i].id);
            match found {
                Some(id) => id,
                None => {
                    client
                        .send_event(&Event::FailedJoin {
                            reason: "Match not found.".to_string(),
                        })
                        .await;
                    return;
                }
            }
        };

        let Some(i) = self
            .games
            .iter()
            .position(|g| !g.terminated() && g.id == join_game_id)
        else {
            client
                .send_event(&Event::FailedJoin {
                    reason: "Match not found.".to_string(),
                })
                .await;
            return;
        };

        let game = &mut self.games[i];
        if !game.password.is_empty()
            && (params.len() < 2 || game.password != params[1..].join(" "))
        {
            client
                .send_event(&Event::FailedJoin {
                    reason: "Invalid password.".to_string(),
                })
                .await;
            return;
        }

        if let Err(reason) = game.add_client(client).await {
            client.send_event(&Event::FailedJoin { reason }).await;
        }
    }

    async fn handle_leave(&mut self, client: &Arc<ServerClient>) {
        let Some(i) = self.game_index_of(client) else {
            client
                .send_event(&Event::FailedLeave {
                    reason: "You are not currently in a match.".to_string(),
                })
                .await;
            return;
        };
        self.games[i].remove_client(client).await;
    }

    async fn handle_roll(&mut self, client: &Arc<ServerClient>) {
        let Some(i) = self.game_index_of(client) else {
            client
                .send_event(&Event::FailedRoll {
                    reason: "You are not currently in a match.".to_string(),
                })
                .await;
            return;
        };
        let game = &mut self.games[i];
        if !game.roll(client.player_number()) {
            client
                .send_event(&Event::FailedRoll {
                    reason: "It is not your turn to roll.".to_string(),
                })
                .await;
            return;
        }

        // Capture the dice before opening resolution; a tied opening roll
        // clears them but is still reported to both players.
        let rolled = Event::Rolled {
            player: client.name(),
            roll1: game.game.roll1,
            roll2: game.game.roll2,
        };
        game.game.resolve_opening();

        for c in game.clients() {
            c.send_event(&rolled).await;
            // Pre-turn JSON clients skip the board; the rolled event
            // already carries everything they need.
            if game.game.turn != 0 || !c.json() {
                game.send_board(&c).await;
            }
        }
    }

    async fn handle_move(&mut self, client: &Arc<ServerClient>, params: &[&str]) {
        let Some(i) = self.require_turn_for_move(client).await else {
            return;
        };

        if params.is_empty() {
            self.send_move_usage(client).await;
            return;
        }

        let number = client.player_number();
        let mut moves = Vec::new();
        for param in params {
            let parts: Vec<&str> = param.split('/').collect();
            if parts.len() != 2 {
                self.send_move_usage(client).await;
                return;
            }
            let from = game::parse_space(parts[0]);
            let to = game::parse_space(parts[1]);
            if from == -1 || to == -1 {
                self.send_move_usage(client).await;
                return;
            }
            if !game::valid_space(from) || !game::valid_space(to) {
                client
                    .send_event(&Event::FailedMove {
                        from,
                        to,
                        reason: "Illegal move.".to_string(),
                    })
                    .await;
                return;
            }
            moves.push([
                game::flip_space(from, number),
                game::flip_space(to, number),
            ]);
        }

        let game_ref = &mut self.games[i];
        let (ok, expanded) = game_ref.game.add_moves(&moves);
        if !ok {
            client
                .send_event(&Event::FailedMove {
                    from: 0,
                    to: 0,
                    reason: "Illegal move.".to_string(),
                })
                .await;
            return;
        }

        let win_event = match game_ref.game.winner {
            0 => None,
            1 => Some(Event::Win {
                player: game_ref.game.player1.name.clone(),
            }),
            _ => Some(Event::Win {
                player: game_ref.game.player2.name.clone(),
            }),
        };

        for c in game_ref.clients() {
            c.send_event(&Event::Moved {
                player: client.name(),
                moves: game::flip_moves(&expanded, c.player_number()),
            })
            .await;
            game_ref.send_board(&c).await;
            if let Some(ev) = &win_event {
                c.send_event(ev).await;
            }
        }
    }

    async fn send_move_usage(&self, client: &Arc<ServerClient>) {
        client
            .send_event(&Event::FailedMove {
                from: 0,
                to: 0,
                reason: "Specify one or more moves in the form FROM/TO. For example: 8/4 6/4"
                    .to_string(),
            })
            .await;
    }

    /// Guard for move submission: seated and holding the turn, reported
    /// through `failedMove` on violation.
    async fn require_turn_for_move(&mut self, client: &Arc<ServerClient>) -> Option<usize> {
        let Some(i) = self.game_index_of(client) else {
            client
                .send_event(&Event::FailedMove {
                    from: 0,
                    to: 0,
                    reason: "You are not currently in a match.".to_string(),
                })
                .await;
            return None;
        };
        if self.games[i].game.turn != client.player_number() {
            client
                .send_event(&Event::FailedMove {
                    from: 0,
                    to: 0,
                    reason: "It is not your turn to move.".to_string(),
                })
                .await;
            return None;
        }
        Some(i)
    }

    async fn handle_reset(&mut self, client: &Arc<ServerClient>) {
        let Some(i) = self.require_match(client).await else {
            return;
        };
        let game = &mut self.games[i];
        if game.game.turn != client.player_number() {
            client.send_notice("It is not your turn.").await;
            return;
        }
        let moves = game.game.moves();
        if moves.is_empty() {
            return;
        }

        // Undo in reverse order: each inverted pair pops the most recently
        // applied move.
        let undo: Vec<[i8; 2]> = moves.iter().rev().map(|m| [m[1], m[0]]).collect();
        let (ok, _) = game.game.add_moves(&undo);
        if !ok {
            client.send_notice("Failed to undo move: invalid move.").await;
            return;
        }
        for c in game.clients() {
            c.send_event(&Event::Moved {
                player: client.name(),
                moves: game::flip_moves(&undo, c.player_number()),
            })
            .await;
            game.send_board(&c).await;
        }
    }

    async fn handle_ok(&mut self, client: &Arc<ServerClient>) {
        let Some(i) = self.require_match(client).await else {
            return;
        };
        let game_ref = &mut self.games[i];
        let legal = game_ref.game.legal_moves();
        if !legal.is_empty() {
            let mut available = game::flip_moves(&legal, client.player_number());
            game::sort_moves(&mut available);
            client
                .send_event(&Event::FailedOk {
                    reason: format!(
                        "The following legal moves are available: {}",
                        game::format_moves(&available)
                    ),
                })
                .await;
            return;
        }

        game_ref.game.next_turn();
        for c in game_ref.clients() {
            game_ref.send_board(&c).await;
        }
    }

    async fn handle_rematch(&mut self, client: &Arc<ServerClient>) {
        let Some(i) = self.require_match(client).await else {
            return;
        };
        let number = client.player_number();
        let (winner, rematch, both_seated) = {
            let game = &self.games[i];
            (
                game.game.winner,
                game.rematch,
                game.client1.is_some() && game.client2.is_some(),
            )
        };
        if winner == 0 {
            client
                .send_notice("The match you are in is still in progress.")
                .await;
            return;
        }
        if rematch == number {
            client.send_notice("You have already requested a rematch.").await;
            return;
        }
        if !both_seated {
            client.send_notice("Your opponent left the match.").await;
            return;
        }

        if rematch != 0 {
            // Both seats opted in: clone identity and seats into a fresh
            // match and retire the old one.
            let id = self.take_game_id();
            let next = self.games[i].spawn_rematch(id);
            self.games[i].terminate();

            let ev1 = Event::Joined {
                player: next.game.player1.name.clone(),
                game_id: id,
                player_number: 1,
            };
            let ev2 = Event::Joined {
                player: next.game.player2.name.clone(),
                game_id: id,
                player_number: 2,
            };
            for c in next.clients() {
                c.send_event(&ev1).await;
                c.send_event(&ev2).await;
                next.send_board(&c).await;
            }
            info!("Rematch: match {} continues as match {}", self.games[i].id, id);
            self.games.push(next);
        } else {
            self.games[i].rematch = number;
            if let Some(opponent) = self.games[i].opponent(client) {
                opponent
                    .send_notice("Your opponent would like to play again. Type /rematch to accept.")
                    .await;
            }
            client.send_notice("Rematch offer sent.").await;
        }
    }

    async fn handle_board(&mut self, client: &Arc<ServerClient>) {
        let Some(i) = self.require_match(client).await else {
            return;
        };
        self.games[i].send_board(client).await;
    }

    /// Debug helper: forces a near-terminal position and broadcasts it.
    async fn handle_endgame(&mut self, client: &Arc<ServerClient>) {
        let Some(i) = self.require_match(client).await else {
            return;
        };
        let game = &mut self.games[i];
        let mut board = vec![0i8; game::BOARD_SPACES];
        board[1] = 1;
        board[24] = -1;
        game.game.force_position(board, 1, 1, 2);
        for c in game.clients() {
            game.send_board(&c).await;
        }
    }

    /// Guard shared by the commands that answer "not in a match" with a
    /// plain notice.
    async fn require_match(&mut self, client: &Arc<ServerClient>) -> Option<usize> {
        match self.game_index_of(client) {
            Some(i) => Some(i),
            None => {
                client.send_notice("You are not currently in a match.").await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry_client(id: u32, name: &str) -> Arc<ServerClient> {
        let (tx, rx) = mpsc::channel(32);
        drop(rx);
        let client = Arc::new(ServerClient::new(id, tx));
        client.set_name(name);
        client
    }

    #[test]
    fn test_name_available_is_case_insensitive() {
        let clients = vec![registry_client(1, "Alice")];
        assert!(!name_available(&clients, "alice"));
        assert!(!name_available(&clients, "ALICE"));
        assert!(name_available(&clients, "bob"));
    }

    #[test]
    fn test_random_username_shape() {
        for _ in 0..50 {
            let name = random_username(&[]);
            let digits = name.strip_prefix("Guest").unwrap();
            let n: u32 = digits.parse().unwrap();
            assert!((100..=999).contains(&n), "unexpected guest number {}", n);
        }
    }

    #[test]
    fn test_random_username_skips_taken_names() {
        // Occupy most of the space to force retries.
        let clients: Vec<Arc<ServerClient>> = (100..=998)
            .map(|n| registry_client(n, &format!("Guest{}", n)))
            .collect();
        let name = random_username(&clients);
        assert_eq!(name, "Guest999");
    }

    #[tokio::test]
    async fn test_client_ids_are_unique_and_monotonic() {
        let server = Server::new();
        let first = server.next_client_id();
        let second = server.next_client_id();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_sweep_drops_only_terminated_games() {
        let server = Server::new();
        let mut dispatcher = Dispatcher {
            server,
            games: Vec::new(),
            next_game_id: 1,
        };
        for _ in 0..3 {
            let id = dispatcher.take_game_id();
            dispatcher.games.push(ServerGame::new(id));
        }
        dispatcher.games[1].terminate();
        dispatcher.sweep_games();
        let ids: Vec<u32> = dispatcher.games.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![1, 3]);
        // Ids are never reused.
        assert_eq!(dispatcher.take_game_id(), 4);
    }

    #[tokio::test]
    async fn test_find_client_by_name() {
        let server = Server::new();
        let alice = registry_client(server.next_client_id(), "Alice");
        server.clients_guard().push(alice.clone());
        assert_eq!(server.find_client_by_name("alice").unwrap().id, alice.id);
        assert!(server.find_client_by_name("bob").is_none());
    }
}
