//! Match lifecycle: seats, dice, board fan-out, rematch bookkeeping.
//!
//! A `ServerGame` couples one rules-engine game to up to two client
//! sessions. It is owned exclusively by the dispatcher task; nothing here
//! is locked because nothing else can reach it.

use std::sync::Arc;

use log::info;
use rand::Rng;
use shared::game::Game;
use shared::{BoardState, Event, GameListing};

use crate::client::ServerClient;

pub struct ServerGame {
    pub id: u32,
    pub name: String,
    /// Empty means the match is public.
    pub password: String,
    pub client1: Option<Arc<ServerClient>>,
    pub client2: Option<Arc<ServerClient>>,
    pub game: Game,
    /// 0 = no rematch requested, otherwise the requesting seat.
    pub rematch: u8,
    terminated: bool,
}

impl ServerGame {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: String::new(),
            password: String::new(),
            client1: None,
            client2: None,
            game: Game::new(),
            rematch: 0,
            terminated: false,
        }
    }

    /// Terminated matches reject further mutation and are dropped by the
    /// next reaper sweep. Sticky.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    pub fn player_count(&self) -> u8 {
        self.client1.is_some() as u8 + self.client2.is_some() as u8
    }

    pub fn listing(&self) -> GameListing {
        GameListing {
            id: self.id,
            password: !self.password.is_empty(),
            players: self.player_count(),
            name: self.name.clone(),
        }
    }

    fn seat_of(&self, client: &ServerClient) -> Option<u8> {
        if self.client1.as_ref().map_or(false, |c| c.id == client.id) {
            Some(1)
        } else if self.client2.as_ref().map_or(false, |c| c.id == client.id) {
            Some(2)
        } else {
            None
        }
    }

    pub fn has_client(&self, client: &ServerClient) -> bool {
        self.seat_of(client).is_some()
    }

    /// The seated clients in player-number order, skipping empty seats.
    pub fn clients(&self) -> Vec<Arc<ServerClient>> {
        self.client1
            .iter()
            .chain(self.client2.iter())
            .cloned()
            .collect()
    }

    pub fn opponent(&self, client: &ServerClient) -> Option<Arc<ServerClient>> {
        match self.seat_of(client)? {
            1 => self.client2.clone(),
            _ => self.client1.clone(),
        }
    }

    /// Seats the client in the first empty slot, updates the matching
    /// player record, and announces the join to both seats.
    pub async fn add_client(&mut self, client: &Arc<ServerClient>) -> Result<(), String> {
        if self.terminated {
            return Err("Match has ended.".to_string());
        }
        let number = if self.client1.is_none() {
            1
        } else if self.client2.is_none() {
            2
        } else {
            return Err("Match is full.".to_string());
        };

        client.set_player_number(number);
        if number == 1 {
            self.game.player1.name = client.name();
            self.client1 = Some(client.clone());
        } else {
            self.game.player2.name = client.name();
            self.client2 = Some(client.clone());
        }

        let ev = Event::Joined {
            player: client.name(),
            game_id: self.id,
            player_number: number,
        };
        for c in self.clients() {
            c.send_event(&ev).await;
        }
        self.send_board(client).await;
        Ok(())
    }

    /// Clears the client's seat. The match terminates when the last seat
    /// empties; otherwise the remaining player is notified.
    pub async fn remove_client(&mut self, client: &Arc<ServerClient>) {
        let Some(number) = self.seat_of(client) else {
            return;
        };
        if number == 1 {
            self.client1 = None;
        } else {
            self.client2 = None;
        }
        client.set_player_number(0);

        match self.clients().first() {
            Some(remaining) => {
                remaining
                    .send_notice(&format!("{} left the match.", client.name()))
                    .await;
            }
            None => {
                self.terminated = true;
                info!("Match {} ended: all players left", self.id);
            }
        }
    }

    /// Rolls for the seat. False when it is not that player's turn to roll:
    /// pre-opening, whichever of the player's single die is already set;
    /// mid-game, anyone but the turn player with unconsumed dice.
    pub fn roll(&mut self, player: u8) -> bool {
        if self.terminated {
            return false;
        }
        let mut rng = rand::thread_rng();
        let die1 = rng.gen_range(1..=6);
        let die2 = rng.gen_range(1..=6);
        self.game.apply_roll(player, die1, die2)
    }

    /// Sends the board to one client, flipped to its own perspective.
    pub async fn send_board(&self, client: &Arc<ServerClient>) {
        let number = client.player_number();
        client
            .send_event(&Event::Board {
                state: BoardState {
                    player_number: number,
                    board: self.game.flipped_board(number),
                    turn: self.game.turn,
                    roll1: self.game.roll1,
                    roll2: self.game.roll2,
                    winner: self.game.winner,
                },
            })
            .await;
    }

    /// Moves this match's identity and seats into a fresh match, leaving
    /// this one with both slots empty. Used by the rematch handshake.
    pub fn spawn_rematch(&mut self, id: u32) -> ServerGame {
        let mut next = ServerGame::new(id);
        next.name = self.name.clone();
        next.password = self.password.clone();
        next.client1 = self.client1.take();
        next.client2 = self.client2.take();
        next.game.player1.name = self.game.player1.name.clone();
        next.game.player2.name = self.game.player2.name.clone();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_client(id: u32, name: &str) -> (Arc<ServerClient>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(32);
        let client = Arc::new(ServerClient::new(id, tx));
        client.set_name(name);
        client.set_account(0);
        (client, rx)
    }

    #[tokio::test]
    async fn test_seats_fill_in_order() {
        let mut g = ServerGame::new(1);
        let (a, _ra) = test_client(1, "alice");
        let (b, _rb) = test_client(2, "bob");
        let (c, _rc) = test_client(3, "carol");

        g.add_client(&a).await.unwrap();
        assert_eq!(a.player_number(), 1);
        assert_eq!(g.game.player1.name, "alice");
        assert_eq!(g.player_count(), 1);

        g.add_client(&b).await.unwrap();
        assert_eq!(b.player_number(), 2);
        assert_eq!(g.game.player2.name, "bob");

        assert!(g.add_client(&c).await.is_err(), "both seats taken");
        assert_eq!(c.player_number(), 0);
    }

    #[tokio::test]
    async fn test_join_announced_to_both_seats() {
        let mut g = ServerGame::new(1);
        let (a, mut ra) = test_client(1, "alice");
        let (b, _rb) = test_client(2, "bob");
        g.add_client(&a).await.unwrap();
        ra.recv().await.unwrap(); // alice's own joined event
        ra.recv().await.unwrap(); // board
        g.add_client(&b).await.unwrap();
        let frame = String::from_utf8(ra.recv().await.unwrap()).unwrap();
        assert_eq!(frame, "joined 1 2 bob");
    }

    #[tokio::test]
    async fn test_remove_last_client_terminates_match() {
        let mut g = ServerGame::new(1);
        let (a, _ra) = test_client(1, "alice");
        g.add_client(&a).await.unwrap();
        g.remove_client(&a).await;
        assert_eq!(a.player_number(), 0);
        assert!(g.terminated());
    }

    #[tokio::test]
    async fn test_seat_survives_disconnect_for_rejoin() {
        let mut g = ServerGame::new(1);
        let (a, _ra) = test_client(1, "alice");
        let (b, _rb) = test_client(2, "bob");
        g.add_client(&a).await.unwrap();
        g.add_client(&b).await.unwrap();
        g.remove_client(&a).await;
        assert!(!g.terminated());
        // The player record survives so the seat can be taken again.
        assert_eq!(g.game.player1.name, "alice");
        let (c, _rc) = test_client(3, "carol");
        g.add_client(&c).await.unwrap();
        assert_eq!(c.player_number(), 1);
        assert_eq!(g.game.player1.name, "carol");
    }

    #[tokio::test]
    async fn test_opponent_lookup() {
        let mut g = ServerGame::new(1);
        let (a, _ra) = test_client(1, "alice");
        let (b, _rb) = test_client(2, "bob");
        g.add_client(&a).await.unwrap();
        assert!(g.opponent(&a).is_none());
        g.add_client(&b).await.unwrap();
        assert_eq!(g.opponent(&a).unwrap().id, b.id);
        assert_eq!(g.opponent(&b).unwrap().id, a.id);
    }

    #[tokio::test]
    async fn test_roll_permission_follows_rules_engine() {
        let mut g = ServerGame::new(1);
        assert!(g.roll(1), "player 1 owns the first opening die");
        assert!(!g.roll(1), "player 1 already rolled");
        assert!(g.roll(2));
    }

    #[tokio::test]
    async fn test_rematch_clones_identity_and_seats() {
        let mut g = ServerGame::new(1);
        g.name = "Friendly".to_string();
        g.password = "secret".to_string();
        let (a, _ra) = test_client(1, "alice");
        let (b, _rb) = test_client(2, "bob");
        g.add_client(&a).await.unwrap();
        g.add_client(&b).await.unwrap();
        g.game.winner = 1;

        let next = g.spawn_rematch(2);
        assert_eq!(next.id, 2);
        assert_eq!(next.name, "Friendly");
        assert_eq!(next.password, "secret");
        assert_eq!(next.game.player1.name, "alice");
        assert_eq!(next.game.player2.name, "bob");
        assert_eq!(next.clients().len(), 2);
        assert!(g.client1.is_none() && g.client2.is_none());
        assert_eq!(next.game.winner, 0, "fresh game state");
        assert_eq!(next.game.turn, 0);
    }

    #[tokio::test]
    async fn test_listing_snapshot() {
        let mut g = ServerGame::new(7);
        g.name = "Friendly".to_string();
        let (a, _ra) = test_client(1, "alice");
        g.add_client(&a).await.unwrap();
        assert_eq!(
            g.listing(),
            GameListing {
                id: 7,
                password: false,
                players: 1,
                name: "Friendly".to_string(),
            }
        );
        g.password = "hunter2".to_string();
        assert!(g.listing().password);
    }
}
