//! # Shared Backgammon Library
//!
//! Data structures and rules shared by the match server and its clients:
//!
//! - **Command keywords**: the canonical long forms of every text command a
//!   client may send. Aliases are resolved by the server's dispatcher.
//! - **Events**: the `Event` enum defines everything the server emits. Each
//!   event is delivered as one frame, either as a plain text line or as a
//!   JSON document, selected per client.
//! - **Rules engine** (`game` module): board representation, move
//!   validation and expansion, dice accounting, and winner detection.
//!
//! Board coordinates on the wire are always in the receiving (or sending)
//! player's own perspective; `game::flip_space` and `game::flip_moves`
//! translate between a player's view and the absolute representation the
//! server stores.

pub mod game;

use serde::{Deserialize, Serialize};

use crate::game::format_moves;

// Canonical command keywords. Short aliases ("l", "j", "mv", ...) are
// accepted by the server dispatcher alongside these.
pub const COMMAND_LOGIN: &str = "login";
pub const COMMAND_LOGIN_JSON: &str = "loginj";
pub const COMMAND_HELP: &str = "help";
pub const COMMAND_JSON: &str = "json";
pub const COMMAND_SAY: &str = "say";
pub const COMMAND_LIST: &str = "list";
pub const COMMAND_CREATE: &str = "create";
pub const COMMAND_JOIN: &str = "join";
pub const COMMAND_LEAVE: &str = "leave";
pub const COMMAND_ROLL: &str = "roll";
pub const COMMAND_MOVE: &str = "move";
pub const COMMAND_RESET: &str = "reset";
pub const COMMAND_OK: &str = "ok";
pub const COMMAND_REMATCH: &str = "rematch";
pub const COMMAND_BOARD: &str = "board";
pub const COMMAND_DISCONNECT: &str = "disconnect";
pub const COMMAND_PONG: &str = "pong";

/// One entry in a lobby `list` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameListing {
    pub id: u32,
    /// Whether joining requires a password.
    pub password: bool,
    /// Number of occupied seats (0-2).
    pub players: u8,
    pub name: String,
}

/// Board snapshot in the recipient's own perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardState {
    pub player_number: u8,
    pub board: Vec<i8>,
    pub turn: u8,
    pub roll1: u8,
    pub roll2: u8,
    pub winner: u8,
}

/// Everything the server emits to clients.
///
/// In JSON mode the whole enum is serialized with a `type` tag. In text mode
/// each event is a single line starting with the same tag; `list` and
/// `board` carry their structured payload as a JSON document after the
/// keyword, everything else is space-separated fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    Welcome {
        player: String,
        clients: usize,
        games: usize,
    },
    Ping {
        message: String,
    },
    Help {
        topic: String,
        message: String,
    },
    Notice {
        message: String,
    },
    Say {
        player: String,
        message: String,
    },
    List {
        games: Vec<GameListing>,
    },
    Joined {
        player: String,
        game_id: u32,
        player_number: u8,
    },
    FailedJoin {
        reason: String,
    },
    FailedLeave {
        reason: String,
    },
    Rolled {
        player: String,
        roll1: u8,
        roll2: u8,
    },
    FailedRoll {
        reason: String,
    },
    Moved {
        player: String,
        moves: Vec<[i8; 2]>,
    },
    FailedMove {
        from: i8,
        to: i8,
        reason: String,
    },
    FailedOk {
        reason: String,
    },
    Win {
        player: String,
    },
    Board {
        state: BoardState,
    },
}

impl Event {
    /// Serializes the event as one outbound frame, JSON or text per the
    /// recipient's format flag.
    pub fn encode(&self, json: bool) -> Vec<u8> {
        if json {
            serde_json::to_vec(self).unwrap_or_default()
        } else {
            self.format_text().into_bytes()
        }
    }

    fn format_text(&self) -> String {
        match self {
            Event::Welcome {
                player,
                clients,
                games,
            } => format!(
                "welcome {} there are {} clients playing {} matches.",
                player, clients, games
            ),
            Event::Ping { message } => format!("ping {}", message),
            Event::Help { topic, message } => {
                if topic.is_empty() {
                    format!("help {}", message)
                } else {
                    format!("help {} {}", topic, message)
                }
            }
            Event::Notice { message } => format!("notice {}", message),
            Event::Say { player, message } => format!("say {} {}", player, message),
            Event::List { games } => {
                format!("list {}", serde_json::to_string(games).unwrap_or_default())
            }
            Event::Joined {
                player,
                game_id,
                player_number,
            } => format!("joined {} {} {}", game_id, player_number, player),
            Event::FailedJoin { reason } => format!("failedjoin {}", reason),
            Event::FailedLeave { reason } => format!("failedleave {}", reason),
            Event::Rolled {
                player,
                roll1,
                roll2,
            } => format!("rolled {} {} {}", player, roll1, roll2),
            Event::FailedRoll { reason } => format!("failedroll {}", reason),
            Event::Moved { player, moves } => {
                format!("moved {} {}", player, format_moves(moves))
            }
            Event::FailedMove { from, to, reason } => {
                format!("failedmove {} {} {}", from, to, reason)
            }
            Event::FailedOk { reason } => format!("failedok {}", reason),
            Event::Win { player } => format!("win {}", player),
            Event::Board { state } => {
                format!("board {}", serde_json::to_string(state).unwrap_or_default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welcome_text_format() {
        let ev = Event::Welcome {
            player: "Guest112".to_string(),
            clients: 1,
            games: 0,
        };
        assert_eq!(
            String::from_utf8(ev.encode(false)).unwrap(),
            "welcome Guest112 there are 1 clients playing 0 matches."
        );
    }

    #[test]
    fn test_event_json_tag() {
        let ev = Event::FailedJoin {
            reason: "Match not found.".to_string(),
        };
        let encoded = String::from_utf8(ev.encode(true)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "failedJoin");
        assert_eq!(value["reason"], "Match not found.");
    }

    #[test]
    fn test_event_json_roundtrip() {
        let ev = Event::Joined {
            player: "bob".to_string(),
            game_id: 3,
            player_number: 2,
        };
        let decoded: Event = serde_json::from_slice(&ev.encode(true)).unwrap();
        match decoded {
            Event::Joined {
                player,
                game_id,
                player_number,
            } => {
                assert_eq!(player, "bob");
                assert_eq!(game_id, 3);
                assert_eq!(player_number, 2);
            }
            _ => panic!("wrong event type after roundtrip"),
        }
    }

    #[test]
    fn test_moved_text_format() {
        let ev = Event::Moved {
            player: "alice".to_string(),
            moves: vec![[8, 5], [6, 5]],
        };
        assert_eq!(
            String::from_utf8(ev.encode(false)).unwrap(),
            "moved alice 8/5 6/5"
        );
    }

    #[test]
    fn test_list_text_carries_json_payload() {
        let ev = Event::List {
            games: vec![GameListing {
                id: 1,
                password: false,
                players: 1,
                name: "Friendly".to_string(),
            }],
        };
        let line = String::from_utf8(ev.encode(false)).unwrap();
        let payload = line.strip_prefix("list ").unwrap();
        let listings: Vec<GameListing> = serde_json::from_str(payload).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "Friendly");
        assert_eq!(listings[0].players, 1);
    }

    #[test]
    fn test_board_text_carries_json_payload() {
        let state = BoardState {
            player_number: 2,
            board: vec![0; game::BOARD_SPACES],
            turn: 1,
            roll1: 3,
            roll2: 5,
            winner: 0,
        };
        let ev = Event::Board {
            state: state.clone(),
        };
        let line = String::from_utf8(ev.encode(false)).unwrap();
        let payload = line.strip_prefix("board ").unwrap();
        let decoded: BoardState = serde_json::from_str(payload).unwrap();
        assert_eq!(decoded, state);
    }
}
