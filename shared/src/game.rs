//! Backgammon rules engine.
//!
//! The board is stored in an absolute representation: a vector of 28 signed
//! checker counts. Spaces 1-24 are the points; space 0 holds player 1's
//! borne-off checkers and space 25 player 2's; spaces 26 and 27 are the two
//! bars. Positive counts belong to player 1, who moves from point 24 toward
//! point 1 and bears off to space 0. Negative counts belong to player 2,
//! moving the opposite way. `flip_space` translates between this absolute
//! representation and player 2's own perspective, in which both players see
//! themselves moving 24 -> 1.

use serde::{Deserialize, Serialize};

pub const SPACE_HOME_PLAYER: i8 = 0;
pub const SPACE_HOME_OPPONENT: i8 = 25;
pub const SPACE_BAR_PLAYER: i8 = 26;
pub const SPACE_BAR_OPPONENT: i8 = 27;

pub const BOARD_SPACES: usize = 28;
pub const CHECKERS_PER_PLAYER: i8 = 15;

/// A player record: seat number (1 or 2) and display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub number: u8,
    pub name: String,
}

impl Player {
    pub fn new(number: u8) -> Self {
        Self {
            number,
            name: String::new(),
        }
    }
}

/// Parses a space token in a player's own perspective. Returns -1 when the
/// token is not a space.
pub fn parse_space(s: &str) -> i8 {
    match s.to_ascii_lowercase().as_str() {
        "bar" | "b" => SPACE_BAR_PLAYER,
        "off" | "home" | "o" => SPACE_HOME_PLAYER,
        other => match other.parse::<i8>() {
            Ok(v) if v >= 0 => v,
            _ => -1,
        },
    }
}

pub fn valid_space(space: i8) -> bool {
    (0..BOARD_SPACES as i8).contains(&space)
}

/// Translates a space between the absolute representation and player 2's
/// perspective. The mapping is its own inverse; player 1's view is the
/// absolute representation.
pub fn flip_space(space: i8, player: u8) -> i8 {
    if player != 2 {
        return space;
    }
    match space {
        SPACE_HOME_PLAYER => SPACE_HOME_OPPONENT,
        SPACE_HOME_OPPONENT => SPACE_HOME_PLAYER,
        SPACE_BAR_PLAYER => SPACE_BAR_OPPONENT,
        SPACE_BAR_OPPONENT => SPACE_BAR_PLAYER,
        s if (1..=24).contains(&s) => 25 - s,
        s => s,
    }
}

pub fn flip_moves(moves: &[[i8; 2]], player: u8) -> Vec<[i8; 2]> {
    moves
        .iter()
        .map(|m| [flip_space(m[0], player), flip_space(m[1], player)])
        .collect()
}

/// Sorts moves in conventional notation order: higher origins first.
pub fn sort_moves(moves: &mut [[i8; 2]]) {
    moves.sort_by(|a, b| b[0].cmp(&a[0]).then(b[1].cmp(&a[1])));
}

fn format_space(space: i8) -> String {
    match space {
        SPACE_BAR_PLAYER | SPACE_BAR_OPPONENT => "bar".to_string(),
        SPACE_HOME_PLAYER | SPACE_HOME_OPPONENT => "off".to_string(),
        s => s.to_string(),
    }
}

/// Formats moves as space-separated `FROM/TO` pairs, e.g. `"8/4 6/4"`.
pub fn format_moves(moves: &[[i8; 2]]) -> String {
    moves
        .iter()
        .map(|m| format!("{}/{}", format_space(m[0]), format_space(m[1])))
        .collect::<Vec<_>>()
        .join(" ")
}

fn sign(player: u8) -> i8 {
    if player == 1 {
        1
    } else {
        -1
    }
}

fn bar_space(player: u8) -> i8 {
    if player == 1 {
        SPACE_BAR_PLAYER
    } else {
        SPACE_BAR_OPPONENT
    }
}

fn home_space(player: u8) -> i8 {
    if player == 1 {
        SPACE_HOME_PLAYER
    } else {
        SPACE_HOME_OPPONENT
    }
}

fn opponent(player: u8) -> u8 {
    if player == 1 {
        2
    } else {
        1
    }
}

/// A hop committed to the board this turn, with everything needed to undo it.
#[derive(Debug, Clone, Copy)]
struct AppliedMove {
    from: i8,
    to: i8,
    die: u8,
    hit: bool,
}

/// The state of one backgammon game.
///
/// `turn == 0` means the opening roll has not been resolved; during the
/// opening, `roll1` belongs to player 1 and `roll2` to player 2. Once a
/// winner is set no further mutation is accepted.
#[derive(Debug, Clone)]
pub struct Game {
    pub board: Vec<i8>,
    pub turn: u8,
    pub roll1: u8,
    pub roll2: u8,
    pub winner: u8,
    pub player1: Player,
    pub player2: Player,
    applied: Vec<AppliedMove>,
}

impl Game {
    pub fn new() -> Self {
        let mut board = vec![0i8; BOARD_SPACES];
        board[24] = 2;
        board[13] = 5;
        board[8] = 3;
        board[6] = 5;
        board[1] = -2;
        board[12] = -5;
        board[17] = -3;
        board[19] = -5;
        Self {
            board,
            turn: 0,
            roll1: 0,
            roll2: 0,
            winner: 0,
            player1: Player::new(1),
            player2: Player::new(2),
            applied: Vec::new(),
        }
    }

    /// The moves applied so far this turn, in order, absolute coordinates.
    pub fn moves(&self) -> Vec<[i8; 2]> {
        self.applied.iter().map(|a| [a.from, a.to]).collect()
    }

    /// Whether `player` may roll right now. During the opening each player
    /// rolls their own single die; mid-game the turn player rolls both dice
    /// once per turn.
    pub fn roll_allowed(&self, player: u8) -> bool {
        if self.winner != 0 {
            return false;
        }
        if self.turn == 0 {
            match player {
                1 => self.roll1 == 0,
                2 => self.roll2 == 0,
                _ => false,
            }
        } else {
            self.turn == player && self.roll1 == 0 && self.roll2 == 0
        }
    }

    /// Records a roll for `player`. Returns false when rolling is not
    /// permitted; the dice values are otherwise taken as given (the server
    /// owns the randomness).
    pub fn apply_roll(&mut self, player: u8, die1: u8, die2: u8) -> bool {
        if !self.roll_allowed(player) {
            return false;
        }
        if self.turn == 0 {
            if player == 1 {
                self.roll1 = die1;
            } else {
                self.roll2 = die1;
            }
        } else {
            self.roll1 = die1;
            self.roll2 = die2;
        }
        true
    }

    /// Resolves the opening once both players have rolled: the higher die
    /// takes the first turn; a tie clears both dice for a reroll.
    pub fn resolve_opening(&mut self) {
        if self.turn != 0 || self.roll1 == 0 || self.roll2 == 0 {
            return;
        }
        if self.roll1 > self.roll2 {
            self.turn = 1;
        } else if self.roll2 > self.roll1 {
            self.turn = 2;
        } else {
            self.roll1 = 0;
            self.roll2 = 0;
        }
    }

    /// Ends the current turn: flips `turn`, clears the dice and the
    /// per-turn move list. No-op once the game has a winner.
    pub fn next_turn(&mut self) {
        if self.winner != 0 {
            return;
        }
        self.turn = opponent(self.turn.max(1));
        self.roll1 = 0;
        self.roll2 = 0;
        self.applied.clear();
    }

    /// Overwrites the position outright (debug tooling).
    pub fn force_position(&mut self, board: Vec<i8>, turn: u8, roll1: u8, roll2: u8) {
        self.board = board;
        self.turn = turn;
        self.roll1 = roll1;
        self.roll2 = roll2;
        self.applied.clear();
    }

    /// The board as seen from `player`'s perspective: indices flipped and,
    /// for player 2, signs negated so own checkers are always positive.
    pub fn flipped_board(&self, player: u8) -> Vec<i8> {
        if player != 2 {
            return self.board.clone();
        }
        (0..BOARD_SPACES)
            .map(|i| -self.board[flip_space(i as i8, 2) as usize])
            .collect()
    }

    /// Dice not yet consumed by this turn's moves. Doubles grant four.
    fn available_dice(&self) -> Vec<u8> {
        if self.turn == 0 || self.roll1 == 0 || self.roll2 == 0 {
            return Vec::new();
        }
        let mut dice = if self.roll1 == self.roll2 {
            vec![self.roll1; 4]
        } else {
            vec![self.roll1, self.roll2]
        };
        for a in &self.applied {
            if let Some(i) = dice.iter().position(|&d| d == a.die) {
                dice.remove(i);
            }
        }
        dice
    }

    fn checkers(&self, space: i8, player: u8) -> i8 {
        let count = self.board[space as usize] * sign(player);
        count.max(0)
    }

    fn open(&self, space: i8, player: u8) -> bool {
        self.checkers(space, opponent(player)) <= 1
    }

    fn all_home(&self, player: u8) -> bool {
        if self.checkers(bar_space(player), player) > 0 {
            return false;
        }
        let outside = if player == 1 { 7..=24 } else { 1..=18 };
        !outside
            .into_iter()
            .any(|p| self.checkers(p, player) > 0)
    }

    fn pips_to_off(from: i8, player: u8) -> i8 {
        if player == 1 {
            from
        } else {
            25 - from
        }
    }

    /// The only space a checker on `from` can reach with `die`, ignoring
    /// whether the landing is legal. Returns the home space for bear-off
    /// candidates.
    fn dest_for(&self, from: i8, die: u8, player: u8) -> Option<i8> {
        let die = die as i8;
        if from == bar_space(player) {
            return Some(if player == 1 { 25 - die } else { die });
        }
        if !(1..=24).contains(&from) {
            return None;
        }
        let target = if player == 1 { from - die } else { from + die };
        if (1..=24).contains(&target) {
            Some(target)
        } else {
            Some(home_space(player))
        }
    }

    fn hop_legal(&self, from: i8, to: i8, die: u8, player: u8) -> bool {
        if self.checkers(from, player) == 0 {
            return false;
        }
        if from != bar_space(player) && self.checkers(bar_space(player), player) > 0 {
            return false;
        }
        match self.dest_for(from, die, player) {
            Some(dest) if dest == to => {
                if dest == home_space(player) {
                    if !self.all_home(player) {
                        return false;
                    }
                    let pips = Self::pips_to_off(from, player);
                    let die = die as i8;
                    die == pips || (die > pips && !self.checker_beyond(from, player))
                } else {
                    self.open(dest, player)
                }
            }
            _ => false,
        }
    }

    /// Whether `player` has a checker farther from home than `from`, within
    /// the home board. Gates overshooting bear-offs.
    fn checker_beyond(&self, from: i8, player: u8) -> bool {
        let range = if player == 1 {
            (from + 1)..=6
        } else {
            19..=(from - 1)
        };
        range.into_iter().any(|p| self.checkers(p, player) > 0)
    }

    fn apply_hop(&mut self, from: i8, to: i8, die: u8, player: u8) {
        let s = sign(player);
        self.board[from as usize] -= s;
        let mut hit = false;
        if to != home_space(player) && self.checkers(to, opponent(player)) == 1 {
            self.board[to as usize] = 0;
            self.board[bar_space(opponent(player)) as usize] -= s;
            hit = true;
        }
        self.board[to as usize] += s;
        self.applied.push(AppliedMove { from, to, die, hit });
    }

    fn undo_last(&mut self) {
        let Some(last) = self.applied.pop() else {
            return;
        };
        let player = self.turn;
        let s = sign(player);
        self.board[last.to as usize] -= s;
        if last.hit {
            self.board[bar_space(opponent(player)) as usize] += s;
            self.board[last.to as usize] -= s;
        }
        self.board[last.from as usize] += s;
    }

    /// Finds the hop sequence realizing `from -> to` with the available
    /// dice, preferring a single die, otherwise chaining intermediate hops
    /// (combined dice, doubles). Each intermediate landing must itself be
    /// playable. Returns None when no sequence exists.
    fn expand_hops(&self, from: i8, to: i8, player: u8) -> Option<Vec<(i8, i8, u8)>> {
        let mut dice = self.available_dice();
        dice.dedup();
        for &die in &dice {
            if self.hop_legal(from, to, die, player) {
                return Some(vec![(from, to, die)]);
            }
        }
        // No single die works; chain hops through intermediate points.
        for &die in &dice {
            let mid = match self.dest_for(from, die, player) {
                Some(m) if m != home_space(player) && m != to => m,
                _ => continue,
            };
            if !self.hop_legal(from, mid, die, player) {
                continue;
            }
            let mut trial = self.clone();
            trial.apply_hop(from, mid, die, player);
            if let Some(rest) = trial.expand_hops(mid, to, player) {
                let mut hops = vec![(from, mid, die)];
                hops.extend(rest);
                return Some(hops);
            }
        }
        None
    }

    /// Validates and applies a sequence of moves atomically.
    ///
    /// Coordinates are absolute. A pair that exactly reverses the most
    /// recently applied move undoes it, restoring the die and any hit
    /// checker; anything else must be realizable with the remaining dice.
    /// On success returns the expanded move list (implicit hops filled in);
    /// on failure the game is left unchanged.
    pub fn add_moves(&mut self, requested: &[[i8; 2]]) -> (bool, Vec<[i8; 2]>) {
        if self.winner != 0 || self.turn == 0 || requested.is_empty() {
            return (false, Vec::new());
        }
        let player = self.turn;
        let mut trial = self.clone();
        let mut expanded = Vec::new();
        for mv in requested {
            let (from, to) = (mv[0], mv[1]);
            if let Some(last) = trial.applied.last().copied() {
                if last.from == to && last.to == from {
                    trial.undo_last();
                    expanded.push([from, to]);
                    continue;
                }
            }
            match trial.expand_hops(from, to, player) {
                Some(hops) => {
                    for (f, t, die) in hops {
                        trial.apply_hop(f, t, die, player);
                        expanded.push([f, t]);
                    }
                }
                None => return (false, Vec::new()),
            }
        }
        trial.check_winner();
        *self = trial;
        (true, expanded)
    }

    /// Every single-hop move the turn player can play with a remaining die.
    pub fn legal_moves(&self) -> Vec<[i8; 2]> {
        if self.winner != 0 || self.turn == 0 {
            return Vec::new();
        }
        let player = self.turn;
        let mut dice = self.available_dice();
        dice.dedup();
        let mut out: Vec<[i8; 2]> = Vec::new();
        let mut sources: Vec<i8> = vec![bar_space(player)];
        sources.extend(1..=24);
        for from in sources {
            if self.checkers(from, player) == 0 {
                continue;
            }
            for &die in &dice {
                if let Some(to) = self.dest_for(from, die, player) {
                    if self.hop_legal(from, to, die, player) && !out.contains(&[from, to]) {
                        out.push([from, to]);
                    }
                }
            }
        }
        out
    }

    fn check_winner(&mut self) {
        if self.board[SPACE_HOME_PLAYER as usize] == CHECKERS_PER_PLAYER {
            self.winner = 1;
        } else if self.board[SPACE_HOME_OPPONENT as usize] == -CHECKERS_PER_PLAYER {
            self.winner = 2;
        }
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}
