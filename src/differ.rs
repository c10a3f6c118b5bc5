//! Turns repeated `fetchchat` snapshots into new, classified chat events.
//!
//! The server returns its whole recent chat window on every poll. Lines we
//! have already emitted are remembered in a bounded FIFO; anything not in it
//! is new. Once a line falls out of the memory it counts as new again if the
//! server re-sends it, so the bound must exceed the server's chat window.

use regex_lite::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::OnceLock;

/// Command whose reply is the chat snapshot.
pub const CHAT_COMMAND: &str = "fetchchat";

pub const DEFAULT_MEMORY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    PlayerMessage,
    AdminMessage,
    Connect,
    Disconnect,
    Kill,
    Other,
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatKind::PlayerMessage => "player_message",
            ChatKind::AdminMessage => "admin_message",
            ChatKind::Connect => "connect",
            ChatKind::Disconnect => "disconnect",
            ChatKind::Kill => "kill",
            ChatKind::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEvent {
    pub kind: ChatKind,
    pub actor: String,
    pub payload: String,
    pub raw_line: String,
}

impl ChatEvent {
    /// An admin broadcast whose text starts with `tag`, i.e. something a
    /// relay sent into the game and now sees coming back.
    pub fn is_relay_echo(&self, tag: &str) -> bool {
        self.kind == ChatKind::AdminMessage && !tag.is_empty() && self.payload.starts_with(tag)
    }
}

/// (kind, pattern). Patterns capture `actor` and/or `payload` by name.
/// Order matters: the admin-player form must be tried before plain chat.
const RULES: &[(ChatKind, &str)] = &[
    (
        ChatKind::PlayerMessage,
        r"^<SP>\[Admin\]</><PN>(?P<actor>.+?):</>(?P<payload>.+)$",
    ),
    (
        ChatKind::PlayerMessage,
        r"^<PN>(?P<actor>.+?):</>(?P<payload>.+)$",
    ),
    (
        ChatKind::PlayerMessage,
        r"^\[CHAT\] (?P<actor>[^:]+?): (?P<payload>.+)$",
    ),
    (ChatKind::Connect, r"^Player Joined \(<PN>(?P<actor>.+?)</>\)$"),
    (ChatKind::Disconnect, r"^Player Left \(<PN>(?P<actor>.+?)</>\)$"),
    (ChatKind::Kill, r"^Player died \(<PN>(?P<actor>.+?)</>\)$"),
    (ChatKind::AdminMessage, r"^<SP>Admin: (?P<payload>.+)</>$"),
    (ChatKind::AdminMessage, r"^\[ADMIN\] (?P<payload>.+)$"),
];

fn rules() -> &'static [(ChatKind, Regex)] {
    static COMPILED: OnceLock<Vec<(ChatKind, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|(kind, pattern)| match Regex::new(pattern) {
                Ok(re) => Some((*kind, re)),
                Err(e) => {
                    log::error!("Bad chat rule {:?}: {}", pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// Classify one trimmed chat line. Never fails; unknown shapes are `Other`.
pub fn classify(line: &str) -> ChatEvent {
    for (kind, re) in rules() {
        if let Some(caps) = re.captures(line) {
            let group = |name| {
                caps.name(name)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            };
            return ChatEvent {
                kind: *kind,
                actor: group("actor"),
                payload: group("payload"),
                raw_line: line.to_string(),
            };
        }
    }
    ChatEvent {
        kind: ChatKind::Other,
        actor: String::new(),
        payload: String::new(),
        raw_line: line.to_string(),
    }
}

/// Non-empty, trimmed lines of a snapshot, any line ending.
fn split_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

pub struct ChatDiffer {
    capacity: usize,
    /// Emitted lines, oldest first.
    order: VecDeque<String>,
    /// Occurrences of each line currently in `order`.
    counts: HashMap<String, usize>,
    suppress_next: bool,
}

impl ChatDiffer {
    /// Remember up to `capacity` lines. Feeding the same snapshot twice
    /// yields nothing the second time only while the snapshot holds at most
    /// `capacity` lines; beyond that its oldest lines are already forgotten.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            counts: HashMap::new(),
            suppress_next: false,
        }
    }

    /// The next `update` only records what it sees. Used when starting to
    /// watch a server whose chat history should not be replayed.
    pub fn suppress_history(mut self) -> Self {
        self.suppress_next = true;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines currently remembered.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn remember(&mut self, line: &str) {
        self.order.push_back(line.to_string());
        *self.counts.entry(line.to_string()).or_insert(0) += 1;

        while self.order.len() > self.capacity {
            let Some(old) = self.order.pop_front() else {
                break;
            };
            if let Some(count) = self.counts.get_mut(&old) {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(&old);
                }
            }
        }
    }

    /// New events in `raw_snapshot`, oldest first.
    ///
    /// A line repeated k times in the snapshot is new only for the
    /// occurrences beyond what the memory already holds, so two identical
    /// messages sent in a row are two events.
    pub fn update(&mut self, raw_snapshot: &str) -> Vec<ChatEvent> {
        let mut seen_in_snapshot: HashMap<&str, usize> = HashMap::new();
        let mut fresh = Vec::new();

        for line in split_lines(raw_snapshot) {
            let nth = seen_in_snapshot.entry(line).or_insert(0);
            *nth += 1;
            if *nth > self.counts.get(line).copied().unwrap_or(0) {
                fresh.push(line);
            }
        }

        for line in &fresh {
            self.remember(line);
        }

        if self.suppress_next {
            self.suppress_next = false;
            log::debug!("Primed chat memory with {} lines", fresh.len());
            return Vec::new();
        }

        let events: Vec<ChatEvent> = fresh.into_iter().map(classify).collect();
        if !events.is_empty() {
            log::debug!("{} new chat events", events.len());
        }
        events
    }

    /// Forget everything; the next snapshot is treated as all new.
    pub fn reset(&mut self) {
        self.order.clear();
        self.counts.clear();
    }
}

impl Default for ChatDiffer {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY)
    }
}
