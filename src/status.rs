//! Parsers for the `info` and `Players` command replies.

use crate::error::Result;
use serde::Serialize;

/// Commands fetched together for one status snapshot.
pub const STATUS_COMMANDS: [&str; 2] = ["info", "Players"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub player_count: u32,
    pub season: String,
    pub weather: String,
    pub game_time: String,
    pub fps: u32,
    pub zombies: u32,
    pub humans: u32,
    pub animals: u32,
    pub player_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerInfo {
    pub name: String,
    pub steam_id: String,
    pub eos_id: String,
}

/// Value following `key=` inside an `AI:` line, e.g. `Zombies=135`.
fn ai_count(line: &str, key: &str) -> u32 {
    line.split_whitespace()
        .find_map(|field| field.strip_prefix(key)?.strip_prefix('='))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

impl ServerInfo {
    /// Parse an `info` reply:
    ///
    /// ```text
    /// Name: [TW] PVE Server #1
    /// 8 connected.
    /// Season: Summer
    /// Weather: Overcast
    /// Time: 5:31
    /// AI: Zombies=135  Human=5 Animal=16
    /// FPS: 60
    /// Players:
    /// konz
    /// ```
    ///
    /// Unknown or malformed lines are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut info = ServerInfo::default();
        let mut in_players = false;

        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if in_players {
                info.player_names.push(line.to_string());
                continue;
            }
            if let Some(name) = line.strip_prefix("Name: ") {
                info.name = name.to_string();
            } else if line == "Players:" {
                in_players = true;
            } else if let Some(season) = line.strip_prefix("Season: ") {
                info.season = season.to_string();
            } else if let Some(weather) = line.strip_prefix("Weather: ") {
                info.weather = weather.to_string();
            } else if let Some(time) = line.strip_prefix("Time: ") {
                info.game_time = time.to_string();
            } else if let Some(fps) = line.strip_prefix("FPS: ") {
                info.fps = fps.parse().unwrap_or(0);
            } else if let Some(count) = line.strip_suffix(" connected.") {
                info.player_count = count.trim().parse().unwrap_or(0);
            } else if line.starts_with("AI:") {
                info.zombies = ai_count(line, "Zombies");
                info.humans = ai_count(line, "Human");
                info.animals = ai_count(line, "Animal");
            }
        }
        info
    }
}

impl PlayerInfo {
    /// Parse one `Name (Steam64ID_+_|EOSID)` line.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let open = line.rfind(" (")?;
        let ids = line[open + 2..].strip_suffix(')')?;
        let (steam_id, eos_id) = ids.split_once("_+_|")?;

        let valid = !steam_id.is_empty()
            && steam_id.bytes().all(|b| b.is_ascii_digit())
            && !eos_id.is_empty()
            && eos_id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !valid || open == 0 {
            return None;
        }

        Some(Self {
            name: line[..open].to_string(),
            steam_id: steam_id.to_string(),
            eos_id: eos_id.to_string(),
        })
    }

    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.lines().filter_map(Self::parse).collect()
    }
}

/// One `info` + `Players` batch, parsed.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub online: bool,
    pub info: Option<ServerInfo>,
    pub players: Vec<PlayerInfo>,
    pub error: Option<String>,
}

impl ServerStatus {
    /// Build from the results of `fetch_all(&STATUS_COMMANDS)`.
    pub fn from_results(results: Vec<Result<String>>) -> Self {
        let mut results = results.into_iter();
        let info = results.next();
        let players = results.next();

        match (info, players) {
            (Some(Ok(info)), Some(Ok(players))) => Self {
                online: true,
                info: Some(ServerInfo::parse(&info)),
                players: PlayerInfo::parse_list(&players),
                error: None,
            },
            (info, players) => {
                let error = [info, players]
                    .into_iter()
                    .flatten()
                    .find_map(|r| r.err())
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "incomplete status batch".to_string());
                Self {
                    online: false,
                    info: None,
                    players: Vec::new(),
                    error: Some(error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RconError;

    const INFO: &str = "Name: [TW] PVE Minidoracat HumanitZ Server #1\r\n\
        8 connected.\r\n\
        Season: Summer\r\n\
        Weather: Overcast\r\n\
        Time: 5:31\r\n\
        AI: Zombies=135  Human=5 Animal=16\r\n\
        FPS: 60\r\n\
        Players:\r\n\
        konz\r\n\
        kevin052926\r\n";

    #[test]
    fn parse_info() {
        let info = ServerInfo::parse(INFO);
        assert_eq!(info.name, "[TW] PVE Minidoracat HumanitZ Server #1");
        assert_eq!(info.player_count, 8);
        assert_eq!(info.season, "Summer");
        assert_eq!(info.weather, "Overcast");
        assert_eq!(info.game_time, "5:31");
        assert_eq!((info.zombies, info.humans, info.animals), (135, 5, 16));
        assert_eq!(info.fps, 60);
        assert_eq!(info.player_names, vec!["konz", "kevin052926"]);
    }

    #[test]
    fn parse_info_tolerates_garbage() {
        let info = ServerInfo::parse("FPS: fast\nAI: Zombies=x\nwhat\n");
        assert_eq!(info.fps, 0);
        assert_eq!(info.zombies, 0);
        assert!(info.name.is_empty());
    }

    #[test]
    fn parse_players() {
        let raw = "konz (76561198000000001_+_|0002abcdef)\r\n\
                   Mr (Big) Boss (76561198000000002_+_|00ff)\r\n\
                   broken line\r\n\
                   bad (123_+_|XYZ)\r\n";
        let players = PlayerInfo::parse_list(raw);
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "konz");
        assert_eq!(players[0].steam_id, "76561198000000001");
        assert_eq!(players[0].eos_id, "0002abcdef");
        assert_eq!(players[1].name, "Mr (Big) Boss");
    }

    #[test]
    fn status_from_results() {
        let status = ServerStatus::from_results(vec![
            Ok(INFO.to_string()),
            Ok("konz (1_+_|a)".to_string()),
        ]);
        assert!(status.online);
        assert_eq!(status.info.unwrap().player_count, 8);
        assert_eq!(status.players.len(), 1);
        assert!(status.error.is_none());
    }

    #[test]
    fn status_offline_on_error() {
        let status = ServerStatus::from_results(vec![
            Ok(INFO.to_string()),
            Err(RconError::lost("closed")),
        ]);
        assert!(!status.online);
        assert!(status.info.is_none());
        assert!(status.error.unwrap().contains("closed"));

        let empty = ServerStatus::from_results(Vec::new());
        assert!(!empty.online);
        assert_eq!(empty.error.as_deref(), Some("incomplete status batch"));
    }
}
