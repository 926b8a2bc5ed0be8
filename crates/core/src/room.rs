use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical token for the default lobby room.
pub const DEFAULT_ROOM: &str = "general";

/// Normalized, lowercase room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Normalizes any call-site spelling into the canonical token.
    pub fn normalize(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        // Any casing of "General" and a blank name both mean the lobby.
        if lowered.is_empty() || lowered == DEFAULT_ROOM {
            return Self::default_room();
        }

        Self(lowered)
    }

    pub fn default_room() -> Self {
        Self(DEFAULT_ROOM.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self::normalize(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_spellings_collapse_to_canonical_room() {
        for raw in ["General", "GENERAL", " general ", ""] {
            assert_eq!(RoomId::normalize(raw), RoomId::default_room(), "input {raw:?}");
        }
    }

    #[test]
    fn other_rooms_are_lowercased() {
        let room = RoomId::normalize("  Tech-Room ");
        assert_eq!(room.as_str(), "tech-room");
        assert_eq!(RoomId::normalize("Lobby").as_str(), "lobby");
        assert_eq!(RoomId::normalize("default").as_str(), "default");
    }
}
