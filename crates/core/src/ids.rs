use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use uuid::Uuid;

use super::error::{BlankIdSnafu, CoreError, CoreResult};

/// Prefix for ids minted on this client, so they never collide with server ids.
pub const LOCAL_ID_PREFIX: &str = "local-";

// Macro keeps all string-backed id wrappers structurally identical.
macro_rules! define_opaque_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn parse(raw: &str) -> CoreResult<Self> {
                let trimmed = raw.trim();
                ensure!(
                    !trimmed.is_empty(),
                    BlankIdSnafu {
                        stage: "parse-opaque-id",
                        id_type: $id_type,
                    }
                );
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(raw: &str) -> CoreResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_opaque_id!(MessageId, "message-id");
define_opaque_id!(SenderId, "sender-id");

impl MessageId {
    /// Mints a client-side id for a local echo.
    pub fn new_local() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", Uuid::now_v7()))
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }
}

/// Length of the server-issued opaque identity token (hex object id).
pub const OPAQUE_SENDER_ID_LEN: usize = 24;

impl SenderId {
    /// True when the id looks like a server-issued identity that needs a lookup.
    ///
    /// Anything else (e.g. a literal username carried in the frame) is displayed as-is.
    pub fn is_opaque(&self) -> bool {
        is_opaque_sender_id(&self.0)
    }
}

pub fn is_opaque_sender_id(raw: &str) -> bool {
    raw.len() == OPAQUE_SENDER_ID_LEN && raw.bytes().all(|byte| byte.is_ascii_hexdigit())
}
