//! Snowflake identifiers for platform resources.
//!
//! Each resource kind gets its own newtype so a member id can never be
//! passed where a tag id is expected.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw snowflake value.
            #[must_use]
            pub fn get(self) -> u64 {
                self.0
            }

            /// Value as stored in SQLite. Snowflakes fit in 63 bits.
            #[must_use]
            pub(crate) fn sql(self) -> i64 {
                i64::try_from(self.0).unwrap_or(i64::MAX)
            }

            pub(crate) fn from_sql(raw: i64) -> Self {
                Self(u64::try_from(raw).unwrap_or_default())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }
    };
}

snowflake!(
    /// A community (guild).
    CommunityId
);
snowflake!(
    /// A member of a community (user).
    MemberId
);
snowflake!(
    /// A tag (role) inside a community.
    TagId
);
snowflake!(
    /// A text channel.
    ChannelId
);
snowflake!(
    /// A message inside a channel.
    MessageId
);

impl MemberId {
    /// Mention markup for message bodies.
    #[must_use]
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

impl TagId {
    /// Mention markup for message bodies.
    #[must_use]
    pub fn mention(self) -> String {
        format!("<@&{}>", self.0)
    }
}

/// Returns current UTC seconds since epoch.
#[must_use]
pub fn now_epoch_secs() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}

/// Format an epoch-seconds timestamp as `YYYY-MM-DD HH:MM:SS UTC`.
#[must_use]
pub fn format_epoch_utc(secs: i64) -> String {
    match chrono::DateTime::from_timestamp(secs, 0) {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => format!("{secs} (epoch)"),
    }
}
