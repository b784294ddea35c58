pub mod clock;
pub mod mutation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use mutation::{Mutation, MutationError, TagGroupsMutation};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Tag groups keyed by group name.
pub type TagGroups = BTreeMap<String, BTreeSet<String>>;

/// The kind of remote profile a tag group mutation targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum AudienceKind {
    Channel,
    NamedUser,
}

impl AudienceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudienceKind::Channel => "channel",
            AudienceKind::NamedUser => "named-user",
        }
    }
}

impl fmt::Display for AudienceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudienceKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "channel" => Ok(AudienceKind::Channel),
            "named-user" | "named_user" | "nameduser" => Ok(AudienceKind::NamedUser),
            other => Err(format!("Unknown audience: {other}")),
        }
    }
}
