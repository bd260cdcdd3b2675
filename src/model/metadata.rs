use super::parameter::ToolParameter;
use serde::{Deserialize, Serialize};

/// Closed set of capabilities a tool may require. Represented as a bitset
/// (`CapabilitySet`) rather than a `Vec<Capability>` so "must-have-all"
/// queries (spec.md 4.5 `query`) are a single AND instead of a set walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    FileSystem,
    Network,
    ProcessExecution,
    Environment,
    Elevated,
    Destructive,
    LongRunning,
    Interactive,
}

impl Capability {
    const ALL: [Capability; 8] = [
        Capability::FileSystem,
        Capability::Network,
        Capability::ProcessExecution,
        Capability::Environment,
        Capability::Elevated,
        Capability::Destructive,
        Capability::LongRunning,
        Capability::Interactive,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Bitset over [`Capability`]. Cheap to copy, cheap to intersect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_iter(caps: impl IntoIterator<Item = Capability>) -> Self {
        let mut set = Self::empty();
        for c in caps {
            set.insert(c);
        }
        set
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// True if `self` contains every capability in `other` (must-have-all).
    pub fn contains_all(&self, other: &CapabilitySet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.iter().copied().filter(move |c| self.contains(*c))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Closed, fixed category set (spec.md 3: "enum, fixed closed set").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    FileSystem,
    Network,
    System,
    Data,
    Communication,
    Development,
    Utility,
    Other,
}

/// Immutable-after-registration tool identity and contract surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Dotted numeric version string, e.g. "1.2.0".
    pub version: String,
    pub category: ToolCategory,
    pub required_capabilities: CapabilitySet,
    pub parameters: Vec<ToolParameter>,
    pub examples: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub experimental: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ToolMetadata {
    /// `true` if `id` is non-empty, printable, `[A-Za-z0-9_-]`, and at most 100 chars.
    /// Mirrors validator.rs's `METADATA_ID_INVALID` rule -- kept here too so
    /// constructors can fail fast before a registration ever reaches the registry.
    pub fn id_is_well_formed(id: &str) -> bool {
        !id.is_empty()
            && id.len() <= 100
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    /// `true` if `version` looks like a dotted numeric version ("1.2.0").
    pub fn version_is_well_formed(version: &str) -> bool {
        !version.is_empty()
            && version
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
    }
}
