use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::UnknownValue;

/// A service field that can be locked against discovery overwrites.
///
/// `id`, `service_name`, `status`, `source` and the timestamps are owned by the
/// registry or the scanner and are deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockableField {
    DisplayName,
    Description,
    Host,
    Port,
    Protocol,
    Path,
    Url,
    Group,
    Tags,
    Icon,
    Hidden,
    Favorite,
}

/// Locked fields of one record, kept sorted so stored values are stable.
pub type LockSet = BTreeSet<LockableField>;

impl LockableField {
    pub const ALL: [LockableField; 12] = [
        LockableField::DisplayName,
        LockableField::Description,
        LockableField::Host,
        LockableField::Port,
        LockableField::Protocol,
        LockableField::Path,
        LockableField::Url,
        LockableField::Group,
        LockableField::Tags,
        LockableField::Icon,
        LockableField::Hidden,
        LockableField::Favorite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockableField::DisplayName => "display_name",
            LockableField::Description => "description",
            LockableField::Host => "host",
            LockableField::Port => "port",
            LockableField::Protocol => "protocol",
            LockableField::Path => "path",
            LockableField::Url => "url",
            LockableField::Group => "group",
            LockableField::Tags => "tags",
            LockableField::Icon => "icon",
            LockableField::Hidden => "hidden",
            LockableField::Favorite => "favorite",
        }
    }

    /// Every lockable field, used as the default lock set of manually created entries.
    pub fn all() -> LockSet {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for LockableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockableField {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == value)
            .ok_or_else(|| UnknownValue::new("field", value))
    }
}

/// Parse user-supplied field names. Blank names are skipped, duplicates collapse.
pub fn parse_lock_set<I, S>(names: I) -> Result<LockSet, UnknownValue>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter(|name| !name.as_ref().trim().is_empty())
        .map(|name| name.as_ref().trim().parse())
        .collect()
}
