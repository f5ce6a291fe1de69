use serde::Serialize;
use strum_macros::{Display, EnumString};

/// What to do with data already stored at a table or ticker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Existence {
    #[default]
    Replace,
    Append,
}

/// Effective write behaviour derived from the (table, ticker) existence pair.
///
/// A table replace dominates whatever the ticker policy says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    ReplaceTable,
    ReplaceTicker,
    Append,
}

impl WritePolicy {
    pub const fn from_existence(table: Existence, ticker: Existence) -> Self {
        match (table, ticker) {
            (Existence::Replace, _) => WritePolicy::ReplaceTable,
            (Existence::Append, Existence::Replace) => WritePolicy::ReplaceTicker,
            (Existence::Append, Existence::Append) => WritePolicy::Append,
        }
    }

    pub const fn is_append(self) -> bool {
        matches!(self, WritePolicy::Append)
    }
}

impl Default for WritePolicy {
    fn default() -> Self {
        WritePolicy::from_existence(Existence::default(), Existence::default())
    }
}
