//! Counter-bearing resources, their counter columns, and cached relations.
//!
//! Table and column names used by the persistence layer come exclusively from
//! these enums; unknown tokens are rejected at parse time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

pub type ResourceId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Mod,
    ModVersion,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Mod => "mod",
            ResourceType::ModVersion => "mod_version",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            ResourceType::Mod => "mods",
            ResourceType::ModVersion => "mod_versions",
        }
    }

    pub fn columns(self) -> &'static [CounterColumn] {
        match self {
            ResourceType::Mod => &[CounterColumn::Likes, CounterColumn::TotalDownloads],
            ResourceType::ModVersion => &[CounterColumn::Downloads],
        }
    }

    pub fn owns(self, column: CounterColumn) -> bool {
        self.columns().contains(&column)
    }

    /// Fails when `column` does not live on this resource's table.
    pub fn ensure_owns(self, column: CounterColumn) -> Result<(), DomainError> {
        if self.owns(column) {
            Ok(())
        } else {
            Err(DomainError::ColumnNotOwned {
                resource: self.as_str(),
                column: column.as_str(),
            })
        }
    }
}

impl FromStr for ResourceType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mod" => Ok(ResourceType::Mod),
            "mod_version" => Ok(ResourceType::ModVersion),
            other => Err(DomainError::UnknownResource {
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterColumn {
    Likes,
    Downloads,
    TotalDownloads,
}

impl CounterColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterColumn::Likes => "likes",
            CounterColumn::Downloads => "downloads",
            CounterColumn::TotalDownloads => "total_downloads",
        }
    }
}

impl FromStr for CounterColumn {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "likes" => Ok(CounterColumn::Likes),
            "downloads" => Ok(CounterColumn::Downloads),
            "total_downloads" => Ok(CounterColumn::TotalDownloads),
            other => Err(DomainError::UnknownColumn {
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CounterColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-to-mod relation whose membership is cached as a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Like,
    Favorite,
}

impl Relation {
    pub fn as_str(self) -> &'static str {
        match self {
            Relation::Like => "like",
            Relation::Favorite => "favorite",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Relation::Like => "mod_likes",
            Relation::Favorite => "mod_favorites",
        }
    }

    /// Column on `mods` adjusted in the same transaction as the relation row.
    pub fn counter(self) -> Option<CounterColumn> {
        match self {
            Relation::Like => Some(CounterColumn::Likes),
            Relation::Favorite => None,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
