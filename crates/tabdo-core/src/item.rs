use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the two tabs an item can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "bool", into = "bool")]
pub enum Category {
    #[default]
    Work,
    Travel,
}

impl Category {
    pub fn is_working(self) -> bool {
        matches!(self, Category::Work)
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Work => "Work",
            Category::Travel => "Travel",
        }
    }

    pub fn placeholder(self) -> &'static str {
        match self {
            Category::Work => "Add a To Do",
            Category::Travel => "Where do you want to go?",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Category::Work => Category::Travel,
            Category::Travel => Category::Work,
        }
    }
}

impl From<bool> for Category {
    fn from(working: bool) -> Self {
        if working {
            Category::Work
        } else {
            Category::Travel
        }
    }
}

impl From<Category> for bool {
    fn from(category: Category) -> Self {
        category.is_working()
    }
}

/// Creation time in milliseconds since the Unix epoch.
///
/// Serialized as a decimal string when used as a JSON object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(i64);

impl ItemKey {
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub fn from_time(now: DateTime<Utc>) -> Self {
        Self(now.timestamp_millis())
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|err| anyhow!("invalid item key {s:?}: {err}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub text: String,

    pub working: bool,

    #[serde(default)]
    pub check: bool,

    #[serde(default)]
    pub edit_mode: bool,
}

impl Item {
    pub fn new(text: String, category: Category) -> Self {
        Self {
            text,
            working: category.is_working(),
            check: false,
            edit_mode: false,
        }
    }

    pub fn category(&self) -> Category {
        Category::from(self.working)
    }
}
