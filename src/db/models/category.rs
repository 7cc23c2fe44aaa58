use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed palette a category color is drawn from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CategoryColor {
    Red,
    Orange,
    Yellow,
    Green,
    Mint,
    Teal,
    Blue,
    Indigo,
    Purple,
    Pink,
    Brown,
    Gray,
}

impl CategoryColor {
    pub const ALL: [CategoryColor; 12] = [
        CategoryColor::Red,
        CategoryColor::Orange,
        CategoryColor::Yellow,
        CategoryColor::Green,
        CategoryColor::Mint,
        CategoryColor::Teal,
        CategoryColor::Blue,
        CategoryColor::Indigo,
        CategoryColor::Purple,
        CategoryColor::Pink,
        CategoryColor::Brown,
        CategoryColor::Gray,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryColor::Red => "red",
            CategoryColor::Orange => "orange",
            CategoryColor::Yellow => "yellow",
            CategoryColor::Green => "green",
            CategoryColor::Mint => "mint",
            CategoryColor::Teal => "teal",
            CategoryColor::Blue => "blue",
            CategoryColor::Indigo => "indigo",
            CategoryColor::Purple => "purple",
            CategoryColor::Pink => "pink",
            CategoryColor::Brown => "brown",
            CategoryColor::Gray => "gray",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|color| color.as_str() == value)
    }
}

impl Default for CategoryColor {
    fn default() -> Self {
        CategoryColor::Blue
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub color: CategoryColor,
    /// Completions wanted per week; 0 means no target.
    pub weekly_target: u32,
    pub created_at: DateTime<Utc>,
}

impl Category {
    /// String form handed to the assistant front end.
    pub fn resolvable_id(&self) -> String {
        resolvable_category_id(self.id)
    }
}

pub fn resolvable_category_id(id: i64) -> String {
    format!("category-{id}")
}

/// Accepts only the exact form produced by [`resolvable_category_id`] for a
/// stored row id, which SQLite hands out from 1 upwards.
pub fn parse_resolvable_category_id(value: &str) -> Option<i64> {
    let id: i64 = value.strip_prefix("category-")?.parse().ok()?;
    (id > 0 && resolvable_category_id(id) == value).then_some(id)
}
