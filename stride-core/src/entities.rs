//! Domain records stored in the remote document store.
//!
//! Pure data types. Reads and writes live in stride-data.

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::identity::{ItemId, Timestamp};

/// Planning horizon for todos and goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Period {
    pub const ALL: [Period; 4] = [Self::Daily, Self::Weekly, Self::Monthly, Self::Yearly];

    /// Key and path segment for this period.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Parse from the key segment representation.
    pub fn from_str_segment(s: &str) -> Result<Self, PeriodParseError> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(PeriodParseError(s.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing Period from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodParseError(pub String);

impl fmt::Display for PeriodParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid period: {}", self.0)
    }
}

impl std::error::Error for PeriodParseError {}

/// A calendar month, used to bucket habits and journal lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1).and_then(|d| d.pred_opt())
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// User profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub email: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: ItemId,
    pub title: String,
    pub period: Period,
    pub target_date: Option<NaiveDate>,
    pub completed: bool,
    /// Position in the user's drag-and-drop ordering.
    pub order: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalList {
    pub items: Vec<Goal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: ItemId,
    pub name: String,
    /// Days of the month (1-based) on which the habit was done.
    pub completed_days: BTreeSet<u32>,
}

/// All habits tracked for one month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HabitMonth {
    pub habits: Vec<Habit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: ItemId,
    pub text: String,
    pub done: bool,
    pub order: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoList {
    pub items: Vec<TodoItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub content: String,
    /// Self-reported mood, 1 to 5.
    pub mood: Option<u8>,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: ItemId,
    pub name: String,
    pub level: u8,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillSet {
    pub items: Vec<Skill>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_round_trip() {
        for period in Period::ALL {
            assert_eq!(Period::from_str_segment(period.as_str()), Ok(period));
        }
        assert!(Period::from_str_segment("hourly").is_err());
    }

    #[test]
    fn test_year_month_bounds() {
        let feb = YearMonth::new(2024, 2).expect("valid month");
        assert_eq!(feb.to_string(), "2024-02");
        assert_eq!(feb.first_day(), NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(feb.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29));

        let dec = YearMonth::new(2026, 12).expect("valid month");
        assert_eq!(dec.last_day(), NaiveDate::from_ymd_opt(2026, 12, 31));

        assert!(YearMonth::new(2026, 13).is_none());
    }

    #[test]
    fn test_year_month_of_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).expect("valid date");
        assert_eq!(YearMonth::of(date), YearMonth { year: 2026, month: 10 });
    }

    #[test]
    fn test_period_serializes_lowercase() {
        let json = serde_json::to_string(&Period::Weekly).expect("serialize");
        assert_eq!(json, "\"weekly\"");
    }
}
