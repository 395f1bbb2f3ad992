//! Cache key builder.
//!
//! Every cache key has the shape `<kind>:<userId>:<subkey...>`. The only way
//! to obtain a [`CacheKey`] is through the builder functions in this module,
//! each of which requires a [`UserId`], so every key literally embeds the
//! identifier of the user it belongs to. A full-user purge is therefore a
//! segment match against the key.

use std::fmt;

use chrono::NaiveDate;
use stride_core::{Period, UserId, YearMonth};

/// Separator between key segments.
pub const SEPARATOR: char = ':';

/// The kind of data a key refers to. Always the first key segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    Goals,
    Habits,
    Todo,
    Journal,
    JournalDates,
    Skills,
    Profile,
    Auth,
}

impl DataKind {
    pub const ALL: [DataKind; 8] = [
        Self::Goals,
        Self::Habits,
        Self::Todo,
        Self::Journal,
        Self::JournalDates,
        Self::Skills,
        Self::Profile,
        Self::Auth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Goals => "goals",
            Self::Habits => "habits",
            Self::Todo => "todo",
            Self::Journal => "journal",
            Self::JournalDates => "journal-dates",
            Self::Skills => "skills",
            Self::Profile => "profile",
            Self::Auth => "auth",
        }
    }

    pub fn from_segment(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Whether keys of this kind carry a user id in their second segment.
    pub fn is_user_scoped(&self) -> bool {
        true
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical, user-scoped cache key.
///
/// Opaque to callers; construct it with the builder functions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Private - cannot be constructed externally
    raw: String,
}

impl CacheKey {
    fn build(kind: DataKind, user_id: &UserId, subkeys: &[&str]) -> Self {
        let mut raw = String::with_capacity(32);
        raw.push_str(kind.as_str());
        raw.push(SEPARATOR);
        raw.push_str(user_id.as_str());
        for sub in subkeys {
            raw.push(SEPARATOR);
            raw.push_str(sub);
        }
        Self { raw }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The kind segment.
    pub fn kind(&self) -> Option<DataKind> {
        self.raw.split(SEPARATOR).next().and_then(DataKind::from_segment)
    }

    /// The user id embedded in this key.
    pub fn owner(&self) -> Option<&str> {
        owner_of(&self.raw)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

// ============================================================================
// KEY BUILDERS
// ============================================================================

pub fn goals(user_id: &UserId) -> CacheKey {
    CacheKey::build(DataKind::Goals, user_id, &[])
}

pub fn habits_month(user_id: &UserId, month: YearMonth) -> CacheKey {
    CacheKey::build(DataKind::Habits, user_id, &[&month.to_string()])
}

pub fn todos(user_id: &UserId, period: Period, date: NaiveDate) -> CacheKey {
    CacheKey::build(
        DataKind::Todo,
        user_id,
        &[period.as_str(), &date.format("%Y-%m-%d").to_string()],
    )
}

pub fn journal(user_id: &UserId, date: NaiveDate) -> CacheKey {
    CacheKey::build(
        DataKind::Journal,
        user_id,
        &[&date.format("%Y-%m-%d").to_string()],
    )
}

pub fn journal_dates(user_id: &UserId, month: YearMonth) -> CacheKey {
    CacheKey::build(DataKind::JournalDates, user_id, &[&month.to_string()])
}

pub fn skills(user_id: &UserId) -> CacheKey {
    CacheKey::build(DataKind::Skills, user_id, &[])
}

pub fn profile(user_id: &UserId) -> CacheKey {
    CacheKey::build(DataKind::Profile, user_id, &[])
}

/// Auth-adjacent session data cached for a user.
pub fn auth(user_id: &UserId) -> CacheKey {
    CacheKey::build(DataKind::Auth, user_id, &["session"])
}

/// Invalidation tags.
pub mod tags {
    use stride_core::{Period, UserId};

    /// Carried by every auth-adjacent entry.
    pub const AUTH: &str = "auth";

    pub fn todo(user_id: &UserId) -> String {
        format!("todo:{}", user_id)
    }

    pub fn habits(user_id: &UserId) -> String {
        format!("habits:{}", user_id)
    }

    pub fn journal(user_id: &UserId) -> String {
        format!("journal:{}", user_id)
    }

    pub fn period(period: Period) -> String {
        format!("period:{}", period.as_str())
    }
}

// ============================================================================
// MATCHING
// ============================================================================

/// The user id embedded in a raw key, if it is a well-formed user-scoped key.
pub fn owner_of(raw: &str) -> Option<&str> {
    let mut segments = raw.split(SEPARATOR);
    let kind = DataKind::from_segment(segments.next()?)?;
    if !kind.is_user_scoped() {
        return None;
    }
    segments.next().filter(|uid| !uid.is_empty())
}

/// Whether `raw` equals `prefix` or continues it with further segments.
pub fn has_segment_prefix(raw: &str, prefix: &str) -> bool {
    !prefix.is_empty()
        && raw.starts_with(prefix)
        && (raw.len() == prefix.len() || raw[prefix.len()..].starts_with(SEPARATOR))
}

/// Whether the segments of `needle` appear contiguously among the segments of
/// `raw`. `"uid-1"` matches `"todo:uid-1:daily"` but not `"todo:uid-10:daily"`.
pub fn segments_contain(raw: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let hay: Vec<&str> = raw.split(SEPARATOR).collect();
    let pat: Vec<&str> = needle.split(SEPARATOR).collect();
    pat.len() <= hay.len() && hay.windows(pat.len()).any(|w| w == pat.as_slice())
}

/// Whether a raw key is owned by the given user.
///
/// Only the owner segment counts; an id equal to some other segment
/// (`daily`, `session`) does not claim keys belonging to other users.
pub fn owned_by(raw: &str, user_id: &UserId) -> bool {
    owner_of(raw) == Some(user_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uid(s: &str) -> UserId {
        UserId::new(s).expect("valid user id")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_key_shapes() {
        let u = uid("uid-1");
        let month = YearMonth::new(2026, 10).expect("valid month");

        assert_eq!(goals(&u).as_str(), "goals:uid-1");
        assert_eq!(habits_month(&u, month).as_str(), "habits:uid-1:2026-10");
        assert_eq!(
            todos(&u, Period::Daily, date(2026, 10, 15)).as_str(),
            "todo:uid-1:daily:2026-10-15"
        );
        assert_eq!(journal(&u, date(2026, 1, 2)).as_str(), "journal:uid-1:2026-01-02");
        assert_eq!(journal_dates(&u, month).as_str(), "journal-dates:uid-1:2026-10");
        assert_eq!(skills(&u).as_str(), "skills:uid-1");
        assert_eq!(profile(&u).as_str(), "profile:uid-1");
        assert_eq!(auth(&u).as_str(), "auth:uid-1:session");
    }

    #[test]
    fn test_key_kind_and_owner() {
        let key = todos(&uid("abc"), Period::Weekly, date(2026, 10, 12));
        assert_eq!(key.kind(), Some(DataKind::Todo));
        assert_eq!(key.owner(), Some("abc"));
    }

    #[test]
    fn test_owner_of_rejects_foreign_keys() {
        assert_eq!(owner_of("goals:u1"), Some("u1"));
        assert_eq!(owner_of("unknown:u1"), None);
        assert_eq!(owner_of("goals"), None);
        assert_eq!(owner_of("goals:"), None);
    }

    #[test]
    fn test_tags() {
        let u = uid("u1");
        assert_eq!(tags::todo(&u), "todo:u1");
        assert_eq!(tags::habits(&u), "habits:u1");
        assert_eq!(tags::journal(&u), "journal:u1");
        assert_eq!(tags::period(Period::Daily), "period:daily");
    }

    #[test]
    fn test_segment_prefix() {
        assert!(has_segment_prefix("todo:u1:daily:2026-10-15", "todo:u1"));
        assert!(has_segment_prefix("todo:u1", "todo:u1"));
        assert!(!has_segment_prefix("todo:u10:daily", "todo:u1"));
        assert!(!has_segment_prefix("todo:u1", ""));
    }

    #[test]
    fn test_segments_contain_is_segment_aligned() {
        assert!(segments_contain("todo:uid-1:daily:2026-10-15", "uid-1"));
        assert!(segments_contain("todo:uid-1:daily:2026-10-15", "uid-1:daily"));
        assert!(!segments_contain("todo:uid-10:daily:2026-10-15", "uid-1"));
        assert!(!segments_contain("todo:uid-1", ""));
    }

    #[test]
    fn test_owned_by_ignores_non_owner_segments() {
        let other = uid("uid-2");
        let todo = todos(&other, Period::Daily, date(2026, 10, 15));
        let session = auth(&other);

        assert!(owned_by(todo.as_str(), &other));
        assert!(!owned_by(todo.as_str(), &uid("daily")));
        assert!(!owned_by(todo.as_str(), &uid("todo")));
        assert!(!owned_by(session.as_str(), &uid("session")));
        assert!(!owned_by("unknown:uid-2", &other));
    }

    fn arb_uid() -> impl Strategy<Value = UserId> {
        "[A-Za-z0-9_-]{1,28}".prop_map(|s| UserId::new(s).expect("generated ids are valid"))
    }

    proptest! {
        #[test]
        fn prop_every_key_embeds_its_owner(u in arb_uid(), day in 1u32..=28, month in 1u32..=12) {
            let d = date(2026, month, day);
            let ym = YearMonth::of(d);
            let built = [
                goals(&u),
                habits_month(&u, ym),
                todos(&u, Period::Daily, d),
                journal(&u, d),
                journal_dates(&u, ym),
                skills(&u),
                profile(&u),
                auth(&u),
            ];
            for key in built {
                prop_assert_eq!(key.owner(), Some(u.as_str()));
                prop_assert!(owned_by(key.as_str(), &u));
            }
        }

        #[test]
        fn prop_distinct_users_never_match(a in arb_uid(), b in arb_uid()) {
            prop_assume!(a != b);
            let d = date(2026, 10, 15);
            for key in [goals(&a), todos(&a, Period::Daily, d), auth(&a)] {
                prop_assert!(!owned_by(key.as_str(), &b));
            }
        }
    }
}
