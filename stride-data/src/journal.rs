//! Daily journal entries.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;
use stride_core::{
    FetchError, JournalEntry, StrideError, StrideResult, UserId, ValidationError, WriteOptions,
    YearMonth,
};
use stride_storage::{keys, CacheOptions};

use crate::access::{encode_doc, paths, read_optional, DataAccess};

const DATE_FIELD: &str = "date";

pub fn journal_options(user_id: &UserId) -> CacheOptions {
    CacheOptions::new()
        .with_ttl(Duration::from_secs(5 * 60))
        .with_tag(keys::tags::journal(user_id))
}

impl DataAccess {
    /// The entry for `date`, if one was written.
    pub async fn journal_entry(
        &self,
        user_id: &UserId,
        date: NaiveDate,
    ) -> StrideResult<Option<JournalEntry>> {
        let remote = Arc::clone(&self.remote);
        let path = paths::journal(user_id, date);
        self.engine
            .get_or_fetch(
                &keys::journal(user_id, date),
                move || async move { read_optional::<JournalEntry>(&*remote, &path).await },
                journal_options(user_id),
            )
            .await
    }

    /// Write an entry and drop the cached date list for its month.
    pub async fn save_journal_entry(
        &self,
        user_id: &UserId,
        entry: &JournalEntry,
    ) -> StrideResult<()> {
        if let Some(mood) = entry.mood {
            if !(1..=5).contains(&mood) {
                return Err(ValidationError::InvalidFieldValue {
                    field: "mood".to_string(),
                    value: mood.to_string(),
                    reason: "mood must be between 1 and 5".to_string(),
                }
                .into());
            }
        }

        let path = paths::journal(user_id, entry.date);
        self.remote
            .write_doc(&path, encode_doc(&path, entry)?, WriteOptions::merge())
            .await?;

        self.engine.set(
            &keys::journal(user_id, entry.date),
            &Some(entry),
            &journal_options(user_id),
        );
        self.engine
            .invalidate(keys::journal_dates(user_id, YearMonth::of(entry.date)).as_str())?;
        Ok(())
    }

    /// Days in `month` that have a journal entry.
    pub async fn journal_dates(
        &self,
        user_id: &UserId,
        month: YearMonth,
    ) -> StrideResult<BTreeSet<NaiveDate>> {
        let (Some(first), Some(last)) = (month.first_day(), month.last_day()) else {
            return Err(ValidationError::InvalidFieldValue {
                field: "month".to_string(),
                value: month.to_string(),
                reason: "month has no calendar days".to_string(),
            }
            .into());
        };

        let remote = Arc::clone(&self.remote);
        let collection = paths::journal_collection(user_id);
        self.engine
            .get_or_fetch(
                &keys::journal_dates(user_id, month),
                move || async move {
                    let lower = first.format("%Y-%m-%d").to_string();
                    let upper = last.format("%Y-%m-%d").to_string();
                    let docs = remote
                        .query_range(&collection, DATE_FIELD, &lower, &upper)
                        .await?;

                    docs.iter()
                        .map(|doc| parse_date_field(&collection, doc.get(DATE_FIELD)))
                        .collect::<StrideResult<BTreeSet<NaiveDate>>>()
                },
                journal_options(user_id),
            )
            .await
    }
}

fn parse_date_field(collection: &str, value: Option<&Value>) -> StrideResult<NaiveDate> {
    let raw = value.and_then(Value::as_str).unwrap_or_default();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        StrideError::Fetch(FetchError::Decode {
            path: collection.to_string(),
            reason: format!("bad {} field {:?}: {}", DATE_FIELD, raw, e),
        })
    })
}
