//! Monthly habit tracker.

use std::sync::Arc;
use std::time::Duration;

use stride_core::{
    HabitMonth, ItemId, StrideResult, Subscription, UserId, ValidationError, WriteOptions,
    YearMonth,
};
use stride_storage::{keys, CacheOptions};

use crate::access::{decode_doc, encode_doc, paths, read_or_default, DataAccess};

pub fn habits_options(user_id: &UserId) -> CacheOptions {
    CacheOptions::new()
        .with_ttl(Duration::from_secs(5 * 60))
        .persisted()
        .stale_while_revalidate()
        .with_tag(keys::tags::habits(user_id))
}

impl DataAccess {
    pub async fn habits_month(&self, user_id: &UserId, month: YearMonth) -> StrideResult<HabitMonth> {
        let remote = Arc::clone(&self.remote);
        let path = paths::habits(user_id, month);
        self.engine
            .get_or_fetch(
                &keys::habits_month(user_id, month),
                move || async move { read_or_default::<HabitMonth>(&*remote, &path).await },
                habits_options(user_id),
            )
            .await
    }

    /// Habits for the month containing today.
    pub async fn current_month_habits(&self, user_id: &UserId) -> StrideResult<HabitMonth> {
        self.habits_month(user_id, YearMonth::of(self.today())).await
    }

    pub async fn save_habits(
        &self,
        user_id: &UserId,
        month: YearMonth,
        habits: &HabitMonth,
    ) -> StrideResult<()> {
        let path = paths::habits(user_id, month);
        self.remote
            .write_doc(&path, encode_doc(&path, habits)?, WriteOptions::replace())
            .await?;
        self.engine.set(
            &keys::habits_month(user_id, month),
            habits,
            &habits_options(user_id),
        );
        Ok(())
    }

    /// Flip whether `habit_id` was done on `day` of `month`.
    ///
    /// Returns the new state for that day.
    pub async fn toggle_habit_day(
        &self,
        user_id: &UserId,
        month: YearMonth,
        habit_id: ItemId,
        day: u32,
    ) -> StrideResult<bool> {
        let in_month = month
            .last_day()
            .map(|last| (1..=chrono::Datelike::day(&last)).contains(&day))
            .unwrap_or(false);
        if !in_month {
            return Err(ValidationError::InvalidFieldValue {
                field: "day".to_string(),
                value: day.to_string(),
                reason: format!("not a day of {}", month),
            }
            .into());
        }

        let mut habits = self.habits_month(user_id, month).await?;
        let habit = habits
            .habits
            .iter_mut()
            .find(|h| h.id == habit_id)
            .ok_or_else(|| ValidationError::InvalidFieldValue {
                field: "habit_id".to_string(),
                value: habit_id.to_string(),
                reason: "no such habit this month".to_string(),
            })?;

        let done = if habit.completed_days.remove(&day) {
            false
        } else {
            habit.completed_days.insert(day);
            true
        };

        self.save_habits(user_id, month, &habits).await?;
        Ok(done)
    }

    /// Follow live changes to a month of habits.
    ///
    /// Every update is written into the cache before `on_change` runs.
    pub fn subscribe_habits<F>(&self, user_id: &UserId, month: YearMonth, on_change: F) -> Subscription
    where
        F: Fn(HabitMonth) + Send + Sync + 'static,
    {
        let engine = self.engine.clone();
        let key = keys::habits_month(user_id, month);
        let options = habits_options(user_id);
        let path = paths::habits(user_id, month);

        self.remote.subscribe(
            &path.clone(),
            Box::new(move |doc| {
                let habits = match doc {
                    Some(doc) => match decode_doc::<HabitMonth>(&path, doc) {
                        Ok(habits) => habits,
                        Err(e) => {
                            tracing::warn!(path = %path, error = %e, "Ignoring undecodable habit update");
                            return;
                        }
                    },
                    None => HabitMonth::default(),
                };
                engine.set(&key, &habits, &options);
                on_change(habits);
            }),
        )
    }

    pub async fn prefetch_habits_month(&self, user_id: &UserId, month: YearMonth) {
        let remote = Arc::clone(&self.remote);
        let path = paths::habits(user_id, month);
        self.engine
            .prefetch(
                &keys::habits_month(user_id, month),
                move || async move { read_or_default::<HabitMonth>(&*remote, &path).await },
                habits_options(user_id),
            )
            .await;
    }
}
