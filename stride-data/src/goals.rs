//! Planner goals.

use std::sync::Arc;
use std::time::Duration;

use stride_core::{new_item_id, Goal, GoalList, Period, StrideResult, UserId, WriteOptions};
use stride_storage::{keys, CacheOptions};

use crate::access::{encode_doc, paths, read_or_default, DataAccess};

/// Goals change rarely and are shown on every planner visit.
pub fn goals_options() -> CacheOptions {
    CacheOptions::new()
        .with_ttl(Duration::from_secs(10 * 60))
        .persisted()
        .stale_while_revalidate()
}

impl DataAccess {
    pub async fn goals(&self, user_id: &UserId) -> StrideResult<GoalList> {
        let remote = Arc::clone(&self.remote);
        let path = paths::goals(user_id);
        self.engine
            .get_or_fetch(
                &keys::goals(user_id),
                move || async move { read_or_default::<GoalList>(&*remote, &path).await },
                goals_options(),
            )
            .await
    }

    pub async fn save_goals(&self, user_id: &UserId, goals: &GoalList) -> StrideResult<()> {
        let path = paths::goals(user_id);
        self.remote
            .write_doc(&path, encode_doc(&path, goals)?, WriteOptions::replace())
            .await?;
        self.engine.set(&keys::goals(user_id), goals, &goals_options());
        tracing::debug!(user_id = %user_id, count = goals.items.len(), "Saved goals");
        Ok(())
    }

    /// Append a goal at the end of the user's ordering.
    pub async fn add_goal(
        &self,
        user_id: &UserId,
        title: impl Into<String>,
        period: Period,
    ) -> StrideResult<Goal> {
        let mut goals = self.goals(user_id).await?;
        let goal = Goal {
            id: new_item_id(),
            title: title.into(),
            period,
            target_date: None,
            completed: false,
            order: next_order(goals.items.iter().map(|g| g.order)),
        };
        goals.items.push(goal.clone());
        self.save_goals(user_id, &goals).await?;
        Ok(goal)
    }

    pub async fn prefetch_goals(&self, user_id: &UserId) {
        let remote = Arc::clone(&self.remote);
        let path = paths::goals(user_id);
        self.engine
            .prefetch(
                &keys::goals(user_id),
                move || async move { read_or_default::<GoalList>(&*remote, &path).await },
                goals_options(),
            )
            .await;
    }
}

pub(crate) fn next_order(orders: impl Iterator<Item = i32>) -> i32 {
    orders.max().map_or(0, |max| max.saturating_add(1))
}
