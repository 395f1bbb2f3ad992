//! Period todo lists.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use stride_core::{
    new_item_id, ItemId, Period, StrideResult, Subscription, TodoItem, TodoList, UserId,
    ValidationError, WriteOptions,
};
use stride_storage::{keys, CacheOptions};

use crate::access::{decode_doc, encode_doc, paths, read_or_default, DataAccess};
use crate::goals::next_order;

pub fn todos_options(user_id: &UserId, period: Period) -> CacheOptions {
    CacheOptions::new()
        .with_ttl(Duration::from_secs(2 * 60))
        .with_tag(keys::tags::todo(user_id))
        .with_tag(keys::tags::period(period))
}

impl DataAccess {
    pub async fn todos(
        &self,
        user_id: &UserId,
        period: Period,
        date: NaiveDate,
    ) -> StrideResult<TodoList> {
        let remote = Arc::clone(&self.remote);
        let path = paths::todos(user_id, period, date);
        self.engine
            .get_or_fetch(
                &keys::todos(user_id, period, date),
                move || async move { read_or_default::<TodoList>(&*remote, &path).await },
                todos_options(user_id, period),
            )
            .await
    }

    pub async fn save_todos(
        &self,
        user_id: &UserId,
        period: Period,
        date: NaiveDate,
        todos: &TodoList,
    ) -> StrideResult<()> {
        let path = paths::todos(user_id, period, date);
        self.remote
            .write_doc(&path, encode_doc(&path, todos)?, WriteOptions::replace())
            .await?;
        self.engine.set(
            &keys::todos(user_id, period, date),
            todos,
            &todos_options(user_id, period),
        );
        Ok(())
    }

    pub async fn add_todo(
        &self,
        user_id: &UserId,
        period: Period,
        date: NaiveDate,
        text: impl Into<String>,
    ) -> StrideResult<TodoItem> {
        let mut todos = self.todos(user_id, period, date).await?;
        let item = TodoItem {
            id: new_item_id(),
            text: text.into(),
            done: false,
            order: next_order(todos.items.iter().map(|t| t.order)),
        };
        todos.items.push(item.clone());
        self.save_todos(user_id, period, date, &todos).await?;
        Ok(item)
    }

    /// Mark a todo done or not done.
    pub async fn set_todo_done(
        &self,
        user_id: &UserId,
        period: Period,
        date: NaiveDate,
        todo_id: ItemId,
        done: bool,
    ) -> StrideResult<()> {
        let mut todos = self.todos(user_id, period, date).await?;
        let item = todos
            .items
            .iter_mut()
            .find(|t| t.id == todo_id)
            .ok_or_else(|| ValidationError::InvalidFieldValue {
                field: "todo_id".to_string(),
                value: todo_id.to_string(),
                reason: "no such todo".to_string(),
            })?;
        item.done = done;
        self.save_todos(user_id, period, date, &todos).await
    }

    /// Drop every cached todo list for `user_id`.
    pub fn invalidate_todos(&self, user_id: &UserId) -> StrideResult<usize> {
        self.engine.invalidate(&keys::tags::todo(user_id))
    }

    /// Follow live changes to one todo list.
    ///
    /// Every update is written into the cache before `on_change` runs.
    pub fn subscribe_todos<F>(
        &self,
        user_id: &UserId,
        period: Period,
        date: NaiveDate,
        on_change: F,
    ) -> Subscription
    where
        F: Fn(TodoList) + Send + Sync + 'static,
    {
        let engine = self.engine.clone();
        let key = keys::todos(user_id, period, date);
        let options = todos_options(user_id, period);
        let path = paths::todos(user_id, period, date);

        self.remote.subscribe(
            &path.clone(),
            Box::new(move |doc| {
                let todos = match doc {
                    Some(doc) => match decode_doc::<TodoList>(&path, doc) {
                        Ok(todos) => todos,
                        Err(e) => {
                            tracing::warn!(path = %path, error = %e, "Ignoring undecodable todo update");
                            return;
                        }
                    },
                    None => TodoList::default(),
                };
                engine.set(&key, &todos, &options);
                on_change(todos);
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::testing::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_add_and_complete_todo() {
        let f = fixture();
        let u = uid("u1");
        let day = date(2026, 10, 15);

        let item = f
            .data
            .add_todo(&u, Period::Daily, day, "Write report")
            .await
            .expect("add");
        f.data
            .set_todo_done(&u, Period::Daily, day, item.id, true)
            .await
            .expect("complete");

        let todos = f.data.todos(&u, Period::Daily, day).await.expect("read");
        assert_eq!(todos.items.len(), 1);
        assert!(todos.items[0].done);
        // One read for the initial add; everything after came from cache
        assert_eq!(f.remote.read_count(), 1);
    }

    #[tokio::test]
    async fn test_todos_ttl_two_minutes() {
        let f = fixture();
        let u = uid("u1");
        let day = date(2026, 10, 15);
        f.data.todos(&u, Period::Daily, day).await.expect("read");

        f.clock.advance(Duration::from_secs(119));
        f.data.todos(&u, Period::Daily, day).await.expect("read");
        assert_eq!(f.remote.read_count(), 1);

        f.clock.advance(Duration::from_secs(1));
        f.data.todos(&u, Period::Daily, day).await.expect("read");
        assert_eq!(f.remote.read_count(), 2);
    }

    #[tokio::test]
    async fn test_period_tag_spans_users() {
        let f = fixture();
        let day = date(2026, 10, 15);
        let (a, b) = (uid("a"), uid("b"));
        f.data.todos(&a, Period::Daily, day).await.expect("read");
        f.data.todos(&b, Period::Daily, day).await.expect("read");
        f.data.todos(&a, Period::Weekly, day).await.expect("read");

        let removed = f
            .data
            .engine()
            .invalidate(&keys::tags::period(Period::Daily))
            .expect("invalidate");
        assert_eq!(removed, 2);
        assert!(f
            .data
            .engine()
            .get::<TodoList>(&keys::todos(&a, Period::Weekly, day))
            .is_some());
    }

    #[tokio::test]
    async fn test_invalidate_todos_is_user_scoped() {
        let f = fixture();
        let day = date(2026, 10, 15);
        let (a, b) = (uid("a"), uid("b"));
        f.data.todos(&a, Period::Daily, day).await.expect("read");
        f.data.todos(&b, Period::Daily, day).await.expect("read");

        assert_eq!(f.data.invalidate_todos(&a).expect("invalidate"), 1);
        assert!(f
            .data
            .engine()
            .get::<TodoList>(&keys::todos(&b, Period::Daily, day))
            .is_some());
    }

    #[tokio::test]
    async fn test_subscription_sets_cache_before_callback() {
        let f = fixture();
        let u = uid("u1");
        let day = date(2026, 10, 15);
        let calls = Arc::new(AtomicUsize::new(0));

        let engine = f.data.engine().clone();
        let key = keys::todos(&u, Period::Daily, day);
        let counter = Arc::clone(&calls);
        let sub = f.data.subscribe_todos(&u, Period::Daily, day, move |todos| {
            let cached: Option<TodoList> = engine.get(&key);
            assert_eq!(cached.as_ref(), Some(&todos));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        f.data
            .add_todo(&u, Period::Daily, day, "Call dentist")
            .await
            .expect("add");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(sub);
        assert_eq!(
            f.remote
                .subscriber_count(&paths::todos(&u, Period::Daily, day)),
            0
        );
    }
}
