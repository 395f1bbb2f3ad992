//! User profile.

use std::sync::Arc;
use std::time::Duration;

use stride_core::{Profile, StrideResult, UserId, WriteOptions};
use stride_storage::{keys, CacheOptions};

use crate::access::{encode_doc, paths, read_optional, DataAccess};

pub fn profile_options() -> CacheOptions {
    CacheOptions::new()
        .with_ttl(Duration::from_secs(30 * 60))
        .persisted()
}

impl DataAccess {
    /// The user's profile, or `None` before one has been created.
    pub async fn profile(&self, user_id: &UserId) -> StrideResult<Option<Profile>> {
        let remote = Arc::clone(&self.remote);
        let path = paths::profile(user_id);
        self.engine
            .get_or_fetch(
                &keys::profile(user_id),
                move || async move { read_optional::<Profile>(&*remote, &path).await },
                profile_options(),
            )
            .await
    }

    pub async fn save_profile(&self, user_id: &UserId, profile: &Profile) -> StrideResult<()> {
        let path = paths::profile(user_id);
        self.remote
            .write_doc(&path, encode_doc(&path, profile)?, WriteOptions::merge())
            .await?;
        self.engine
            .set(&keys::profile(user_id), &Some(profile), &profile_options());
        Ok(())
    }

    pub async fn prefetch_profile(&self, user_id: &UserId) {
        let remote = Arc::clone(&self.remote);
        let path = paths::profile(user_id);
        self.engine
            .prefetch(
                &keys::profile(user_id),
                move || async move { read_optional::<Profile>(&*remote, &path).await },
                profile_options(),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::testing::*;
    use chrono::{TimeZone, Utc};

    fn profile() -> Profile {
        Profile {
            display_name: "Ada".to_string(),
            email: Some("ada@example.com".to_string()),
            created_at: Utc
                .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
                .single()
                .expect("valid time"),
        }
    }

    #[tokio::test]
    async fn test_profile_absent_then_saved() {
        let f = fixture();
        let u = uid("u1");
        assert!(f.data.profile(&u).await.expect("read").is_none());

        f.data.save_profile(&u, &profile()).await.expect("save");
        assert_eq!(f.data.profile(&u).await.expect("read"), Some(profile()));
        assert_eq!(f.remote.read_count(), 1);
    }

    #[tokio::test]
    async fn test_prefetch_profile_populates_cache() {
        let f = fixture();
        let u = uid("u1");
        f.remote.seed(
            &paths::profile(&u),
            crate::access::encode_doc("seed", &profile()).expect("encode"),
        );

        f.data.prefetch_profile(&u).await;
        let cached: Option<Option<Profile>> = f.data.engine().get(&keys::profile(&u));
        assert_eq!(cached, Some(Some(profile())));
    }
}
