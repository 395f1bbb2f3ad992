//! Skill tracker.

use std::sync::Arc;
use std::time::Duration;

use stride_core::{SkillSet, StrideResult, UserId, WriteOptions};
use stride_storage::{keys, CacheOptions};

use crate::access::{encode_doc, paths, read_or_default, DataAccess};

pub fn skills_options() -> CacheOptions {
    CacheOptions::new()
        .with_ttl(Duration::from_secs(10 * 60))
        .persisted()
}

impl DataAccess {
    pub async fn skills(&self, user_id: &UserId) -> StrideResult<SkillSet> {
        let remote = Arc::clone(&self.remote);
        let path = paths::skills(user_id);
        self.engine
            .get_or_fetch(
                &keys::skills(user_id),
                move || async move { read_or_default::<SkillSet>(&*remote, &path).await },
                skills_options(),
            )
            .await
    }

    pub async fn save_skills(&self, user_id: &UserId, skills: &SkillSet) -> StrideResult<()> {
        let path = paths::skills(user_id);
        self.remote
            .write_doc(&path, encode_doc(&path, skills)?, WriteOptions::replace())
            .await?;
        self.engine.set(&keys::skills(user_id), skills, &skills_options());
        Ok(())
    }
}
