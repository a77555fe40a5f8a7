//! Mod likes.
//!
//! The durable `mods.likes` column is adjusted inside the like insert/delete
//! transaction; the flag cache is written through afterwards.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::application::counts::CountAccessor;
use crate::application::flags::{FlagCache, FlagError};
use crate::application::repos::{ModRelationsRepo, RelationCommit, RepoError};
use crate::domain::types::{CounterColumn, Relation, ResourceId, ResourceType, UserId};

#[derive(Debug, Error)]
pub enum LikeError {
    #[error("mod {mod_id} is already liked")]
    AlreadyLiked { mod_id: ResourceId },
    #[error("mod {mod_id} is not liked")]
    NotLiked { mod_id: ResourceId },
    #[error("mod {mod_id} not found")]
    ModNotFound { mod_id: ResourceId },
    #[error(transparent)]
    Flag(#[from] FlagError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("like request timed out")]
    Timeout,
}

pub struct ModLikeService {
    relations: Arc<dyn ModRelationsRepo>,
    flags: Arc<FlagCache>,
    counts: Arc<CountAccessor>,
    request_timeout: Duration,
}

impl ModLikeService {
    pub fn new(
        relations: Arc<dyn ModRelationsRepo>,
        flags: Arc<FlagCache>,
        counts: Arc<CountAccessor>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            relations,
            flags,
            counts,
            request_timeout,
        }
    }

    pub async fn like_mod(&self, user: UserId, mod_id: ResourceId) -> Result<(), LikeError> {
        timeout(self.request_timeout, self.like_inner(user, mod_id))
            .await
            .map_err(|_| LikeError::Timeout)?
    }

    pub async fn unlike_mod(&self, user: UserId, mod_id: ResourceId) -> Result<(), LikeError> {
        timeout(self.request_timeout, self.unlike_inner(user, mod_id))
            .await
            .map_err(|_| LikeError::Timeout)?
    }

    pub async fn like_status(&self, user: UserId, mod_id: ResourceId) -> Result<bool, LikeError> {
        timeout(
            self.request_timeout,
            self.flags.check_flag(Relation::Like, user, mod_id),
        )
        .await
        .map_err(|_| LikeError::Timeout)?
        .map_err(LikeError::from)
    }

    async fn like_inner(&self, user: UserId, mod_id: ResourceId) -> Result<(), LikeError> {
        if self.flags.check_flag(Relation::Like, user, mod_id).await? {
            return Err(LikeError::AlreadyLiked { mod_id });
        }

        let commit = match self
            .relations
            .create_relation(Relation::Like, user, mod_id)
            .await
        {
            Ok(commit) => commit,
            Err(RepoError::Duplicate { .. }) => {
                // Another request won the race; the cached "0" is stale.
                self.flags.set_flag(Relation::Like, user, mod_id).await?;
                return Err(LikeError::AlreadyLiked { mod_id });
            }
            Err(RepoError::NotFound) | Err(RepoError::InvalidInput { .. }) => {
                return Err(LikeError::ModNotFound { mod_id });
            }
            Err(err) => return Err(err.into()),
        };

        self.refresh_likes_baseline(mod_id, commit).await;
        self.flags.set_flag(Relation::Like, user, mod_id).await?;
        info!(
            target = "modverse::application::likes",
            user, mod_id, "Mod liked"
        );
        Ok(())
    }

    async fn unlike_inner(&self, user: UserId, mod_id: ResourceId) -> Result<(), LikeError> {
        if !self.flags.check_flag(Relation::Like, user, mod_id).await? {
            return Err(LikeError::NotLiked { mod_id });
        }

        let Some(commit) = self
            .relations
            .delete_relation(Relation::Like, user, mod_id)
            .await?
        else {
            self.flags.clear_flag(Relation::Like, user, mod_id).await?;
            return Err(LikeError::NotLiked { mod_id });
        };

        self.refresh_likes_baseline(mod_id, commit).await;
        self.flags.clear_flag(Relation::Like, user, mod_id).await?;
        info!(
            target = "modverse::application::likes",
            user, mod_id, "Mod unliked"
        );
        Ok(())
    }

    /// Overwrite the cached likes baseline with the committed value, so a
    /// cold read that loaded the pre-commit value cannot install it later.
    async fn refresh_likes_baseline(&self, mod_id: ResourceId, commit: RelationCommit) {
        if let Some(likes) = commit.counter {
            match self
                .counts
                .set_baseline(ResourceType::Mod, mod_id, CounterColumn::Likes, likes)
                .await
            {
                Ok(()) => return,
                Err(err) => warn!(
                    target = "modverse::application::likes",
                    mod_id,
                    error = %err,
                    "Failed to store committed likes baseline"
                ),
            }
        }
        if let Err(err) = self
            .counts
            .invalidate_baseline(ResourceType::Mod, mod_id, CounterColumn::Likes)
            .await
        {
            warn!(
                target = "modverse::application::likes",
                mod_id,
                error = %err,
                "Failed to invalidate cached likes baseline"
            );
        }
    }
}
