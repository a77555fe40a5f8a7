//! Mod favorites: relation rows plus a write-through flag, no counter column.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::info;

use crate::application::flags::{FlagCache, FlagError};
use crate::application::repos::{ModRelationsRepo, RepoError};
use crate::domain::types::{Relation, ResourceId, UserId};

#[derive(Debug, Error)]
pub enum FavoriteError {
    #[error("mod {mod_id} is already a favorite")]
    AlreadyFavorite { mod_id: ResourceId },
    #[error("mod {mod_id} is not a favorite")]
    NotFavorite { mod_id: ResourceId },
    #[error("mod {mod_id} not found")]
    ModNotFound { mod_id: ResourceId },
    #[error(transparent)]
    Flag(#[from] FlagError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("favorite request timed out")]
    Timeout,
}

pub struct ModFavoriteService {
    relations: Arc<dyn ModRelationsRepo>,
    flags: Arc<FlagCache>,
    request_timeout: Duration,
}

impl ModFavoriteService {
    pub fn new(
        relations: Arc<dyn ModRelationsRepo>,
        flags: Arc<FlagCache>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            relations,
            flags,
            request_timeout,
        }
    }

    pub async fn create_favorite(
        &self,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<(), FavoriteError> {
        timeout(self.request_timeout, self.create_inner(user, mod_id))
            .await
            .map_err(|_| FavoriteError::Timeout)?
    }

    pub async fn delete_favorite(
        &self,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<(), FavoriteError> {
        timeout(self.request_timeout, self.delete_inner(user, mod_id))
            .await
            .map_err(|_| FavoriteError::Timeout)?
    }

    pub async fn is_favorite(&self, user: UserId, mod_id: ResourceId) -> Result<bool, FavoriteError> {
        timeout(
            self.request_timeout,
            self.flags.check_flag(Relation::Favorite, user, mod_id),
        )
        .await
        .map_err(|_| FavoriteError::Timeout)?
        .map_err(FavoriteError::from)
    }

    async fn create_inner(&self, user: UserId, mod_id: ResourceId) -> Result<(), FavoriteError> {
        match self
            .relations
            .create_relation(Relation::Favorite, user, mod_id)
            .await
        {
            Ok(_) => {}
            Err(RepoError::Duplicate { .. }) => {
                self.flags.set_flag(Relation::Favorite, user, mod_id).await?;
                return Err(FavoriteError::AlreadyFavorite { mod_id });
            }
            Err(RepoError::NotFound) | Err(RepoError::InvalidInput { .. }) => {
                return Err(FavoriteError::ModNotFound { mod_id });
            }
            Err(err) => return Err(err.into()),
        }

        self.flags.set_flag(Relation::Favorite, user, mod_id).await?;
        info!(
            target = "modverse::application::favorites",
            user, mod_id, "Favorite created"
        );
        Ok(())
    }

    async fn delete_inner(&self, user: UserId, mod_id: ResourceId) -> Result<(), FavoriteError> {
        let deleted = self
            .relations
            .delete_relation(Relation::Favorite, user, mod_id)
            .await?;

        self.flags
            .clear_flag(Relation::Favorite, user, mod_id)
            .await?;
        if deleted.is_none() {
            return Err(FavoriteError::NotFavorite { mod_id });
        }

        info!(
            target = "modverse::application::favorites",
            user, mod_id, "Favorite deleted"
        );
        Ok(())
    }
}
