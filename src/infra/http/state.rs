use std::sync::Arc;

use crate::application::downloads::DownloadService;
use crate::application::favorites::ModFavoriteService;
use crate::application::likes::ModLikeService;
use crate::application::repos::HealthRepo;
use crate::cache::CounterStore;

#[derive(Clone)]
pub struct AppState {
    pub likes: Arc<ModLikeService>,
    pub favorites: Arc<ModFavoriteService>,
    pub downloads: Arc<DownloadService>,
    pub store: Arc<dyn CounterStore>,
    pub db: Arc<dyn HealthRepo>,
}
