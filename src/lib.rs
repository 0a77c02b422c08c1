pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod infra;
pub mod media;

use std::sync::Arc;

use crate::app::avatars::AvatarService;
use crate::app::banner::BannerCropEditor;
use crate::app::posts::PostService;
use crate::app::publish::PublishCoordinator;
use crate::app::staging::{AssetStager, StagingSessions};
use crate::app::urls::UrlResolver;
use crate::config::PipelineSettings;
use crate::infra::{cache::SignedUrlCache, repository::MediaRepository, storage::ObjectStore};
use crate::media::thumbnail::Thumbnailer;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn MediaRepository>,
    pub store: Arc<dyn ObjectStore>,
    pub url_cache: Arc<dyn SignedUrlCache>,
    pub thumbnailer: Arc<dyn Thumbnailer>,
    pub sessions: StagingSessions,
    pub settings: PipelineSettings,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn MediaRepository>,
        store: Arc<dyn ObjectStore>,
        url_cache: Arc<dyn SignedUrlCache>,
        thumbnailer: Arc<dyn Thumbnailer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            sessions: StagingSessions::new(thumbnailer.clone()),
            repo,
            store,
            url_cache,
            thumbnailer,
            settings,
        }
    }

    pub fn resolver(&self) -> UrlResolver {
        UrlResolver::new(self.store.clone(), self.url_cache.clone(), &self.settings)
    }

    pub fn posts(&self) -> PostService {
        PostService::new(
            self.repo.clone(),
            self.store.clone(),
            self.resolver(),
            self.settings.network_timeout,
        )
    }

    pub fn publisher(&self, stager: AssetStager) -> PublishCoordinator {
        PublishCoordinator::new(
            self.repo.clone(),
            self.store.clone(),
            self.thumbnailer.clone(),
            stager,
            self.settings.clone(),
        )
    }

    pub fn banners(&self) -> BannerCropEditor {
        BannerCropEditor::new(
            self.repo.clone(),
            self.store.clone(),
            self.resolver(),
            self.settings.clone(),
        )
    }

    pub fn avatars(&self) -> AvatarService {
        AvatarService::new(
            self.repo.clone(),
            self.store.clone(),
            self.resolver(),
            self.settings.clone(),
        )
    }
}
