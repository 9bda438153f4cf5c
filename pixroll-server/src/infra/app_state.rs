use std::{fmt, sync::Arc};

use pixroll_core::{CacheFacade, ImageLibrary, ManifestBuilder, ManifestIndex, RemoteCache};

use crate::infra::config::Config;
use crate::infra::update_guard::UpdateGuard;

/// Everything a request handler needs, injected at construction time so
/// tests can stand up as many independent instances as they like.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub library: Arc<ImageLibrary>,
    pub index: Arc<ManifestIndex>,
    pub cache: Arc<CacheFacade>,
    pub remote: Option<Arc<RemoteCache>>,
    pub builder: Arc<ManifestBuilder>,
    pub update_guard: Arc<UpdateGuard>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
