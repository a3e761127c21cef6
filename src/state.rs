use std::sync::Arc;

use crate::authoring::Authoring;
use crate::blob::BlobStore;
use crate::catalog::CatalogQuery;
use crate::notify::Notifier;
use crate::progression::Progression;
use crate::quiz::{QuizDefaults, QuizEngine};
use crate::store::CatalogStore;

/// Everything a request handler needs; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogQuery,
    pub authoring: Authoring,
    pub progression: Progression,
    pub quiz: QuizEngine,
    pub blobs: Arc<dyn BlobStore>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        notifier: Notifier,
        blobs: Arc<dyn BlobStore>,
        quiz_defaults: QuizDefaults,
    ) -> Self {
        Self {
            catalog: CatalogQuery::new(store.clone()),
            authoring: Authoring::new(store.clone(), notifier.clone()),
            progression: Progression::new(store.clone()),
            quiz: QuizEngine::new(store, notifier, quiz_defaults),
            blobs,
        }
    }
}
