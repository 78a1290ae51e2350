//! Photo metadata lookup.

use crate::models::Photograph;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[async_trait]
pub trait PhotoCatalog: Send + Sync {
    async fn photo(&self, id: &str) -> Option<Photograph>;
}

/// Catalog kept in memory, filled by the host.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    photos: RwLock<HashMap<String, Photograph>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a photo, keyed by its id.
    pub fn insert(&self, photo: Photograph) {
        self.photos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(photo.id.clone(), photo);
    }

    pub fn len(&self) -> usize {
        self.photos.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PhotoCatalog for InMemoryCatalog {
    async fn photo(&self, id: &str) -> Option<Photograph> {
        self.photos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_insert_and_lookup() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.is_empty());
        assert!(tokio_test::block_on(catalog.photo("dunes")).is_none());

        catalog.insert(Photograph {
            id: "dunes".to_string(),
            title: "Dunes".to_string(),
            description: String::new(),
            categories: Vec::new(),
            tags: Vec::new(),
            path: PathBuf::from("dunes.jpg"),
            content_type: "image/jpeg".to_string(),
        });
        assert_eq!(catalog.len(), 1);
        let photo = tokio_test::block_on(catalog.photo("dunes")).unwrap();
        assert_eq!(photo.title, "Dunes");
    }
}
