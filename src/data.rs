use std::sync::Arc;

use crate::catalog::{self, Catalog, CatalogError, Chapter, Manga};

pub trait CatalogService: Send + Sync {
    fn load_catalog(&self) -> Result<Catalog, CatalogError>;
    fn page_url(&self, manga_id: &str, chapter_id: &str, file: &str) -> String;
}

pub struct HttpCatalogService {
    client: Arc<catalog::Client>,
}

impl HttpCatalogService {
    pub fn new(client: Arc<catalog::Client>) -> Self {
        Self { client }
    }
}

impl CatalogService for HttpCatalogService {
    fn load_catalog(&self) -> Result<Catalog, CatalogError> {
        self.client.fetch_catalog()
    }

    fn page_url(&self, manga_id: &str, chapter_id: &str, file: &str) -> String {
        self.client.page_url(manga_id, chapter_id, file)
    }
}

/// Fixed in-memory catalog, used by the UI tests and offline browsing.
#[derive(Default)]
pub struct MockCatalogService {
    catalog: Catalog,
}

impl MockCatalogService {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn sample() -> Self {
        Self::new(sample_catalog())
    }
}

impl CatalogService for MockCatalogService {
    fn load_catalog(&self) -> Result<Catalog, CatalogError> {
        Ok(self.catalog.clone())
    }

    fn page_url(&self, manga_id: &str, chapter_id: &str, file: &str) -> String {
        catalog::page_url("http://mock.invalid", manga_id, chapter_id, file)
    }
}

pub fn sample_catalog() -> Catalog {
    Catalog {
        mangas: vec![Manga {
            id: "m1".into(),
            title: "Sample Manga".into(),
            cover: "cover.jpg".into(),
            background_image: "bg.jpg".into(),
            description: "Offline sample provided for browsing without a server.".into(),
            chapters: vec![
                sample_chapter("c1", 25),
                sample_chapter("c2", 12),
                sample_chapter("c3", 3),
            ],
        }],
    }
}

fn sample_chapter(id: &str, page_count: usize) -> Chapter {
    Chapter {
        id: id.into(),
        title: format!("Chapter {}", id.trim_start_matches('c')),
        description: String::new(),
        pages: (1..=page_count).map(|n| format!("{n:02}.jpg")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_serves_sample_catalog() {
        let service = MockCatalogService::sample();
        let catalog = service.load_catalog().unwrap();
        let manga = catalog.manga("m1").unwrap();
        assert_eq!(manga.chapters.len(), 3);
        assert_eq!(manga.chapters[0].pages.len(), 25);
    }
}
