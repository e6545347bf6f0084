use std::time::Duration;

use anyhow::{bail, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const CATALOG_DOCUMENT: &str = "mangas.json";
pub const SCANS_PREFIX: &str = "scans";

/// Characters that must be escaped when a catalog id or page file name is
/// spliced into a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("catalog returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("catalog document is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
}

/// The static catalog document: the whole library in one JSON object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub mangas: Vec<Manga>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manga {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default, rename = "backgroundImage")]
    pub background_image: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pages: Vec<String>,
}

impl Catalog {
    pub fn manga(&self, id: &str) -> Option<&Manga> {
        self.mangas.iter().find(|manga| manga.id == id)
    }
}

impl Manga {
    pub fn chapter(&self, id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|chapter| chapter.id == id)
    }

    /// Ordinal of a chapter within this manga, by linear scan.
    pub fn chapter_position(&self, id: &str) -> Option<usize> {
        self.chapters.iter().position(|chapter| chapter.id == id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("catalog client user agent required");
        }
        let base_url = normalize_base_url(&config.base_url);
        if let Err(err) = Url::parse(&base_url) {
            bail!("invalid catalog base url {base_url:?}: {err}");
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch and decode the catalog document. Transport and decode failures
    /// are kept apart so the UI can word its status line accordingly.
    pub fn fetch_catalog(&self) -> Result<Catalog, CatalogError> {
        let url = format!("{}/{}", self.base_url, CATALOG_DOCUMENT);
        let response = self
            .http
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .map_err(CatalogError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status));
        }

        let body = response.text().map_err(CatalogError::Transport)?;
        serde_json::from_str(&body).map_err(CatalogError::Decode)
    }

    /// Address of one page image asset.
    pub fn page_url(&self, manga_id: &str, chapter_id: &str, file: &str) -> String {
        page_url(&self.base_url, manga_id, chapter_id, file)
    }
}

pub fn page_url(base_url: &str, manga_id: &str, chapter_id: &str, file: &str) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        normalize_base_url(base_url),
        SCANS_PREFIX,
        utf8_percent_encode(manga_id, PATH_SEGMENT),
        utf8_percent_encode(chapter_id, PATH_SEGMENT),
        utf8_percent_encode(file, PATH_SEGMENT),
    )
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}
