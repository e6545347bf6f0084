use std::sync::Arc;

use anyhow::{Context, Result};

use crate::catalog;
use crate::config;
use crate::data::{CatalogService, HttpCatalogService};
use crate::pages;
use crate::ui;

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let config_path = config::default_path();
    let display_path = friendly_path(config_path.as_ref());

    let user_agent = if !cfg.catalog.user_agent.trim().is_empty() {
        cfg.catalog.user_agent.clone()
    } else {
        format!("manga-tui/{}", crate::VERSION)
    };

    let client = catalog::Client::new(catalog::ClientConfig {
        base_url: cfg.catalog.base_url.clone(),
        user_agent,
        timeout: Some(cfg.catalog.request_timeout),
        http_client: None,
    })
    .context("build catalog client")?;
    let client = Arc::new(client);
    let catalog_service: Arc<dyn CatalogService> = Arc::new(HttpCatalogService::new(client));

    let pages_manager = pages::Manager::new(pages::Config {
        workers: cfg.reader.prefetch_workers,
        ..Default::default()
    })
    .ok();
    let pages_handle = pages_manager.as_ref().map(|manager| manager.handle());

    let _theme = &cfg.ui.theme;
    let status = format!(
        "Browsing {}. Press j/k to navigate, Enter to open, q to quit.",
        cfg.catalog.base_url
    );

    let options = ui::Options {
        status_message: status,
        catalog_service,
        pages_handle,
        config_path: display_path,
        reveal_step: cfg.reader.reveal_step,
    };

    let mut model = ui::Model::new(options);
    model.run()?;

    drop(pages_manager);

    Ok(())
}

fn friendly_path(path: Option<&std::path::PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/manga-tui/config.yaml".to_string()
    }
}
