//! Background prefetch of page image assets.
//!
//! The reader only renders placeholders for page images (decoding is out of
//! scope), but it still warms the pages the reveal window just uncovered and
//! reports their byte size and content type back to the event loop.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use reqwest::blocking::Client;

#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    pub timeout: Duration,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 2,
            timeout: Duration::from_secs(30),
            http_client: None,
        }
    }
}

/// Identity of one page asset within the catalog.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct PageKey {
    pub manga_id: String,
    pub chapter_id: String,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub key: PageKey,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PageInfo {
    pub size_bytes: usize,
    pub content_type: String,
}

#[derive(Debug)]
pub struct Outcome {
    pub key: PageKey,
    pub result: Result<PageInfo>,
}

struct Job {
    request: Request,
    tx: Sender<Outcome>,
}

pub struct Manager {
    jobs: Sender<Job>,
    stop: Sender<()>,
    handles: Vec<thread::JoinHandle<()>>,
}

#[derive(Clone)]
pub struct Handle {
    jobs: Sender<Job>,
}

impl Manager {
    pub fn new(cfg: Config) -> Result<Self> {
        let workers = cfg.workers.max(1);
        let client = match cfg.http_client.clone() {
            Some(client) => client,
            None => Client::builder()
                .timeout(cfg.timeout)
                .build()
                .context("pages: build http client")?,
        };

        let (job_tx, job_rx) = unbounded::<Job>();
        let (stop_tx, stop_rx) = unbounded::<()>();

        let mut handles = Vec::new();
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let stop = stop_rx.clone();
            let client = client.clone();
            handles.push(thread::spawn(move || worker(client, jobs, stop)));
        }

        Ok(Self {
            jobs: job_tx,
            stop: stop_tx,
            handles,
        })
    }

    pub fn handle(&self) -> Handle {
        Handle {
            jobs: self.jobs.clone(),
        }
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Handle {
    /// Queue one page fetch; the outcome arrives on `tx`.
    pub fn enqueue(&self, request: Request, tx: Sender<Outcome>) {
        let _ = self.jobs.send(Job { request, tx });
    }
}

fn worker(client: Client, jobs: Receiver<Job>, stop: Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            recv(jobs) -> msg => {
                match msg {
                    Ok(job) => {
                        let result = fetch(&client, &job.request);
                        let _ = job.tx.send(Outcome {
                            key: job.request.key,
                            result,
                        });
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

fn fetch(client: &Client, request: &Request) -> Result<PageInfo> {
    if request.url.is_empty() {
        return Err(anyhow!("pages: url required"));
    }

    let response = client.get(&request.url).send().context("pages: download")?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("pages: request failed: {status}"));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = response.bytes().context("pages: body")?;

    Ok(PageInfo {
        size_bytes: bytes.len(),
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_shuts_down_cleanly() {
        let manager = Manager::new(Config {
            workers: 2,
            ..Default::default()
        })
        .unwrap();
        let _handle = manager.handle();
        drop(manager);
    }

    #[test]
    fn empty_url_is_rejected() {
        let client = Client::new();
        let request = Request {
            key: PageKey {
                manga_id: "m".into(),
                chapter_id: "c".into(),
                index: 0,
            },
            url: String::new(),
        };
        assert!(fetch(&client, &request).is_err());
    }
}
