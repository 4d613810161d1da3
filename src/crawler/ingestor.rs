//! Ingestion orchestrator - the fetch, parse and persist cycle
//!
//! This module contains the worker loop that drives the scheduler:
//! - Claiming a link under politeness cooldowns
//! - Fetching and parsing the page
//! - Storing raw HTML and body text as blobs
//! - Feeding discovered links back into the scheduler
//! - Running a pool of workers plus a periodic refresh until shutdown

use crate::config::{Config, ParserConfig};
use crate::crawler::fetcher::Fetcher;
use crate::crawler::parser::{parse_document, ParseOptions};
use crate::crawler::scheduler::{DomainScheduler, LinkLease};
use crate::storage::{BlobHandle, BlobStore, FsBlobStore, Link, LinkStore, SqliteLinkStore};
use crate::{IngestError, Result};
use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Result of one orchestrator cycle
#[derive(Debug)]
pub enum CycleOutcome {
    /// The claimed link was fetched, parsed and persisted
    Processed {
        identifier: String,
        language: Option<String>,
        links_found: usize,
        links_added: usize,
        is_paywalled: bool,
        html: BlobHandle,
        text: BlobHandle,
    },

    /// No domain is ready; sleep this long before the next cycle
    Wait(Duration),

    /// The head domain ran out of eligible links
    DomainEmpty { domain: String },

    /// Fetching or parsing the claimed link failed; the loop carries on
    Failed {
        identifier: String,
        error: IngestError,
        released: bool,
    },
}

/// Drives fetch/parse/persist cycles against a shared scheduler
pub struct Ingestor<S: LinkStore, B: BlobStore> {
    scheduler: Arc<DomainScheduler<S>>,
    blobs: Arc<B>,
    fetcher: Fetcher,
    parser: ParserConfig,
    release_claim_on_fetch_error: bool,
    error_backoff: Duration,
}

impl<S: LinkStore, B: BlobStore> Clone for Ingestor<S, B> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            blobs: Arc::clone(&self.blobs),
            fetcher: self.fetcher.clone(),
            parser: self.parser.clone(),
            release_claim_on_fetch_error: self.release_claim_on_fetch_error,
            error_backoff: self.error_backoff,
        }
    }
}

impl<S: LinkStore + 'static, B: BlobStore + 'static> Ingestor<S, B> {
    pub fn new(
        scheduler: Arc<DomainScheduler<S>>,
        blobs: Arc<B>,
        fetcher: Fetcher,
        config: &Config,
    ) -> Self {
        Self {
            scheduler,
            blobs,
            fetcher,
            parser: config.parser.clone(),
            release_claim_on_fetch_error: config.scheduler.release_claim_on_fetch_error,
            error_backoff: config.scheduler.error_backoff(),
        }
    }

    pub fn scheduler(&self) -> &Arc<DomainScheduler<S>> {
        &self.scheduler
    }

    /// Runs one cycle
    ///
    /// Fetch and parse failures are link-local and come back as
    /// [`CycleOutcome::Failed`]. Only storage and lock failures are errors.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let link = match self.scheduler.get_link()? {
            LinkLease::Claimed { link, .. } => link,
            LinkLease::Wait(wait) => return Ok(CycleOutcome::Wait(wait)),
            LinkLease::DomainEmpty { domain } => return Ok(CycleOutcome::DomainEmpty { domain }),
        };

        match self.process(&link).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_link_local() => {
                warn!("Failed to ingest {}: {}", link.url, e);
                let released = self.release_claim_on_fetch_error
                    && matches!(e, IngestError::Fetch(_))
                    && self.release(&link);
                Ok(CycleOutcome::Failed {
                    identifier: link.identifier,
                    error: e,
                    released,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn release(&self, link: &Link) -> bool {
        match self.scheduler.release_claim(link) {
            Ok(()) => {
                debug!("Released claim on {}", link.identifier);
                true
            }
            Err(e) => {
                error!("Failed to release claim on {}: {}", link.identifier, e);
                false
            }
        }
    }

    async fn process(&self, link: &Link) -> Result<CycleOutcome> {
        let page = self.fetcher.fetch(&link.url).await?;
        let html = self.blobs.write("html", &page.body)?;

        let options = ParseOptions {
            relative_links: self.parser.relative_links,
            base_url: Url::parse(&page.final_url).ok(),
            paywall_classes: self.parser.paywall_classes.clone(),
        };
        let doc = parse_document(&page.body, page.charset.as_deref(), &options)?;

        let text = self.blobs.write("txt", doc.body_text.as_bytes())?;
        let links_added = self
            .scheduler
            .add_urls(doc.links.iter().map(String::as_str))?;
        self.scheduler.record_fetch_success(
            &link.identifier,
            Utc::now(),
            &html,
            &text,
            doc.is_paywalled,
        )?;

        info!(
            "Ingested {} (lang {:?}, type {:?}, {} links{})",
            link.url,
            doc.language,
            doc.page_type(),
            doc.links.len(),
            if doc.is_paywalled { ", paywalled" } else { "" }
        );

        Ok(CycleOutcome::Processed {
            identifier: link.identifier.clone(),
            language: doc.language,
            links_found: doc.links.len(),
            links_added,
            is_paywalled: doc.is_paywalled,
            html,
            text,
        })
    }

    /// Loops over cycles until `shutdown` flips to true
    ///
    /// Sleeps only when the scheduler asks for a wait, or for the error
    /// backoff after a storage failure. A poisoned scheduler lock ends the
    /// loop since it can never recover.
    pub async fn run_worker(self, id: usize, mut shutdown: watch::Receiver<bool>) {
        info!("Worker {} started", id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_cycle().await {
                Ok(CycleOutcome::Wait(wait)) => Some(wait),
                Ok(_) => None,
                Err(IngestError::LockPoisoned) => {
                    error!("Worker {}: scheduler lock poisoned, stopping", id);
                    break;
                }
                Err(e) => {
                    error!("Worker {}: {}", id, e);
                    Some(self.error_backoff)
                }
            };

            if let Some(delay) = delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("Worker {} stopped", id);
    }
}

/// Periodically re-seeds the scheduler rotation from the link store
pub async fn run_refresh<S: LinkStore>(
    scheduler: Arc<DomainScheduler<S>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = scheduler.refresh_period();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        if let Err(e) = scheduler.refresh() {
            error!("Scheduler refresh failed: {}", e);
        }
    }
}

/// Runs the ingestion service until Ctrl-C
///
/// # Arguments
///
/// * `config` - The ingestion configuration
///
/// # Returns
///
/// * `Ok(())` - Shut down cleanly
/// * `Err(IngestError)` - Failed to establish the initial scheduling state
pub async fn run_ingest(config: Config) -> Result<()> {
    run_ingest_until(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
    })
    .await
}

/// Runs the ingestion service until `signal` completes
pub async fn run_ingest_until<F>(config: Config, signal: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let version = config.ingest.fetch_version();
    let store = SqliteLinkStore::new(Path::new(&config.storage.database_path), version)?;
    let blobs = Arc::new(FsBlobStore::new(&config.storage.blob_dir)?);
    let fetcher = Fetcher::new(&config.fetcher)?;

    // Fatal on failure: without its domain set the scheduler cannot start
    let scheduler = Arc::new(DomainScheduler::from_config(store, &config.scheduler)?);
    let ingestor = Ingestor::new(Arc::clone(&scheduler), blobs, fetcher, &config);

    info!(
        "Starting {} workers at fetch version {} (cooldown {:?})",
        config.ingest.workers,
        version,
        scheduler.cooldown()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<JoinHandle<()>> = (0..config.ingest.workers as usize)
        .map(|id| tokio::spawn(ingestor.clone().run_worker(id, shutdown_rx.clone())))
        .collect();
    handles.push(tokio::spawn(run_refresh(scheduler, shutdown_rx)));

    signal.await;
    info!("Shutdown requested, waiting for workers to finish their cycle");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Task ended abnormally: {}", e);
        }
    }

    info!("Ingestion stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetcherConfig, IngestConfig, SchedulerConfig, StorageConfig};
    use crate::state::FetchVersion;
    use crate::url::normalize;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(dir: &TempDir) -> Config {
        Config {
            scheduler: SchedulerConfig::default(),
            ingest: IngestConfig::default(),
            parser: ParserConfig::default(),
            fetcher: FetcherConfig {
                crawler_name: "TestCrawler".to_string(),
                crawler_version: "1.0".to_string(),
                contact_url: "https://example.com/about".to_string(),
                contact_email: "admin@example.com".to_string(),
                timeout_secs: 5,
                https_only: false,
            },
            storage: StorageConfig {
                database_path: dir.path().join("links.db").display().to_string(),
                blob_dir: dir.path().join("blobs").display().to_string(),
            },
        }
    }

    fn build(
        config: &Config,
        seeds: &[&str],
    ) -> (Ingestor<SqliteLinkStore, FsBlobStore>, Arc<FsBlobStore>) {
        let mut store = SqliteLinkStore::new_in_memory(FetchVersion::CURRENT).unwrap();
        let links: Vec<_> = seeds.iter().map(|u| normalize(u).unwrap()).collect();
        store.insert_links(&links).unwrap();

        let scheduler = Arc::new(
            DomainScheduler::initialize(store, Duration::from_millis(10), Duration::from_secs(60))
                .unwrap(),
        );
        let blobs = Arc::new(FsBlobStore::new(&config.storage.blob_dir).unwrap());
        let fetcher = Fetcher::new(&config.fetcher).unwrap();
        (
            Ingestor::new(scheduler, Arc::clone(&blobs), fetcher, config),
            blobs,
        )
    }

    #[tokio::test]
    async fn test_cycle_processes_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nota"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html lang="es"><body><p>Hola mundo</p><a href="/otra">otra</a></body></html>"#,
            ))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let seed = format!("{}/nota", server.uri());
        let (ingestor, blobs) = build(&config, &[&seed]);

        let outcome = ingestor.run_cycle().await.unwrap();
        let (identifier, text) = match outcome {
            CycleOutcome::Processed {
                identifier,
                language,
                links_found,
                links_added,
                is_paywalled,
                text,
                ..
            } => {
                assert_eq!(language.as_deref(), Some("es"));
                assert_eq!(links_found, 1);
                assert_eq!(links_added, 1);
                assert!(!is_paywalled);
                (identifier, text)
            }
            other => panic!("unexpected outcome {:?}", other),
        };

        assert!(blobs.read(&text).unwrap().starts_with(b"Hola mundo"));

        let link = ingestor
            .scheduler()
            .with_store(|s| s.get_link(&identifier))
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(link.fetched_at.is_some());
        assert_eq!(link.is_paywalled, Some(false));
        assert_eq!(link.text_handle, Some(text));
        assert_eq!(ingestor.scheduler().stats().unwrap().total_links, 2);
    }

    #[tokio::test]
    async fn test_paywalled_page_is_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exclusiva"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html lang="es"><head><script type="application/ld+json">{"@type":"NewsArticle","isAccessibleForFree":"False"}</script></head><body><p>Contenido para suscriptores</p></body></html>"#,
            ))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let seed = format!("{}/exclusiva", server.uri());
        let (ingestor, _) = build(&config, &[&seed]);

        let identifier = match ingestor.run_cycle().await.unwrap() {
            CycleOutcome::Processed {
                identifier,
                is_paywalled,
                ..
            } => {
                assert!(is_paywalled);
                identifier
            }
            other => panic!("unexpected outcome {:?}", other),
        };

        let link = ingestor
            .scheduler()
            .with_store(|s| s.get_link(&identifier))
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(link.is_paywalled, Some(true));
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_claim_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let seed = format!("{}/caida", server.uri());
        let (ingestor, _) = build(&config, &[&seed]);

        let outcome = ingestor.run_cycle().await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                error: IngestError::Fetch(_),
                released: false,
                ..
            }
        ));
        assert_eq!(ingestor.scheduler().stats().unwrap().eligible_links, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_releases_claim_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.scheduler.release_claim_on_fetch_error = true;
        let seed = format!("{}/caida", server.uri());
        let (ingestor, _) = build(&config, &[&seed]);

        let outcome = ingestor.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Failed { released: true, .. }));
        assert_eq!(ingestor.scheduler().stats().unwrap().eligible_links, 1);
    }

    #[tokio::test]
    async fn test_parse_failure_is_not_released() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_bytes(b"<p>\xff\xfe</p>".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.scheduler.release_claim_on_fetch_error = true;
        let seed = format!("{}/rota", server.uri());
        let (ingestor, _) = build(&config, &[&seed]);

        let outcome = ingestor.run_cycle().await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                error: IngestError::Parse(_),
                released: false,
                ..
            }
        ));
        assert_eq!(ingestor.scheduler().stats().unwrap().eligible_links, 0);
    }

    #[tokio::test]
    async fn test_empty_store_waits() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let (ingestor, _) = build(&config, &[]);

        let outcome = ingestor.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Wait(d) if d == Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let (ingestor, _) = build(&config, &[]);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(ingestor.run_worker(0, rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
