//! End-to-end ingestion tests

use babble_ingest::config::{
    Config, FetcherConfig, IngestConfig, ParserConfig, SchedulerConfig, StorageConfig,
};
use babble_ingest::crawler::{run_ingest_until, CycleOutcome, Fetcher, Ingestor};
use babble_ingest::storage::{BlobStore, FsBlobStore, LinkStore, SqliteLinkStore};
use babble_ingest::{normalize, DomainScheduler, FetchVersion};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFRESH: Duration = Duration::from_secs(3600);

/// Creates a test configuration storing everything under `dir`
fn create_test_config(dir: &TempDir) -> Config {
    Config {
        scheduler: SchedulerConfig {
            cooldown_secs: 1,
            refresh_period_secs: 3600,
            error_backoff_secs: 1,
            release_claim_on_fetch_error: false,
        },
        ingest: IngestConfig {
            workers: 2,
            fetch_version: FetchVersion::CURRENT.get(),
        },
        parser: ParserConfig::default(),
        fetcher: FetcherConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
            timeout_secs: 5,
            https_only: false,
        },
        storage: StorageConfig {
            database_path: dir.path().join("links.db").display().to_string(),
            blob_dir: dir.path().join("blobs").display().to_string(),
        },
    }
}

fn open_store(config: &Config, version: FetchVersion) -> SqliteLinkStore {
    SqliteLinkStore::new(Path::new(&config.storage.database_path), version)
        .expect("Failed to open link store")
}

fn seed(config: &Config, urls: &[String]) {
    let mut store = open_store(config, config.ingest.fetch_version());
    let links: Vec<_> = urls.iter().map(|u| normalize(u).unwrap()).collect();
    store.insert_links(&links).unwrap();
}

fn build_ingestor(
    config: &Config,
    version: FetchVersion,
) -> Ingestor<SqliteLinkStore, FsBlobStore> {
    build_ingestor_with_cooldown(config, version, Duration::from_millis(20))
}

fn build_ingestor_with_cooldown(
    config: &Config,
    version: FetchVersion,
    cooldown: Duration,
) -> Ingestor<SqliteLinkStore, FsBlobStore> {
    let store = open_store(config, version);
    let scheduler = Arc::new(DomainScheduler::initialize(store, cooldown, REFRESH).unwrap());
    let blobs = Arc::new(FsBlobStore::new(&config.storage.blob_dir).unwrap());
    let fetcher = Fetcher::new(&config.fetcher).unwrap();
    Ingestor::new(scheduler, blobs, fetcher, config)
}

/// Runs cycles until the scheduler has nothing left, returning processed identifiers
async fn drain(ingestor: &Ingestor<SqliteLinkStore, FsBlobStore>) -> Vec<String> {
    let mut processed = Vec::new();
    for _ in 0..100 {
        match ingestor.run_cycle().await.unwrap() {
            CycleOutcome::Processed { identifier, .. } => processed.push(identifier),
            CycleOutcome::Wait(wait) if wait == REFRESH => break,
            CycleOutcome::Wait(wait) => tokio::time::sleep(wait).await,
            CycleOutcome::DomainEmpty { .. } | CycleOutcome::Failed { .. } => {}
        }
    }
    processed
}

async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_discovered_links_are_ingested() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(
        &server,
        "/",
        r##"<html lang="es"><body>
            <h1>Portada</h1>
            <a href="/politica">Política</a>
            <a href="/deportes">Deportes</a>
            <a href="/foto.jpg">Foto</a>
            <a href="#arriba">Arriba</a>
        </body></html>"##
            .to_string(),
    )
    .await;
    mount_page(
        &server,
        "/politica",
        format!(
            r#"<html lang="es"><body><p>Elecciones</p><a href="{}/">Inicio</a></body></html>"#,
            base
        ),
    )
    .await;
    mount_page(
        &server,
        "/deportes",
        r#"<html lang="es"><body><p>Fútbol</p></body></html>"#.to_string(),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    seed(&config, &[format!("{}/", base)]);

    let ingestor = build_ingestor(&config, FetchVersion::CURRENT);
    let processed = drain(&ingestor).await;

    let host = normalize(&base).unwrap().identifier;
    assert_eq!(
        processed,
        vec![
            host.clone(),
            format!("{}|politica", host),
            format!("{}|deportes", host),
        ]
    );

    let store = open_store(&config, FetchVersion::CURRENT);
    let stats = store.stats().unwrap();
    assert_eq!(stats.total_links, 3);
    assert_eq!(stats.fetched_links, 3);
    assert_eq!(stats.eligible_links, 0);

    let blobs = FsBlobStore::new(&config.storage.blob_dir).unwrap();
    let link = store
        .get_link(&format!("{}|politica", host))
        .unwrap()
        .unwrap();
    let text = blobs.read(&link.text_handle.unwrap()).unwrap();
    assert!(String::from_utf8(text).unwrap().contains("Elecciones"));
    let html = blobs.read(&link.html_handle.unwrap()).unwrap();
    assert!(String::from_utf8(html).unwrap().contains("<p>Elecciones</p>"));
}

#[tokio::test]
async fn test_version_bump_reprocesses_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nota"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Nota</p>"))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    seed(&config, &[format!("{}/nota", server.uri())]);

    let first = build_ingestor(&config, FetchVersion::V4);
    assert_eq!(drain(&first).await.len(), 1);
    drop(first);

    // Same version again: nothing to do
    let again = build_ingestor(&config, FetchVersion::V4);
    assert!(drain(&again).await.is_empty());
    drop(again);

    let upgraded = build_ingestor(&config, FetchVersion::V5);
    assert_eq!(drain(&upgraded).await.len(), 1);
}

#[tokio::test]
async fn test_failed_fetch_does_not_halt_loop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rota"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_page(&server, "/sana", "<p>Bien</p>".to_string()).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    seed(
        &config,
        &[
            format!("{}/rota", server.uri()),
            format!("{}/sana", server.uri()),
        ],
    );

    let ingestor = build_ingestor(&config, FetchVersion::CURRENT);
    let processed = drain(&ingestor).await;

    assert_eq!(processed.len(), 1);
    assert!(processed[0].ends_with("|sana"));

    // The failed link keeps its claim under the default policy
    let stats = open_store(&config, FetchVersion::CURRENT).stats().unwrap();
    assert_eq!(stats.eligible_links, 0);
    assert_eq!(stats.fetched_links, 1);
}

#[tokio::test]
async fn test_seed_upsert_requeues_fetched_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/portada"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Portada</p>"))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let url = format!("{}/portada", server.uri());
    seed(&config, &[url.clone()]);

    let ingestor = build_ingestor(&config, FetchVersion::CURRENT);
    assert_eq!(drain(&ingestor).await.len(), 1);

    ingestor
        .scheduler()
        .with_store(|s| s.upsert_seed_links(&[normalize(&url).unwrap()], Some("rss"), Some(42)))
        .unwrap()
        .unwrap();
    ingestor.scheduler().refresh().unwrap();
    assert_eq!(drain(&ingestor).await.len(), 1);

    let link = ingestor
        .scheduler()
        .with_store(|s| s.get_link(&normalize(&url).unwrap().identifier))
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(link.source_id.as_deref(), Some("rss"));
    assert_eq!(link.seed_ingest_timestamp, Some(42));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_pool_runs_until_shutdown() {
    let server = MockServer::start().await;
    mount_page(&server, "/a", "<p>A</p>".to_string()).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    seed(&config, &[format!("{}/a", server.uri())]);

    run_ingest_until(config.clone(), tokio::time::sleep(Duration::from_millis(1500)))
        .await
        .unwrap();

    let stats = open_store(&config, FetchVersion::CURRENT).stats().unwrap();
    assert_eq!(stats.fetched_links, 1);
    assert_eq!(stats.eligible_links, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_stores_identical_empty_pages() {
    const PAGES: usize = 12;
    const WORKERS: usize = 4;

    // Every page has the same markup and no text-bearing tags
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><div><img src=\"/x.png\"></div></body></html>")
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let urls: Vec<String> = (0..PAGES)
        .map(|i| format!("{}/vacia/{}", server.uri(), i))
        .collect();
    seed(&config, &urls);

    // No cooldown so several workers fetch from the one test domain at once
    let ingestor = build_ingestor_with_cooldown(&config, FetchVersion::CURRENT, Duration::ZERO);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles: Vec<_> = (0..WORKERS)
        .map(|id| tokio::spawn(ingestor.clone().run_worker(id, shutdown_rx.clone())))
        .collect();

    let deadline = Instant::now() + Duration::from_secs(10);
    while ingestor.scheduler().stats().unwrap().fetched_links < PAGES as u64
        && Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    let blobs = FsBlobStore::new(&config.storage.blob_dir).unwrap();
    let mut text_handles = Vec::new();
    for url in &urls {
        let link = ingestor
            .scheduler()
            .with_store(|s| s.get_link(&normalize(url).unwrap().identifier))
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(link.fetched_at.is_some(), "{} was never recorded", url);
        text_handles.push(link.text_handle.unwrap());
    }

    text_handles.dedup();
    assert_eq!(text_handles.len(), 1);
    assert!(blobs.read(&text_handles[0]).unwrap().is_empty());

    let stats = ingestor.scheduler().stats().unwrap();
    assert_eq!(stats.fetched_links, PAGES as u64);
    assert_eq!(stats.eligible_links, 0);
}
