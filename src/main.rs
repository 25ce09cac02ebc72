//! Prefetch Simulator
//!
//! Drives the audio and translation pipelines through a simulated reading
//! session. Generators are stand-ins with fixed latency and occasional
//! failures; everything else is the real cache, coordinator and scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use amnesia_prefetch::artifacts::{AudioClip, PageAudio, PageTranslation};
use amnesia_prefetch::cache::{CacheKey, HeapSizeEstimator};
use amnesia_prefetch::{ArtifactGenerator, Config, SessionRegistry};
use async_trait::async_trait;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DOCUMENT_ID: &str = "sample-book";
const PAGE_COUNT: usize = 40;
const SENTENCES_PER_PAGE: usize = 8;
/// How long the simulated reader stays on each page
const PAGE_DWELL: Duration = Duration::from_millis(750);

type AudioRegistry = SessionRegistry<Arc<PageAudio>, HeapSizeEstimator>;
type TranslationRegistry = SessionRegistry<Arc<PageTranslation>, HeapSizeEstimator>;

/// Speech synthesis stand-in
struct SimulatedSpeech {
    latency: Duration,
    calls: AtomicU64,
}

#[async_trait]
impl ArtifactGenerator<Arc<PageAudio>> for SimulatedSpeech {
    async fn generate(&self, key: &CacheKey) -> anyhow::Result<Arc<PageAudio>> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        // Every seventh call fails so retries show up in the logs
        if call % 7 == 6 {
            anyhow::bail!("speech vendor returned 503 for {}", key);
        }

        let clips = (0..SENTENCES_PER_PAGE)
            .map(|sentence_index| AudioClip {
                sentence_index,
                mime_type: "audio/mpeg".to_string(),
                duration_ms: 2400,
                data: vec![0; 24 * 1024],
            })
            .collect();

        Ok(Arc::new(PageAudio { clips }))
    }
}

/// Translation vendor stand-in
struct SimulatedTranslation {
    latency: Duration,
    target_language: String,
}

#[async_trait]
impl ArtifactGenerator<Arc<PageTranslation>> for SimulatedTranslation {
    async fn generate(&self, key: &CacheKey) -> anyhow::Result<Arc<PageTranslation>> {
        tokio::time::sleep(self.latency).await;

        let mut translation = PageTranslation::new(self.target_language.as_str());
        for sentence in 0..SENTENCES_PER_PAGE {
            translation.sentences.insert(
                sentence,
                format!("[{}] page {} sentence {}", self.target_language, key.page, sentence),
            );
        }

        Ok(Arc::new(translation))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "amnesia_prefetch=debug,prefetch_sim=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting prefetch simulator v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(audio = ?config.audio, "Audio pipeline config");
    tracing::info!(translation = ?config.translation, "Translation pipeline config");

    let audio: AudioRegistry = SessionRegistry::new(
        config.audio.clone(),
        Arc::new(SimulatedSpeech {
            latency: Duration::from_millis(400),
            calls: AtomicU64::new(0),
        }),
        HeapSizeEstimator,
    );
    let translation: TranslationRegistry = SessionRegistry::new(
        config.translation.clone(),
        Arc::new(SimulatedTranslation {
            latency: Duration::from_millis(1200),
            target_language: "es".to_string(),
        }),
        HeapSizeEstimator,
    );

    tokio::select! {
        result = simulate(&audio, &translation) => result?,
        _ = shutdown_signal() => {
            tracing::info!("Interrupted, closing sessions");
        },
    }

    let closed = audio.close_all() + translation.close_all();
    tracing::info!(closed, "Simulation complete");

    Ok(())
}

/// Read forward, jump ahead, read a little more
async fn simulate(audio: &AudioRegistry, translation: &TranslationRegistry) -> anyhow::Result<()> {
    let audio_session = audio.open(DOCUMENT_ID, PAGE_COUNT, 0)?;
    let translation_session = translation.open(DOCUMENT_ID, PAGE_COUNT, 0)?;

    let route: Vec<usize> = (0..8).chain(25..29).collect();
    for page in route {
        audio_session.navigate(page);
        translation_session.navigate(page);

        // The reader presses play and waits for this page's audio
        match audio_session.request(page).await {
            Ok(page_audio) => {
                tracing::info!(page, duration_ms = page_audio.duration_ms(), "Playing page audio")
            }
            Err(e) => tracing::warn!(page, error = %e, "Audio unavailable, skipping"),
        }

        tokio::time::sleep(PAGE_DWELL).await;
    }

    audio_session.wait_until_idle().await;
    translation_session.wait_until_idle().await;

    for stats in [audio_session.stats(), translation_session.stats()] {
        let json = serde_json::to_string(&stats)?;
        tracing::info!(stats = %json, "Session stats");
    }

    Ok(())
}

/// Ctrl+C / SIGTERM handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        },
    }
}
