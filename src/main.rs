use annosync::cache::CacheService;
use annosync::channel::{ChannelEvents, ChannelManager};
use annosync::config::load_config;
use annosync::error::SyncError;
use annosync::polling::{start_polling, HttpStatusSource, PollHandle, PollUpdate, StatusSource};
use annosync::protocol::ServerMessage;
use annosync::retry::RetryEngine;
use annosync::sync::TimeSyncEngine;
use annosync::types::PlaybackClock;
use clap::Parser;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "annosync")]
#[command(about = "Follow the live transcript/emotion annotation stream for a processed file")]
struct Args {
    /// File id whose annotation stream to follow
    file_id: String,

    /// Override SYNC_API_BASE
    #[arg(long)]
    api_base: Option<String>,

    /// Override SYNC_WS_BASE
    #[arg(long)]
    ws_base: Option<String>,
}

/// Routes channel traffic into the sync engine and caches, and signals the
/// main loop when a channel gives up and polling should take over.
struct AppEvents {
    clock: PlaybackClock,
    sync: Arc<Mutex<TimeSyncEngine>>,
    cache: Arc<Mutex<CacheService>>,
    fallback_tx: mpsc::UnboundedSender<String>,
}

#[async_trait::async_trait]
impl ChannelEvents for AppEvents {
    async fn on_message(&self, key: &str, message: ServerMessage) {
        match message {
            ServerMessage::Connected { message, .. } => {
                log::info!("🤝 '{}' handshake: {}", key, message.unwrap_or_default());
            }
            ServerMessage::StatusUpdate { report, .. }
            | ServerMessage::ProgressUpdate { report, .. } => {
                println!(
                    "⏳ {}: {} ({:.0}%)",
                    key,
                    report.message.as_deref().unwrap_or(&report.status),
                    report.progress
                );
            }
            ServerMessage::Completed { message, .. } => {
                println!("✅ {}: {}", key, message.unwrap_or_else(|| "done".into()));
            }
            ServerMessage::TimeUpdate { current_time } => {
                self.clock.set(current_time);
            }
            ServerMessage::EmotionUpdate { emotion, .. } => {
                let mut cache = self.cache.lock().unwrap();
                cache.set_emotion(
                    format!("{:.3}-{:.3}", emotion.start_time, emotion.end_time),
                    emotion.clone(),
                );
                drop(cache);
                self.sync.lock().unwrap().ingest_emotion(emotion);
            }
            ServerMessage::TranscriptUpdate { transcript, .. } => {
                if let Some(english) = &transcript.english_text {
                    self.cache
                        .lock()
                        .unwrap()
                        .set_translation(transcript.text.clone(), english.clone());
                }
                self.sync.lock().unwrap().ingest_transcript(transcript);
            }
            ServerMessage::Error { message } => {
                log::warn!("Server error on '{}': {}", key, message);
            }
            ServerMessage::Pong { .. } => {}
            ServerMessage::PlaybackState { current_time, .. } => {
                self.clock.set(current_time);
            }
            ServerMessage::SeekComplete { current_time } => {
                log::debug!("Seek acknowledged at {:.2}s", current_time);
            }
            ServerMessage::Unknown => {
                log::debug!("Ignoring unknown message type on '{}'", key);
            }
        }
    }

    async fn on_frame(&self, _key: &str, raw: &str) {
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        self.cache.lock().unwrap().log_socket_frame(now, raw);
    }

    async fn on_error(&self, key: &str, error: &SyncError) {
        log::warn!("Channel '{}' error: {}", key, error);
    }

    async fn on_reconnect_exhausted(&self, key: &str) {
        println!("📉 Channel '{}' gave up, falling back to polling", key);
        let _ = self.fallback_tx.send(key.to_string());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut config = load_config()?;
    if let Some(api_base) = args.api_base {
        config.api_base = api_base;
    }
    if let Some(ws_base) = args.ws_base {
        config.ws_base = ws_base;
    }

    let clock = PlaybackClock::new();
    let cache = Arc::new(Mutex::new(CacheService::new(config.cache.clone())));
    let sync = Arc::new(Mutex::new(TimeSyncEngine::new(
        clock.clone(),
        config.sync.clone(),
    )));

    // Initial state check, retried on transient failures
    let status_source: Arc<dyn StatusSource> =
        Arc::new(HttpStatusSource::new(config.api_base.clone()));
    let retry = RetryEngine::new(config.retry.clone());
    let file_id = args.file_id.clone();
    match retry
        .execute_default(|| {
            let source = Arc::clone(&status_source);
            let file_id = file_id.clone();
            async move { source.fetch_status(&file_id).await }
        })
        .await
    {
        Ok(report) => println!(
            "📋 {} is '{}' ({:.0}%)",
            args.file_id, report.status, report.progress
        ),
        Err(e) => log::warn!("Initial status check failed: {}", e),
    }

    let (fallback_tx, mut fallback_rx) = mpsc::unbounded_channel();
    let events = Arc::new(AppEvents {
        clock: clock.clone(),
        sync: Arc::clone(&sync),
        cache: Arc::clone(&cache),
        fallback_tx,
    });

    let manager = ChannelManager::new(config.channel.clone());
    manager.connect(
        &args.file_id,
        &config.processing_channel_url(&args.file_id),
        events,
    );

    println!("🎬 Following annotations for '{}'", args.file_id);
    println!("   Press Ctrl+C to exit");

    let mut display = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut poll_handle: Option<PollHandle> = None;

    loop {
        tokio::select! {
            Some(key) = fallback_rx.recv() => {
                if poll_handle.is_none() {
                    let source = Arc::clone(&status_source);
                    let handle = start_polling(
                        source,
                        &key,
                        |update| match update {
                            PollUpdate::Status(report) => {
                                println!("📊 poll: {} ({:.0}%)", report.status, report.progress);
                            }
                            PollUpdate::Error(message) => log::warn!("poll: {}", message),
                        },
                        config.poll.clone(),
                    );
                    poll_handle = Some(handle);
                }
            }

            _ = display.tick() => {
                let engine = sync.lock().unwrap();
                let transcript = engine.current_transcript().map(|s| s.text.clone());
                let emotion = engine.smoothed_emotion(None);
                drop(engine);
                if let Some(text) = transcript {
                    println!("📝 [{:.1}s] {}", clock.get(), text);
                }
                if let Some(emotion) = emotion {
                    println!(
                        "🎭 {} (confidence {:.2}, intensity {:.2})",
                        emotion.emotion_type, emotion.confidence, emotion.intensity
                    );
                }
            }

            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                manager.disconnect_all();
                if let Some(handle) = poll_handle.take() {
                    handle.stop();
                }
                cache.lock().unwrap().clear_all();
                println!("\n👋 Goodbye!");
                break;
            }
        }
    }

    Ok(())
}
