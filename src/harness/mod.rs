//! Harness composition root
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `platform`: Platform services built from configuration
//! - `shutdown`: Signal handling for graceful shutdown

pub mod config;
mod loader;
mod platform;
mod shutdown;


use anyhow::{Context, Result};
use harness_core::{Platform, SimulatedDevice};
use harness_manifest::{ManifestSettings, ManifestSynchronizer, MANIFEST_TASK_NAME};
use harness_uploader::{
    FileRelay, UploadMultiplexer, UploadSource, UploaderParameters, PRIORITY_LOW,
    RELAY_TASK_NAME, UPLOADER_TASK_NAME,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use config::AppConfig;
pub use loader::{embedded_defaults, load_config};
pub use platform::build_platform;
pub use shutdown::wait_for_shutdown_signal;

struct RelayHandle {
    relay: FileRelay,
    /// Handle registered with the multiplexer
    source: Arc<dyn UploadSource>,
}

/// Every task of the harness, wired to one platform
pub struct Harness {
    device: Arc<SimulatedDevice>,
    synchronizer: ManifestSynchronizer,
    uploader: UploadMultiplexer,
    relay: Option<RelayHandle>,
    running: Mutex<bool>,
}

impl Harness {
    /// Build the platform from `config` and every task on top of it
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let (platform, device) = build_platform(config).await?;
        Self::with_platform(config, platform, device).await
    }

    /// Build every task on an existing platform
    pub async fn with_platform(
        config: &AppConfig,
        platform: Platform,
        device: Arc<SimulatedDevice>,
    ) -> Result<Self> {
        let settings = ManifestSettings::new(config.manifest_dir())
            .with_manifest_url(&config.manifest.url)
            .with_fallback_url(&config.manifest.fallback_url)
            .with_fallback_threshold(config.manifest.fallback_threshold)
            .with_compression(config.manifest.compress);
        let synchronizer = ManifestSynchronizer::new(settings, platform.clone())
            .await
            .context("Failed to prepare manifest cache")?;

        let uploader = UploadMultiplexer::with_defaults(
            platform.clone(),
            UploaderParameters {
                logger_url: config.uploader.logger_url.clone(),
                compress: config.uploader.compress,
                ..Default::default()
            },
        );

        let relay = if config.relay.enabled {
            let root = config.relay_root();
            tokio::fs::create_dir_all(&root)
                .await
                .context("Failed to create relay directory")?;
            let relay = FileRelay::new(root, platform.clone()).await;
            Some(RelayHandle {
                source: relay.as_source(),
                relay,
            })
        } else {
            None
        };

        Ok(Self {
            device,
            synchronizer,
            uploader,
            relay,
            running: Mutex::new(false),
        })
    }

    /// Start the synchronizer, then the other tasks, and wire them together.
    ///
    /// Starting a running harness is a logged no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if *running {
            info!("Not restarting running harness");
            return;
        }

        self.synchronizer.start().await;
        self.synchronizer
            .receive_manifest_updates(self.synchronizer.as_receiver(), MANIFEST_TASK_NAME)
            .await;

        self.uploader.start().await;
        self.synchronizer
            .receive_manifest_updates(self.uploader.as_receiver(), UPLOADER_TASK_NAME)
            .await;

        if let Some(handle) = &self.relay {
            handle.relay.start().await;
            self.synchronizer
                .receive_manifest_updates(handle.relay.as_receiver(), RELAY_TASK_NAME)
                .await;
            self.uploader
                .register_source(handle.source.clone(), PRIORITY_LOW);
        }

        *running = true;
        info!("Harness started");
    }

    /// Undo `start()` in reverse order.
    ///
    /// Stopping a stopped harness is a logged no-op.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if !*running {
            info!("Harness already stopped");
            return;
        }

        if let Some(handle) = &self.relay {
            self.uploader.unregister_source(&handle.source);
            self.synchronizer
                .discard_manifest_updates(RELAY_TASK_NAME)
                .await;
            handle.relay.stop().await;
        }

        self.synchronizer
            .discard_manifest_updates(UPLOADER_TASK_NAME)
            .await;
        self.uploader.stop().await;

        self.synchronizer
            .discard_manifest_updates(MANIFEST_TASK_NAME)
            .await;
        self.synchronizer.stop().await;

        *running = false;
        info!("Harness stopped");
    }

    /// Whether the harness is started
    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Wait until every task has run what is queued so far
    pub async fn wait_idle(&self) {
        self.synchronizer.task().wait_idle().await;
        self.uploader.task().wait_idle().await;
        if let Some(handle) = &self.relay {
            handle.relay.task().wait_idle().await;
        }
    }

    /// State document of every task, keyed by task name
    pub async fn status(&self) -> Result<Value> {
        let mut status = Map::new();
        status.insert(
            MANIFEST_TASK_NAME.to_string(),
            self.synchronizer.task().state_document().await?,
        );
        status.insert(
            UPLOADER_TASK_NAME.to_string(),
            self.uploader.task().state_document().await?,
        );
        if let Some(handle) = &self.relay {
            status.insert(
                RELAY_TASK_NAME.to_string(),
                handle.relay.task().state_document().await?,
            );
        }
        Ok(Value::Object(status))
    }

    /// Simulated device driving the power and network triggers
    pub fn device(&self) -> &Arc<SimulatedDevice> {
        &self.device
    }

    /// Manifest synchronizer
    pub fn synchronizer(&self) -> &ManifestSynchronizer {
        &self.synchronizer
    }

    /// Upload multiplexer
    pub fn uploader(&self) -> &UploadMultiplexer {
        &self.uploader
    }

    /// File relay, if enabled
    pub fn relay(&self) -> Option<&FileRelay> {
        self.relay.as_ref().map(|handle| &handle.relay)
    }
}

/// Run the harness until a shutdown signal, or for one round with `once`
pub async fn run(config: AppConfig, once: bool) -> Result<()> {
    let harness = Harness::build(&config).await?;
    harness.start().await;

    if once {
        harness.wait_idle().await;
        let status = harness.status().await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        wait_for_shutdown_signal().await;
    }

    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(timeout, harness.stop()).await.is_err() {
        warn!(timeout_secs = config.shutdown_timeout_secs, "Harness shutdown timed out");
    }

    info!("Harness shutdown complete");
    Ok(())
}
