use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use facelock_store::{CredentialDirectory, PendingEnrollments, ReferenceStore};

mod config;
mod dbus_interface;
mod engine;
mod sessions;

use dbus_interface::FacelockService;
use sessions::SessionRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facelockd starting");

    let cfg = config::Config::from_env();
    tracing::info!(
        credentials = %cfg.credentials_dir.display(),
        references = %cfg.references_dir.display(),
        distance_cutoff = cfg.distance_cutoff,
        accept_threshold = cfg.accept_threshold,
        "configuration loaded"
    );

    let credentials = Arc::new(CredentialDirectory::open(&cfg.credentials_dir)?);
    let references = Arc::new(ReferenceStore::open(&cfg.references_dir)?);
    let pending = Arc::new(PendingEnrollments::new(Duration::from_secs(
        cfg.enroll_token_ttl_secs,
    )));
    let sessions = Arc::new(SessionRegistry::new());

    let engine = engine::spawn_engine(
        engine::Pipeline::new(cfg.selection_policy, cfg.decision_policy()),
        Arc::clone(&credentials),
        Arc::clone(&references),
        Arc::clone(&pending),
    );

    let service = FacelockService::new(
        engine,
        credentials,
        references,
        pending,
        sessions,
        cfg.max_capture_bytes,
    );

    let _connection = zbus::connection::Builder::session()?
        .name("org.facelock.Facelock1")?
        .serve_at("/org/facelock/Facelock1", service)?
        .build()
        .await?;

    tracing::info!("facelockd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facelockd shutting down");

    Ok(())
}
