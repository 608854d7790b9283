//! Startup sequencing: schema migrations first, then the HTTP listener.
//!
//! A failed migration aborts startup before any socket is bound. There is
//! no retry; the caller exits non-zero and the container is restarted by
//! its supervisor.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::Settings;
use crate::db::Database;
use crate::llm::LlmProviderFactory;
use crate::server::{run_server, AppState};
use crate::vectordb;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub previous_version: Option<i64>,
    pub current_version: Option<i64>,
}

impl MigrationReport {
    pub fn applied_any(&self) -> bool {
        self.previous_version != self.current_version
    }
}

#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    /// Brings the schema to the latest known revision.
    async fn migrate(&self) -> Result<MigrationReport>;
}

/// Runs `migrator` to completion and only then calls `start`. `start` is
/// never invoked if migration fails.
pub async fn sequence<M, F, Fut>(migrator: &M, start: F) -> Result<()>
where
    M: SchemaMigrator + ?Sized,
    F: FnOnce(MigrationReport) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    tracing::info!("applying schema migrations");
    let report = migrator
        .migrate()
        .await
        .context("startup aborted: schema migration failed")?;

    if report.applied_any() {
        tracing::info!(
            from = ?report.previous_version,
            to = ?report.current_version,
            "schema migrated"
        );
    } else {
        tracing::info!(version = ?report.current_version, "schema already up to date");
    }

    start(report).await
}

/// Connects to the database and applies pending migrations, nothing else.
pub async fn migrate_only(settings: &Settings) -> Result<MigrationReport> {
    let db = Database::connect(&settings.database).await?;
    let report = SchemaMigrator::migrate(&db).await?;
    tracing::info!(version = ?report.current_version, "migrations complete");
    Ok(report)
}

/// Full service startup. With `skip_migrations` the schema is assumed to
/// have been migrated already (e.g. by the container entrypoint).
pub async fn run(settings: Settings, skip_migrations: bool) -> Result<()> {
    settings.log_summary();
    let settings = Arc::new(settings);

    let db = Database::connect(&settings.database).await?;

    if skip_migrations {
        tracing::info!("skipping schema migrations");
        return start_server(settings, db).await;
    }

    let server_db = db.clone();
    sequence(&db, move |_report| start_server(settings, server_db)).await
}

async fn start_server(settings: Arc<Settings>, db: Database) -> Result<()> {
    tokio::fs::create_dir_all(&settings.files.files_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create files directory {}",
                settings.files.files_dir.display()
            )
        })?;

    let factory = LlmProviderFactory::new(&settings.llm);
    let generation = factory.generation_client()?;
    let embedding = factory.embedding_client()?;

    let vector_store = vectordb::create_vector_store(&settings.vector_db, &db)?;
    vector_store
        .connect()
        .await
        .with_context(|| format!("failed to connect to {} backend", vector_store.backend_name()))?;

    let state = AppState::new(settings.clone(), Arc::new(db), generation, embedding, vector_store);
    run_server(settings.server.bind_addr(), state, shutdown_signal()).await
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    struct FakeMigrator {
        fail: bool,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl SchemaMigrator for FakeMigrator {
        async fn migrate(&self) -> Result<MigrationReport> {
            self.events.lock().unwrap().push("migrate");
            if self.fail {
                anyhow::bail!("relation \"projects\" already exists");
            }
            Ok(MigrationReport {
                previous_version: None,
                current_version: Some(3),
            })
        }
    }

    #[tokio::test]
    async fn listener_never_starts_when_migration_fails() {
        let migrator = FakeMigrator {
            fail: true,
            events: Arc::default(),
        };
        let started = Arc::new(AtomicBool::new(false));

        let flag = started.clone();
        let result = sequence(&migrator, move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), anyhow::Error>(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("schema migration failed"));
        assert!(!started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn migration_completes_before_start() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let migrator = FakeMigrator {
            fail: false,
            events: events.clone(),
        };

        let start_events = events.clone();
        sequence(&migrator, move |report| async move {
            assert_eq!(report.current_version, Some(3));
            start_events.lock().unwrap().push("listen");
            Ok::<(), anyhow::Error>(())
        })
        .await
        .unwrap();

        assert_eq!(*events.lock().unwrap(), vec!["migrate", "listen"]);
    }

    #[tokio::test]
    async fn start_errors_are_propagated() {
        let migrator = FakeMigrator {
            fail: false,
            events: Arc::default(),
        };

        let err = sequence(&migrator, |_| async {
            Err::<(), _>(anyhow::anyhow!("address in use"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "address in use");
    }

    #[test]
    fn report_detects_applied_migrations() {
        let fresh = MigrationReport {
            previous_version: None,
            current_version: Some(3),
        };
        let unchanged = MigrationReport {
            previous_version: Some(3),
            current_version: Some(3),
        };
        assert!(fresh.applied_any());
        assert!(!unchanged.applied_any());
    }
}
