//! branchd - database branching daemon
//!
//! Wires the metadata store, connection router, lifecycle manager and
//! cleanup scheduler against the main database, then supervises the
//! scheduler until shutdown. The HTTP/webhook surface that drives branch
//! creation lives in front of this service.

use branchd::config::Settings;
use branchd::lifecycle::BranchManager;
use branchd::models::{BranchStatus, BranchType, DataCloneMode, NewBranch};
use branchd::provision::PostgresProvisioner;
use branchd::router::{open_pool, BranchRouter, PgPoolOpener};
use branchd::scheduler::CleanupScheduler;
use branchd::store::{schema, MetadataStore, PgMetadataStore};
use branchd::BranchError;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting branchd - database branching service...");

    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let main_pool = open_pool(&settings.database.url, settings.database.max_pool_size, None)?;

    // verify the main connection before anything else touches it
    {
        let client = main_pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
    }
    info!("✅ Main database connection established");

    schema::ensure_schema(&main_pool).await?;

    let store: Arc<dyn MetadataStore> = Arc::new(PgMetadataStore::new(main_pool.clone()));
    ensure_main_branch(store.as_ref(), &settings.database.database).await?;

    let router = Arc::new(BranchRouter::new(
        main_pool.clone(),
        settings.database.url.clone(),
        settings.branching.enabled,
        settings.branching.pool.clone(),
        store.clone(),
        Arc::new(PgPoolOpener),
    ));

    let provisioner = Arc::new(PostgresProvisioner::new(
        main_pool.clone(),
        settings.branching.template_database.clone(),
    ));

    let manager = Arc::new(BranchManager::new(
        store.clone(),
        provisioner,
        router.clone(),
        settings.branching.clone(),
    ));

    let scheduler = CleanupScheduler::new(
        store.clone(),
        router.clone(),
        manager.clone(),
        settings.cleanup.clone(),
    );
    scheduler.start().await;

    info!(
        branching_enabled = settings.branching.enabled,
        max_branches = settings.branching.max_branches,
        "🌿 Branching service ready"
    );

    shutdown_signal().await;

    scheduler.stop().await;
    router.close_all_pools().await;
    main_pool.close();

    info!("👋 Shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,branchd=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Create the main branch row on first boot. Exactly one row has type=main;
/// it never expires and is never deletable.
async fn ensure_main_branch(
    store: &dyn MetadataStore,
    main_database: &str,
) -> anyhow::Result<()> {
    match store.get_main_branch().await {
        Ok(branch) => {
            info!(database = %branch.database_name, "main branch present");
            Ok(())
        }
        Err(BranchError::BranchNotFound(_)) => {
            let branch = store
                .create_branch(&NewBranch {
                    name: "Main".to_string(),
                    slug: "main".to_string(),
                    database_name: main_database.to_string(),
                    branch_type: BranchType::Main,
                    parent_branch_id: None,
                    data_clone_mode: DataCloneMode::FullClone,
                    github_repo: None,
                    github_pr_number: None,
                    github_pr_url: None,
                    seeds_path: None,
                    created_by: "system".to_string(),
                    expires_at: None,
                })
                .await?;
            store
                .update_branch_status(branch.id, BranchStatus::Ready, None)
                .await?;
            info!(database = %main_database, "main branch row created");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
