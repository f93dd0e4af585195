use coding_rules::{
    Clock, Housekeeper, Result, SystemClock,
    config::{self, database, rules::seed_rules, users::EnvUserDirectory},
    core::rule::list_rules_with_updaters,
};
use dotenvy::dotenv;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file (as early as possible)
    dotenv().ok(); // Make it non-fatal, env vars can be set externally
    info!("Attempted to load .env file.");

    // 3. Load the main application configuration
    let app_config = config::load_app_configuration()
        .inspect_err(|e| error!("Critical error loading application configuration: {}", e))?;
    info!("Successfully processed application configuration.");

    // 4. Initialize database
    let db = database::connect(&app_config.database_url()).await?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 5. Seed configured rules (if necessary)
    seed_rules(&db, clock.as_ref(), &app_config.rules)
        .await
        .inspect(|created| info!("Seeded {} coding rules.", created))
        .inspect_err(|e| error!("Failed to seed coding rules: {}", e))?;

    let directory = EnvUserDirectory::from_env();
    for entry in list_rules_with_updaters(&db, &directory).await? {
        info!(
            rule_id = entry.rule.id,
            name = %entry.rule.name,
            updater = entry.updater_name.as_deref().unwrap_or("unknown"),
            "Active coding rule"
        );
    }

    // 6. Run counter housekeeping until shutdown
    let cancel = CancellationToken::new();
    let housekeeping = Housekeeper::new(db.clone(), Arc::clone(&clock), app_config.housekeeping)
        .start(cancel.clone());
    info!("Counter housekeeping started. Press Ctrl-C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), housekeeping.join())
        .await
        .is_err()
    {
        error!("Counter housekeeping did not stop within 5 seconds");
    }

    if let Err(e) = db.close().await {
        error!("Failed to close database connection: {}", e);
    }
    info!("Counter housekeeping stopped");

    Ok(())
}
