use clap::Parser;
use sheen::configuration::get_configuration;
use sheen::telemetry::{get_subscriber, init_subscriber};
use sheen::workers::{runner, WorkerContext};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::sync::Arc;
use std::time::Duration;

/// Pipeline worker. One process serves one role; run several processes to
/// scale a stage out.
#[derive(Parser, Debug)]
#[command(name = "sheen-worker")]
struct Args {
    /// Which queue this process drains.
    #[arg(long, value_enum)]
    role: runner::Role,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = get_subscriber("sheen-worker".into(), "info".into());
    init_subscriber(subscriber);

    let settings = get_configuration().expect("Failed to read configuration.");

    let connect_options = PgConnectOptions::new()
        .host(&settings.database.host)
        .port(settings.database.port)
        .username(&settings.database.username)
        .password(&settings.database.password)
        .database(&settings.database.database_name)
        .ssl_mode(PgSslMode::Disable);

    let pg_pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options)
        .await
        .expect("Failed to connect to database.");

    let ctx = Arc::new(WorkerContext::new(pg_pool, settings));

    tracing::info!(role = ?args.role, "worker starting");
    runner::run(ctx, args.role).await
}
