use anyhow::Result;
use tokio_util::sync::CancellationToken;

mod classify;
mod cli;
mod discovery;
mod epoch;
mod export;
mod gateway;
mod jobs;
mod metrics;
mod progress;
mod rounds;
mod score;
mod source;

#[tokio::main]
async fn main() -> Result<()> {
    let config = common::config::Config::load()?;

    let dispatch = common::observability::build_dispatch(&config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    tracing::info!("wallet-scout starting");

    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = common::db::Database::open(&config.database.path)?;
    db.run_migrations()?;

    // Store-only commands exit without touching the network.
    if cli::run_local(&db, &config, &cmd)? {
        return Ok(());
    }

    if config.observability.prometheus_port != 0 {
        metrics::install_prometheus(config.observability.prometheus_port)?;
    }
    metrics::describe();

    let settings = jobs::rpc_settings(&config);
    let sol = common::ledger::SolanaClient::with_settings(&config.ledger.rpc_url, &settings)?;
    let price = common::price::PriceClient::from_config(
        config.price.base_url.as_deref(),
        config.price.api_key.as_deref(),
    );

    // User interrupt stops long scans at the next step boundary; everything
    // already written stays valid.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after current step");
                cancel.cancel();
            }
        });
    }

    match cmd {
        cli::Command::Scan {
            token,
            mode,
            top_n,
        } => jobs::run_scan(&db, &sol, &config, &token, mode, top_n, &cancel).await,
        cli::Command::SoftFilter { limit } => {
            jobs::run_soft_filter(&db, &config, limit, &cancel).await
        }
        cli::Command::HardVerify { limit } => {
            jobs::run_hard_verify(&db, &sol, &config, limit, &cancel).await
        }
        cli::Command::T0 { token } => jobs::run_t0(&db, &sol, &config, &token).await,
        cli::Command::Rounds { token, addr, limit } => {
            jobs::run_rounds(
                &db,
                &sol,
                price.as_ref(),
                &config,
                &token,
                addr.as_deref(),
                limit,
                &cancel,
            )
            .await
        }
        cli::Command::Score { token, set, limit } => {
            jobs::run_score(&db, &sol, price.as_ref(), &config, &token, set, limit, &cancel).await
        }
        cli::Command::Select { token, top_k } => {
            jobs::run_select(&db, &config, &token, top_k).await
        }
        // Handled by run_local above.
        cli::Command::ImportToken { .. }
        | cli::Command::ExportList { .. }
        | cli::Command::View { .. }
        | cli::Command::ResetToken { .. } => Ok(()),
    }
}
