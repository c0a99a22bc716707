use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::signal;

use order_relay::api::{self, ApiState};
use order_relay::cli::Cli;
use order_relay::config::Config;
use order_relay::db;
use order_relay::error::AppError;
use order_relay::logging::init_logging;
use order_relay::metrics::RelayMetrics;
use order_relay::relay::{DedupStore, Dispatcher, RuleBook};
use order_relay::repository::{DeliveryRepository, SubscriberDirectory};
use order_relay::scheduler::{LoopControl, Orchestrator};
use order_relay::services::hh::HhClient;
use order_relay::services::media::FileMediaStore;
use order_relay::services::telegram::{BotChannelFeed, TelegramBotClient};
use order_relay::services::vk::VkClient;
use order_relay::sources::{
    GroupNetworkCollector, JobBoardCollector, JobBoardSettings, MediaStore, SourceCollector,
    TelegramCollector,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    if let Err(err) = run(cli).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = Config::from_env().map_err(AppError::Config)?;
    config.apply_cli(&cli);
    tracing::info!("Service starting with config: {:?}", config);

    let pool = db::create_pool(&config.database_url).await?;
    let deliveries = Arc::new(DeliveryRepository::new(pool.clone()));

    if cli.stats {
        let stats = deliveries
            .stats()
            .await
            .map_err(|err| AppError::Storage(err.to_string()))?;
        let rendered = serde_json::to_string_pretty(&stats)
            .map_err(|err| AppError::Startup(err.to_string()))?;
        println!("{}", rendered);
        return Ok(());
    }

    let metrics = Arc::new(RelayMetrics::new()?);
    let timeout = config.fetch_timeout();

    // ---- Transports ----
    let bot = TelegramBotClient::new(config.telegram_bot_token.clone(), timeout)?;
    let media: Arc<dyn MediaStore> = Arc::new(FileMediaStore::new(&config.media_dir, timeout)?);
    let rules = Arc::new(RuleBook::new(&config.rules_path));

    // ---- Collectors ----
    let mut collectors: Vec<Arc<dyn SourceCollector>> = vec![Arc::new(TelegramCollector::new(
        Arc::new(BotChannelFeed::new(bot.clone())),
        media.clone(),
    ))];
    match &config.vk_service_token {
        Some(token) => collectors.push(Arc::new(GroupNetworkCollector::new(
            Arc::new(VkClient::new(token.clone(), timeout)?),
            media.clone(),
        ))),
        None => tracing::warn!("VK_SERVICE_TOKEN not set, VK groups will not be polled"),
    }
    collectors.push(Arc::new(JobBoardCollector::new(
        Arc::new(HhClient::new(config.vacancy_query(), timeout)?),
        JobBoardSettings::default(),
    )));

    // ---- Pipeline ----
    let dispatcher = Dispatcher::new(
        Arc::new(SubscriberDirectory::new(pool)),
        Arc::new(bot),
        deliveries.clone(),
        metrics.clone(),
    )
    .with_send_delay(config.send_delay());

    let orchestrator = Orchestrator::new(
        collectors,
        rules,
        deliveries.clone(),
        dispatcher,
        metrics.clone(),
    )
    .with_media(media)
    .with_settings(config.loop_settings());

    let control = LoopControl::new();

    if cli.once {
        let report = orchestrator.run_cycle(&control).await.map_err(|err| {
            metrics.cycle_errors_total.inc();
            AppError::Startup(format!("cycle failed: {}", err))
        })?;
        tracing::info!(
            candidates = report.candidates,
            deliveries = report.deliveries,
            swept = report.swept,
            "single cycle finished"
        );
        return Ok(());
    }

    // ---- HTTP API ----
    let app = api::create_router(Arc::new(ApiState {
        dedup: deliveries,
        control: control.clone(),
        metrics,
    }));
    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    tracing::info!("Operational API listening on {}", config.api_bind);

    let server = {
        let control = control.clone();
        tokio::spawn(async move {
            let shutdown = async move { control.cancel_token().cancelled().await };
            if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                tracing::error!("API server error: {}", err);
            }
        })
    };

    {
        let control = control.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received. Stopping relay loop.");
                control.stop();
            }
        });
    }

    orchestrator.run(control).await;
    server
        .await
        .map_err(|err| AppError::Startup(format!("API task failed: {}", err)))?;
    Ok(())
}
