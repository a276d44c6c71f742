use actix_web::dev::Service;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use curation_service::config::{LogFormat, StoreBackend};
use curation_service::db::{
    BanditStateStore, ClickLog, ImpressionStore, InMemoryBanditStore, InMemoryClickLog,
    InMemoryImpressionStore, RedisBanditStore, RedisClickLog, RedisImpressionStore,
};
use curation_service::handlers::{
    self, authorize, correlation_id, reject, tag_correlation, AppState,
};
use curation_service::jobs::RewardDecayJob;
use curation_service::{BanditService, Config, CurationService, RewardDecayProcess};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct Stores {
    bandit: Arc<dyn BanditStateStore>,
    impressions: Arc<dyn ImpressionStore>,
    clicks: Arc<dyn ClickLog>,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,actix_web=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using in-memory stores; state is lost on restart");
            Ok(Stores {
                bandit: Arc::new(InMemoryBanditStore::new()),
                impressions: Arc::new(InMemoryImpressionStore::new()),
                clicks: Arc::new(InMemoryClickLog::new()),
            })
        }
        StoreBackend::Redis => {
            let client = redis::Client::open(config.redis.url.clone())
                .context("Failed to create Redis client")?;
            Ok(Stores {
                bandit: Arc::new(RedisBanditStore::new(client.clone())),
                impressions: Arc::new(RedisImpressionStore::new(client.clone())),
                clicks: Arc::new(RedisClickLog::new(client)),
            })
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.service.log_format);

    info!(
        service = %config.service.service_name,
        version = env!("CARGO_PKG_VERSION"),
        port = config.service.http_port,
        backend = ?config.store_backend,
        dimension = config.bandit.dimension,
        "Starting curation-service"
    );

    let stores = build_stores(&config)?;
    let bandit = Arc::new(BanditService::new(stores.bandit, config.bandit.clone()));
    let decay = Arc::new(RewardDecayProcess::new(
        bandit.clone(),
        stores.impressions.clone(),
        stores.clicks.clone(),
    ));
    let curation = Arc::new(CurationService::new(
        bandit,
        config.scoring.clone(),
        config.selection.clone(),
    ));

    // --mode decay: one sweep, then exit
    let decay_only = std::env::args()
        .collect::<Vec<_>>()
        .windows(2)
        .any(|w| w[0] == "--mode" && w[1] == "decay");

    if decay_only || config.decay.run_once {
        let mut job_config = config.decay.clone();
        job_config.run_once = true;
        let stats = RewardDecayJob::new(job_config, decay.clone())
            .run()
            .await
            .context("Reward decay sweep failed")?;
        info!(
            processed = stats.subjects_processed,
            failed = stats.subjects_failed,
            "Reward decay sweep finished"
        );
        return Ok(());
    }

    if config.decay.enabled {
        let job = RewardDecayJob::new(config.decay.clone(), decay.clone());
        tokio::spawn(async move {
            if let Err(e) = job.run().await {
                error!(error = %e, "Reward decay job stopped");
            }
        });
        info!(
            interval_secs = config.decay.interval_secs,
            ttl_secs = config.decay.ttl_secs,
            "Reward decay job started"
        );
    }

    let state = web::Data::new(AppState {
        service_name: config.service.service_name.clone(),
        curation,
        decay,
        impressions: stores.impressions,
        clicks: stores.clicks,
        decay_config: config.decay.clone(),
    });
    let api_key = config.service.internal_api_key.clone();
    if api_key.is_none() {
        warn!("INTERNAL_API_KEY not set - API is unauthenticated (development only)");
    }

    HttpServer::new(move || {
        let api_key = api_key.clone();
        App::new()
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(16 * 1024 * 1024))
            .configure(handlers::configure)
            .wrap_fn(move |req, srv| {
                let correlation = correlation_id(req.headers());
                let checked = authorize(req.path(), req.headers(), api_key.as_deref());
                let routed = match checked {
                    Ok(()) => Ok(srv.call(req)),
                    Err(e) => Err(reject(req, e, &correlation)),
                };
                async move {
                    let res = match routed {
                        Ok(fut) => tag_correlation(fut.await?.map_into_boxed_body(), &correlation),
                        Err(rejected) => rejected,
                    };
                    Ok::<_, actix_web::Error>(res)
                }
            })
    })
    .bind(("0.0.0.0", config.service.http_port))
    .context("Failed to bind HTTP port")?
    .run()
    .await
    .context("HTTP server error")?;

    Ok(())
}
