use std::net::SocketAddr;

use anyhow::Context;
use reelsmith_pipeline::{
    CaptionStrategy, Collaborators, Controller, PipelineConfig, Provider,
    collaborators::{Ffmpeg, assemblyai, pexels, tiktok, youtube},
};
use reelsmith_server::{AppState, HealthInfo, build_router, rate_limit::RateLimit};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reelsmith=info,tower_http=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .init();
    }
}

fn env_set(key: &str) -> bool {
    std::env::var(key).is_ok_and(|v| !v.trim().is_empty())
}

async fn health_info(provider: Provider, config: &PipelineConfig) -> HealthInfo {
    HealthInfo {
        language_model: provider.validate_api_key().is_ok(),
        footage: env_set(pexels::API_KEY_ENV),
        speech: env_set(tiktok::SESSION_ENV),
        transcription: config.caption_strategy == CaptionStrategy::Transcription
            && (env_set(assemblyai::API_KEY_ENV) || cfg!(feature = "local-whisper")),
        publishing: env_set(youtube::ACCESS_TOKEN_ENV),
        ffmpeg: Ffmpeg::new().available().await,
    }
}

async fn run() -> anyhow::Result<()> {
    let provider: Provider = std::env::var("REELSMITH_PROVIDER")
        .ok()
        .map(|p| p.parse::<Provider>().map_err(anyhow::Error::msg))
        .transpose()?
        .unwrap_or_default();
    let config = PipelineConfig::from_env();
    let health = health_info(provider, &config).await;
    if !health.ffmpeg {
        error!("ffmpeg was not found on PATH; renders will fail");
    }

    let collaborators =
        Collaborators::from_env(provider, &config).context("configuring collaborators")?;
    let controller = Controller::launch(config, collaborators)?;
    let app = build_router(
        AppState::new(controller.clone(), health).with_rate_limit(RateLimit::from_env()),
    );

    let host = std::env::var("REELSMITH_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("REELSMITH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, provider = provider.name(), "listening");

    // Peer addresses key the submission rate limit.
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    controller.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
