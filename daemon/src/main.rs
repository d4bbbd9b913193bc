use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use pollyd::audio::{AudioDevice, AudioFormat, CpalBackend, DeviceProfile};
use pollyd::button::ButtonEventSource;
use pollyd::config::{self, Config};
use pollyd::controller::TurnController;
use pollyd::rate_limit::ControlRateLimiter;
use pollyd::relay::{ws, DirectRelay, OpenAiPipeline, RelayHub, RelayedRelay, ResponseRelay};
use pollyd::server::{CommandHandler, DaemonServer};
use pollyd::sounds::SoundBank;

async fn build_relay(config: &Config) -> Result<Arc<dyn ResponseRelay>> {
    let timeout = Duration::from_secs(config.relay.timeout_seconds);

    if config.relay.mode == "direct" {
        let pipeline = OpenAiPipeline::from_env(&config.pipeline)?;
        info!("Using direct speech pipeline at {}", config.pipeline.api_base);
        return Ok(Arc::new(DirectRelay::new(Arc::new(pipeline), timeout)));
    }

    let hub = Arc::new(RelayHub::new());
    let listener = ws::bind(&config.relay).await?;
    let ping_interval = Duration::from_secs(config.relay.ping_interval_seconds.max(1));
    let server_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        if let Err(e) = ws::serve(listener, server_hub, ping_interval).await {
            error!("Relay server stopped: {}", e);
        }
    });
    Ok(Arc::new(RelayedRelay::new(hub, timeout)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    info!("Polly daemon (pollyd) starting...");

    let config = config::load_config()?;

    let format = AudioFormat::from_config(&config.audio);
    let backend = Arc::new(CpalBackend::new(Duration::from_millis(
        config.audio.frame_timeout_ms,
    )));
    let device = AudioDevice::new(
        backend,
        DeviceProfile::from_config(&config.audio),
        format,
        config.audio.max_volume,
    );

    let relay = build_relay(&config).await?;
    let sounds = Arc::new(SoundBank::load(&config.sounds.dir));

    let controller = TurnController::new(device, relay, sounds, config.capture.clone());
    let status = controller.status_handle();
    let abort = controller.abort_handle();

    let (button, presses) = ButtonEventSource::from_config(&config.button);
    let controller_task = tokio::spawn(controller.run(presses));

    let handler = CommandHandler::new(
        button,
        status,
        ControlRateLimiter::from_config(&config.rate_limit),
    );
    let server = DaemonServer::new(config.control.socket_path.clone(), handler);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            abort.abort();
        }
    }

    controller_task.abort();
    Ok(())
}
