mod channel;
mod core;
mod heartbeat;
mod http;
mod interpreter;
mod loader;
mod mpv;
mod overlay;
mod pipeline;
mod scheduler;

use receiver_proto::config::Config;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::channel::ReconnectPolicy;
use crate::core::{ReceiverCore, ReceiverEvent};
use crate::mpv::MpvPipeline;
use crate::overlay::Display;
use crate::pipeline::PipelineKind;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The published snapshot changed.
    StateUpdated,
    /// A presentation decision for the host to draw.
    Display(Display),
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        // Only WARN and ERROR make it to the passive status log
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();
        let now = chrono::Local::now();
        message.push_str(&format!("{} ", now.format("%H:%M:%S")));
        message.push_str(&format!("[{}] ", level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// Headless host: presentation decisions and the status log go to the log file.
fn spawn_host_log(mut rx: broadcast::Receiver<BroadcastMessage>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(BroadcastMessage::Display(decision)) => match serde_json::to_string(&decision) {
                    Ok(json) => info!(target: "display", "{}", json),
                    Err(e) => debug!("display: cannot serialise {:?}: {}", decision, e),
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => debug!("host log lagged by {}", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(256);

    let data_dir = receiver_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("receiver.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,receiver_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let identity = config.session.identity();
    info!("Receiver session for room {}", identity.room_key());

    // Event channel — all inputs funnel into ReceiverCore
    let (event_tx, event_rx) = mpsc::channel::<ReceiverEvent>(256);
    let shutdown = CancellationToken::new();

    let primary = MpvPipeline::spawn(
        PipelineKind::Primary,
        &config.mpv,
        config.playback.video_volume,
        event_tx.clone(),
    )
    .await?;
    let background = MpvPipeline::spawn(
        PipelineKind::Background,
        &config.mpv,
        config.playback.bgm_volume,
        event_tx.clone(),
    )
    .await?;

    let (channel, channel_task) = channel::spawn_supervisor(
        identity.channel_url.clone(),
        ReconnectPolicy::from(&config.timing),
        event_tx.clone(),
        shutdown.clone(),
    );

    let receiver_core = ReceiverCore::new(
        &config,
        identity.clone(),
        Box::new(primary),
        Box::new(background),
        channel,
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    let _heartbeat = heartbeat::spawn_ticker(config.timing.heartbeat_interval(), event_tx.clone());
    let _host_log = spawn_host_log(broadcast_tx.subscribe());

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            receiver_core.subscribe(),
            event_tx.clone(),
        );
    }

    let client = reqwest::Client::builder()
        .user_agent(config.mpv.user_agent.clone())
        .build()?;
    if loader::spawn_pull(&identity, client, event_tx.clone()).is_none() {
        debug!("No api_url configured, waiting for a pushed playlist");
    }

    let ctrl_c_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = ctrl_c_tx.send(ReceiverEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Receiver initialised, running event loop");
    receiver_core.run(event_rx).await?;

    shutdown.cancel();
    let _ = channel_task.await;
    info!("Receiver stopped");
    Ok(())
}
