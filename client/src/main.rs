use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    time::Duration,
};
use url::Url;

use cowatch_client::{
    channel::ChannelEvent,
    config::ViewerConfig,
    constants::{HEADLESS_VIDEO_SECS, LOCAL_WS_URL, VERSION},
    engine::SyncSession,
    headless::HeadlessPlayer,
    invite::build_room_link,
    player::{PlayerAdapter, PlayerError, PlayerRuntime, PlayerState},
    sync::SyncClient,
    utils::format_time,
    viewer::{LocalInput, Viewer},
    youtube::watch_url,
};

const MAX_CONNECT_ATTEMPTS: u32 = 6;
const CLOSE_TIMEOUT_SECS: u64 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cowatch_client=debug,info".into()),
        )
        .init();

    let config = ViewerConfig::load()?;
    tracing::info!(
        "cowatch {} joining room {} ({})",
        VERSION,
        config.room_id,
        if config.joined { "synced" } else { "watch only" }
    );

    let (player, player_events) = HeadlessPlayer::new(HEADLESS_VIDEO_SECS);
    let player = Arc::new(player);
    player.cue_video_by_id(&config.default_video);

    let sync = Arc::new(SyncClient::new());
    let (channel_tx, channel_rx) = mpsc::unbounded_channel::<ChannelEvent>();
    let disconnected = connect_with_fallback(&sync, &config.server_url, channel_tx).await?;

    let (input_tx, input_rx) = mpsc::unbounded_channel::<LocalInput>();
    tokio::spawn(read_commands(
        Arc::clone(&player),
        Arc::clone(&sync),
        config.room_id.clone(),
        input_tx.clone(),
    ));

    let ticker_player = Arc::clone(&player);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        loop {
            tick.tick().await;
            ticker_player.poll_end();
        }
    });

    let quit_tx = input_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx.send(LocalInput::Leave);
        }
    });

    // Ready fires once the player runtime finishes initializing.
    let runtime = PlayerRuntime::global();
    let ready_player = Arc::clone(&player);
    runtime.on_ready(move || ready_player.announce_ready());
    if runtime.begin_init() {
        runtime.mark_ready();
    }

    let session = SyncSession::new(
        config.room_id.clone(),
        config.joined,
        config.default_video.clone(),
    );
    let viewer = Viewer::new(session, player, Arc::clone(&sync), config.catch_up_warn_after)
        .with_quality(config.quality);
    let result = viewer.run(player_events, channel_rx, input_rx).await;

    // Let the pump write the final LeaveRoom before the runtime shuts down.
    sync.close();
    match tokio::time::timeout(Duration::from_secs(CLOSE_TIMEOUT_SECS), disconnected).await {
        Ok(_) => tracing::debug!("Sync connection closed"),
        Err(_) => tracing::warn!("Sync connection did not close within {CLOSE_TIMEOUT_SECS}s"),
    }
    result
}

async fn connect_with_fallback(
    sync: &Arc<SyncClient>,
    server_url: &str,
    channel_tx: mpsc::UnboundedSender<ChannelEvent>,
) -> Result<tokio::sync::oneshot::Receiver<()>> {
    let endpoints = connection_endpoints(server_url);

    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        for (label, url) in endpoints.iter() {
            if !url.contains("localhost") && !url.contains("127.0.0.1") {
                warm_up_backend(label, url).await;
            }

            let tx = channel_tx.clone();
            match sync
                .connect(url, move |msg| {
                    if let Some(event) = ChannelEvent::from_message(msg) {
                        let _ = tx.send(event);
                    }
                })
                .await
            {
                Ok(disconnected) => {
                    tracing::info!("Connected to {label} sync server at {url}");
                    sync.mark_connected(label);
                    return Ok(disconnected);
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to connect to {label} sync server at {url} (attempt {attempt}): {}",
                        e
                    );
                }
            }
        }

        let delay = Duration::from_secs(2 * attempt as u64);
        tokio::time::sleep(delay).await;
    }

    bail!("Sync server unreachable after {MAX_CONNECT_ATTEMPTS} attempts")
}

fn connection_endpoints(server_url: &str) -> Vec<(&'static str, String)> {
    let mut endpoints = vec![("configured", server_url.to_string())];
    if server_url != LOCAL_WS_URL && std::env::var("COWATCH_DISABLE_LOCAL").is_err() {
        endpoints.push(("local development", LOCAL_WS_URL.to_string()));
    }
    endpoints
}

async fn warm_up_backend(label: &str, ws_url: &str) {
    let Some(health_url) = health_url_from_ws(ws_url) else {
        return;
    };

    let client = reqwest::Client::new();
    match client
        .get(&health_url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
    {
        Ok(response) => tracing::info!(
            "Warmup request to {label} backend at {} returned {}",
            health_url,
            response.status()
        ),
        Err(e) => tracing::warn!(
            "Warmup request to {label} backend at {} failed: {}",
            health_url,
            e
        ),
    }
}

fn health_url_from_ws(ws_url: &str) -> Option<String> {
    let parsed = Url::parse(ws_url).ok()?;
    let scheme = match parsed.scheme() {
        "ws" => "http",
        "wss" => "https",
        _ => return None,
    };

    let mut http = parsed;
    http.set_scheme(scheme).ok()?;
    http.set_path("/healthz");
    http.set_query(None);
    http.set_fragment(None);
    Some(http.to_string())
}

/// Stdin stands in for the player controls a user would click.
async fn read_commands(
    player: Arc<HeadlessPlayer>,
    sync: Arc<SyncClient>,
    room_id: String,
    input: mpsc::UnboundedSender<LocalInput>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        let mut parts = line.trim().splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();

        let result = match command {
            "" => Ok(()),
            "play" => player.play_video(),
            "pause" => player.pause_video(),
            "seek" => match arg.parse::<f64>() {
                Ok(seconds) => scrub(&player, seconds),
                Err(_) => {
                    println!("usage: seek <seconds>");
                    Ok(())
                }
            },
            "rate" => match arg.parse::<f64>() {
                Ok(rate) => {
                    player.set_playback_rate(rate);
                    Ok(())
                }
                Err(_) => {
                    println!("usage: rate <multiplier>");
                    Ok(())
                }
            },
            "change" => {
                let _ = input.send(LocalInput::ChangeVideo(arg.to_string()));
                Ok(())
            }
            "status" => {
                print_status(&player, &sync);
                Ok(())
            }
            "link" => {
                println!("{}", build_room_link(&room_id, false));
                println!("{}", build_room_link(&room_id, true));
                Ok(())
            }
            "quit" | "leave" => {
                let _ = input.send(LocalInput::Leave);
                break;
            }
            other => {
                println!(
                    "unknown command {other}; try play, pause, seek, rate, change, status, link, quit"
                );
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("player: {e}");
        }
    }
}

/// Scrubbing in a real player pauses, seeks and resumes; peers follow along.
fn scrub(player: &HeadlessPlayer, seconds: f64) -> Result<(), PlayerError> {
    let was_playing = player.state() == PlayerState::Playing;
    if was_playing {
        player.pause_video()?;
    }
    player.seek_to(seconds, true)?;
    if was_playing {
        player.play_video()?;
    }
    Ok(())
}

fn print_status(player: &HeadlessPlayer, sync: &SyncClient) {
    let stats = sync.stats();
    println!(
        "{:?} {} at {} / {}",
        player.state(),
        player
            .video()
            .map(|id| watch_url(&id))
            .unwrap_or_else(|| "-".into()),
        format_time(player.current_time()),
        format_time(player.duration()),
    );
    println!(
        "room {} as {} via {}",
        sync.room_id().unwrap_or_else(|| "-".into()),
        sync.client_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into()),
        stats.endpoint.unwrap_or_else(|| "-".into()),
    );
    println!(
        "sent {} frames ({} B), received {} frames ({} B), rtt {}",
        stats.frames_out,
        stats.bytes_out,
        stats.frames_in,
        stats.bytes_in,
        stats
            .rtt_ms
            .map(|rtt| format!("{rtt:.0} ms"))
            .unwrap_or_else(|| "-".into()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_url_from_ws() {
        assert_eq!(
            health_url_from_ws("wss://relay.example.com/ws?x=1").as_deref(),
            Some("https://relay.example.com/healthz")
        );
        assert_eq!(
            health_url_from_ws("ws://localhost:3005/ws").as_deref(),
            Some("http://localhost:3005/healthz")
        );
        assert_eq!(health_url_from_ws("http://example.com"), None);
    }

    #[test]
    fn test_connection_endpoints() {
        assert_eq!(connection_endpoints(LOCAL_WS_URL).len(), 1);
        let endpoints = connection_endpoints("wss://relay.example.com/ws");
        assert_eq!(endpoints[0].1, "wss://relay.example.com/ws");
    }
}
