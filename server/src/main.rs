use axum::{
    extract::{
        ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

mod protocol;
mod relay;
mod state;

use protocol::Message;
use relay::Relay;

const DEFAULT_PORT: u16 = 3005;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cowatch_server=debug,info".into()),
        )
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/ws", get(ws_endpoint))
        .with_state(Relay::new());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("CoWatch relay listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn ws_endpoint(ws: WebSocketUpgrade, State(relay): State<Relay>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_client(socket, relay))
}

async fn serve_client(socket: WebSocket, relay: Relay) {
    let client_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut pending) = mpsc::unbounded_channel::<Message>();
    relay.attach(client_id, outbox.clone());

    let writer = tokio::spawn(async move {
        while let Some(msg) = pending.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to encode {:?}: {}", msg, e);
                    continue;
                }
            };
            if let Err(e) = sink.send(AxumWsMessage::Text(json)).await {
                tracing::debug!("Client socket closed while sending: {}", e);
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(AxumWsMessage::Text(text)) => {
                if let Err(e) = relay.handle_text(client_id, &text).await {
                    tracing::warn!("Rejected message from {}: {}", client_id, e);
                    let _ = outbox.send(Message::Error {
                        message: e.to_string(),
                    });
                }
            }
            Ok(AxumWsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket error from {}: {}", client_id, e);
                break;
            }
        }
    }

    relay.detach(client_id).await;
    writer.abort();
}
