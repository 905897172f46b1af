//! Server network layer: websocket listener, per-connection tasks and the
//! background sweeper

use crate::config::Config;
use crate::error::ServerError;
use crate::game::GameServer;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{encode_server_message, timestamp_ms, GameError, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Listening server. Owns the accept loop and the background tasks.
pub struct Server {
    listener: TcpListener,
    game: Arc<GameServer>,
    sweep_interval: Duration,
}

impl Server {
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| ServerError::Network(format!("Failed to bind {}: {}", address, e)))?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            game: GameServer::new(
                Arc::new(config.game.clone()),
                config.server.max_connections,
            ),
            sweep_interval: Duration::from_millis(config.server.sweep_interval_ms.max(1)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn game(&self) -> Arc<GameServer> {
        Arc::clone(&self.game)
    }

    /// Spawns the task that turns fired round timers into timeouts
    fn spawn_deadline_dispatcher(&self) {
        let game = Arc::clone(&self.game);
        tokio::spawn(game.run_deadlines());
    }

    /// Spawns task that expires abandoned seats and idle rooms
    fn spawn_sweeper(&self) {
        let game = Arc::clone(&self.game);
        let period = self.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let report = game.sweep(timestamp_ms()).await;
                if report.expired_sessions > 0 || !report.removed_rooms.is_empty() {
                    debug!(
                        "Sweep: {} seats expired, {} rooms removed",
                        report.expired_sessions,
                        report.removed_rooms.len()
                    );
                }
            }
        });
    }

    /// Accepts connections until the listener fails
    pub async fn run(self) -> Result<(), ServerError> {
        self.spawn_deadline_dispatcher();
        self.spawn_sweeper();

        info!("Server started successfully");

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let game = Arc::clone(&self.game);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, game).await {
                    warn!("Connection from {} ended with error: {}", addr, e);
                }
            });
        }
    }
}

/// Drives one client from handshake to close.
///
/// Inbound frames are handled in arrival order. Outbound events come from
/// the connection's channel and are written by a separate loop, so a slow
/// peer never holds a room lock.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    game: Arc<GameServer>,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {}", e)))?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let ctx = match game.connect(addr, tx).await {
        Ok(ctx) => ctx,
        Err(error) => {
            warn!("Refusing connection from {}: {}", addr, error);
            if let Ok(text) = encode_server_message(&ServerMessage::Error {
                error: GameError::ServerFull,
            }) {
                let _ = ws_sender.send(Message::Text(text)).await;
            }
            let _ = ws_sender.close().await;
            return Ok(());
        }
    };
    let connection_id = ctx.connection_id;

    let incoming_task = async {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => game.handle_text(&ctx, &text).await,
                Ok(Message::Close(_)) => {
                    debug!("Connection {} requested close", connection_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("WebSocket error for connection {}: {}", connection_id, e);
                    break;
                }
            }
        }
    };

    let outgoing_task = async {
        while let Some(message) = rx.recv().await {
            let text = match encode_server_message(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode message for {}: {}", connection_id, e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(text)).await {
                debug!("Failed to send to connection {}: {}", connection_id, e);
                break;
            }
        }
    };

    tokio::select! {
        _ = incoming_task => {},
        _ = outgoing_task => {},
    }

    game.disconnect(&ctx).await;
    Ok(())
}
