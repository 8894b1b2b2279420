//! WebSocket server implementation
//!
//! Provides a WebSocket server that listens on a configurable port and gives
//! every client connection its own handler bound to the shared game session.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info};

use super::protocol::{Frame, MalformedFramePolicy};
use super::socket::WsSocket;
use crate::config::{FileConfig, DEFAULT_BIND, DEFAULT_PORT};
use crate::game::GameSession;

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// What handlers do with text frames that are not valid messages
    pub malformed_frames: MalformedFramePolicy,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            malformed_frames: MalformedFramePolicy::default(),
        }
    }

    /// Set the malformed-frame policy
    pub fn with_malformed_frames(mut self, policy: MalformedFramePolicy) -> Self {
        self.malformed_frames = policy;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BIND.to_string(), DEFAULT_PORT)
    }
}

impl From<FileConfig> for ServerConfig {
    fn from(file: FileConfig) -> Self {
        Self::new(file.bind, file.port).with_malformed_frames(file.malformed_frames)
    }
}

/// WebSocket server hosting one shared game session
pub struct WebSocketServer {
    config: ServerConfig,
    session: Arc<GameSession>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server with a fresh game session
    pub fn new(config: ServerConfig) -> Self {
        let session = GameSession::new().with_malformed_policy(config.malformed_frames);
        Self::with_session(config, Arc::new(session))
    }

    /// Create a WebSocket server hosting an existing game session
    pub fn with_session(config: ServerConfig, session: Arc<GameSession>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            session,
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the WebSocket server
    ///
    /// This will listen for incoming connections and handle them concurrently.
    /// The server will shut down gracefully when a shutdown signal is received.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("WebSocket server listening on ws://{}", addr);

        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let session = Arc::clone(&self.session);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, session, shutdown_rx).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let users = self.session.users();
        if !users.is_empty() {
            let ids: Vec<String> = users.list().iter().map(|u| u.id.clone()).collect();
            info!(
                "Users still connected at shutdown: {} ({} cards on the table)",
                ids.join(", "),
                self.session.card_display().len()
            );
        }

        Ok(())
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    session: Arc<GameSession>,
    shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    info!("New connection from {}", peer_addr);

    // Upgrade to WebSocket
    let ws_stream = accept_async(stream).await?;

    let socket = Arc::new(WsSocket::new(Some(peer_addr)));
    // Held until the pump ends; the socket only keeps weak references
    let handler = session.new_handler();
    handler.set_connection(socket.clone());
    debug!("Connection {} handled by {}", peer_addr, handler.id());

    let result = pump_frames(ws_stream, &socket, shutdown_rx).await;

    // Runs the handler's cleanup whatever ended the loop
    socket.emit_close();
    info!("Connection from {} closed", peer_addr);
    result
}

/// Feed frames from the WebSocket into the socket until the connection ends
async fn pump_frames(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    socket: &WsSocket,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let peer_addr = socket.peer_addr();
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            // Receive messages from client
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received message from {:?}: {}", peer_addr, text);
                        socket.emit_message(&Frame::Utf8(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        socket.emit_message(&Frame::Binary(data));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pong messages
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {:?} requested close", peer_addr);
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {
                        // Raw frame, ignore
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {:?}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Connection closed by {:?}", peer_addr);
                        break;
                    }
                }
            }
            // Handler asked to drop the connection
            _ = socket.close_requested() => {
                info!("Closing connection to {:?} on handler request", peer_addr);
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
            // Handle shutdown signal
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, closing connection to {:?}", peer_addr);
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    #[test]
    fn test_server_config() {
        let config = ServerConfig::new("127.0.0.1".to_string(), 9000);
        assert_eq!(config.socket_addr(), "127.0.0.1:9000");
        assert_eq!(config.malformed_frames, MalformedFramePolicy::Drop);
    }

    #[test]
    fn test_server_config_from_file() {
        let file = FileConfig {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            malformed_frames: MalformedFramePolicy::Disconnect,
        };
        let config = ServerConfig::from(file);
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
        assert_eq!(config.malformed_frames, MalformedFramePolicy::Disconnect);
    }

    /// Poll until `check` holds or a second passes
    async fn wait_for(check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    async fn start_server(
        config: ServerConfig,
    ) -> (Arc<WebSocketServer>, Arc<GameSession>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let session =
            Arc::new(GameSession::new().with_malformed_policy(config.malformed_frames));
        let server = Arc::new(WebSocketServer::with_session(config, Arc::clone(&session)));
        let running = Arc::clone(&server);
        tokio::spawn(async move {
            running.serve(listener).await.unwrap();
        });
        (server, session, addr)
    }

    /// Read from the client until the server closes the connection
    async fn wait_for_close(
        client: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<TcpStream>,
        >,
    ) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(msg) = client.next().await {
                if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_login_and_disconnect_over_websocket() {
        let (server, session, addr) = start_server(ServerConfig::default()).await;
        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        client
            .send(Message::Text(r#"{"type":"login","id":"u1","name":"Alice"}"#.to_string()))
            .await
            .unwrap();
        client
            .send(Message::Text(r#"{"type":"choose_card","card":8}"#.to_string()))
            .await
            .unwrap();

        assert!(wait_for(|| session.card_display().len() == 1).await);
        assert_eq!(session.users().list()[0].name, "Alice");

        client.close(None).await.unwrap();
        assert!(wait_for(|| session.users().is_empty()).await);
        assert!(session.card_display().is_empty());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_frame_disconnects_when_configured() {
        let config = ServerConfig::default().with_malformed_frames(MalformedFramePolicy::Disconnect);
        let (server, session, addr) = start_server(config).await;
        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        client
            .send(Message::Text(r#"{"type":"login","id":"u1"}"#.to_string()))
            .await
            .unwrap();
        client.send(Message::Text("not json".to_string())).await.unwrap();

        // Server closes the connection, which logs the user out
        assert!(wait_for_close(&mut client).await);
        assert!(wait_for(|| session.users().is_empty()).await);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (server, session, addr) = start_server(ServerConfig::default()).await;
        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        client
            .send(Message::Text(r#"{"type":"login","id":"u1","name":"Alice"}"#.to_string()))
            .await
            .unwrap();
        client
            .send(Message::Text(r#"{"type":"choose_card","card":"?"}"#.to_string()))
            .await
            .unwrap();
        assert!(wait_for(|| session.card_display().len() == 1).await);

        server.shutdown();

        assert!(wait_for_close(&mut client).await);
        assert!(wait_for(|| session.users().is_empty()).await);
        assert!(session.card_display().is_empty());
    }
}
