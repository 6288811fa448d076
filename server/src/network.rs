//! TCP and WebSocket transport adapters and their accept loops.
//!
//! Both adapters present the same behavior to the rest of the server:
//! inbound frames land in the session's bounded command channel (one frame
//! per line over TCP, one frame per message over WebSocket), outbound
//! frames are drained from the events channel in order, and a sticky
//! termination closes the connection after a best-effort final notice
//! frame carrying the reason.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use shared::Event;

use crate::client::ServerClient;
use crate::server::Server;

/// Capacity of the per-session inbound command channel.
pub const COMMAND_BUFFER: usize = 8;
/// Capacity of the per-session outbound events channel.
pub const EVENT_BUFFER: usize = 8;

/// Greeting written to TCP clients immediately after acceptance.
pub const HELLO_MESSAGE: &str = "hello Welcome to the backgammon server! Please log in by sending the 'login' command. You may specify a username, otherwise you will be assigned a random username. If you specify a username, you may also specify a password. Have fun!";

/// Binds the TCP listener and spawns its accept loop. Returns the bound
/// address so callers may listen on an ephemeral port.
pub async fn listen_tcp(server: Arc<Server>, address: &str) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(address).await?;
    let addr = listener.local_addr()?;
    info!("Listening for TCP connections on {}...", addr);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_tcp_connection(server.clone(), stream, peer));
                }
                Err(e) => {
                    warn!("failed to accept TCP connection: {}", e);
                }
            }
        }
    });
    Ok(addr)
}

/// Binds the WebSocket listener and spawns its accept loop.
pub async fn listen_ws(server: Arc<Server>, address: &str) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(address).await?;
    let addr = listener.local_addr()?;
    info!("Listening for WebSocket connections on {}...", addr);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_ws_connection(server.clone(), stream, peer));
                }
                Err(e) => {
                    warn!("failed to accept WebSocket connection: {}", e);
                }
            }
        }
    });
    Ok(addr)
}

async fn handle_tcp_connection(server: Arc<Server>, stream: TcpStream, peer: SocketAddr) {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let client = Arc::new(ServerClient::new(server.next_client_id(), events_tx));
    debug!("Client {} connected from {}", client.id, peer);

    client.send_raw(HELLO_MESSAGE.as_bytes().to_vec()).await;
    server.register_client(client.clone(), commands_rx);
    handle_read_write_tcp(stream, &client, commands_tx, events_rx).await;
    server.unregister_client(&client).await;
}

async fn handle_ws_connection(server: Arc<Server>, stream: TcpStream, peer: SocketAddr) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed with {}: {}", peer, e);
            return;
        }
    };
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let client = Arc::new(ServerClient::new(server.next_client_id(), events_tx));
    debug!("Client {} connected from {} (WebSocket)", client.id, peer);

    server.register_client(client.clone(), commands_rx);
    handle_read_write_ws(ws_stream, &client, commands_tx, events_rx).await;
    server.unregister_client(&client).await;
}

/// Runs the TCP read loop until the peer closes, a read fails, or the
/// session is terminated. The paired writer task is joined before
/// returning so the final frame gets out.
async fn handle_read_write_tcp(
    stream: TcpStream,
    client: &Arc<ServerClient>,
    commands_tx: mpsc::Sender<Vec<u8>>,
    events_rx: mpsc::Receiver<Vec<u8>>,
) {
    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(tcp_write_loop(writer, events_rx, client.clone()));

    let mut lines = BufReader::new(reader).lines();
    let mut terminated = client.termination_subscribe();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if commands_tx.send(line.into_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("read error from client {}: {}", client.label(), e);
                    break;
                }
            },
            _ = terminated.changed() => {
                if client.terminated() {
                    break;
                }
            }
        }
    }

    client.terminate("");
    let _ = writer_task.await;
}

async fn tcp_write_loop(
    writer: OwnedWriteHalf,
    mut events_rx: mpsc::Receiver<Vec<u8>>,
    client: Arc<ServerClient>,
) {
    let mut writer = BufWriter::new(writer);
    let mut terminated = client.termination_subscribe();
    loop {
        tokio::select! {
            frame = events_rx.recv() => match frame {
                Some(frame) => {
                    if write_frame(&mut writer, &frame).await.is_err() {
                        client.terminate("");
                        break;
                    }
                }
                None => break,
            },
            _ = terminated.changed() => {
                if client.terminated() {
                    break;
                }
            }
        }
    }

    if let Some(reason) = client.termination_reason() {
        let notice = Event::Notice { message: reason };
        let _ = write_frame(&mut writer, &notice.encode(client.json())).await;
    }
    let _ = writer.shutdown().await;
}

async fn write_frame(writer: &mut BufWriter<OwnedWriteHalf>, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// WebSocket counterpart of `handle_read_write_tcp`: one command per
/// message, text or binary.
async fn handle_read_write_ws(
    ws_stream: WebSocketStream<TcpStream>,
    client: &Arc<ServerClient>,
    commands_tx: mpsc::Sender<Vec<u8>>,
    events_rx: mpsc::Receiver<Vec<u8>>,
) {
    let (sink, stream) = ws_stream.split();
    let writer_task = tokio::spawn(ws_write_loop(sink, events_rx, client.clone()));

    let mut stream: SplitStream<WebSocketStream<TcpStream>> = stream;
    let mut terminated = client.termination_subscribe();
    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if commands_tx.send(text.into_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if commands_tx.send(data).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // protocol ping/pong frames
                Some(Err(e)) => {
                    debug!("WebSocket error from client {}: {}", client.label(), e);
                    break;
                }
            },
            _ = terminated.changed() => {
                if client.terminated() {
                    break;
                }
            }
        }
    }

    client.terminate("");
    let _ = writer_task.await;
}

async fn ws_write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut events_rx: mpsc::Receiver<Vec<u8>>,
    client: Arc<ServerClient>,
) {
    let mut terminated = client.termination_subscribe();
    loop {
        tokio::select! {
            frame = events_rx.recv() => match frame {
                Some(frame) => {
                    let text = String::from_utf8_lossy(&frame).into_owned();
                    if sink.send(Message::Text(text)).await.is_err() {
                        client.terminate("");
                        break;
                    }
                }
                None => break,
            },
            _ = terminated.changed() => {
                if client.terminated() {
                    break;
                }
            }
        }
    }

    if let Some(reason) = client.termination_reason() {
        let notice = Event::Notice { message: reason };
        let text = String::from_utf8_lossy(&notice.encode(client.json())).into_owned();
        let _ = sink.send(Message::Text(text)).await;
    }
    let _ = sink.close().await;
}
