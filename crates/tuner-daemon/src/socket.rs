use crate::core::TunerEvent;
use crate::BroadcastMessage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tuner_core::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use tuner_core::state::StateManager;

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<TunerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };
        info!("TCP server listening at {}", addr);
        serve(listener, state_manager, event_tx, broadcast_tx).await;
    })
}

async fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<TunerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let connected = Arc::new(AtomicUsize::new(0));
    let mut client_id = 0usize;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                let count = connected.fetch_add(1, Ordering::SeqCst) + 1;
                info!("Client {} connected from {} ({} connected)", id, peer, count);

                let sm = state_manager.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();
                let connected = connected.clone();
                tokio::spawn(async move {
                    handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                    let count = connected.fetch_sub(1, Ordering::SeqCst) - 1;
                    info!("Client {} disconnected ({} connected)", id, count);
                });
            }
            Err(e) => error!("Failed to accept connection: {}", e),
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<TunerEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    match encode_hello(&state_manager).await {
        Ok(encoded) => {
            if write_half.write_all(&encoded).await.is_err() {
                return;
            }
        }
        Err(e) => warn!("Client {}: could not encode hello: {}", client_id, e),
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        debug!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        while read_buf.len() >= 4 {
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    debug!("Client {} sent {:?}", client_id, cmd);
                                    if event_tx.send(TunerEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("TunerEvent channel closed");
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) => break,
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let broadcast = match msg {
                    Ok(BroadcastMessage::StateUpdated) => None,
                    Ok(BroadcastMessage::Log(message)) => Some(Broadcast::Log { message }),
                    Ok(BroadcastMessage::Error(message)) => Some(Broadcast::Error { message }),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        None
                    }
                    Err(_) => break,
                };
                let encoded = match broadcast {
                    Some(b) => Message::Broadcast(b).encode(),
                    None => encode_state(&state_manager).await,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        rev: state.rev,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuner_core::protocol::{Command, TunerState};

    async fn read_message(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Message {
        let mut tmp = [0u8; 4096];
        loop {
            if let Ok((msg, consumed)) = Message::decode(buf) {
                buf.drain(..consumed);
                return msg;
            }
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "server closed the connection");
            buf.extend_from_slice(&tmp[..n]);
        }
    }

    #[tokio::test]
    async fn test_hello_then_commands_reach_the_core() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state_manager = Arc::new(StateManager::new());
        state_manager
            .publish(TunerState {
                volume: 0.7,
                ..Default::default()
            })
            .await;
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (broadcast_tx, _) = broadcast::channel(8);
        tokio::spawn(serve(listener, state_manager, event_tx, broadcast_tx.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        match read_message(&mut client, &mut buf).await {
            Message::Broadcast(Broadcast::Hello { rev, state, .. }) => {
                assert_eq!(rev, 1);
                assert!((state.volume - 0.7).abs() < 1e-6);
            }
            other => panic!("expected hello, got {other:?}"),
        }

        let frame = Message::Command(Command::Tune { frequency: 92.1 }).encode().unwrap();
        client.write_all(&frame).await.unwrap();
        match event_rx.recv().await {
            Some(TunerEvent::ClientCommand(Command::Tune { frequency })) => assert_eq!(frequency, 92.1),
            other => panic!("expected tune, got {other:?}"),
        }

        broadcast_tx
            .send(BroadcastMessage::Error("lookup failed".into()))
            .unwrap();
        match read_message(&mut client, &mut buf).await {
            Message::Broadcast(Broadcast::Error { message }) => assert_eq!(message, "lookup failed"),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
