use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, Stream, StreamExt};
use metrics::counter;
use signal_core::{ChannelError, SignalStream, SignalingMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::AppState;

pub async fn signal_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, remote_addr: SocketAddr) {
    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<SignalingMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to encode signaling message");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    info!(%remote_addr, "signal socket connected");
    counter!("signal_sockets_opened_total", 1);

    let stream = SignalStream::new(
        state.dispatcher.clone(),
        state.registry.clone(),
        Box::new(tx),
    );
    stream.run(inbound_messages(receiver)).await;
    stream.close();
    drop(stream);
    writer.abort();

    info!(%remote_addr, "signal socket disconnected");
}

/// Decodes JSON text and binary frames. Undecodable frames are skipped; a
/// close frame ends the stream.
fn inbound_messages<S>(receiver: S) -> impl Stream<Item = Result<SignalingMessage, ChannelError>>
where
    S: Stream<Item = Result<Message, axum::Error>>,
{
    receiver.filter_map(|frame| async move {
        match frame {
            Ok(Message::Text(text)) => decode(text.as_bytes()),
            Ok(Message::Binary(data)) => decode(&data),
            Ok(Message::Close(_)) => Some(Err(ChannelError::Closed)),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(err) => Some(Err(ChannelError::Transport(err.to_string()))),
        }
    })
}

fn decode(bytes: &[u8]) -> Option<Result<SignalingMessage, ChannelError>> {
    match serde_json::from_slice::<SignalingMessage>(bytes) {
        Ok(message) => {
            debug!(session_id = message.session_id, kind = message.payload.kind(), "frame decoded");
            Some(Ok(message))
        }
        Err(err) => {
            counter!("signal_frames_rejected_total", 1);
            warn!(error = %err, "dropping undecodable signaling frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use signal_core::{ConnectionState, SignalPayload};

    #[test_timeout::timeout]
    async fn skips_malformed_frames_and_stops_at_close() {
        let frames = stream::iter(vec![
            Ok(Message::Text(r#"{"session_id":7,"state":"new"}"#.to_string())),
            Ok(Message::Text("not json".to_string())),
            Ok(Message::Ping(Vec::new())),
            Ok(Message::Binary(br#"{"session_id":8,"state":"closed"}"#.to_vec())),
            Ok(Message::Close(None)),
        ]);

        let decoded: Vec<_> = inbound_messages(frames).collect().await;
        assert_eq!(decoded.len(), 3);
        match &decoded[0] {
            Ok(message) => {
                assert_eq!(message.session_id, 7);
                assert_eq!(message.payload, SignalPayload::State(ConnectionState::New));
            }
            Err(err) => panic!("unexpected error {err}"),
        }
        assert!(matches!(&decoded[1], Ok(message) if message.session_id == 8));
        assert!(matches!(decoded[2], Err(ChannelError::Closed)));
    }
}
