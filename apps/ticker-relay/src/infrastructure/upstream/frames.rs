//! WebSocket Frame Adapter
//!
//! Turns a `tokio-tungstenite` connection into the [`FrameStream`] the
//! multiplexer consumes. Control frames count as heartbeats; a close frame
//! or transport error ends the connection with an error so it is retried.

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::application::ports::{FeedError, FrameStream, UpstreamFrame};

/// Upstream WebSocket connection.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect to a WebSocket URL.
///
/// # Errors
///
/// Returns `FeedError::Connect` if the handshake fails.
pub async fn connect(url: &str) -> Result<UpstreamSocket, FeedError> {
    let (socket, _response) = connect_async(url)
        .await
        .map_err(|e| FeedError::Connect(e.to_string()))?;
    Ok(socket)
}

/// Map one WebSocket message to an upstream frame.
///
/// Returns `None` for messages that carry nothing.
#[must_use]
pub fn map_message(message: Message) -> Option<Result<UpstreamFrame, FeedError>> {
    match message {
        Message::Text(text) => Some(Ok(UpstreamFrame::Text(text.as_str().to_owned()))),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Some(Ok(UpstreamFrame::Text(text))),
            Err(_) => {
                tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame");
                None
            }
        },
        Message::Ping(_) | Message::Pong(_) => Some(Ok(UpstreamFrame::Heartbeat)),
        Message::Close(frame) => {
            tracing::info!(?frame, "Server sent close frame");
            Some(Err(FeedError::ConnectionClosed))
        }
        Message::Frame(_) => None,
    }
}

/// Wrap an open socket as a frame stream.
///
/// Pings are answered by `tungstenite` while the stream is polled.
#[must_use]
pub fn into_frames(socket: UpstreamSocket) -> FrameStream {
    Box::pin(socket.filter_map(|message| async move {
        match message {
            Ok(message) => map_message(message),
            Err(e) => Some(Err(FeedError::WebSocket(e.to_string()))),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_maps_to_text() {
        let frame = map_message(Message::Text("hello".into()));
        assert_eq!(frame, Some(Ok(UpstreamFrame::Text("hello".to_string()))));
    }

    #[test]
    fn control_frames_are_heartbeats() {
        assert_eq!(
            map_message(Message::Ping(vec![1].into())),
            Some(Ok(UpstreamFrame::Heartbeat))
        );
        assert_eq!(
            map_message(Message::Pong(vec![].into())),
            Some(Ok(UpstreamFrame::Heartbeat))
        );
    }

    #[test]
    fn close_frame_is_connection_closed() {
        assert_eq!(
            map_message(Message::Close(None)),
            Some(Err(FeedError::ConnectionClosed))
        );
    }

    #[test]
    fn binary_utf8_is_text() {
        let frame = map_message(Message::Binary(b"{}".to_vec().into()));
        assert_eq!(frame, Some(Ok(UpstreamFrame::Text("{}".to_string()))));
    }
}
