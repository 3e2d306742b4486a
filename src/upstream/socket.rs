// Push-stream (WebSocket) transport
// Author: kelexine (https://github.com/kelexine)

use crate::error::{ProxyError, Result};
use crate::translation::source::TextStream;
use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Connect to a push-stream URL and expose its text messages.
///
/// The stream ends when the server closes the connection.
pub async fn connect(wss_url: &str) -> Result<TextStream> {
    let (socket, _) = connect_async(wss_url)
        .await
        .map_err(|e| ProxyError::Socket(format!("connect failed: {}", e)))?;
    debug!("Connected to push stream");

    let messages = async_stream::stream! {
        futures::pin_mut!(socket);
        while let Some(message) = socket.next().await {
            match message {
                Ok(Message::Text(text)) => yield Ok(text),
                Ok(Message::Binary(bytes)) => yield Ok(String::from_utf8_lossy(&bytes).into_owned()),
                Ok(Message::Close(frame)) => {
                    debug!("Push stream closed: {:?}", frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Push stream error: {}", e);
                    yield Err(ProxyError::Socket(e.to_string()));
                    break;
                }
            }
        }
    };

    Ok(Box::pin(messages))
}
