//! Transport seam.
//!
//! The session task only sees text frames through [`Transport`]. The default
//! [`TungsteniteConnector`] (feature `ws-native`) speaks WebSocket over
//! `tokio-tungstenite`; tests and embedders can supply their own [`Connector`].

use async_trait::async_trait;
use secrecy::SecretString;

use crate::websocket::error::WsResult;

/// One open connection carrying text frames.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> WsResult<()>;

    /// Next text frame. `None` once the peer has closed the connection.
    ///
    /// Must be cancel-safe: the session races it against other events.
    async fn recv(&mut self) -> Option<WsResult<String>>;

    async fn close(&mut self) -> WsResult<()>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        credential: Option<&SecretString>,
    ) -> WsResult<Box<dyn Transport>>;
}

/// The connector used when none is configured, if one is compiled in.
pub fn default_connector() -> Option<std::sync::Arc<dyn Connector>> {
    #[cfg(feature = "ws-native")]
    {
        Some(std::sync::Arc::new(native::TungsteniteConnector::default()))
    }
    #[cfg(not(feature = "ws-native"))]
    {
        None
    }
}

#[cfg(feature = "ws-native")]
pub use native::TungsteniteConnector;

#[cfg(feature = "ws-native")]
mod native {
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use secrecy::{ExposeSecret, SecretString};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::{Connector, Transport};
    use crate::websocket::error::{WebSocketError, WsResult};

    type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Handshake header carrying the API key.
    const API_KEY_HEADER: &str = "X-API-Key";

    /// WebSocket connector over `tokio-tungstenite`.
    #[derive(Debug, Clone)]
    pub struct TungsteniteConnector {
        /// Handshake timeout
        pub connect_timeout: Duration,
    }

    impl Default for TungsteniteConnector {
        fn default() -> Self {
            Self {
                connect_timeout: Duration::from_secs(30),
            }
        }
    }

    #[async_trait]
    impl Connector for TungsteniteConnector {
        async fn connect(
            &self,
            endpoint: &str,
            credential: Option<&SecretString>,
        ) -> WsResult<Box<dyn Transport>> {
            let mut request = endpoint
                .into_client_request()
                .map_err(|e| WebSocketError::InvalidUrl(e.to_string()))?;
            if let Some(api_key) = credential {
                let value = HeaderValue::from_str(api_key.expose_secret()).map_err(|_| {
                    WebSocketError::InvalidArgument("API key is not a valid header value".into())
                })?;
                request.headers_mut().insert(API_KEY_HEADER, value);
            }

            let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
                .await
                .map_err(|_| WebSocketError::ConnectionFailed("Connection timeout".into()))??;

            tracing::info!("WebSocket handshake completed with {}", endpoint);
            Ok(Box::new(TungsteniteTransport { stream }))
        }
    }

    struct TungsteniteTransport {
        stream: WsStream,
    }

    #[async_trait]
    impl Transport for TungsteniteTransport {
        async fn send(&mut self, text: String) -> WsResult<()> {
            self.stream
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| WebSocketError::SendFailed(e.to_string()))
        }

        async fn recv(&mut self) -> Option<WsResult<String>> {
            loop {
                match self.stream.next().await? {
                    Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => {
                        return Some(String::from_utf8(bytes.to_vec()).map_err(|_| {
                            WebSocketError::Transport("binary frame is not UTF-8".into())
                        }))
                    }
                    // tungstenite queues the pong reply itself
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                    Ok(Message::Close(frame)) => {
                        match frame {
                            Some(f) => tracing::info!(
                                "Server closed connection: {} {}",
                                u16::from(f.code),
                                f.reason
                            ),
                            None => tracing::info!("Server closed connection"),
                        }
                        return None;
                    }
                    Err(e) => return Some(Err(e.into())),
                }
            }
        }

        async fn close(&mut self) -> WsResult<()> {
            match self.stream.close(None).await {
                Ok(())
                | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
                | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }

}
