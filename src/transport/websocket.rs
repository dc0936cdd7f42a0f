//! WebSocket transport with a SockJS fallback path
//!
//! STOMP brokers behind SockJS expose the raw WebSocket under
//! `<endpoint>/websocket`. The endpoint itself is tried first.

use crate::error::{RealtimeError, Result};
use crate::transport::{Connector, TransportLink};

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};
use url::Url;

/// Connects over WebSocket, translating `http(s)` endpoints to `ws(s)`
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    sockjs_fallback: bool,
}

impl WebSocketConnector {
    pub fn new(sockjs_fallback: bool) -> Self {
        Self { sockjs_fallback }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(true)
    }
}

/// URLs to try, in order, for an endpoint
pub fn candidate_urls(endpoint: &str, sockjs_fallback: bool) -> Result<Vec<String>> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| RealtimeError::Connection(format!("invalid endpoint {}: {}", endpoint, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::Connection(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::Connection(format!("cannot use scheme {}", scheme)))?;

    let mut urls = vec![url.to_string()];

    if sockjs_fallback && !url.path().ends_with("/websocket") {
        let path = format!("{}/websocket", url.path().trim_end_matches('/'));
        url.set_path(&path);
        urls.push(url.to_string());
    }

    Ok(urls)
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<TransportLink> {
        let mut last_error = None;

        for url in candidate_urls(endpoint, self.sockjs_fallback)? {
            debug!(url = %url, "Opening WebSocket");
            match connect_async(url.as_str()).await {
                Ok((stream, _response)) => {
                    let (sink, stream) = stream.split();

                    let outbound = sink
                        .sink_map_err(|e| RealtimeError::Transport(e.to_string()))
                        .with(|text: String| {
                            future::ready(Ok::<_, RealtimeError>(Message::Text(text.into())))
                        });

                    let inbound = stream.filter_map(|msg| {
                        future::ready(match msg {
                            Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                            Ok(Message::Binary(data)) => Some(
                                String::from_utf8(data.to_vec()).map_err(|e| {
                                    RealtimeError::Transport(format!(
                                        "binary message is not UTF-8: {}",
                                        e
                                    ))
                                }),
                            ),
                            // Close ends the stream; ping/pong are answered by tungstenite
                            Ok(_) => None,
                            Err(e) => Some(Err(RealtimeError::Transport(e.to_string()))),
                        })
                    });

                    return Ok(TransportLink {
                        outbound: Box::pin(outbound),
                        inbound: Box::pin(inbound),
                    });
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "WebSocket connect failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(RealtimeError::Connection(
            last_error.unwrap_or_else(|| "no endpoint to connect to".into()),
        ))
    }
}
