// =============================================================================
// Websocket Feed Adapter — inbound action stream (C9)
// =============================================================================
//
// `WebsocketFeed` is the trait boundary; `TungsteniteFeed` the real
// connection (JSON frames decoded into `Action`), `FakeFeed` a scriptable
// queue used by session-controller tests. Grounded in
// `market_data/orderbook.rs::run_depth_stream`'s connect-then-loop shape,
// generalized from a single Binance depth stream to an arbitrary JSON
// action stream.
// =============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::rest::RestError;

#[async_trait]
pub trait WebsocketFeed: Send + Sync {
    /// Returns the next decoded action, or `None` once the stream has
    /// closed cleanly. A transport error surfaces as `Err`.
    async fn next_action(&mut self) -> Result<Option<Action>, RestError>;
}

/// Real feed, backed by `tokio-tungstenite`.
pub struct TungsteniteFeed {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TungsteniteFeed {
    /// Connect to `websocket_base`, appending `?token=<api_key>` when present
    /// (spec §6: the api key rides the websocket URL, not a header).
    pub async fn connect(websocket_base: &str, api_key: Option<&str>) -> Result<Self, RestError> {
        let url = match api_key {
            Some(key) => format!("{websocket_base}?token={key}"),
            None => websocket_base.to_string(),
        };
        info!(url = %websocket_base, "connecting to websocket feed");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| RestError::Http(e.to_string()))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl WebsocketFeed for TungsteniteFeed {
    async fn next_action(&mut self) -> Result<Option<Action>, RestError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(RestError::Http(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    let raw: serde_json::Value = serde_json::from_str(&text)
                        .map_err(|e| RestError::Decode(e.to_string()))?;
                    return Ok(Some(Action::from_json(raw)));
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = self.stream.send(Message::Pong(payload)).await {
                        warn!(error = %e, "failed to reply to websocket ping");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "websocket closed by peer");
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// In-memory `WebsocketFeed` double: yields the queued actions in order,
/// then returns `None`.
#[derive(Default)]
pub struct FakeFeed {
    pub queue: std::collections::VecDeque<Action>,
}

impl FakeFeed {
    pub fn from_values(values: Vec<serde_json::Value>) -> Self {
        Self {
            queue: values.into_iter().map(Action::from_json).collect(),
        }
    }
}

#[async_trait]
impl WebsocketFeed for FakeFeed {
    async fn next_action(&mut self) -> Result<Option<Action>, RestError> {
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fake_feed_yields_queued_actions_in_order() {
        let mut feed = FakeFeed::from_values(vec![
            json!({"type": "heartbeat", "ticks": 1, "run_id": "A"}),
            json!({"type": "heartbeat", "ticks": 2, "run_id": "A"}),
        ]);
        assert!(matches!(feed.next_action().await.unwrap(), Some(Action::Heartbeat(_))));
        assert!(matches!(feed.next_action().await.unwrap(), Some(Action::Heartbeat(_))));
        assert!(feed.next_action().await.unwrap().is_none());
    }
}
