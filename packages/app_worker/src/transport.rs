//! The socket to the debugger proxy, reduced to text frames.

use futures_util::future::{self, BoxFuture};
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, Sink, SinkExt, StreamExt, TryStreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// An open connection: outbound text frames and inbound text frames.
/// The stream ends when the peer closes.
pub struct ProxyConnection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens connections to the debugger proxy.
pub trait ProxyConnector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<ProxyConnection, TransportError>>;
}

/// `ProxyConnector` over a real websocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl ProxyConnector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<ProxyConnection, TransportError>> {
        let url = url.to_string();
        async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            debug!("Websocket handshake with {} complete", url);
            let (ws_write, ws_read) = ws_stream.split();

            let sink = ws_write.with(|text: String| {
                future::ready(Ok::<_, TransportError>(Message::Text(text.into())))
            });
            let stream = ws_read
                .map_err(TransportError::from)
                .try_take_while(|msg| future::ready(Ok(!msg.is_close())))
                .try_filter_map(|msg| {
                    future::ready(Ok(match msg {
                        Message::Text(text) => Some(text.as_str().to_owned()),
                        _ => None,
                    }))
                });

            Ok(ProxyConnection {
                sink: Box::pin(sink),
                stream: stream.boxed(),
            })
        }
        .boxed()
    }
}
