//! Websocket transport over tokio-tungstenite.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ClientError;
use crate::ports::HostAddress;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Write half. Owned by the RPC channel so every send is serialized.
pub type WsSink = SplitSink<WsStream, Message>;
/// Read half. Owned by the supervisor read loop.
pub type WsSource = SplitStream<WsStream>;

/// Open `ws://host:port/websocket` and split it.
pub async fn connect(address: &HostAddress) -> Result<(WsSink, WsSource), ClientError> {
    let url = address.websocket_url();
    debug!(%url, "Connecting to moonraker websocket");
    let (stream, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| ClientError::Connect(format!("{url}: {e}")))?;
    Ok(stream.split())
}
