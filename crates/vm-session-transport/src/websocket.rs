//! WebSocket display adapter.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;
use vm_session_core::{
    ConnectionHandle, DisplayConnector, DisplayContainer, DisplayEvent, DisplayEvents,
    DisplayOptions, HandleControl, traits::ConnectError,
};

const REQUESTED: &str = "disconnect requested";

/// Reason reported when the server closes without giving one.
const UNKNOWN_REASON: &str = "Unknown";

/// Display adapter that carries the framebuffer stream over a websocket.
///
/// Incoming frames are written to the container; data queued through the
/// handle is sent as binary messages.
#[derive(Debug, Clone, Default)]
pub struct WsDisplayConnector;

impl WsDisplayConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DisplayConnector for WsDisplayConnector {
    fn connect(
        &self,
        container: &DisplayContainer,
        url: &str,
        options: DisplayOptions,
    ) -> Result<(ConnectionHandle, DisplayEvents), ConnectError> {
        validate(url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConnectError::Unavailable(format!("no async runtime: {e}")))?;

        let (handle, control) = ConnectionHandle::pair(url, options);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        container.claim(handle.id(), options);
        runtime.spawn(drive(
            url.to_string(),
            container.clone(),
            handle.id(),
            options,
            control,
            events_tx,
        ));

        Ok((handle, events_rx))
    }
}

fn validate(url: &str) -> Result<(), ConnectError> {
    let invalid = |reason: String| ConnectError::InvalidEndpoint {
        url: url.to_string(),
        reason,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

async fn drive(
    url: String,
    container: DisplayContainer,
    id: Uuid,
    options: DisplayOptions,
    control: HandleControl,
    events: mpsc::UnboundedSender<DisplayEvent>,
) {
    let HandleControl {
        mut shutdown,
        mut outbound,
    } = control;
    let emit = |event: DisplayEvent| {
        let _ = events.send(event);
    };

    emit(DisplayEvent::Connecting);

    let ws = tokio::select! {
        _ = &mut shutdown => {
            emit(DisplayEvent::Disconnected { reason: REQUESTED.to_string() });
            return;
        }
        res = connect_async(url.as_str()) => match res {
            Ok((ws, _response)) => ws,
            Err(e) => {
                tracing::debug!(endpoint = %url, "Display connect failed: {e}");
                emit(DisplayEvent::Error { detail: e.to_string() });
                emit(DisplayEvent::Disconnected { reason: e.to_string() });
                return;
            }
        },
    };

    container.apply_options(id, options);
    emit(DisplayEvent::Connected);
    tracing::debug!(endpoint = %url, "Display stream open");

    let (mut sink, mut stream) = ws.split();
    let mut outbound_open = true;

    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                break REQUESTED.to_string();
            }
            data = outbound.recv(), if outbound_open => match data {
                Some(data) => {
                    if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
                        emit(DisplayEvent::Error { detail: e.to_string() });
                        break e.to_string();
                    }
                }
                None => outbound_open = false,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if !container.push_frame(id, Bytes::from(data)) {
                        let _ = sink.send(Message::Close(None)).await;
                        break "container released".to_string();
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if !container.push_frame(id, Bytes::from(text.into_bytes())) {
                        let _ = sink.send(Message::Close(None)).await;
                        break "container released".to_string();
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| UNKNOWN_REASON.to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(DisplayEvent::Error { detail: e.to_string() });
                    break e.to_string();
                }
                None => break "stream closed".to_string(),
            },
        }
    };

    tracing::debug!(endpoint = %url, %reason, "Display stream ended");
    emit(DisplayEvent::Disconnected { reason });
}
