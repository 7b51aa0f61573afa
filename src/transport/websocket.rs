use super::{
    Connector, Endpoint, EventSink, Outbound, ServerMessage, TransportEvent, TransportHandle,
};
use crate::Result;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// WebSocket transport on the current tokio runtime
#[derive(Clone, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, endpoint: &Endpoint, events: EventSink) -> Result<TransportHandle> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let url = endpoint.url().clone();
        let redacted = endpoint.redacted();

        tokio::spawn(async move {
            info!("Connecting to {}", redacted);
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    info!("Connected to {}", redacted);
                    run_connection(stream, outbound_rx, &events).await;
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", redacted, e);
                    events.send(TransportEvent::Error(e.to_string()));
                }
            }
            events.send(TransportEvent::Closed);
            debug!("Connection {} finished", events.connection());
        });

        Ok(TransportHandle::new(outbound_tx))
    }
}

async fn run_connection<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events: &EventSink,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = stream.split();
    if !events.send(TransportEvent::Ready) {
        let _ = write.close().await;
        return;
    }

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let message = match frame {
                    Some(Outbound::Audio(bytes)) => {
                        debug!("Sending segment ({} bytes)", bytes.len());
                        Message::Binary(bytes)
                    }
                    Some(Outbound::Control(control)) => match control.to_json() {
                        Ok(text) => Message::Text(text),
                        Err(e) => {
                            warn!("{}", e);
                            continue;
                        }
                    },
                    // Session dropped its handle or asked to close
                    Some(Outbound::Close) | None => {
                        if let Err(e) = write.close().await {
                            debug!("Close handshake failed: {}", e);
                        }
                        return;
                    }
                };
                if let Err(e) = write.send(message).await {
                    warn!("WebSocket send failed: {}", e);
                    events.send(TransportEvent::Error(e.to_string()));
                    return;
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match ServerMessage::parse(&text) {
                        Ok(ServerMessage::Unknown) => {
                            let preview: String = text.chars().take(100).collect();
                            debug!("Ignoring unknown message: {}", preview);
                        }
                        Ok(message) => {
                            events.send(TransportEvent::Message(message));
                        }
                        Err(e) => debug!("{}", e),
                    },
                    Some(Ok(Message::Binary(bytes))) => {
                        debug!("Received reply audio ({} bytes)", bytes.len());
                        events.send(TransportEvent::Binary(bytes));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Server closed connection: {:?}", frame);
                        return;
                    }
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        events.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}
