//! MQTT over WebSocket.
//!
//! Binary frames carry the same byte stream as TCP. A frame may hold several
//! packets or part of one, so frames are appended to the read buffer and
//! framing is left to [`crate::io::read_packet`].

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::error::{Result, ServerError};
use crate::io::{TransportReader, TransportWriter};

/// Sub-protocol registered for MQTT in RFC 6455 terms.
pub const MQTT_SUBPROTOCOL: &str = "mqtt";

/// Performs the HTTP upgrade and splits the socket into transport halves.
pub async fn accept<S>(stream: S) -> Result<(WebSocketReader<S>, WebSocketWriter<S>)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let websocket = tokio_tungstenite::accept_hdr_async(stream, negotiate_subprotocol).await?;
    let (sink, stream) = websocket.split();
    Ok((WebSocketReader { stream }, WebSocketWriter { sink }))
}

/// Picks `mqtt` when the client offers it. Clients that offer no
/// sub-protocol at all are let through; clients offering only others are
/// refused.
fn negotiate_subprotocol(request: &Request, mut response: Response) -> std::result::Result<Response, ErrorResponse> {
    let Some(offered) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) else {
        debug!("WebSocket client offered no sub-protocol, assuming {}", MQTT_SUBPROTOCOL);
        return Ok(response);
    };
    let supports_mqtt = offered
        .to_str()
        .map(|list| list.split(',').any(|protocol| protocol.trim() == MQTT_SUBPROTOCOL))
        .unwrap_or(false);
    if !supports_mqtt {
        debug!("Refusing WebSocket upgrade, offered sub-protocols: {:?}", offered);
        let mut error = ErrorResponse::new(Some(format!("sub-protocol '{}' required", MQTT_SUBPROTOCOL)));
        *error.status_mut() = StatusCode::BAD_REQUEST;
        return Err(error);
    }
    response
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(MQTT_SUBPROTOCOL));
    Ok(response)
}

pub struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> TransportReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_into(&mut self, buffer: &mut BytesMut) -> Result<usize> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if data.is_empty() {
                        continue;
                    }
                    buffer.extend_from_slice(&data);
                    return Ok(data.len());
                }
                Some(Ok(Message::Text(_))) => return Err(ServerError::UnexpectedTextFrame),
                // Control frames are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(0),
                Some(Err(tungstenite::Error::ConnectionClosed)) => return Ok(0),
                Some(Err(error)) => return Err(error.into()),
            }
        }
    }
}

pub struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> TransportWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, frame: Bytes) -> Result<()> {
        self.sink.send(Message::Binary(frame.to_vec())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http;

    fn request(protocols: Option<&'static str>) -> Request {
        let mut builder = http::Request::builder().uri("/mqtt");
        if let Some(protocols) = protocols {
            builder = builder.header(SEC_WEBSOCKET_PROTOCOL, protocols);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_mqtt_subprotocol_selected() {
        let response = negotiate_subprotocol(&request(Some("mqttv3.1, mqtt")), Response::new(())).unwrap();
        assert_eq!(response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(), "mqtt");
    }

    #[test]
    fn test_missing_subprotocol_accepted() {
        let response = negotiate_subprotocol(&request(None), Response::new(())).unwrap();
        assert!(response.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());
    }

    #[test]
    fn test_foreign_subprotocol_refused() {
        let error = negotiate_subprotocol(&request(Some("graphql-ws")), Response::new(())).unwrap_err();
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }
}
