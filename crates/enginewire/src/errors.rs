use std::borrow::Cow;

use http::{HeaderValue, Response, StatusCode, header};
use tokio_tungstenite::tungstenite;

use crate::{Sid, body::ResponseBody};
use enginewire_core::{Packet, stream::FrameError};

pub use enginewire_core::PacketParseError;

/// Errors raised while serving engine requests and transports.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("error decoding packet: {0}")]
    PacketParse(#[from] PacketParseError),
    #[error("error decoding frame: {0}")]
    Frame(#[from] FrameError),
    #[error("bad packet received: {0:?}")]
    BadPacket(Packet),
    #[error("invalid heartbeat direction")]
    InvalidHeartbeatDirection,
    #[error("ws transport error: {0}")]
    WsTransport(Box<tungstenite::Error>),
    #[error("http error: {0}")]
    Http(#[from] http::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error reading request body")]
    BodyRead,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
    #[error("upgrade error")]
    Upgrade,
    #[error("upgrade timeout")]
    UpgradeTimeout,
    #[error("multiple http polling error")]
    MultipleHttpPolling,
    #[error("invalid websocket Sec-WebSocket-Key http header")]
    InvalidWebSocketKey,
    #[error("unknown session id {0}")]
    UnknownSessionID(Sid),
    #[error("transport mismatch")]
    TransportMismatch,
    #[error("transport unknown")]
    UnknownTransport,
    #[error("bad handshake method")]
    BadHandshakeMethod,
    #[error("unsupported protocol version")]
    UnsupportedProtocolVersion,
    #[error("bad request")]
    BadRequest,
    #[error("forbidden: {0}")]
    Forbidden(Cow<'static, str>),
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::WsTransport(Box::new(err))
    }
}

/// Build a `400` json error response with an engine error code
fn conn_err_resp<B>(code: u8, message: &str) -> Response<ResponseBody<B>> {
    let body = serde_json::json!({ "code": code, "message": message }).to_string();
    let mut res = Response::new(ResponseBody::custom_response(body));
    *res.status_mut() = StatusCode::BAD_REQUEST;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    res
}

fn empty_resp<B>(status: StatusCode) -> Response<ResponseBody<B>> {
    let mut res = Response::new(ResponseBody::empty_response());
    *res.status_mut() = status;
    res
}

/// Convert an error into an http response.
/// Known errors get their engine error code, others a `500`.
impl<B> From<Error> for Response<ResponseBody<B>> {
    fn from(err: Error) -> Self {
        match err {
            Error::UnknownTransport => conn_err_resp(0, "Transport unknown"),
            Error::UnknownSessionID(_) => conn_err_resp(1, "Session ID unknown"),
            Error::BadHandshakeMethod => conn_err_resp(2, "Bad handshake method"),
            Error::TransportMismatch
            | Error::BadRequest
            | Error::Upgrade
            | Error::InvalidWebSocketKey => conn_err_resp(3, "Bad request"),
            Error::Forbidden(msg) => conn_err_resp(4, &msg),
            Error::UnsupportedProtocolVersion => conn_err_resp(5, "Unsupported protocol version"),
            Error::PayloadTooLarge
            | Error::PacketParse(PacketParseError::PayloadTooLarge { .. }) => {
                empty_resp(StatusCode::PAYLOAD_TOO_LARGE)
            }
            Error::BadPacket(_)
            | Error::PacketParse(_)
            | Error::InvalidHeartbeatDirection
            | Error::MultipleHttpPolling
            | Error::BodyRead => empty_resp(StatusCode::BAD_REQUEST),
            _e => {
                #[cfg(feature = "tracing")]
                tracing::debug!("uncaught error {_e:?}");
                empty_resp(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body_of(res: Response<ResponseBody<http_body_util::Empty<bytes::Bytes>>>) -> String {
        let body = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn error_codes() {
        let res: Response<_> = Error::UnknownTransport.into();
        assert_eq!(res.status(), 400);
        assert_eq!(body_of(res).await, r#"{"code":0,"message":"Transport unknown"}"#);

        let res: Response<_> = Error::UnknownSessionID(Sid::ZERO).into();
        assert_eq!(body_of(res).await, r#"{"code":1,"message":"Session ID unknown"}"#);

        let res: Response<_> = Error::Forbidden("no way".into()).into();
        assert_eq!(body_of(res).await, r#"{"code":4,"message":"no way"}"#);

        let res: Response<ResponseBody<http_body_util::Empty<bytes::Bytes>>> =
            Error::PayloadTooLarge.into();
        assert_eq!(res.status(), 413);
    }
}
