//! Parse the query of engine requests

use http::{Method, Request};

use crate::{ProtocolVersion, Sid, TransportType, config::EngineIoConfig, errors::Error};

/// The request information extracted from the request uri.
#[derive(Debug)]
pub(crate) struct RequestInfo {
    /// The protocol version used by the client
    pub protocol: ProtocolVersion,
    /// The session id, absent for handshakes
    pub sid: Option<Sid>,
    /// The transport used by the request
    pub transport: TransportType,
    /// The request method
    pub method: Method,
    /// Set when a v3 client only accepts base64 payloads
    pub b64: bool,
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|s| s.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

impl RequestInfo {
    /// Parse the request query.
    ///
    /// Webtransport sessions never go through http, so this transport is unknown here.
    pub(crate) fn parse<B>(req: &Request<B>, config: &EngineIoConfig) -> Result<Self, Error> {
        let query = req.uri().query().unwrap_or_default();

        let transport: TransportType = query_param(query, "transport")
            .and_then(|t| t.parse().ok())
            .filter(|t| *t != TransportType::WebTransport && config.allowed_transport(*t))
            .ok_or(Error::UnknownTransport)?;

        let protocol: ProtocolVersion = query_param(query, "EIO")
            .and_then(|p| p.parse().ok())
            .ok_or(Error::UnsupportedProtocolVersion)?;

        let sid = match query_param(query, "sid") {
            Some(sid) => Some(sid.parse().map_err(|_| Error::BadRequest)?),
            None => None,
        };

        let b64 = query_param(query, "b64").is_some();

        let method = req.method().clone();
        if method != Method::GET && sid.is_none() {
            return Err(Error::BadHandshakeMethod);
        }
        Ok(RequestInfo {
            protocol,
            sid,
            transport,
            method,
            b64,
        })
    }
}
