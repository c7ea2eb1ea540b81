//! ## Configuration of the engine
//!
//! ```
//! # use enginewire::{config::EngineIoConfig, TransportType};
//! # use std::time::Duration;
//! let config = EngineIoConfig::builder()
//!     .ping_interval(Duration::from_millis(300))
//!     .ping_timeout(Duration::from_millis(200))
//!     .transports([TransportType::Polling, TransportType::Websocket])
//!     .max_payload(1e6 as u64)
//!     .build();
//! ```

use std::{borrow::Cow, time::Duration};

use http::request::Parts;

use crate::{
    TransportType,
    middleware::{RequestMiddleware, RequestMiddlewares},
};

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineIoConfig {
    /// The path to listen for engine requests on.
    /// Defaults to "/engine.io".
    pub req_path: Cow<'static, str>,

    /// The interval at which the server will send a ping packet to the client.
    /// Defaults to 25 seconds.
    pub ping_interval: Duration,

    /// How long the server waits for a pong before closing the session.
    /// Defaults to 20 seconds.
    pub ping_timeout: Duration,

    /// The number of packet buffers that can be queued for a session
    /// before emitting returns a "channel full" error.
    /// Defaults to 128.
    pub max_buffer_size: usize,

    /// The maximum number of bytes accepted in one payload or frame.
    /// Bigger inputs close the session.
    /// Defaults to 100kb.
    pub max_payload: u64,

    /// The size of the read buffer for the websocket transport.
    /// Defaults to 4KiB.
    pub ws_read_buffer_size: usize,

    /// Bit set of the allowed transports.
    pub transports: u8,

    /// Whether polling sessions may upgrade to another transport.
    /// Defaults to true.
    pub allow_upgrades: bool,

    /// How long an upgrade may take between the probe and the commit.
    /// Defaults to 10 seconds.
    pub upgrade_timeout: Duration,

    /// Checks run on every request before any session logic.
    pub request_middlewares: RequestMiddlewares,
}

impl Default for EngineIoConfig {
    fn default() -> Self {
        Self {
            req_path: "/engine.io".into(),
            ping_interval: Duration::from_millis(25000),
            ping_timeout: Duration::from_millis(20000),
            max_buffer_size: 128,
            max_payload: 1e5 as u64, // 100kb
            ws_read_buffer_size: 4096,
            transports: TransportType::Polling as u8
                | TransportType::Websocket as u8
                | TransportType::WebTransport as u8,
            allow_upgrades: true,
            upgrade_timeout: Duration::from_secs(10),
            request_middlewares: RequestMiddlewares::default(),
        }
    }
}

impl EngineIoConfig {
    /// Create a new builder with a default config
    pub fn builder() -> EngineIoConfigBuilder {
        EngineIoConfigBuilder::new()
    }

    /// Check if a [`TransportType`] is enabled in the config
    #[inline(always)]
    pub fn allowed_transport(&self, transport: TransportType) -> bool {
        self.transports & transport as u8 == transport as u8
    }

    /// The transports a session on `transport` may upgrade to
    pub fn upgrades(&self, transport: TransportType) -> Vec<String> {
        if self.allow_upgrades {
            transport.upgrades(self.transports)
        } else {
            Vec::new()
        }
    }
}

/// Builder for [`EngineIoConfig`]
#[derive(Debug, Default)]
pub struct EngineIoConfigBuilder {
    config: EngineIoConfig,
}

impl EngineIoConfigBuilder {
    /// Create a new builder with a default config
    pub fn new() -> Self {
        Self::default()
    }

    /// The path to listen for engine requests on.
    pub fn req_path(mut self, req_path: impl Into<Cow<'static, str>>) -> Self {
        self.config.req_path = req_path.into();
        self
    }

    /// The interval at which the server will send a ping packet to the client.
    pub fn ping_interval(mut self, ping_interval: Duration) -> Self {
        self.config.ping_interval = ping_interval;
        self
    }

    /// How long the server waits for a heartbeat answer before closing the session.
    pub fn ping_timeout(mut self, ping_timeout: Duration) -> Self {
        self.config.ping_timeout = ping_timeout;
        self
    }

    /// The number of packet buffers queued per session.
    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.config.max_buffer_size = max_buffer_size;
        self
    }

    /// The maximum number of bytes accepted in one payload or frame.
    pub fn max_payload(mut self, max_payload: u64) -> Self {
        self.config.max_payload = max_payload;
        self
    }

    /// The size of the read buffer for the websocket transport.
    pub fn ws_read_buffer_size(mut self, ws_read_buffer_size: usize) -> Self {
        self.config.ws_read_buffer_size = ws_read_buffer_size;
        self
    }

    /// Allowed transports on this server.
    ///
    /// # Panics
    /// If the list is empty.
    pub fn transports<const N: usize>(mut self, transports: [TransportType; N]) -> Self {
        assert!(N > 0, "at least one transport must be enabled");
        self.config.transports = 0;
        for transport in transports {
            self.config.transports |= transport as u8;
        }
        self
    }

    /// Whether polling sessions may upgrade to another transport.
    pub fn allow_upgrades(mut self, allow_upgrades: bool) -> Self {
        self.config.allow_upgrades = allow_upgrades;
        self
    }

    /// How long an upgrade may take between the probe and the commit.
    pub fn upgrade_timeout(mut self, upgrade_timeout: Duration) -> Self {
        self.config.upgrade_timeout = upgrade_timeout;
        self
    }

    /// Add a request middleware. Middlewares run in registration order.
    pub fn request_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Fn(&Parts) -> Result<(), Cow<'static, str>> + Send + Sync + 'static,
    {
        self.config.request_middlewares.push(middleware);
        self
    }

    /// Add a [`RequestMiddleware`] implementor.
    pub fn request_middleware_impl(mut self, middleware: impl RequestMiddleware) -> Self {
        self.config.request_middlewares.push(middleware);
        self
    }

    /// Build the config
    pub fn build(self) -> EngineIoConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_transports() {
        let conf = EngineIoConfig::builder()
            .transports([TransportType::Polling])
            .build();
        assert!(conf.allowed_transport(TransportType::Polling));
        assert!(!conf.allowed_transport(TransportType::Websocket));
        assert!(conf.upgrades(TransportType::Polling).is_empty());

        let conf = EngineIoConfig::builder()
            .transports([TransportType::Websocket, TransportType::Polling])
            .build();
        assert!(conf.allowed_transport(TransportType::Websocket));
        assert!(!conf.allowed_transport(TransportType::WebTransport));
        assert_eq!(conf.upgrades(TransportType::Polling), vec!["websocket"]);
    }

    #[test]
    fn disallowed_upgrades() {
        let conf = EngineIoConfig::builder().allow_upgrades(false).build();
        assert!(conf.upgrades(TransportType::Polling).is_empty());
    }
}
