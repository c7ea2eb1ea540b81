//! Request middlewares run on every engine request, before any session logic.
//!
//! A middleware inspects the request head and may reject it. Rejected requests
//! are answered with a `400 Forbidden` error and never reach a session.
//!
//! ```
//! # use enginewire::config::EngineIoConfig;
//! let config = EngineIoConfig::builder()
//!     .request_middleware(|parts| match parts.headers.get("origin") {
//!         Some(origin) if origin == "https://example.com" => Ok(()),
//!         _ => Err("bad origin".into()),
//!     })
//!     .build();
//! ```
use std::{borrow::Cow, fmt, sync::Arc};

use http::request::Parts;

/// A request check. Returning an error rejects the request with its message.
pub trait RequestMiddleware: Send + Sync + 'static {
    /// Check the request head
    fn check(&self, parts: &Parts) -> Result<(), Cow<'static, str>>;
}

impl<F> RequestMiddleware for F
where
    F: Fn(&Parts) -> Result<(), Cow<'static, str>> + Send + Sync + 'static,
{
    fn check(&self, parts: &Parts) -> Result<(), Cow<'static, str>> {
        (self)(parts)
    }
}

/// An ordered list of [`RequestMiddleware`]s.
#[derive(Clone, Default)]
pub struct RequestMiddlewares(Vec<Arc<dyn RequestMiddleware>>);

impl RequestMiddlewares {
    pub(crate) fn push(&mut self, middleware: impl RequestMiddleware) {
        self.0.push(Arc::new(middleware));
    }

    /// Run every middleware in registration order, stopping at the first error.
    pub fn run(&self, parts: &Parts) -> Result<(), Cow<'static, str>> {
        self.0.iter().try_for_each(|m| m.check(parts))
    }

    /// The number of registered middlewares
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no middleware is registered
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RequestMiddlewares {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestMiddlewares").field(&self.0.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn middlewares_short_circuit_in_order() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let mut middlewares = RequestMiddlewares::default();
        middlewares.push(|_: &Parts| -> Result<(), Cow<'static, str>> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        middlewares.push(|_: &Parts| -> Result<(), Cow<'static, str>> { Err("denied".into()) });
        middlewares.push(|_: &Parts| -> Result<(), Cow<'static, str>> {
            CALLS.fetch_add(10, Ordering::SeqCst);
            Ok(())
        });

        let parts = http::Request::new(()).into_parts().0;
        assert_eq!(middlewares.run(&parts).unwrap_err(), "denied");
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
