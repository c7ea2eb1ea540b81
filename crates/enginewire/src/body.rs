//! Response body wrapper, returning either our own body or the inner service body.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use pin_project_lite::pin_project;

pin_project! {
    /// The body of every response produced by the engine service.
    #[project = BodyProj]
    pub enum ResponseBody<B> {
        /// No body
        Empty,
        /// A body built by the engine
        Custom {
            #[pin]
            body: Full<Bytes>,
        },
        /// The body of the inner service
        Body {
            #[pin]
            body: B,
        },
    }
}

impl<B> Default for ResponseBody<B> {
    fn default() -> Self {
        Self::empty_response()
    }
}

impl<B> ResponseBody<B> {
    /// An empty body
    pub fn empty_response() -> Self {
        ResponseBody::Empty
    }

    /// A body carrying `data`
    pub fn custom_response(data: impl Into<Bytes>) -> Self {
        ResponseBody::Custom {
            body: Full::new(data.into()),
        }
    }

    /// Wrap the inner service body
    pub fn new(body: B) -> Self {
        ResponseBody::Body { body }
    }
}

impl<B> Body for ResponseBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            BodyProj::Empty => Poll::Ready(None),
            BodyProj::Body { body } => body.poll_frame(cx),
            BodyProj::Custom { body } => body.poll_frame(cx).map_err(|err| match err {}),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Empty => true,
            ResponseBody::Body { body } => body.is_end_stream(),
            ResponseBody::Custom { body } => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ResponseBody::Empty => SizeHint::with_exact(0),
            ResponseBody::Body { body } => body.size_hint(),
            ResponseBody::Custom { body } => body.size_hint(),
        }
    }
}
