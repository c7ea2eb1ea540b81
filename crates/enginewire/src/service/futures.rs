use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::ready;
use http::{Response, StatusCode};
use pin_project_lite::pin_project;

use crate::{body::ResponseBody, errors::Error};

pub(crate) type BoxFuture<B> =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody<B>>, Error>> + Send>>;

pin_project! {
    /// The future returned by the engine service.
    ///
    /// Engine errors are turned into http responses, so only the errors
    /// of the inner service are returned.
    #[project = ResFutProj]
    pub enum ResponseFuture<F, B> {
        EmptyResponse {
            code: StatusCode,
        },
        ReadyResponse {
            res: Option<Result<Response<ResponseBody<B>>, Error>>,
        },
        AsyncResponse {
            future: BoxFuture<B>,
        },
        Future {
            #[pin]
            future: F,
        },
    }
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn empty_response(code: StatusCode) -> Self {
        ResponseFuture::EmptyResponse { code }
    }
    pub(crate) fn ready(res: Result<Response<ResponseBody<B>>, Error>) -> Self {
        ResponseFuture::ReadyResponse { res: Some(res) }
    }
    pub(crate) fn new(future: F) -> Self {
        ResponseFuture::Future { future }
    }
    pub(crate) fn async_response(future: BoxFuture<B>) -> Self {
        ResponseFuture::AsyncResponse { future }
    }
}

impl<ResBody, F, E> Future for ResponseFuture<F, ResBody>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = Result<Response<ResponseBody<ResBody>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let res = match self.project() {
            ResFutProj::Future { future } => ready!(future.poll(cx))?.map(ResponseBody::new),
            ResFutProj::EmptyResponse { code } => {
                let mut res = Response::new(ResponseBody::empty_response());
                *res.status_mut() = *code;
                res
            }
            ResFutProj::AsyncResponse { future } => {
                ready!(future.as_mut().poll(cx)).unwrap_or_else(Into::into)
            }
            ResFutProj::ReadyResponse { res } => res
                .take()
                .unwrap_or(Err(Error::BadRequest))
                .unwrap_or_else(Into::into),
        };
        Poll::Ready(Ok(res))
    }
}
