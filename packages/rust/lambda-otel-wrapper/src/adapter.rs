//! Handler calling conventions.
//!
//! A user handler comes in one of three shapes:
//!
//! - direct: `async fn(event) -> Result<R, Error>` or `async fn(event, context) -> Result<R, Error>`
//! - callback: `fn(event, context, Callback<R>) -> Deferred<R>`, settled through the callback
//!   and optionally also through a returned future
//! - streaming: `async fn(event, ResponseStream, context) -> Result<R, Error>`
//!
//! [`Handler`] picks the calling convention once, at construction. Every invocation after
//! that goes through the same normalized call path.
//!
//! # Callback style
//!
//! ```
//! use lambda_otel_wrapper::{Callback, Deferred, Handler};
//! use lambda_runtime::Context;
//! use serde_json::Value;
//!
//! let handler = Handler::callback(|event: Value, _ctx: Context, callback: Callback<Value>| {
//!     callback.succeed(event);
//!     Deferred::<Value>::None
//! });
//! assert!(!handler.tags().streaming);
//! ```
//!
//! When a handler both calls its callback and returns [`Deferred::Pending`], the first one to
//! settle decides the result. Later signals are ignored.

use crate::error::WrapperError;
use crate::streaming::ResponseStream;
use futures_util::future::{self, BoxFuture, Either};
use lambda_runtime::{Context, Error};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Boxed future returned by every normalized handler.
pub type HandlerFuture<R> = BoxFuture<'static, Result<R, Error>>;

type DirectFn<E, R> = Arc<dyn Fn(E, Context) -> HandlerFuture<R> + Send + Sync>;
type CallbackFn<E, R> = Arc<dyn Fn(E, Context, Callback<R>) -> Deferred<R> + Send + Sync>;
type StreamingFn<E, R> = Arc<dyn Fn(E, ResponseStream, Context) -> HandlerFuture<R> + Send + Sync>;

/// Host-visible markers carried alongside a handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerTags {
    /// The handler writes its response to a [`ResponseStream`].
    pub streaming: bool,
    /// Number of chunks the response stream buffers before `write` waits.
    pub high_water_mark: Option<usize>,
}

/// Completion callback handed to callback-style handlers.
///
/// Only the first call has an effect; later calls return `false` and are otherwise ignored.
pub struct Callback<R> {
    sender: Arc<Mutex<Option<oneshot::Sender<Result<R, Error>>>>>,
}

impl<R> Clone for Callback<R> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<R> Callback<R> {
    fn new() -> (Self, oneshot::Receiver<Result<R, Error>>) {
        let (tx, rx) = oneshot::channel();
        let callback = Self {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (callback, rx)
    }

    /// Settle the invocation. Returns `false` if it was already settled.
    pub fn call(&self, result: Result<R, Error>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match sender {
            Some(tx) => {
                // The receiver is gone when a returned future settled first.
                let _ = tx.send(result);
                true
            }
            None => {
                tracing::debug!("Callback.call: callback already called, ignoring");
                false
            }
        }
    }

    pub fn succeed(&self, value: R) -> bool {
        self.call(Ok(value))
    }

    pub fn fail(&self, error: impl Into<Error>) -> bool {
        self.call(Err(error.into()))
    }
}

/// What a callback-style handler returns besides calling its callback.
pub enum Deferred<R> {
    /// The result arrives through the callback only.
    None,
    /// A future that may settle the invocation before the callback does.
    Pending(HandlerFuture<R>),
}

impl<R> Deferred<R> {
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<R, Error>> + Send + 'static,
    {
        Deferred::Pending(Box::pin(future))
    }
}

impl<R> From<()> for Deferred<R> {
    fn from(_: ()) -> Self {
        Deferred::None
    }
}

/// The calling convention chosen for a handler.
pub(crate) enum NormalizedHandler<E, R> {
    CallbackStyle(CallbackFn<E, R>),
    DirectStyle(DirectFn<E, R>),
    StreamingStyle(StreamingFn<E, R>),
}

impl<E, R> Clone for NormalizedHandler<E, R> {
    fn clone(&self) -> Self {
        match self {
            Self::CallbackStyle(f) => Self::CallbackStyle(Arc::clone(f)),
            Self::DirectStyle(f) => Self::DirectStyle(Arc::clone(f)),
            Self::StreamingStyle(f) => Self::StreamingStyle(Arc::clone(f)),
        }
    }
}

/// A user handler together with its tags.
pub struct Handler<E, R> {
    normalized: NormalizedHandler<E, R>,
    tags: HandlerTags,
    externally_traced: bool,
}

impl<E, R> Clone for Handler<E, R> {
    fn clone(&self) -> Self {
        Self {
            normalized: self.normalized.clone(),
            tags: self.tags,
            externally_traced: self.externally_traced,
        }
    }
}

impl<E, R> Handler<E, R>
where
    E: Send + 'static,
    R: Send + 'static,
{
    /// Direct-style handler that only looks at the event.
    pub fn from_fn<F, Fut>(handler: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
    {
        Self::direct(Arc::new(move |event: E, _ctx: Context| -> HandlerFuture<R> {
            Box::pin(handler(event))
        }))
    }

    /// Direct-style handler receiving the event and the invocation context.
    pub fn with_context<F, Fut>(handler: F) -> Self
    where
        F: Fn(E, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
    {
        Self::direct(Arc::new(move |event: E, ctx: Context| -> HandlerFuture<R> {
            Box::pin(handler(event, ctx))
        }))
    }

    /// Callback-style handler.
    pub fn callback<F, D>(handler: F) -> Self
    where
        F: Fn(E, Context, Callback<R>) -> D + Send + Sync + 'static,
        D: Into<Deferred<R>>,
    {
        Self {
            normalized: NormalizedHandler::CallbackStyle(Arc::new(
                move |event: E, ctx: Context, callback: Callback<R>| -> Deferred<R> {
                    handler(event, ctx, callback).into()
                },
            )),
            tags: HandlerTags::default(),
            externally_traced: false,
        }
    }

    /// Handler writing its response to a [`ResponseStream`].
    pub fn streaming<F, Fut>(handler: F) -> Self
    where
        F: Fn(E, ResponseStream, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
    {
        Self {
            normalized: NormalizedHandler::StreamingStyle(Arc::new(
                move |event: E, stream: ResponseStream, ctx: Context| -> HandlerFuture<R> {
                    Box::pin(handler(event, stream, ctx))
                },
            )),
            tags: HandlerTags {
                streaming: true,
                high_water_mark: None,
            },
            externally_traced: false,
        }
    }

    fn direct(handler: DirectFn<E, R>) -> Self {
        Self {
            normalized: NormalizedHandler::DirectStyle(handler),
            tags: HandlerTags::default(),
            externally_traced: false,
        }
    }

    /// Set the buffer size of the response stream.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.tags.high_water_mark = Some(high_water_mark);
        self
    }

    /// Mark the handler as already traced by another layer, so no invocation span is opened.
    pub fn externally_traced(mut self) -> Self {
        self.externally_traced = true;
        self
    }

    pub fn tags(&self) -> HandlerTags {
        self.tags
    }

    pub fn is_externally_traced(&self) -> bool {
        self.externally_traced
    }

    /// Start the handler for a non-streaming invocation.
    pub(crate) fn call(&self, event: E, ctx: Context) -> Result<HandlerFuture<R>, WrapperError> {
        match &self.normalized {
            NormalizedHandler::DirectStyle(handler) => Ok(handler(event, ctx)),
            NormalizedHandler::CallbackStyle(handler) => Ok(settle_first(handler, event, ctx)),
            NormalizedHandler::StreamingStyle(_) => Err(WrapperError::StreamingHandler),
        }
    }

    /// Start the handler for a streaming invocation.
    pub(crate) fn call_streaming(
        &self,
        event: E,
        stream: ResponseStream,
        ctx: Context,
    ) -> Result<HandlerFuture<R>, WrapperError> {
        match &self.normalized {
            NormalizedHandler::StreamingStyle(handler) => Ok(handler(event, stream, ctx)),
            _ => Err(WrapperError::NotStreaming),
        }
    }
}

/// Run a callback-style handler, settling with whichever signal arrives first.
fn settle_first<E, R>(handler: &CallbackFn<E, R>, event: E, ctx: Context) -> HandlerFuture<R>
where
    R: Send + 'static,
{
    let (callback, rx) = Callback::new();
    let deferred = handler(event, ctx, callback);

    Box::pin(async move {
        match deferred {
            Deferred::None => match rx.await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(
                        "settle_first: callback dropped without being called, invocation stays pending"
                    );
                    future::pending().await
                }
            },
            Deferred::Pending(fut) => match future::select(rx, fut).await {
                Either::Left((Ok(result), _)) => result,
                Either::Left((Err(_), fut)) => fut.await,
                Either::Right((result, mut rx)) => match rx.try_recv() {
                    // Callback called while the future was being polled to completion.
                    Ok(from_callback) => from_callback,
                    Err(_) => result,
                },
            },
        }
    })
}
