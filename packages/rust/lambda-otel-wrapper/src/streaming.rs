//! Response streams for streaming handlers.
//!
//! A streaming handler writes its response in chunks to a [`ResponseStream`] while the
//! host reads them from the paired [`ResponseBody`]. The pair is a bounded channel sized by
//! the handler's high-water mark, so `write` waits when the host falls behind.
//!
//! Errors on the stream go to every listener registered with [`ResponseStream::on_error`].
//! They are reported, not raised: the invocation result still comes from the handler.

use crate::constants::defaults;
use crate::error::StreamError;
use bytes::Bytes;
use futures_util::Stream;
use lambda_runtime::Error;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use tokio::sync::{mpsc, oneshot};

type ErrorListener = Arc<dyn Fn(&(dyn StdError + 'static)) + Send + Sync>;

struct Inner {
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    listeners: Mutex<Vec<ErrorListener>>,
    high_water_mark: usize,
}

/// Writing half handed to streaming handlers. Clones refer to the same stream.
#[derive(Clone)]
pub struct ResponseStream {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("high_water_mark", &self.inner.high_water_mark)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Reading half consumed by the host.
#[derive(Debug)]
pub struct ResponseBody {
    receiver: mpsc::Receiver<Bytes>,
}

/// Create a connected stream/body pair buffering up to `high_water_mark` chunks.
pub fn channel(high_water_mark: Option<usize>) -> (ResponseStream, ResponseBody) {
    let high_water_mark = high_water_mark
        .unwrap_or(defaults::STREAM_HIGH_WATER_MARK)
        .max(1);
    let (sender, receiver) = mpsc::channel(high_water_mark);

    let stream = ResponseStream {
        inner: Arc::new(Inner {
            sender: Mutex::new(Some(sender)),
            listeners: Mutex::new(Vec::new()),
            high_water_mark,
        }),
    };
    (stream, ResponseBody { receiver })
}

impl ResponseStream {
    /// Send one chunk to the host, waiting while the buffer is full.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), StreamError> {
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let result = match sender {
            Some(sender) => sender
                .send(chunk.into())
                .await
                .map_err(|_| StreamError::Closed),
            None => Err(StreamError::Ended),
        };

        if let Err(error) = &result {
            self.emit_error(error);
        }
        result
    }

    /// Finish the response. Later writes fail with [`StreamError::Ended`].
    pub fn end(&self) {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn is_ended(&self) -> bool {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Register a listener called for every error on this stream.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&(dyn StdError + 'static)) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(listener));
    }

    /// Report an error on the stream to all listeners.
    pub fn emit_error(&self, error: &(dyn StdError + 'static)) {
        let listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for listener in listeners {
            listener(error);
        }
    }

    pub fn high_water_mark(&self) -> usize {
        self.inner.high_water_mark
    }

    /// Whether both handles write to the same stream.
    pub fn same_stream(&self, other: &ResponseStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Stream for ResponseBody {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A [`ResponseBody`] in the shape `lambda_runtime::StreamResponse` reads.
///
/// Chunks pass through as `Ok`. Once the body is drained the invocation outcome is awaited,
/// and a failed invocation ends the stream with its error.
pub struct StreamingBody {
    body: ResponseBody,
    outcome: Option<oneshot::Receiver<Result<(), Error>>>,
}

impl StreamingBody {
    pub(crate) fn new(body: ResponseBody, outcome: oneshot::Receiver<Result<(), Error>>) -> Self {
        Self {
            body,
            outcome: Some(outcome),
        }
    }
}

impl std::fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingBody")
            .field("settled", &self.outcome.is_none())
            .finish()
    }
}

impl Stream for StreamingBody {
    type Item = Result<Bytes, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(chunk) = ready!(Pin::new(&mut this.body).poll_next(cx)) {
            return Poll::Ready(Some(Ok(chunk)));
        }

        let Some(outcome) = this.outcome.as_mut() else {
            return Poll::Ready(None);
        };
        let outcome = ready!(Pin::new(outcome).poll(cx));
        this.outcome = None;

        match outcome {
            Ok(Err(error)) => Poll::Ready(Some(Err(error))),
            // A dropped sender means the invocation task went away without a result.
            Ok(Ok(())) | Err(_) => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_chunks_reach_body_in_order() {
        let (stream, body) = channel(None);
        assert_eq!(stream.high_water_mark(), 16);

        stream.write("hello ").await.unwrap();
        stream.write(Bytes::from_static(b"world")).await.unwrap();
        stream.end();

        let chunks: Vec<Bytes> = body.collect().await;
        assert_eq!(chunks, vec![Bytes::from("hello "), Bytes::from("world")]);
    }

    #[tokio::test]
    async fn test_write_after_end_reports_error() {
        let (stream, _body) = channel(Some(2));
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        stream.on_error(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        stream.end();
        assert!(stream.is_ended());
        assert_eq!(stream.write("late").await, Err(StreamError::Ended));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_to_dropped_body_reports_closed() {
        let (stream, body) = channel(Some(1));
        drop(body);
        assert_eq!(stream.write("lost").await, Err(StreamError::Closed));
    }

    #[tokio::test]
    async fn test_clones_share_the_stream() {
        let (stream, mut body) = channel(Some(4));
        let clone = stream.clone();
        let (other, _other_body) = channel(Some(4));

        assert!(stream.same_stream(&clone));
        assert!(!stream.same_stream(&other));

        clone.write("from clone").await.unwrap();
        assert_eq!(body.next().await, Some(Bytes::from("from clone")));
    }

    #[tokio::test]
    async fn test_streaming_body_ends_with_invocation_error() {
        let (stream, body) = channel(None);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let host_body = StreamingBody::new(body, outcome_rx);

        stream.write("partial").await.unwrap();
        drop(stream);
        outcome_tx.send(Err("handler failed".into())).unwrap();

        let items: Vec<Result<Bytes, Error>> = host_body.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Bytes::from("partial"));
        assert_eq!(items[1].as_ref().unwrap_err().to_string(), "handler failed");
    }

    #[tokio::test]
    async fn test_streaming_body_waits_for_outcome() {
        let (stream, body) = channel(None);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let mut host_body = StreamingBody::new(body, outcome_rx);

        stream.end();
        let settle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            outcome_tx.send(Ok(())).unwrap();
        });

        assert!(host_body.next().await.is_none());
        settle.await.unwrap();
        assert!(host_body.next().await.is_none());
    }

    #[test]
    fn test_zero_high_water_mark_is_raised_to_one() {
        let (stream, _body) = channel(Some(0));
        assert_eq!(stream.high_water_mark(), 1);
    }
}
