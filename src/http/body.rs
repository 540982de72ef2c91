//! Request body buffering.
//!
//! The connection task owns a [`BodyWriter`] and appends bytes as they come off
//! the socket; handlers hold a [`RequestBody`] and await completion before
//! reading. Completion is a single cached state in a `watch` channel, so any
//! number of waiters observe the same signal and late waiters return at once.

use std::fmt;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::watch;

/// Errors observed while waiting for a request body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyError {
    /// The writer went away before the body was complete (client disconnect,
    /// body timeout, or a read error on the connection).
    #[error("request body was not fully received")]
    Incomplete,
}

#[derive(Default)]
struct BodyState {
    buf: BytesMut,
    frozen: Option<Bytes>,
}

impl BodyState {
    fn is_complete(&self) -> bool {
        self.frozen.is_some()
    }
}

/// Producer half of a request body. Held by the connection task.
pub struct BodyWriter {
    tx: watch::Sender<BodyState>,
}

impl BodyWriter {
    /// Appends a chunk to the buffer. Waiters are not woken until [`finish`](Self::finish).
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.tx.send_if_modified(|state| {
            state.buf.extend_from_slice(chunk);
            false
        });
    }

    /// Marks the body as complete and wakes every waiter.
    pub fn finish(self) {
        self.tx.send_modify(|state| {
            let buf = std::mem::take(&mut state.buf);
            state.frozen = Some(buf.freeze());
        });
    }
}

/// Consumer half of a request body. Cheap to clone.
///
/// # Examples
///
/// ```
/// use wwwroot::http::RequestBody;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (writer, body) = RequestBody::channel();
/// writer.append(b"hello ");
/// writer.append(b"world");
/// writer.finish();
///
/// assert_eq!(&body.wait_complete().await.unwrap()[..], b"hello world");
/// # }
/// ```
#[derive(Clone)]
pub struct RequestBody {
    rx: watch::Receiver<BodyState>,
}

impl RequestBody {
    /// Creates a connected writer/body pair with an empty buffer.
    pub fn channel() -> (BodyWriter, RequestBody) {
        let (tx, rx) = watch::channel(BodyState::default());
        (BodyWriter { tx }, RequestBody { rx })
    }

    /// Creates a body that is already complete.
    pub fn complete(data: impl Into<Bytes>) -> Self {
        let state = BodyState {
            buf: BytesMut::new(),
            frozen: Some(data.into()),
        };
        let (_tx, rx) = watch::channel(state);
        Self { rx }
    }

    /// Creates an empty, complete body.
    pub fn empty() -> Self {
        Self::complete(Bytes::new())
    }

    /// Returns `true` once the whole body has been received.
    pub fn is_complete(&self) -> bool {
        self.rx.borrow().is_complete()
    }

    /// Returns the bytes received so far.
    ///
    /// Only authoritative after [`wait_complete`](Self::wait_complete) has
    /// resolved; before that the result may be a prefix of the body.
    pub fn data(&self) -> Bytes {
        let state = self.rx.borrow();
        match &state.frozen {
            Some(bytes) => bytes.clone(),
            None => Bytes::copy_from_slice(&state.buf),
        }
    }

    /// Waits until the body is complete and returns it.
    ///
    /// # Errors
    ///
    /// [`BodyError::Incomplete`] if the writer is dropped before finishing.
    pub async fn wait_complete(&self) -> Result<Bytes, BodyError> {
        let mut rx = self.rx.clone();
        let state = rx
            .wait_for(BodyState::is_complete)
            .await
            .map_err(|_| BodyError::Incomplete)?;
        Ok(state.frozen.clone().unwrap_or_default())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.rx.borrow();
        let len = state.frozen.as_ref().map_or(state.buf.len(), Bytes::len);
        f.debug_struct("RequestBody")
            .field("len", &len)
            .field("complete", &state.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_before_completion_is_partial() {
        let (writer, body) = RequestBody::channel();
        writer.append(b"abc");
        assert!(!body.is_complete());
        assert_eq!(&body.data()[..], b"abc");
        writer.append(b"def");
        writer.finish();
        assert!(body.is_complete());
        assert_eq!(&body.data()[..], b"abcdef");
    }

    #[tokio::test]
    async fn many_waiters_see_one_completion() {
        let (writer, body) = RequestBody::channel();
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let body = body.clone();
                tokio::spawn(async move { body.wait_complete().await })
            })
            .collect();

        tokio::task::yield_now().await;
        writer.append(b"payload");
        writer.finish();

        for waiter in waiters {
            let bytes = waiter.await.unwrap().unwrap();
            assert_eq!(&bytes[..], b"payload");
        }
        // Late callers resolve immediately with the same bytes.
        assert_eq!(&body.wait_complete().await.unwrap()[..], b"payload");
    }

    #[tokio::test]
    async fn dropped_writer_reports_incomplete() {
        let (writer, body) = RequestBody::channel();
        writer.append(b"half");
        drop(writer);
        assert_eq!(body.wait_complete().await, Err(BodyError::Incomplete));
        assert_eq!(&body.data()[..], b"half");
    }

    #[tokio::test]
    async fn complete_body_is_ready() {
        let body = RequestBody::complete(Bytes::from_static(b"x=1"));
        assert!(body.is_complete());
        assert_eq!(&body.wait_complete().await.unwrap()[..], b"x=1");
        assert!(RequestBody::empty().wait_complete().await.unwrap().is_empty());
    }
}
