//! Frame stream primitive
//!
//! Every pipeline stage consumes and produces frames as a sequence of
//! fixed-width words. A word carries up to [`WORD_BYTES`] bytes plus the
//! `last` (end-of-frame) and `error` side flags. Links between stages are
//! bounded channels: a send completes only once the consumer has room,
//! which is the ready/valid handshake of the link.
//!
//! Each word travels together with a copy of the frame's side-band
//! metadata (`Beat::meta`), the way header fields ride along a streaming
//! bus next to the data lanes.

mod fifo;
mod merger;
mod reader;
mod splitter;
mod writer;

pub use fifo::{FrameFifo, OverflowPolicy};
pub use merger::Merger;
pub use reader::FrameReader;
pub use splitter::{Route, Splitter};
pub use writer::FrameWriter;

use crate::{Error, Result};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Width of one stream word in bytes (64-bit data path)
pub const WORD_BYTES: usize = 8;

/// One transfer on a stream link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Word {
    pub data: [u8; WORD_BYTES],
    /// Number of valid bytes in `data`; only the last word may be partial
    pub len: u8,
    /// Last word of the frame
    pub last: bool,
    /// Frame was found malformed by some upstream stage
    pub error: bool,
}

impl Word {
    /// Build a word from up to `WORD_BYTES` bytes.
    pub fn from_slice(bytes: &[u8], last: bool) -> Self {
        let n = bytes.len().min(WORD_BYTES);
        let mut data = [0u8; WORD_BYTES];
        data[..n].copy_from_slice(&bytes[..n]);
        Self {
            data,
            len: n as u8,
            last,
            error: false,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn is_full(&self) -> bool {
        self.len as usize == WORD_BYTES
    }
}

/// A word plus the side-band metadata of the frame it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beat<M> {
    pub word: Word,
    pub meta: M,
}

/// Producer side of a stream link
#[derive(Debug)]
pub struct StreamTx<M> {
    inner: mpsc::Sender<Beat<M>>,
}

impl<M> Clone for StreamTx<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M> StreamTx<M> {
    /// Offer a beat; completes once the consumer accepted it.
    pub async fn send(&self, beat: Beat<M>) -> Result<()> {
        self.inner.send(beat).await.map_err(|_| Error::StreamClosed)
    }

    /// Wait until the consumer can take one beat.
    pub async fn reserve(&self) -> Result<mpsc::Permit<'_, Beat<M>>> {
        self.inner.reserve().await.map_err(|_| Error::StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Consumer side of a stream link
#[derive(Debug)]
pub struct StreamRx<M> {
    inner: mpsc::Receiver<Beat<M>>,
}

impl<M> StreamRx<M> {
    /// Next beat, or `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<Beat<M>> {
        self.inner.recv().await
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Beat<M>>> {
        self.inner.poll_recv(cx)
    }
}

/// Create a stream link holding at most `depth` words in flight.
pub fn channel<M>(depth: usize) -> (StreamTx<M>, StreamRx<M>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (StreamTx { inner: tx }, StreamRx { inner: rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_from_slice_partial() {
        let w = Word::from_slice(&[1, 2, 3], true);
        assert_eq!(w.bytes(), &[1, 2, 3]);
        assert!(w.last);
        assert!(!w.is_full());
    }

    #[test]
    fn test_word_from_slice_truncates() {
        let w = Word::from_slice(&[0xaa; 12], false);
        assert_eq!(w.len as usize, WORD_BYTES);
        assert!(w.is_full());
    }

    #[tokio::test]
    async fn test_channel_backpressure() {
        let (tx, mut rx) = channel::<()>(1);
        tx.send(Beat {
            word: Word::from_slice(&[1], false),
            meta: (),
        })
        .await
        .unwrap();

        // Link is full: the second offer must wait for the consumer.
        let second = tx.send(Beat {
            word: Word::from_slice(&[2], true),
            meta: (),
        });
        tokio::pin!(second);
        assert!(futures_poll_once(second.as_mut()).await.is_none());

        assert_eq!(rx.recv().await.unwrap().word.bytes(), &[1]);
        second.await.unwrap();
        assert_eq!(rx.recv().await.unwrap().word.bytes(), &[2]);
    }

    async fn futures_poll_once<F: std::future::Future + Unpin>(mut f: F) -> Option<F::Output> {
        std::future::poll_fn(|cx| match std::pin::Pin::new(&mut f).poll(cx) {
            Poll::Ready(v) => Poll::Ready(Some(v)),
            Poll::Pending => Poll::Ready(None),
        })
        .await
    }

    #[tokio::test]
    async fn test_send_on_closed_link() {
        let (tx, rx) = channel::<()>(2);
        drop(rx);
        let result = tx
            .send(Beat {
                word: Word::default(),
                meta: (),
            })
            .await;
        assert!(matches!(result, Err(Error::StreamClosed)));
        assert!(tx.is_closed());
    }
}
