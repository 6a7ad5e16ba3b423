//! Packs outgoing bytes into stream words

use super::{Beat, StreamTx, Word, WORD_BYTES};
use crate::Result;

/// Writes frames onto a stream link.
///
/// Bytes are packed into full words. The most recent full word is held
/// back until more data arrives, so `finish` can still mark it `last`
/// without emitting an empty trailing word.
pub struct FrameWriter<M> {
    tx: StreamTx<M>,
    meta: Option<M>,
    /// Word being filled
    cur: Word,
    /// Full word waiting for a successor
    held: Option<Word>,
    written: usize,
}

impl<M: Copy> FrameWriter<M> {
    pub fn new(tx: StreamTx<M>) -> Self {
        Self {
            tx,
            meta: None,
            cur: Word::default(),
            held: None,
            written: 0,
        }
    }

    /// Start a new frame carrying `meta` on every word.
    pub fn begin(&mut self, meta: M) {
        self.meta = Some(meta);
        self.cur = Word::default();
        self.held = None;
        self.written = 0;
    }

    /// Bytes written to the current frame so far
    pub fn written(&self) -> usize {
        self.written
    }

    /// Append bytes to the current frame.
    pub async fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        let Some(meta) = self.meta else {
            return Ok(());
        };
        self.written += bytes.len();
        while !bytes.is_empty() {
            let pos = self.cur.len as usize;
            let take = (WORD_BYTES - pos).min(bytes.len());
            self.cur.data[pos..pos + take].copy_from_slice(&bytes[..take]);
            self.cur.len += take as u8;
            bytes = &bytes[take..];

            if self.cur.is_full() {
                if let Some(prev) = self.held.take() {
                    self.tx.send(Beat { word: prev, meta }).await?;
                }
                self.held = Some(self.cur);
                self.cur = Word::default();
            }
        }
        Ok(())
    }

    /// Close the current frame. `error` is carried on the final word.
    pub async fn finish(&mut self, error: bool) -> Result<()> {
        let Some(meta) = self.meta.take() else {
            return Ok(());
        };
        let mut last = if self.cur.len > 0 {
            if let Some(prev) = self.held.take() {
                self.tx.send(Beat { word: prev, meta }).await?;
            }
            self.cur
        } else {
            // Empty frames still need a terminating word.
            self.held.take().unwrap_or_default()
        };
        last.last = true;
        last.error = error;
        self.cur = Word::default();
        self.tx.send(Beat { word: last, meta }).await
    }

    /// Write a complete frame in one call.
    pub async fn send_frame(&mut self, meta: M, bytes: &[u8]) -> Result<()> {
        self.begin(meta);
        self.write(bytes).await?;
        self.finish(false).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
