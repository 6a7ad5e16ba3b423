//! Byte-level view over an incoming word stream

use super::{StreamRx, Word, WORD_BYTES};
use crate::{Error, Result};

/// Reads frames from a stream link one at a time.
///
/// `next_frame` positions the reader at the start of the next frame and
/// returns its metadata; the `read*` methods then consume that frame's
/// bytes until the `last` word has been taken. A frame that is abandoned
/// half-way is drained automatically by the following `next_frame`, so a
/// stage never starts a new frame while an old one is still on the link.
pub struct FrameReader<M> {
    rx: StreamRx<M>,
    /// Current word and read offset inside it
    word: Word,
    offset: usize,
    /// Metadata of the frame being read
    meta: Option<M>,
    /// The `last` word of the current frame has been pulled
    done: bool,
    /// Error flag accumulated over the words seen so far
    error: bool,
}

impl<M: Copy> FrameReader<M> {
    pub fn new(rx: StreamRx<M>) -> Self {
        Self {
            rx,
            word: Word::default(),
            offset: 0,
            meta: None,
            done: true,
            error: false,
        }
    }

    /// Advance to the next frame, draining whatever is left of the current
    /// one. Returns `None` once the link is closed.
    ///
    /// Cancel safe: no beat is consumed unless the call completes or the
    /// beat belongs to the frame being drained.
    pub async fn next_frame(&mut self) -> Option<M> {
        while !self.done {
            if !self.fill().await {
                break;
            }
            self.offset = self.word.len as usize;
        }

        let beat = self.rx.recv().await?;
        self.word = beat.word;
        self.offset = 0;
        self.meta = Some(beat.meta);
        self.done = beat.word.last;
        self.error = beat.word.error;
        Some(beat.meta)
    }

    /// Metadata of the frame currently being read
    pub fn meta(&self) -> Option<M> {
        self.meta
    }

    /// Error flag seen on the current frame so far
    pub fn error(&self) -> bool {
        self.error
    }

    /// All bytes of the current frame have been consumed
    pub fn is_done(&self) -> bool {
        self.done && self.offset >= self.word.len as usize
    }

    /// Make at least one unread byte available. Returns false at end of
    /// frame.
    async fn fill(&mut self) -> bool {
        loop {
            if self.offset < self.word.len as usize {
                return true;
            }
            if self.done {
                return false;
            }
            match self.rx.recv().await {
                Some(beat) => {
                    self.word = beat.word;
                    self.offset = 0;
                    self.done = beat.word.last;
                    self.error |= beat.word.error;
                }
                None => {
                    // Producer vanished mid-frame.
                    self.word = Word::default();
                    self.offset = 0;
                    self.done = true;
                    self.error = true;
                    return false;
                }
            }
        }
    }

    /// Next run of contiguous bytes from the current word, at most
    /// `WORD_BYTES` long.
    pub async fn read_chunk(&mut self) -> Option<&[u8]> {
        if !self.fill().await {
            return None;
        }
        let start = self.offset;
        self.offset = self.word.len as usize;
        Some(&self.word.data[start..self.offset])
    }

    /// Read up to `buf.len()` bytes; returns the count, 0 at end of frame.
    pub async fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            if !self.fill().await {
                break;
            }
            let avail = self.word.len as usize - self.offset;
            let take = avail.min(buf.len() - n);
            buf[n..n + take].copy_from_slice(&self.word.data[self.offset..self.offset + take]);
            self.offset += take;
            n += take;
        }
        n
    }

    /// Fill `buf` completely or fail with `Truncated`.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let got = self.read(buf).await;
        if got < buf.len() {
            return Err(Error::Truncated {
                wanted: buf.len(),
                got,
            });
        }
        Ok(())
    }

    /// Read the remainder of the frame into `out`, refusing frames that
    /// grow past `limit` bytes. The frame is drained either way.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>, limit: usize) -> Result<()> {
        let mut overflow = false;
        while let Some(chunk) = self.read_chunk().await {
            if out.len() + chunk.len() > limit {
                overflow = true;
                continue;
            }
            out.extend_from_slice(chunk);
        }
        if overflow {
            return Err(Error::FrameTooLong { limit });
        }
        Ok(())
    }

    /// Discard the remainder of the frame. Returns the number of bytes
    /// dropped.
    pub async fn drain(&mut self) -> usize {
        let mut n = 0;
        while let Some(chunk) = self.read_chunk().await {
            n += chunk.len();
        }
        n
    }

    /// Skip exactly `n` bytes; fails with `Truncated` if the frame ends
    /// first.
    pub async fn skip(&mut self, n: usize) -> Result<()> {
        let mut left = n;
        while left > 0 {
            if !self.fill().await {
                return Err(Error::Truncated {
                    wanted: n,
                    got: n - left,
                });
            }
            let take = (self.word.len as usize - self.offset).min(left);
            self.offset += take;
            left -= take;
        }
        Ok(())
    }

    /// Copy the remainder of the frame (at most `max` bytes, when given)
    /// into `writer` without buffering it. Returns the number of bytes
    /// forwarded; anything past `max` is drained.
    pub async fn forward<N: Copy>(
        &mut self,
        writer: &mut super::FrameWriter<N>,
        max: Option<usize>,
    ) -> Result<usize> {
        let mut sent = 0;
        let limit = max.unwrap_or(usize::MAX);
        let mut buf = [0u8; WORD_BYTES];
        while sent < limit {
            let want = (limit - sent).min(WORD_BYTES);
            let n = self.read(&mut buf[..want]).await;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).await?;
            sent += n;
        }
        if sent == limit {
            self.drain().await;
        }
        Ok(sent)
    }
}
