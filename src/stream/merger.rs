//! Frame-atomic round-robin merge of several stream links into one

use super::{Beat, StreamRx, StreamTx, Word};
use std::future::poll_fn;
use std::task::Poll;
use tracing::debug;

/// Merges N input links onto one output.
///
/// Once a word of some input's frame has been forwarded, that input keeps
/// the output until its `last` word. The search for the next frame starts
/// just after the input served last, so an input with a frame ready waits
/// for at most N-1 other frames.
pub struct Merger<M> {
    name: &'static str,
    inputs: Vec<StreamRx<M>>,
    closed: Vec<bool>,
    output: StreamTx<M>,
    next: usize,
}

impl<M: Copy> Merger<M> {
    pub fn new(name: &'static str, inputs: Vec<StreamRx<M>>, output: StreamTx<M>) -> Self {
        let closed = vec![false; inputs.len()];
        Self {
            name,
            inputs,
            closed,
            output,
            next: 0,
        }
    }

    /// Wait for the first word of a frame on any open input.
    async fn select_source(&mut self) -> Option<(usize, Beat<M>)> {
        let inputs = &mut self.inputs;
        let closed = &mut self.closed;
        let start = self.next;
        poll_fn(|cx| {
            let n = inputs.len();
            let mut any_open = false;
            for k in 0..n {
                let i = (start + k) % n;
                if closed[i] {
                    continue;
                }
                match inputs[i].poll_recv(cx) {
                    Poll::Ready(Some(beat)) => return Poll::Ready(Some((i, beat))),
                    Poll::Ready(None) => closed[i] = true,
                    Poll::Pending => any_open = true,
                }
            }
            if any_open {
                Poll::Pending
            } else {
                Poll::Ready(None)
            }
        })
        .await
    }

    /// Run until every input is closed or the output goes away.
    pub async fn run(mut self) {
        while let Some((src, first)) = self.select_source().await {
            let meta = first.meta;
            let mut last = first.word.last;
            if self.output.send(first).await.is_err() {
                break;
            }

            while !last {
                let beat = match self.inputs[src].recv().await {
                    Some(b) => b,
                    None => {
                        // Source died mid-frame: terminate its frame as errored.
                        self.closed[src] = true;
                        Beat {
                            word: Word {
                                last: true,
                                error: true,
                                ..Word::default()
                            },
                            meta,
                        }
                    }
                };
                last = beat.word.last;
                if self.output.send(beat).await.is_err() {
                    debug!("{}: output closed", self.name);
                    return;
                }
            }

            self.next = (src + 1) % self.inputs.len();
        }
        debug!("{}: all inputs closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{channel, FrameReader, FrameWriter};

    #[tokio::test]
    async fn test_frames_not_interleaved() {
        let (tx_a, rx_a) = channel::<u8>(64);
        let (tx_b, rx_b) = channel::<u8>(64);
        let (out_tx, out_rx) = channel::<u8>(64);

        let mut wa = FrameWriter::new(tx_a);
        let mut wb = FrameWriter::new(tx_b);
        wa.send_frame(b'A', &[0xaa; 40]).await.unwrap();
        wb.send_frame(b'B', &[0xbb; 40]).await.unwrap();
        wa.send_frame(b'A', &[0xaa; 3]).await.unwrap();
        drop(wa);
        drop(wb);

        tokio::spawn(Merger::new("test", vec![rx_a, rx_b], out_tx).run());

        let mut reader = FrameReader::new(out_rx);
        let mut order = Vec::new();
        while let Some(tag) = reader.next_frame().await {
            let mut body = Vec::new();
            reader.read_to_end(&mut body, 100).await.unwrap();
            let fill = if tag == b'A' { 0xaa } else { 0xbb };
            assert!(body.iter().all(|&b| b == fill));
            order.push((tag, body.len()));
        }
        // Round-robin: A, then B, then A again.
        assert_eq!(order, vec![(b'A', 40), (b'B', 40), (b'A', 3)]);
    }

    #[tokio::test]
    async fn test_late_frame_waits_at_most_n_minus_one() {
        let (tx0, rx0) = channel::<u8>(64);
        let (tx1, rx1) = channel::<u8>(64);
        let (tx2, rx2) = channel::<u8>(64);
        // One word of slack so the merger cannot run far ahead of the reader.
        let (out_tx, out_rx) = channel::<u8>(1);

        let mut w0 = FrameWriter::new(tx0);
        let mut w1 = FrameWriter::new(tx1);
        let mut w2 = FrameWriter::new(tx2);
        for _ in 0..20 {
            w0.send_frame(0, &[0]).await.unwrap();
            w1.send_frame(1, &[1]).await.unwrap();
        }

        tokio::spawn(Merger::new("test", vec![rx0, rx1, rx2], out_tx).run());
        let mut reader = FrameReader::new(out_rx);
        for _ in 0..5 {
            assert_ne!(reader.next_frame().await, Some(2));
            reader.drain().await;
        }

        w2.send_frame(2, &[2]).await.unwrap();
        let mut before = 0;
        loop {
            let tag = reader.next_frame().await.unwrap();
            reader.drain().await;
            if tag == 2 {
                break;
            }
            before += 1;
        }
        // At most two frames were already committed to the output when the
        // frame arrived; after them, only N-1 = 2 other inputs go first.
        assert!(before <= 4, "{} frames went ahead", before);
    }

    #[tokio::test]
    async fn test_round_robin_over_three_inputs() {
        let (tx0, rx0) = channel::<u8>(64);
        let (tx1, rx1) = channel::<u8>(64);
        let (tx2, rx2) = channel::<u8>(64);
        let (out_tx, out_rx) = channel::<u8>(64);

        let mut w0 = FrameWriter::new(tx0);
        let mut w1 = FrameWriter::new(tx1);
        let mut w2 = FrameWriter::new(tx2);
        for _ in 0..3 {
            w0.send_frame(0, &[0; 9]).await.unwrap();
        }
        w1.send_frame(1, &[1; 9]).await.unwrap();
        for _ in 0..2 {
            w2.send_frame(2, &[2; 9]).await.unwrap();
        }
        drop((w0, w1, w2));

        tokio::spawn(Merger::new("test", vec![rx0, rx1, rx2], out_tx).run());
        let mut reader = FrameReader::new(out_rx);
        let mut order = Vec::new();
        while let Some(tag) = reader.next_frame().await {
            assert_eq!(reader.drain().await, 9);
            order.push(tag);
        }
        assert_eq!(order, vec![0, 1, 2, 0, 2, 0]);
    }

    #[tokio::test]
    async fn test_source_closed_mid_frame() {
        let (tx_a, rx_a) = channel::<u8>(8);
        let (out_tx, out_rx) = channel::<u8>(8);

        tx_a.send(Beat {
            word: Word::from_slice(&[1; 8], false),
            meta: 1,
        })
        .await
        .unwrap();
        drop(tx_a);

        tokio::spawn(Merger::new("test", vec![rx_a], out_tx).run());

        let mut reader = FrameReader::new(out_rx);
        assert_eq!(reader.next_frame().await, Some(1));
        assert_eq!(reader.drain().await, 8);
        assert!(reader.error());
        assert_eq!(reader.next_frame().await, None);
    }
}
