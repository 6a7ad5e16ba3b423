//! Store-and-forward frame FIFO
//!
//! Stands in for the clock-domain-crossing buffers at the edge of the
//! stack: a bounded word queue with an occupancy gauge. Frames leave only
//! once their `last` word has arrived, so frames flagged `error` can be
//! discarded before anything of them is transmitted.

use super::{Beat, StreamRx, StreamTx};
use crate::telemetry::FifoStats;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// What to do when the FIFO is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the incoming frame (the physical receive side cannot stall)
    DropFrame,
    /// Stop accepting input until a frame has left
    BackPressure,
}

pub struct FrameFifo<M> {
    name: &'static str,
    input: StreamRx<M>,
    output: StreamTx<M>,
    capacity: usize,
    policy: OverflowPolicy,
    stats: Arc<FifoStats>,

    queue: VecDeque<Beat<M>>,
    /// Complete frames at the front of the queue
    ready_frames: usize,
    /// Queue index where the incoming (incomplete) frame starts
    cur_start: usize,
    cur_error: bool,
    /// Discarding the rest of an overflowed frame
    dropping: bool,
}

impl<M: Copy> FrameFifo<M> {
    pub fn new(
        name: &'static str,
        input: StreamRx<M>,
        output: StreamTx<M>,
        capacity: usize,
        policy: OverflowPolicy,
        stats: Arc<FifoStats>,
    ) -> Self {
        Self {
            name,
            input,
            output,
            capacity: capacity.max(1),
            policy,
            stats,
            queue: VecDeque::new(),
            ready_frames: 0,
            cur_start: 0,
            cur_error: false,
            dropping: false,
        }
    }

    fn can_accept(&self) -> bool {
        match self.policy {
            OverflowPolicy::DropFrame => true,
            // A frame longer than the FIFO must still get through.
            OverflowPolicy::BackPressure => {
                self.queue.len() < self.capacity || self.ready_frames == 0
            }
        }
    }

    fn discard_current(&mut self) {
        self.queue.truncate(self.cur_start);
        self.cur_error = false;
    }

    fn accept(&mut self, beat: Beat<M>) {
        if self.dropping {
            self.dropping = !beat.word.last;
            return;
        }
        if self.policy == OverflowPolicy::DropFrame && self.queue.len() >= self.capacity {
            self.discard_current();
            self.dropping = !beat.word.last;
            self.stats.overflow_drops.inc();
            debug!("{}: overflow, frame dropped", self.name);
            return;
        }

        self.queue.push_back(beat);
        self.cur_error |= beat.word.error;
        if beat.word.last {
            if self.cur_error {
                self.discard_current();
                self.stats.error_drops.inc();
                debug!("{}: errored frame discarded", self.name);
            } else {
                self.ready_frames += 1;
                self.cur_start = self.queue.len();
                self.stats.frames.inc();
            }
        }
    }

    /// Run until the input is closed and every complete frame has left.
    pub async fn run(mut self) {
        let mut input_open = true;
        loop {
            self.stats.set_occupancy(self.queue.len());
            let accept = input_open && self.can_accept();
            let emit = self.ready_frames > 0;

            let received = tokio::select! {
                biased;
                permit = self.output.reserve(), if emit => {
                    let Ok(permit) = permit else {
                        debug!("{}: output closed", self.name);
                        return;
                    };
                    // `emit` guarantees a complete frame at the front.
                    if let Some(beat) = self.queue.pop_front() {
                        self.cur_start = self.cur_start.saturating_sub(1);
                        if beat.word.last {
                            self.ready_frames -= 1;
                        }
                        permit.send(beat);
                    }
                    continue;
                }
                beat = self.input.recv(), if accept => beat,
                else => break,
            };

            match received {
                Some(beat) => self.accept(beat),
                None => {
                    input_open = false;
                    // An unterminated frame can never complete.
                    self.discard_current();
                }
            }
        }
        self.stats.set_occupancy(0);
        debug!("{}: input closed", self.name);
    }
}
