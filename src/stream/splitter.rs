//! Whole-frame routing of one stream link onto several outputs

use super::{FrameReader, FrameWriter};
use tracing::debug;

/// Routing decision for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<N> {
    /// Forward to output `index`, re-tagged with the given metadata
    To(usize, N),
    /// Drain the frame
    Drop,
}

/// Sends each incoming frame, unmodified, to the output picked by a
/// routing function. Frames the function rejects, or whose output has gone
/// away, are drained.
pub struct Splitter<M, N, F> {
    name: &'static str,
    input: FrameReader<M>,
    outputs: Vec<FrameWriter<N>>,
    route: F,
}

impl<M, N, F> Splitter<M, N, F>
where
    M: Copy,
    N: Copy,
    F: FnMut(&M) -> Route<N>,
{
    pub fn new(
        name: &'static str,
        input: FrameReader<M>,
        outputs: Vec<FrameWriter<N>>,
        route: F,
    ) -> Self {
        Self {
            name,
            input,
            outputs,
            route,
        }
    }

    pub async fn run(mut self) {
        while let Some(meta) = self.input.next_frame().await {
            let (index, out_meta) = match (self.route)(&meta) {
                Route::To(i, m) if i < self.outputs.len() => (i, m),
                _ => {
                    self.input.drain().await;
                    continue;
                }
            };

            let writer = &mut self.outputs[index];
            if writer.is_closed() {
                self.input.drain().await;
                continue;
            }
            writer.begin(out_meta);
            let result = self.input.forward(writer, None).await;
            let error = self.input.error();
            if result.is_err() || writer.finish(error).await.is_err() {
                debug!("{}: output {} closed", self.name, index);
                self.input.drain().await;
            }
        }
        debug!("{}: input closed", self.name);
    }
}
