//! Single consumer that hands batches to the sink.

use geoport_core::Sink;
use log::debug;
use tokio::sync::mpsc;

use super::{Abort, WriteError, buffer::BatchMessage};

/// Totals written by the flusher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FlushStats {
    pub(crate) rows: usize,
    pub(crate) batches: usize,
}

/// Insert every received batch in arrival order and acknowledge flush
/// markers once all earlier batches are written.
pub(crate) fn run(
    sink: &mut dyn Sink,
    mut batches: mpsc::Receiver<BatchMessage>,
    abort: &Abort,
) -> Result<FlushStats, WriteError> {
    let mut stats = FlushStats::default();
    while let Some(message) = batches.blocking_recv() {
        match message {
            BatchMessage::Batch(batch) => {
                if abort.is_set() {
                    debug!("Flusher stopping after abort");
                    break;
                }
                if let Err(err) = sink.insert(&batch) {
                    abort.trigger();
                    return Err(err.into());
                }
                stats.batches += 1;
                stats.rows += batch.len();
            }
            BatchMessage::Flush(ack) => {
                if ack.send(()).is_err() {
                    debug!("Flush acknowledgement dropped by waiter");
                }
            }
        }
    }
    Ok(stats)
}
