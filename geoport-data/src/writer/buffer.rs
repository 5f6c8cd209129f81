//! Insert buffer: groups resolved rows into sink-sized batches.
//!
//! Resolvers send rows through a [`RowSender`]. The buffer forwards a batch
//! whenever `batch_size` rows have accumulated, and forwards the partial
//! batch on an explicit flush or when every sender has gone away.

use std::mem;

use geoport_core::Row;
use log::debug;
use tokio::sync::{mpsc, oneshot};

use super::{Abort, WriteError};

/// Messages accepted by the insert buffer.
#[derive(Debug)]
pub(crate) enum RowMessage {
    Row(Row),
    /// Forward everything queued so far, then acknowledge once written.
    Flush(oneshot::Sender<()>),
}

/// Messages accepted by the flusher.
#[derive(Debug)]
pub(crate) enum BatchMessage {
    Batch(Vec<Row>),
    Flush(oneshot::Sender<()>),
}

/// Sending half shared by the resolver stages.
#[derive(Debug, Clone)]
pub(crate) struct RowSender {
    tx: mpsc::Sender<RowMessage>,
}

impl RowSender {
    pub(crate) fn new(tx: mpsc::Sender<RowMessage>) -> Self {
        Self { tx }
    }

    /// Queue `row`, blocking while the buffer is full.
    pub(crate) fn send(&self, row: Row) -> Result<(), WriteError> {
        self.tx
            .blocking_send(RowMessage::Row(row))
            .map_err(|_| WriteError::Disconnected {
                stage: "insert buffer",
            })
    }

    /// Block until every row sent before this call has reached the sink.
    pub(crate) fn flush_and_wait(&self) -> Result<(), WriteError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .blocking_send(RowMessage::Flush(ack_tx))
            .map_err(|_| WriteError::Disconnected {
                stage: "insert buffer",
            })?;
        ack_rx
            .blocking_recv()
            .map_err(|_| WriteError::Disconnected { stage: "flusher" })
    }
}

/// Drain `rows` into batches of `batch_size` and pass them to the flusher.
pub(crate) fn run(
    mut rows: mpsc::Receiver<RowMessage>,
    batches: &mpsc::Sender<BatchMessage>,
    batch_size: usize,
    abort: &Abort,
) -> Result<(), WriteError> {
    let batch_size = batch_size.max(1);
    let mut pending = Vec::with_capacity(batch_size);
    while let Some(message) = rows.blocking_recv() {
        if abort.is_set() {
            debug!("Insert buffer stopping after abort");
            return Ok(());
        }
        match message {
            RowMessage::Row(row) => {
                pending.push(row);
                if pending.len() >= batch_size {
                    let batch = mem::replace(&mut pending, Vec::with_capacity(batch_size));
                    forward(batches, BatchMessage::Batch(batch), abort)?;
                }
            }
            RowMessage::Flush(ack) => {
                if !pending.is_empty() {
                    let batch = mem::replace(&mut pending, Vec::with_capacity(batch_size));
                    forward(batches, BatchMessage::Batch(batch), abort)?;
                }
                forward(batches, BatchMessage::Flush(ack), abort)?;
            }
        }
    }
    if !pending.is_empty() && !abort.is_set() {
        forward(batches, BatchMessage::Batch(pending), abort)?;
    }
    Ok(())
}

fn forward(
    batches: &mpsc::Sender<BatchMessage>,
    message: BatchMessage,
    abort: &Abort,
) -> Result<(), WriteError> {
    batches.blocking_send(message).map_err(|_| {
        abort.trigger();
        WriteError::Disconnected { stage: "flusher" }
    })
}
