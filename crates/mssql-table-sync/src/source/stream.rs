//! Demand-driven row batches.
//!
//! The producer task reads rows only after the consumer asks for the next
//! batch, so at most one batch is buffered and the source read is paused
//! while the consumer inserts. Dropping the [`RowStream`] aborts the producer.

use crate::core::{Row, RowBatch};
use crate::error::{Result, SyncError};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Producer half handed to the reading task.
pub struct BatchProducer {
    demand: mpsc::Receiver<()>,
    batches: mpsc::Sender<Result<RowBatch>>,
    batch_size: usize,
}

impl BatchProducer {
    /// Rows per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Wait until the consumer asks for the next batch.
    ///
    /// Returns `false` once the consumer is gone.
    pub async fn wait_for_demand(&mut self) -> bool {
        self.demand.recv().await.is_some()
    }

    /// Hand a batch (or a read error) to the consumer.
    ///
    /// Returns `false` once the consumer is gone.
    pub async fn send(&self, batch: Result<RowBatch>) -> bool {
        self.batches.send(batch).await.is_ok()
    }
}

/// Consumer half: pulls one batch at a time from the producer task.
pub struct RowStream {
    demand: mpsc::Sender<()>,
    batches: mpsc::Receiver<Result<RowBatch>>,
    producer: JoinHandle<()>,
    finished: bool,
}

impl RowStream {
    /// Spawn `produce` as the reading task.
    ///
    /// The task must call [`BatchProducer::wait_for_demand`] before reading each
    /// batch and return after the last one. A partial final batch is sent as is;
    /// an exhausted source sends nothing.
    pub fn spawn<F, Fut>(batch_size: usize, produce: F) -> Self
    where
        F: FnOnce(BatchProducer) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (demand_tx, demand_rx) = mpsc::channel(1);
        let (batch_tx, batch_rx) = mpsc::channel(1);

        let producer = BatchProducer {
            demand: demand_rx,
            batches: batch_tx,
            batch_size: batch_size.max(1),
        };
        let handle = tokio::spawn(produce(producer));

        Self {
            demand: demand_tx,
            batches: batch_rx,
            producer: handle,
            finished: false,
        }
    }

    /// Stream over rows already in memory.
    pub fn from_rows(rows: Vec<Row>, batch_size: usize) -> Self {
        Self::spawn(batch_size, move |mut producer| async move {
            let mut rows = rows.into_iter().peekable();
            while rows.peek().is_some() {
                if !producer.wait_for_demand().await {
                    return;
                }
                let batch: Vec<Row> = rows.by_ref().take(producer.batch_size()).collect();
                if !producer.send(Ok(RowBatch::new(batch))).await {
                    return;
                }
            }
        })
    }

    /// Request and receive the next batch. `None` once the source is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        if self.finished {
            return Ok(None);
        }

        // A closed demand channel means the producer already returned; any
        // batch it sent is still in the batch channel.
        let _ = self.demand.send(()).await;

        match self.batches.recv().await {
            Some(Ok(batch)) if !batch.is_empty() => Ok(Some(batch)),
            Some(Ok(_)) => {
                self.finished = true;
                Ok(None)
            }
            Some(Err(e)) => {
                self.finished = true;
                Err(e)
            }
            None => {
                // The producer dropped its sender: it either returned or died.
                self.finished = true;
                match (&mut self.producer).await {
                    Err(e) if e.is_panic() => {
                        Err(SyncError::pool(e, "row stream producer task panicked"))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    /// Stop the producer and discard anything it has not delivered.
    pub fn cancel(&mut self) {
        self.finished = true;
        self.producer.abort();
        self.batches.close();
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn rows(n: usize) -> Vec<Row> {
        (0..n).map(|i| vec![SqlValue::I64(i as i64)]).collect()
    }

    async fn batch_sizes(mut stream: RowStream) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Some(batch) = stream.next_batch().await.unwrap() {
            sizes.push(batch.len());
        }
        sizes
    }

    #[tokio::test]
    async fn test_partial_final_batch_is_flushed() {
        let sizes = batch_sizes(RowStream::from_rows(rows(2500), 1000)).await;
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn test_exact_multiple_yields_no_extra_batch() {
        let sizes = batch_sizes(RowStream::from_rows(rows(2000), 1000)).await;
        assert_eq!(sizes, vec![1000, 1000]);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut stream = RowStream::from_rows(Vec::new(), 1000);
        assert!(stream.next_batch().await.unwrap().is_none());
        assert!(stream.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rows_keep_source_order() {
        let mut stream = RowStream::from_rows(rows(5), 2);
        let mut seen = Vec::new();
        while let Some(batch) = stream.next_batch().await.unwrap() {
            for row in batch.rows {
                if let SqlValue::I64(v) = row[0] {
                    seen.push(v);
                }
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_producer_waits_for_demand() {
        let read = Arc::new(AtomicUsize::new(0));
        let counter = read.clone();

        let mut stream = RowStream::spawn(10, move |mut producer| async move {
            loop {
                if !producer.wait_for_demand().await {
                    return;
                }
                let batch: Vec<Row> = rows(producer.batch_size());
                counter.fetch_add(batch.len(), Ordering::SeqCst);
                if !producer.send(Ok(RowBatch::new(batch))).await {
                    return;
                }
            }
        });

        let first = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 10);
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        // Nothing is read ahead while the consumer holds the batch.
        assert_eq!(read.load(Ordering::SeqCst), 10);

        stream.next_batch().await.unwrap().unwrap();
        assert_eq!(read.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_read_error_is_returned() {
        let mut stream = RowStream::spawn(10, |mut producer| async move {
            if producer.wait_for_demand().await {
                producer
                    .send(Err(SyncError::pool("connection reset", "reading rows")))
                    .await;
            }
        });
        assert!(stream.next_batch().await.is_err());
        assert!(stream.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_stops_stream() {
        let mut stream = RowStream::from_rows(rows(30), 10);
        assert!(stream.next_batch().await.unwrap().is_some());
        stream.cancel();
        assert!(stream.next_batch().await.unwrap().is_none());
    }
}
