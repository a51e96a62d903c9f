//! Work sources pulled by the producer loop

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Outcome of one unit of work
pub type WorkResult = Result<(), String>;

/// Lazy, possibly infinite supply of work items
///
/// The producer asks for at most `max` items per batch. Returning an empty
/// batch means the source is exhausted and the producer drains.
#[async_trait]
pub trait WorkSource: Send {
    type Item: Send + 'static;

    async fn next_batch(&mut self, max: usize) -> Vec<Self::Item>;
}

/// Adapts any iterator into a work source
///
/// # Example
///
/// ```
/// use pacer::producer::IterSource;
///
/// // A million synthetic jobs, generated on demand
/// let source = IterSource::new(0..1_000_000u64);
/// ```
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I> {
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

#[async_trait]
impl<I> WorkSource for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    type Item = I::Item;

    async fn next_batch(&mut self, max: usize) -> Vec<Self::Item> {
        self.iter.by_ref().take(max).collect()
    }
}

/// Channel-fed source: waits for at least one item, then takes whatever
/// else is already queued, up to `max`
///
/// Drains once every sender is dropped and the queue is empty.
#[async_trait]
impl<T: Send + 'static> WorkSource for mpsc::Receiver<T> {
    type Item = T;

    async fn next_batch(&mut self, max: usize) -> Vec<T> {
        let mut batch = Vec::new();
        if max == 0 {
            return batch;
        }

        match self.recv().await {
            Some(item) => batch.push(item),
            None => return batch,
        }
        while batch.len() < max {
            match self.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_iter_source_batches_then_drains() {
        let mut source = IterSource::new(0..250u32);

        assert_eq!(source.next_batch(100).await.len(), 100);
        assert_eq!(source.next_batch(100).await.len(), 100);
        let last = source.next_batch(100).await;
        assert_eq!(last, (200..250).collect::<Vec<_>>());
        assert!(source.next_batch(100).await.is_empty());
    }

    #[tokio::test]
    async fn test_iter_source_is_lazy() {
        let mut source = IterSource::new(std::iter::successors(Some(0u64), |n| Some(n + 1)));
        assert_eq!(source.next_batch(3).await, vec![0, 1, 2]);
        assert_eq!(source.next_batch(2).await, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_channel_source() {
        let (tx, mut rx) = mpsc::channel(16);
        for i in 0..5 {
            tx.send(i).await.unwrap();
        }

        assert_eq!(rx.next_batch(3).await, vec![0, 1, 2]);
        assert_eq!(rx.next_batch(10).await, vec![3, 4]);

        drop(tx);
        assert!(rx.next_batch(10).await.is_empty());
    }
}
