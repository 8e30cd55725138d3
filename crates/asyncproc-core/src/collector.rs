//! Append-only, multi-consumer buffer fed by a single producer.
//!
//! A collector is filled by one background producer (typically the line reader
//! of a child process stream) and read by any number of independent cursors.
//! Each cursor starts at the beginning of the buffer, observes items in append
//! order and finishes only once the producer has called
//! [`OutputCollector::complete`] and every buffered item has been handed out.

use crate::error::ProcessError;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::watch;

struct Buffer<T> {
    items: Vec<T>,
    completed: bool,
}

/// Shared handle to a growing sequence of items.
///
/// Clones share the same buffer.
pub struct OutputCollector<T> {
    sender: Arc<watch::Sender<Buffer<T>>>,
}

impl<T> Clone for OutputCollector<T> {
    fn clone(&self) -> Self {
        OutputCollector {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Clone> Default for OutputCollector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for OutputCollector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.sender.borrow();
        f.debug_struct("OutputCollector")
            .field("len", &buffer.items.len())
            .field("completed", &buffer.completed)
            .finish()
    }
}

impl<T: Clone> OutputCollector<T> {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Buffer {
            items: Vec::new(),
            completed: false,
        });
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Append `item` and wake every cursor waiting for data.
    ///
    /// Fails with [`ProcessError::StreamProtocolViolation`] once the collector
    /// has been completed; the buffer is left untouched in that case.
    pub fn add(&self, item: T) -> Result<(), ProcessError> {
        let mut accepted = false;
        self.sender.send_if_modified(|buffer| {
            if buffer.completed {
                return false;
            }
            buffer.items.push(item);
            accepted = true;
            true
        });

        if accepted {
            Ok(())
        } else {
            tracing::error!("item appended to an output collector after completion");
            Err(ProcessError::StreamProtocolViolation(
                "add called after the collector was completed".to_string(),
            ))
        }
    }

    /// Mark that no further items will arrive.
    ///
    /// Returns `true` for the call that performed the transition.
    pub fn complete(&self) -> bool {
        self.sender.send_if_modified(|buffer| {
            if buffer.completed {
                false
            } else {
                buffer.completed = true;
                true
            }
        })
    }

    pub fn is_completed(&self) -> bool {
        self.sender.borrow().completed
    }

    pub fn len(&self) -> usize {
        self.sender.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything buffered so far
    pub fn snapshot(&self) -> Vec<T> {
        self.sender.borrow().items.clone()
    }

    /// A new cursor positioned at the first item
    pub fn cursor(&self) -> OutputCursor<T> {
        OutputCursor {
            receiver: self.sender.subscribe(),
            position: 0,
        }
    }

    /// Wait for completion and return the full sequence
    pub async fn collect(&self) -> Vec<T> {
        let mut cursor = self.cursor();
        let mut items = Vec::new();
        while let Some(item) = cursor.next().await {
            items.push(item);
        }
        items
    }
}

/// Independent read position over an [`OutputCollector`].
pub struct OutputCursor<T> {
    receiver: watch::Receiver<Buffer<T>>,
    position: usize,
}

impl<T: Clone> OutputCursor<T> {
    /// Next item in append order.
    ///
    /// Suspends while the cursor has caught up with the producer and the
    /// collector is not complete. Returns `None` once the collector is complete
    /// and drained, or when every collector handle has been dropped.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            {
                let buffer = self.receiver.borrow_and_update();
                if let Some(item) = buffer.items.get(self.position) {
                    self.position += 1;
                    return Some(item.clone());
                }
                if buffer.completed {
                    return None;
                }
            }

            if self.receiver.changed().await.is_err() {
                // producer is gone, hand out whatever it left behind
                let buffer = self.receiver.borrow();
                let item = buffer.items.get(self.position).cloned();
                if item.is_some() {
                    self.position += 1;
                }
                return item;
            }
        }
    }

    /// Number of items this cursor has already yielded
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn into_stream(self) -> impl Stream<Item = T> {
        futures::stream::unfold(self, |mut cursor| async move {
            cursor.next().await.map(|item| (item, cursor))
        })
    }

    /// Thread-blocking iterator for callers outside an async context.
    ///
    /// Must not be driven from a runtime worker thread.
    pub fn blocking(self) -> BlockingCursor<T> {
        BlockingCursor { cursor: self }
    }
}

pub struct BlockingCursor<T> {
    cursor: OutputCursor<T>,
}

impl<T: Clone> Iterator for BlockingCursor<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        futures::executor::block_on(self.cursor.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_items_observed_in_append_order() {
        let collector = OutputCollector::new();
        collector.add("a").unwrap();
        collector.add("b").unwrap();
        collector.add("c").unwrap();
        collector.complete();

        let mut cursor = collector.cursor();
        assert_eq!(cursor.next().await, Some("a"));
        assert_eq!(cursor.next().await, Some("b"));
        assert_eq!(cursor.next().await, Some("c"));
        assert_eq!(cursor.next().await, None);
        assert_eq!(cursor.next().await, None);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_everything_without_blocking() {
        let collector = OutputCollector::new();
        for i in 0..5 {
            collector.add(i).unwrap();
        }
        collector.complete();

        let items = tokio::time::timeout(Duration::from_millis(100), collector.collect())
            .await
            .expect("completed collector must not block");
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_concurrent_consumers_see_identical_sequences() {
        let collector = OutputCollector::new();

        let fast = {
            let collector = collector.clone();
            tokio::spawn(async move { collector.collect().await })
        };
        let slow = {
            let mut cursor = collector.cursor();
            tokio::spawn(async move {
                let mut items = Vec::new();
                while let Some(item) = cursor.next().await {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    items.push(item);
                }
                items
            })
        };

        for i in 0..50 {
            collector.add(i).unwrap();
            if i % 10 == 0 {
                tokio::task::yield_now().await;
            }
        }
        collector.complete();

        let expected: Vec<i32> = (0..50).collect();
        assert_eq!(fast.await.unwrap(), expected);
        assert_eq!(slow.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_waiting_cursor_is_woken_by_add_and_complete() {
        let collector = OutputCollector::new();
        let mut cursor = collector.cursor();

        let waiter = tokio::spawn(async move {
            let first = cursor.next().await;
            let second = cursor.next().await;
            (first, second)
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        collector.add("line".to_string()).unwrap();
        collector.complete();

        let (first, second) = waiter.await.unwrap();
        assert_eq!(first.as_deref(), Some("line"));
        assert_eq!(second, None);
    }

    #[test]
    fn test_add_after_complete_is_rejected() {
        let collector = OutputCollector::new();
        collector.add(1).unwrap();
        assert!(collector.complete());
        assert!(!collector.complete());

        let err = collector.add(2).unwrap_err();
        assert!(err.is_programming_error());
        assert_eq!(collector.snapshot(), vec![1]);
    }

    #[tokio::test]
    async fn test_cursor_ends_when_collectors_are_dropped() {
        let collector = OutputCollector::new();
        collector.add(9).unwrap();
        let mut cursor = collector.cursor();
        drop(collector);

        assert_eq!(cursor.next().await, Some(9));
        assert_eq!(cursor.next().await, None);
    }

    #[tokio::test]
    async fn test_stream_adapter() {
        let collector = OutputCollector::new();
        collector.add("x".to_string()).unwrap();
        collector.add(String::new()).unwrap();
        collector.complete();

        let items: Vec<String> = collector.cursor().into_stream().collect().await;
        assert_eq!(items, vec!["x".to_string(), String::new()]);
    }

    #[test]
    fn test_blocking_iterator_across_threads() {
        let collector = OutputCollector::new();
        let reader = {
            let cursor = collector.cursor();
            std::thread::spawn(move || cursor.blocking().collect::<Vec<_>>())
        };

        for i in 0..3 {
            collector.add(i).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        collector.complete();

        assert_eq!(reader.join().unwrap(), vec![0, 1, 2]);
        assert_eq!(collector.len(), 3);
        assert!(collector.is_completed());
    }
}
