//! Token bucket for physical file moves
//!
//! A fixed-capacity semaphore. Each move consumes one token; once refilling
//! is running, every token taken comes back one refill interval later, so no
//! rolling one-second window holds more than `capacity` moves. When the bucket
//! is empty the worker waits. Metadata work never touches the bucket.

use melodee_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Interval between refills
pub const REFILL_INTERVAL: Duration = Duration::from_secs(1);

pub struct TokenBucket {
    capacity: usize,
    tokens: Arc<Semaphore>,
    taken: Option<mpsc::UnboundedSender<Instant>>,
    refill_task: Option<JoinHandle<()>>,
}

impl TokenBucket {
    /// Full bucket with `capacity` tokens (at least one); refill is not started
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            capacity,
            tokens: Arc::new(Semaphore::new(capacity)),
            taken: None,
            refill_task: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Take one token, waiting for a refill if the bucket is empty
    pub async fn acquire(&self) -> Result<()> {
        let permit = self
            .tokens
            .acquire()
            .await
            .map_err(|_| Error::Internal("Token bucket closed".to_string()))?;
        permit.forget();
        if let Some(taken) = &self.taken {
            // Receiver only goes away on stop, after which the bucket is closed
            let _ = taken.send(Instant::now());
        }
        Ok(())
    }

    /// Top the bucket up to capacity, never above
    pub fn refill(&self) {
        refill_to(&self.tokens, self.capacity);
    }

    /// Spawn the task returning each token one refill interval after it was taken
    ///
    /// Call before the first `acquire`: tokens taken earlier are not returned.
    pub fn start_refill(&mut self) {
        if self.refill_task.is_some() {
            return;
        }

        let (taken_tx, mut taken_rx) = mpsc::unbounded_channel::<Instant>();
        let tokens = Arc::clone(&self.tokens);
        let capacity = self.capacity;
        self.taken = Some(taken_tx);
        self.refill_task = Some(tokio::spawn(async move {
            // Instants arrive in acquisition order, so deadlines never go backwards
            while let Some(at) = taken_rx.recv().await {
                tokio::time::sleep_until(at + REFILL_INTERVAL).await;
                if tokens.available_permits() < capacity {
                    tokens.add_permits(1);
                }
            }
        }));
    }

    /// Stop refilling and wake any waiters with an error
    pub fn stop(&mut self) {
        self.taken = None;
        if let Some(task) = self.refill_task.take() {
            task.abort();
        }
        self.tokens.close();
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        if let Some(task) = self.refill_task.take() {
            task.abort();
        }
    }
}

fn refill_to(tokens: &Semaphore, capacity: usize) {
    let missing = capacity.saturating_sub(tokens.available_permits());
    if missing > 0 {
        tokens.add_permits(missing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_at_most_capacity_without_refill() {
        let bucket = TokenBucket::new(3);
        for _ in 0..3 {
            bucket.acquire().await.unwrap();
        }
        assert_eq!(bucket.available(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(50), bucket.acquire()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(2);
        bucket.refill();
        assert_eq!(bucket.available(), 2);

        bucket.acquire().await.unwrap();
        bucket.refill();
        bucket.refill();
        assert_eq!(bucket.available(), 2);
    }

    #[tokio::test]
    async fn test_refill_task_releases_waiters() {
        let mut bucket = TokenBucket::new(2);
        bucket.start_refill();

        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await.unwrap();
        }
        // Third token only arrives with the first refill
        assert!(start.elapsed() >= Duration::from_millis(900));
        bucket.stop();
    }

    #[tokio::test]
    async fn test_no_window_exceeds_capacity() {
        let mut bucket = TokenBucket::new(2);
        bucket.start_refill();

        let mut taken = Vec::new();
        for i in 0..7 {
            bucket.acquire().await.unwrap();
            taken.push(Instant::now());
            // Uneven pacing between moves
            if i % 3 == 1 {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        }
        bucket.stop();

        // Any three consecutive moves span at least one interval
        for window in taken.windows(3) {
            let span = window[2] - window[0];
            assert!(
                span >= Duration::from_millis(950),
                "three moves within {:?}",
                span
            );
        }
    }

    #[tokio::test]
    async fn test_stop_fails_pending_acquire() {
        let mut bucket = TokenBucket::new(1);
        bucket.acquire().await.unwrap();
        bucket.stop();
        assert!(bucket.acquire().await.is_err());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(TokenBucket::new(0).capacity(), 1);
    }
}
