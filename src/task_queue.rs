//! Bounded, producer-closed queue of part upload tasks
//!
//! One producer (the coordinator) fills the queue and closes it; any number
//! of workers drain it. A task is received by exactly one worker.

use crate::error::{Result, UploadError};
use crate::models::UploadTask;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Producer half of the task queue
pub struct TaskQueue {
    sender: Option<mpsc::Sender<UploadTask>>,
    receiver: TaskReceiver,
    capacity: usize,
}

/// Consumer half, cloned into every worker
#[derive(Clone)]
pub struct TaskReceiver {
    inner: Arc<Mutex<mpsc::Receiver<UploadTask>>>,
}

impl TaskQueue {
    /// Create a queue able to hold `capacity` tasks without blocking
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        TaskQueue {
            sender: Some(sender),
            receiver: TaskReceiver {
                inner: Arc::new(Mutex::new(receiver)),
            },
            capacity,
        }
    }

    /// Enqueue a task without waiting
    ///
    /// The queue is sized to the whole plan, so a full queue means the
    /// caller pushed more tasks than it planned for.
    pub fn push(&self, task: UploadTask) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| UploadError::InternalError("task queue already closed".to_string()))?;

        sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(task) => UploadError::InternalError(format!(
                "task queue full (capacity {}) while enqueuing part {}",
                self.capacity, task.part.index
            )),
            mpsc::error::TrySendError::Closed(_) => {
                UploadError::InternalError("task queue has no consumers".to_string())
            }
        })
    }

    /// Signal that no more tasks will be pushed
    ///
    /// Workers still drain whatever is queued before seeing the end.
    pub fn close(&mut self) {
        self.sender.take();
    }

    pub fn receiver(&self) -> TaskReceiver {
        self.receiver.clone()
    }
}

impl TaskReceiver {
    /// Next task, or `None` once the queue is closed and drained
    pub async fn recv(&self) -> Option<UploadTask> {
        self.inner.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ByteRange, Part, UploadSession};
    use bytes::Bytes;

    fn task(index: u32) -> UploadTask {
        UploadTask {
            session: Arc::new(UploadSession {
                upload_id: "u".to_string(),
                bucket: "b".to_string(),
                key: "k".to_string(),
                total_parts: 3,
            }),
            part: Part::new(index, ByteRange::new(0, 0).unwrap()),
            payload: Bytes::from_static(b"x"),
        }
    }

    #[tokio::test]
    async fn test_drains_then_ends_after_close() {
        let mut queue = TaskQueue::with_capacity(2);
        queue.push(task(1)).unwrap();
        queue.push(task(2)).unwrap();
        queue.close();

        let receiver = queue.receiver();
        assert_eq!(receiver.recv().await.unwrap().part.index, 1);
        assert_eq!(receiver.recv().await.unwrap().part.index, 2);
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_push_beyond_capacity_fails() {
        let queue = TaskQueue::with_capacity(1);
        queue.push(task(1)).unwrap();
        assert!(queue.push(task(2)).is_err());
    }

    #[tokio::test]
    async fn test_push_after_close_fails() {
        let mut queue = TaskQueue::with_capacity(1);
        queue.close();
        assert!(queue.push(task(1)).is_err());
    }

    #[tokio::test]
    async fn test_each_task_received_once() {
        let mut queue = TaskQueue::with_capacity(3);
        for index in 1..=3 {
            queue.push(task(index)).unwrap();
        }
        queue.close();

        let first = queue.receiver();
        let second = queue.receiver();
        let mut seen = Vec::new();
        while let Some(task) = first.recv().await {
            seen.push(task.part.index);
            if let Some(task) = second.recv().await {
                seen.push(task.part.index);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
