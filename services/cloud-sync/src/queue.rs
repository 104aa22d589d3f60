use crate::task::{Priority, SyncTask};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;

/// Pending uploads, highest priority first and FIFO within a priority.
///
/// Every mutation happens under one mutex, so no caller can observe the queue
/// out of order. The lock is never held across an await point.
#[derive(Default)]
pub struct SyncQueue {
    tasks: Mutex<VecDeque<SyncTask>>,
    available: Notify,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task behind every queued task of equal or higher priority
    pub fn enqueue(&self, task: SyncTask) {
        let depth = {
            let mut tasks = self.tasks.lock();
            let index = tasks.partition_point(|queued| queued.priority >= task.priority);
            tasks.insert(index, task);
            tasks.len()
        };

        metrics::gauge!("cloud_sync.queue.depth").set(depth as f64);
        self.available.notify_one();
    }

    /// Remove and return the front task
    pub fn dequeue_highest(&self) -> Option<SyncTask> {
        let mut tasks = self.tasks.lock();
        let task = tasks.pop_front();
        metrics::gauge!("cloud_sync.queue.depth").set(tasks.len() as f64);
        task
    }

    /// Wait until a task is enqueued or `timeout` elapses.
    ///
    /// An enqueue that happened while nobody was waiting is remembered, so the
    /// next call returns immediately.
    pub async fn wait_for_task(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.available.notified()).await;
    }

    /// Queue depth per priority
    pub fn snapshot_by_priority(&self) -> BTreeMap<Priority, usize> {
        let tasks = self.tasks.lock();
        let mut by_priority = BTreeMap::new();
        for task in tasks.iter() {
            *by_priority.entry(task.priority).or_insert(0) += 1;
        }
        by_priority
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn task(name: &str, priority: Priority) -> SyncTask {
        SyncTask::new(format!("/opt/nvr/storage/{name}.mp4"), "cam-01", "site-a", priority, "cctv")
            .unwrap()
    }

    fn drain(queue: &SyncQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.dequeue_highest())
            .map(|t| t.source_path.file_stem().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_higher_priority_dequeued_first() {
        let queue = SyncQueue::new();
        queue.enqueue(task("a", Priority::Normal));
        queue.enqueue(task("b", Priority::Critical));
        queue.enqueue(task("c", Priority::Normal));

        assert_eq!(drain(&queue), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = SyncQueue::new();
        let order = [
            ("n1", Priority::Normal),
            ("h1", Priority::High),
            ("n2", Priority::Normal),
            ("c1", Priority::Critical),
            ("h2", Priority::High),
            ("n3", Priority::Normal),
            ("c2", Priority::Critical),
        ];
        for (name, priority) in order {
            queue.enqueue(task(name, priority));
        }

        assert_eq!(drain(&queue), vec!["c1", "c2", "h1", "h2", "n1", "n2", "n3"]);
    }

    #[test]
    fn test_requeued_task_keeps_priority_and_retry_count() {
        let queue = SyncQueue::new();
        queue.enqueue(task("first", Priority::High));
        queue.enqueue(task("second", Priority::High));

        let mut retried = queue.dequeue_highest().unwrap();
        retried.retry_count = 2;
        queue.enqueue(retried);
        queue.enqueue(task("low", Priority::Normal));

        let next = queue.dequeue_highest().unwrap();
        assert_eq!(next.source_path.file_stem().unwrap(), "second");
        let again = queue.dequeue_highest().unwrap();
        assert_eq!(again.source_path.file_stem().unwrap(), "first");
        assert_eq!(again.retry_count, 2);
        assert_eq!(again.priority, Priority::High);
    }

    #[test]
    fn test_empty_queue_dequeues_none() {
        let queue = SyncQueue::new();
        assert!(queue.is_empty());
        assert!(queue.dequeue_highest().is_none());
    }

    #[test]
    fn test_snapshot_by_priority() {
        let queue = SyncQueue::new();
        queue.enqueue(task("a", Priority::Normal));
        queue.enqueue(task("b", Priority::Normal));
        queue.enqueue(task("c", Priority::Critical));

        let snapshot = queue.snapshot_by_priority();
        assert_eq!(snapshot.get(&Priority::Normal), Some(&2));
        assert_eq!(snapshot.get(&Priority::Critical), Some(&1));
        assert_eq!(snapshot.get(&Priority::High), None);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_concurrent_producers_keep_order() {
        let queue = Arc::new(SyncQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let priority = match (worker + i) % 3 {
                            0 => Priority::Normal,
                            1 => Priority::High,
                            _ => Priority::Critical,
                        };
                        queue.enqueue(task(&format!("w{worker}-{i}"), priority));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let priorities: Vec<Priority> = std::iter::from_fn(|| queue.dequeue_highest())
            .map(|t| t.priority)
            .collect();
        assert_eq!(priorities.len(), 200);
        assert!(priorities.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_early_on_enqueue() {
        let queue = Arc::new(SyncQueue::new());
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            producer.enqueue(task("late", Priority::Normal));
        });

        let started = tokio::time::Instant::now();
        queue.wait_for_task(Duration::from_secs(10)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.len(), 1);
    }
}
