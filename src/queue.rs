use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Bounded-wait FIFO handoff between producer threads and a worker.
///
/// Once ended, the queue rejects new jobs but still drains the ones already
/// queued. `cancel_queued_jobs` lets the owner reclaim resources held by
/// jobs that will never run; each job passes through the cleanup closure
/// exactly once.
pub struct JobQueue<T> {
    inner: Mutex<Inner<T>>,
    condvar: Condvar,
}

struct Inner<T> {
    jobs: VecDeque<T>,
    ended: bool,
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: VecDeque::new(),
                ended: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Queues a job. Returns false when the queue has ended.
    pub fn send_job(&self, job: T) -> bool {
        let mut inner = self.inner.lock().expect("queue lock");
        if inner.ended {
            return false;
        }
        inner.jobs.push_back(job);
        self.condvar.notify_one();
        true
    }

    /// Blocks until a job arrives, the queue ends with no jobs left, or the
    /// timeout elapses.
    pub fn wait_for_job(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().expect("queue lock");
        loop {
            if let Some(job) = inner.jobs.pop_front() {
                return Some(job);
            }
            if inner.ended {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .condvar
                .wait_timeout(inner, deadline - now)
                .expect("queue lock");
            inner = guard;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().expect("queue lock").jobs.pop_front()
    }

    /// Marks the queue ended and wakes every waiter.
    pub fn end(&self) {
        self.inner.lock().expect("queue lock").ended = true;
        self.condvar.notify_all();
    }

    pub fn has_ended(&self) -> bool {
        self.inner.lock().expect("queue lock").ended
    }

    /// Drains every queued job through `cleanup`. Returns how many jobs
    /// were cancelled.
    pub fn cancel_queued_jobs(&self, cleanup: impl FnMut(T)) -> usize {
        self.cancel_jobs_where(|_| true, cleanup)
    }

    /// Removes queued jobs matching `predicate`, passing each through
    /// `cleanup` exactly once, in queue order.
    pub fn cancel_jobs_where(
        &self,
        mut predicate: impl FnMut(&T) -> bool,
        mut cleanup: impl FnMut(T),
    ) -> usize {
        let cancelled: Vec<T> = {
            let mut inner = self.inner.lock().expect("queue lock");
            let mut kept = VecDeque::with_capacity(inner.jobs.len());
            let mut cancelled = Vec::new();
            for job in inner.jobs.drain(..) {
                if predicate(&job) {
                    cancelled.push(job);
                } else {
                    kept.push_back(job);
                }
            }
            inner.jobs = kept;
            cancelled
        };
        let count = cancelled.len();
        for job in cancelled {
            cleanup(job);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::JobQueue;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn jobs_flow_in_order() {
        let queue = JobQueue::new();
        assert!(queue.send_job(1));
        assert!(queue.send_job(2));
        assert_eq!(queue.wait_for_job(Duration::from_millis(10)), Some(1));
        assert_eq!(queue.wait_for_job(Duration::from_millis(10)), Some(2));
        assert_eq!(queue.wait_for_job(Duration::from_millis(10)), None);
    }

    #[test]
    fn ended_queue_rejects_but_drains() {
        let queue = JobQueue::new();
        queue.send_job("a");
        queue.end();
        assert!(!queue.send_job("b"));
        assert_eq!(queue.wait_for_job(Duration::from_millis(10)), Some("a"));
        assert_eq!(queue.wait_for_job(Duration::from_millis(10)), None);
    }

    #[test]
    fn cancel_runs_cleanup_once_per_job() {
        let queue = JobQueue::new();
        queue.send_job(vec![1u8, 2]);
        queue.send_job(vec![3u8]);
        let mut seen = Vec::new();
        let count = queue.cancel_queued_jobs(|job| seen.push(job));
        assert_eq!(count, 2);
        assert_eq!(seen, vec![vec![1u8, 2], vec![3u8]]);
        assert!(queue.is_empty());
        assert_eq!(queue.cancel_queued_jobs(|_| panic!("no jobs left")), 0);
    }

    #[test]
    fn predicate_cancellation_keeps_the_rest() {
        let queue = JobQueue::new();
        for value in 1..=5 {
            queue.send_job(value);
        }
        let mut cancelled = Vec::new();
        let count = queue.cancel_jobs_where(|job| job % 2 == 0, |job| cancelled.push(job));
        assert_eq!(count, 2);
        assert_eq!(cancelled, vec![2, 4]);
        assert_eq!(queue.wait_for_job(Duration::from_millis(10)), Some(1));
        assert_eq!(queue.wait_for_job(Duration::from_millis(10)), Some(3));
        assert_eq!(queue.wait_for_job(Duration::from_millis(10)), Some(5));
    }

    #[test]
    fn worker_thread_receives_jobs() {
        let queue = Arc::new(JobQueue::new());
        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::spawn(move || {
            let mut total = 0;
            while let Some(job) = worker_queue.wait_for_job(Duration::from_secs(5)) {
                total += job;
            }
            total
        });
        for value in 1..=10 {
            queue.send_job(value);
        }
        queue.end();
        assert_eq!(worker.join().expect("worker"), 55);
    }
}
