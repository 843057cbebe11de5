use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<T> {
    Finished(T),
    /// The pool was closed before the job got a worker.
    NotStarted,
}

/// Runs submitted jobs on at most `workers` concurrent tokio tasks and hands
/// back their results in the order they finish.
pub struct WorkerPool<T> {
    permits: Arc<Semaphore>,
    tasks: JoinSet<Option<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(workers: usize) -> Self {
        WorkerPool {
            permits: Arc::new(Semaphore::new(workers)),
            tasks: JoinSet::new(),
        }
    }

    pub fn submit<F>(&mut self, job: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            Some(job.await)
        });
    }

    /// Jobs submitted but not yet drained.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stops handing out workers. Jobs already running carry on; jobs still
    /// waiting come back as `Completion::NotStarted`.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Waits for the next job to finish, whichever it is. Returns `None` once
    /// every submitted job has been drained.
    pub async fn next_completed(&mut self) -> Option<Completion<T>> {
        loop {
            match self.tasks.join_next().await? {
                Ok(Some(result)) => return Some(Completion::Finished(result)),
                Ok(None) => return Some(Completion::NotStarted),
                Err(err) => {
                    error!(error = %err, "worker task did not complete");
                }
            }
        }
    }
}
