//! The unit of work the scheduler invokes.

use std::future::Future;

use async_trait::async_trait;

/// A runnable unit of work.
///
/// The scheduler fires on time regardless of whether earlier invocations
/// have finished, so implementations must tolerate concurrent `run` calls
/// (or be wrapped with one of the overlap policies in the `chain` module).
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self);
}

/// Adapts a closure returning a future into a [`Job`].
///
/// ```no_run
/// use carillon::JobFn;
///
/// let job = JobFn::new(|| async {
///     println!("tick");
/// });
/// # let _ = job;
/// ```
pub struct JobFn<F>(F);

impl<F, Fut> JobFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Job for JobFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(&self) {
        (self.0)().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn job_fn_runs_the_closure() {
        let count = Arc::new(AtomicUsize::new(0));
        let job = JobFn::new({
            let count = count.clone();
            move || {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        job.run().await;
        job.run().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
