//! Cross-cutting job behaviour, composed as wrappers.
//!
//! A [`JobWrapper`] decorates a [`Job`] with added behaviour, and a
//! [`Chain`] is an ordered sequence of wrappers applied to every job
//! submitted through the scheduler. The wrappers here cover the common
//! policies: containing panics and the two ways of handling a job whose
//! previous invocation is still running (wait for it, or skip this firing).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::error::Error;
use crate::job::Job;
use crate::logger::Logger;

/// Waits shorter than this are not worth a log line.
const DELAY_LOG_THRESHOLD: Duration = Duration::from_secs(60);

/// Decorates a job with added behaviour.
pub type JobWrapper = Arc<dyn Fn(Arc<dyn Job>) -> Arc<dyn Job> + Send + Sync>;

/// An ordered sequence of [`JobWrapper`]s.
///
/// `Chain::new(vec![a, b, c]).then(job)` decorates `job` so that `a` is
/// outermost: it runs `b`, which runs `c`, which runs the job.
#[derive(Clone, Default)]
pub struct Chain {
    wrappers: Vec<JobWrapper>,
}

impl Chain {
    pub fn new(wrappers: Vec<JobWrapper>) -> Self {
        Self { wrappers }
    }

    /// Decorate `job` with every wrapper in the chain.
    pub fn then(&self, job: Arc<dyn Job>) -> Arc<dyn Job> {
        self.wrappers.iter().rev().fold(job, |job, wrapper| wrapper(job))
    }
}

/// Contain panics from the wrapped job.
///
/// A panicking invocation is caught, coerced to [`Error::JobPanic`] and
/// reported through `logger` with a captured backtrace; the scheduler and
/// later invocations are unaffected.
pub fn recover(logger: Arc<dyn Logger>) -> JobWrapper {
    Arc::new(move |job| {
        Arc::new(Recover {
            inner: job,
            logger: logger.clone(),
        })
    })
}

struct Recover {
    inner: Arc<dyn Job>,
    logger: Arc<dyn Logger>,
}

#[async_trait]
impl Job for Recover {
    async fn run(&self) {
        let outcome = AssertUnwindSafe(self.inner.run()).catch_unwind().await;
        if let Err(payload) = outcome {
            let err = Error::JobPanic(panic_message(payload.as_ref()));
            let stack = std::backtrace::Backtrace::force_capture();
            self.logger.error(&err, "panic", &[("stack", stack.to_string())]);
        }
    }
}

/// Best-effort text for a panic payload. `&str` and `String` cover what the
/// `panic!` macro produces; anything else is opaque.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Serialise invocations: a new firing waits until the previous invocation
/// of the same job finishes. Waits longer than a minute are logged.
pub fn delay_if_still_running(logger: Arc<dyn Logger>) -> JobWrapper {
    Arc::new(move |job| {
        Arc::new(Delay {
            inner: job,
            logger: logger.clone(),
            lock: Mutex::new(()),
        })
    })
}

struct Delay {
    inner: Arc<dyn Job>,
    logger: Arc<dyn Logger>,
    lock: Mutex<()>,
}

#[async_trait]
impl Job for Delay {
    async fn run(&self) {
        let queued = Instant::now();
        let _guard = self.lock.lock().await;
        let waited = queued.elapsed();
        if waited > DELAY_LOG_THRESHOLD {
            self.logger.info("delay", &[("duration", format!("{waited:?}"))]);
        }
        self.inner.run().await;
    }
}

/// Drop a firing when the previous invocation of the same job is still
/// running; skips are logged.
pub fn skip_if_still_running(logger: Arc<dyn Logger>) -> JobWrapper {
    Arc::new(move |job| {
        Arc::new(Skip {
            inner: job,
            logger: logger.clone(),
            slot: Semaphore::new(1),
        })
    })
}

struct Skip {
    inner: Arc<dyn Job>,
    logger: Arc<dyn Logger>,
    slot: Semaphore,
}

#[async_trait]
impl Job for Skip {
    async fn run(&self) {
        // The permit is a guard: released on return and on unwind alike, so
        // a panicking invocation cannot wedge the slot shut.
        match self.slot.try_acquire() {
            Ok(_permit) => self.inner.run().await,
            Err(_) => self.logger.info("skip", &[]),
        }
    }
}
