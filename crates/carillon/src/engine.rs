//! The scheduler itself: caller-facing facade and the run loop behind it.
//!
//! [`Cron`] owns the registry hand-off: while stopped, entries sit in facade
//! state; `start` moves them into a [`Runner`] task that owns them alone.
//! Every mutation after that travels over a control channel and is serviced
//! between timer wakes, so the run loop never shares the registry and needs
//! no locks around it. `stop` hands the registry back, which is what makes
//! the scheduler restartable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::chain::Chain;
use crate::entry::{Entry, EntryId};
use crate::error::Result;
use crate::job::{Job, JobFn};
use crate::logger::{fmt_next, fmt_time, Logger, TracingLogger};
use crate::parser::{CrontabParser, ScheduleParser};
use crate::schedule::Schedule;

/// Timer used when no entry has a future activation: long enough to be
/// "forever" while keeping the loop parked on an ordinary timer, so control
/// messages are still serviced promptly.
const IDLE_WAIT: Duration = Duration::from_secs(100_000 * 3600);

/// Control messages consumed by the run loop.
enum Control {
    Add(Box<Entry>),
    Remove(EntryId),
    Snapshot(oneshot::Sender<Vec<Entry>>),
    /// Stop the loop; the registry is sent back so the facade keeps it.
    Stop(oneshot::Sender<Vec<Entry>>),
}

/// Configures a [`Cron`] before construction.
pub struct CronBuilder {
    tz: Tz,
    parser: Box<dyn ScheduleParser>,
    chain: Chain,
    logger: Arc<dyn Logger>,
}

impl Default for CronBuilder {
    fn default() -> Self {
        Self {
            tz: Tz::UTC,
            parser: Box::new(CrontabParser::standard()),
            chain: Chain::default(),
            logger: Arc::new(TracingLogger),
        }
    }
}

impl CronBuilder {
    /// Zone used for calendar rules that don't pin their own (defaults to
    /// UTC).
    pub fn timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// Substitute the expression grammar used by `add_fn`/`add_job`.
    pub fn parser(mut self, parser: impl ScheduleParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Wrappers applied to every job registered through this scheduler.
    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    /// Where run-loop traces and job fault reports go.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Cron {
        Cron {
            state: Mutex::new(State {
                running: false,
                next_id: 0,
                entries: Vec::new(),
                control: None,
            }),
            chain: self.chain,
            parser: self.parser,
            tz: self.tz,
            logger: self.logger,
            jobs: TaskTracker::new(),
        }
    }
}

/// Facade state.
struct State {
    running: bool,
    /// Last issued entry id; ids start at 1 and are never reused.
    next_id: u64,
    /// The registry, owned here only while the run loop is not running.
    entries: Vec<Entry>,
    control: Option<mpsc::Sender<Control>>,
}

/// The scheduler facade.
///
/// Register jobs against recurrence rules, then [`start`](Cron::start) to
/// begin firing them. Each firing is dispatched on its own tokio task, so a
/// slow job never delays the timetable (see the `chain` module for overlap
/// policies). All methods take `&self` and may be called from any task,
/// before or after starting.
pub struct Cron {
    /// tokio::sync::Mutex because start/stop/schedule hold the lock across
    /// channel sends and replies, so lifecycle calls cannot interleave with
    /// a half-delivered control message.
    state: Mutex<State>,
    chain: Chain,
    parser: Box<dyn ScheduleParser>,
    tz: Tz,
    logger: Arc<dyn Logger>,
    /// In-flight job executions, for the stop-side drain.
    jobs: TaskTracker,
}

impl Default for Cron {
    fn default() -> Self {
        Self::new()
    }
}

impl Cron {
    /// A scheduler with the default configuration: UTC, the five-field
    /// crontab grammar, no wrappers, `tracing`-backed logging.
    pub fn new() -> Self {
        CronBuilder::default().build()
    }

    pub fn builder() -> CronBuilder {
        CronBuilder::default()
    }

    /// Zone used for calendar rules that don't pin their own.
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Parse `expr` with the configured grammar and register a closure to
    /// run on the resulting schedule.
    pub async fn add_fn<F, Fut>(&self, expr: &str, f: F) -> Result<EntryId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.add_job(expr, JobFn::new(f)).await
    }

    /// Parse `expr` with the configured grammar and register `job` on the
    /// resulting schedule.
    pub async fn add_job<J: Job>(&self, expr: &str, job: J) -> Result<EntryId> {
        let schedule = self.parser.parse(expr)?;
        Ok(self.schedule(schedule, Arc::new(job)).await)
    }

    /// Register `job` on `schedule`, decorated with the configured chain.
    ///
    /// The entry's first activation is computed when the scheduler starts
    /// (or immediately, if it is already running).
    pub async fn schedule(&self, schedule: Arc<dyn Schedule>, job: Arc<dyn Job>) -> EntryId {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let entry = Entry {
            id: EntryId(state.next_id),
            schedule,
            next: None,
            prev: None,
            wrapped_job: self.chain.then(job.clone()),
            job,
        };
        let id = entry.id;
        if state.running {
            if let Some(control) = &state.control {
                let _ = control.send(Control::Add(Box::new(entry))).await;
            }
        } else {
            state.entries.push(entry);
        }
        id
    }

    /// A snapshot of every registered entry.
    pub async fn entries(&self) -> Vec<Entry> {
        let state = self.state.lock().await;
        if state.running {
            if let Some(control) = &state.control {
                let (tx, rx) = oneshot::channel();
                if control.send(Control::Snapshot(tx)).await.is_ok() {
                    if let Ok(entries) = rx.await {
                        return entries;
                    }
                }
            }
            Vec::new()
        } else {
            state.entries.clone()
        }
    }

    /// The entry with `id`, if it is still registered.
    pub async fn entry(&self, id: EntryId) -> Option<Entry> {
        self.entries().await.into_iter().find(|e| e.id == id)
    }

    /// Remove an entry. Unknown ids are a no-op.
    pub async fn remove(&self, id: EntryId) {
        let mut state = self.state.lock().await;
        if state.running {
            if let Some(control) = &state.control {
                let _ = control.send(Control::Remove(id)).await;
            }
        } else {
            state.entries.retain(|e| e.id != id);
        }
    }

    /// Start firing entries. Idempotent: a second call while running does
    /// nothing. The run loop gets its own tokio task.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.running {
            return;
        }
        state.running = true;
        self.jobs.reopen();
        let (tx, rx) = mpsc::channel(100);
        state.control = Some(tx);
        let runner = Runner {
            entries: std::mem::take(&mut state.entries),
            tz: self.tz,
            logger: self.logger.clone(),
            jobs: self.jobs.clone(),
        };
        tokio::spawn(runner.run(rx));
    }

    /// Stop firing entries. Idempotent. In-flight job executions are not
    /// cancelled; the returned token is cancelled once they have all
    /// finished, so callers needing a graceful drain can await
    /// `token.cancelled()`.
    ///
    /// The registry survives: entries stay listable and the scheduler can
    /// be started again.
    pub async fn stop(&self) -> CancellationToken {
        let mut state = self.state.lock().await;
        if state.running {
            if let Some(control) = state.control.take() {
                let (tx, rx) = oneshot::channel();
                if control.send(Control::Stop(tx)).await.is_ok() {
                    if let Ok(entries) = rx.await {
                        state.entries = entries;
                    }
                }
            }
            state.running = false;
        }
        drop(state);

        let done = CancellationToken::new();
        let drained = done.clone();
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            jobs.close();
            jobs.wait().await;
            done.cancel();
        });
        drained
    }
}

/// Owns the registry while the scheduler runs.
///
/// Everything happens on one task: the loop sleeps until the soonest
/// activation, fires what is due, and services control messages in between.
struct Runner {
    entries: Vec<Entry>,
    tz: Tz,
    logger: Arc<dyn Logger>,
    jobs: TaskTracker,
}

impl Runner {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    async fn run(mut self, mut control: mpsc::Receiver<Control>) {
        self.logger.info("start", &[]);

        let now = self.now();
        for entry in &mut self.entries {
            entry.next = entry.schedule.next(&now);
            self.logger.info(
                "schedule",
                &[
                    ("now", fmt_time(&now)),
                    ("entry", entry.id.to_string()),
                    ("next", fmt_next(&entry.next)),
                ],
            );
        }

        loop {
            // Soonest activation first; entries that never fire sort last.
            self.entries.sort_by(Entry::cmp_by_next);

            let wait = match self.entries.first().and_then(|e| e.next) {
                Some(next) => (next - self.now()).to_std().unwrap_or(Duration::ZERO),
                None => IDLE_WAIT,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let now = self.now();
                    self.logger.info("wake", &[("now", fmt_time(&now))]);

                    // Everything due fires now; the sort above makes the
                    // first non-due entry a safe place to stop.
                    for entry in &mut self.entries {
                        let due = match entry.next {
                            Some(next) if next <= now => next,
                            _ => break,
                        };
                        let job = entry.wrapped_job.clone();
                        self.jobs.spawn(async move { job.run().await });
                        entry.prev = Some(due);
                        entry.next = entry.schedule.next(&now);
                        self.logger.info(
                            "run",
                            &[
                                ("now", fmt_time(&now)),
                                ("entry", entry.id.to_string()),
                                ("next", fmt_next(&entry.next)),
                            ],
                        );
                    }
                }

                msg = control.recv() => match msg {
                    Some(Control::Add(entry)) => {
                        let now = self.now();
                        let mut entry = *entry;
                        entry.next = entry.schedule.next(&now);
                        self.logger.info(
                            "added",
                            &[
                                ("now", fmt_time(&now)),
                                ("entry", entry.id.to_string()),
                                ("next", fmt_next(&entry.next)),
                            ],
                        );
                        self.entries.push(entry);
                    }
                    Some(Control::Remove(id)) => {
                        self.entries.retain(|e| e.id != id);
                        self.logger.info("removed", &[("entry", id.to_string())]);
                    }
                    Some(Control::Snapshot(reply)) => {
                        let _ = reply.send(self.entries.clone());
                    }
                    Some(Control::Stop(reply)) => {
                        self.logger.info("stop", &[]);
                        let _ = reply.send(std::mem::take(&mut self.entries));
                        return;
                    }
                    // Facade dropped; nothing can reach the loop any more.
                    None => {
                        self.logger.info("stop", &[]);
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Interval;

    fn minutely() -> Arc<dyn Schedule> {
        Arc::new(Interval::new(Duration::from_secs(60)))
    }

    fn noop() -> Arc<dyn Job> {
        Arc::new(JobFn::new(|| async {}))
    }

    #[tokio::test]
    async fn builder_defaults_to_utc() {
        assert_eq!(Cron::new().timezone(), Tz::UTC);
    }

    #[tokio::test]
    async fn builder_accepts_a_zone() {
        let cron = Cron::builder().timezone(chrono_tz::Asia::Tokyo).build();
        assert_eq!(cron.timezone(), chrono_tz::Asia::Tokyo);
    }

    #[tokio::test]
    async fn ids_start_at_one_and_increment() {
        let cron = Cron::new();
        let a = cron.schedule(minutely(), noop()).await;
        let b = cron.schedule(minutely(), noop()).await;
        assert_eq!(a, EntryId(1));
        assert_eq!(b, EntryId(2));
    }

    #[tokio::test]
    async fn entries_before_start_have_no_next() {
        let cron = Cron::new();
        cron.schedule(minutely(), noop()).await;
        let entries = cron.entries().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].next.is_none());
        assert!(entries[0].prev.is_none());
    }

    #[tokio::test]
    async fn remove_before_start_drops_the_entry() {
        let cron = Cron::new();
        let a = cron.schedule(minutely(), noop()).await;
        let b = cron.schedule(minutely(), noop()).await;
        cron.remove(a).await;
        let entries = cron.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, b);
    }

    #[tokio::test]
    async fn removing_an_unknown_id_is_a_no_op() {
        let cron = Cron::new();
        cron.schedule(minutely(), noop()).await;
        cron.remove(EntryId(42)).await;
        assert_eq!(cron.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn entry_lookup_finds_by_id() {
        let cron = Cron::new();
        let id = cron.schedule(minutely(), noop()).await;
        assert!(cron.entry(id).await.is_some());
        assert!(cron.entry(EntryId(99)).await.is_none());
    }

    #[tokio::test]
    async fn add_fn_rejects_bad_expressions() {
        let cron = Cron::new();
        let err = cron.add_fn("not a cron line", || async {}).await;
        assert!(err.is_err());
        assert!(cron.entries().await.is_empty());
    }
}
