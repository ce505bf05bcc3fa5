use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{self, AtomicBool, AtomicU64};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::Error;

type Task = Box<dyn FnOnce() + Send>;
type Repeating = Box<dyn FnMut() + Send>;

enum Work {
  Now(Task),
  Later(Timed),
  Shutdown,
}

enum Job {
  Once(Task),
  Every(Duration, Repeating),
}

struct Timed {
  at: Instant,
  seq: u64,
  canceled: Arc<AtomicBool>,
  job: Job,
}

impl Timed {
  /// Run the job, yielding the next occurrence of repeating jobs
  fn fire(self) -> Option<Timed> {
    if self.canceled.load(atomic::Ordering::Acquire) {
      return None;
    }

    match self.job {
      | Job::Once(task) => {
        guard(task);
        None
      },
      | Job::Every(period, mut task) => {
        guard(&mut task);
        Some(Timed { at: self.at + period,
                     job: Job::Every(period, task),
                     ..self })
      },
    }
  }
}

impl PartialEq for Timed {
  fn eq(&self, other: &Self) -> bool {
    self.at == other.at && self.seq == other.seq
  }
}

impl Eq for Timed {}

impl PartialOrd for Timed {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Timed {
  /// Reversed, so that [`BinaryHeap`] pops the earliest
  fn cmp(&self, other: &Self) -> Ordering {
    other.at
         .cmp(&self.at)
         .then_with(|| other.seq.cmp(&self.seq))
  }
}

fn describe(panic: &(dyn Any + Send)) -> &str {
  panic.downcast_ref::<&str>()
       .copied()
       .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
       .unwrap_or("<non-string panic>")
}

fn guard(task: impl FnOnce()) {
  if let Err(e) = panic::catch_unwind(AssertUnwindSafe(task)) {
    log::error!("task panicked: {}", describe(e.as_ref()));
  }
}

fn run(rx: Receiver<Work>) {
  let mut timers = BinaryHeap::<Timed>::new();

  loop {
    let now = Instant::now();
    while timers.peek().map(|t| t.at <= now).unwrap_or(false) {
      if let Some(next) = timers.pop().and_then(Timed::fire) {
        timers.push(next);
      }
    }

    let work = match timers.peek() {
      | Some(t) => rx.recv_timeout(t.at.saturating_duration_since(Instant::now())),
      | None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };

    match work {
      | Ok(Work::Now(task)) => guard(task),
      | Ok(Work::Later(timed)) => timers.push(timed),
      | Err(RecvTimeoutError::Timeout) => continue,
      | Ok(Work::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
    }
  }

  log::trace!("executor stopped with {} timers pending", timers.len());
}

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone)]
pub struct Scheduled(Arc<AtomicBool>);

impl Scheduled {
  /// Prevent the task from running (again)
  pub fn cancel(&self) {
    self.0.store(true, atomic::Ordering::Release);
  }

  /// Was [`Scheduled::cancel`] invoked?
  pub fn is_canceled(&self) -> bool {
    self.0.load(atomic::Ordering::Acquire)
  }
}

struct Inner {
  tx: Mutex<Option<Sender<Work>>>,
  worker: Mutex<Option<JoinHandle<()>>>,
  seq: AtomicU64,
}

impl Drop for Inner {
  fn drop(&mut self) {
    if let Some(tx) = self.tx.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
      tx.send(Work::Shutdown).ok();
    }
  }
}

/// A single worker thread running tasks one at a time, in the
/// order they were submitted.
///
/// Everything an [`Endpoint`](crate::endpoint::Endpoint) does to its
/// exchanges happens on its executor, which is what makes the matcher's
/// "first writer wins" decisions well-defined.
///
/// A task that panics is logged and discarded; the worker carries on.
///
/// ```
/// use std::sync::mpsc;
/// use toad_endpoint::executor::Executor;
///
/// let executor = Executor::new("doc").unwrap();
/// let (tx, rx) = mpsc::channel();
/// executor.execute(move || tx.send(1 + 1).unwrap()).unwrap();
/// assert_eq!(rx.recv().unwrap(), 2);
/// executor.shutdown();
/// ```
#[derive(Clone)]
pub struct Executor(Arc<Inner>);

impl fmt::Debug for Executor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Executor")
     .field("shutdown", &self.is_shutdown())
     .finish()
  }
}

impl Executor {
  /// Spawn the worker thread, named `name`
  pub fn new(name: impl Into<String>) -> io::Result<Self> {
    let (tx, rx) = mpsc::channel();
    let worker = thread::Builder::new().name(name.into())
                                       .spawn(move || run(rx))?;

    Ok(Self(Arc::new(Inner { tx: Mutex::new(Some(tx)),
                             worker: Mutex::new(Some(worker)),
                             seq: AtomicU64::new(0) })))
  }

  fn submit(&self, work: Work) -> Result<(), Error> {
    self.0
        .tx
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .ok_or(Error::Destroyed)?
        .send(work)
        .map_err(|_| Error::Destroyed)
  }

  fn timed(&self, delay: Duration, job: Job) -> Result<Scheduled, Error> {
    let canceled = Arc::new(AtomicBool::new(false));
    let timed = Timed { at: Instant::now() + delay,
                        seq: self.0.seq.fetch_add(1, atomic::Ordering::Relaxed),
                        canceled: canceled.clone(),
                        job };
    self.submit(Work::Later(timed))?;
    Ok(Scheduled(canceled))
  }

  /// Run a task as soon as the tasks submitted before it have run
  pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), Error> {
    self.submit(Work::Now(Box::new(task)))
  }

  /// Run a task once, after `delay`
  pub fn schedule(&self,
                  delay: Duration,
                  task: impl FnOnce() + Send + 'static)
                  -> Result<Scheduled, Error> {
    self.timed(delay, Job::Once(Box::new(task)))
  }

  /// Run a task after `initial`, then every `period` until canceled
  pub fn schedule_at_fixed_rate(&self,
                                initial: Duration,
                                period: Duration,
                                task: impl FnMut() + Send + 'static)
                                -> Result<Scheduled, Error> {
    let period = period.max(Duration::from_millis(1));
    self.timed(initial, Job::Every(period, Box::new(task)))
  }

  /// Has [`Executor::shutdown`] been invoked?
  pub fn is_shutdown(&self) -> bool {
    self.0
        .tx
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .is_none()
  }

  /// Stop accepting work, finish the tasks already queued and
  /// wait for the worker to exit.
  ///
  /// Pending timers are dropped. When invoked from a task, the
  /// worker exits after that task without being waited on.
  pub fn shutdown(&self) {
    if let Some(tx) = self.0.tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
      tx.send(Work::Shutdown).ok();
    }

    let worker = self.0
                     .worker
                     .lock()
                     .unwrap_or_else(PoisonError::into_inner)
                     .take();
    match worker {
      | Some(w) if w.thread().id() != thread::current().id() => {
        w.join().ok();
      },
      | _ => (),
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::AtomicUsize;

  use super::*;

  fn wait(rx: &Receiver<()>) {
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
  }

  #[test]
  fn runs_tasks_in_order() {
    let executor = Executor::new("test").unwrap();
    let seen = Arc::new(Mutex::new(vec![]));

    for n in 0..10 {
      let seen = seen.clone();
      executor.execute(move || seen.lock().unwrap().push(n)).unwrap();
    }
    executor.shutdown();

    assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
  }

  #[test]
  fn survives_panics() {
    let executor = Executor::new("test").unwrap();
    let (tx, rx) = mpsc::channel();

    executor.execute(|| panic!("oh no")).unwrap();
    executor.execute(move || tx.send(()).unwrap()).unwrap();
    wait(&rx);
  }

  #[test]
  fn scheduled_tasks_run_in_deadline_order() {
    let executor = Executor::new("test").unwrap();
    let seen = Arc::new(Mutex::new(vec![]));
    let (tx, rx) = mpsc::channel();

    let late = seen.clone();
    executor.schedule(Duration::from_millis(40), move || {
              late.lock().unwrap().push("late");
              tx.send(()).unwrap();
            })
            .unwrap();
    let early = seen.clone();
    executor.schedule(Duration::from_millis(10), move || early.lock().unwrap().push("early"))
            .unwrap();

    wait(&rx);
    assert_eq!(*seen.lock().unwrap(), vec!["early", "late"]);
  }

  #[test]
  fn canceled_tasks_do_not_run() {
    let executor = Executor::new("test").unwrap();
    let ran = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let flag = ran.clone();
    let task = executor.schedule(Duration::from_millis(10), move || {
                         flag.store(true, atomic::Ordering::SeqCst)
                       })
                       .unwrap();
    task.cancel();
    assert!(task.is_canceled());

    executor.schedule(Duration::from_millis(30), move || tx.send(()).unwrap())
            .unwrap();
    wait(&rx);
    assert!(!ran.load(atomic::Ordering::SeqCst));
  }

  #[test]
  fn fixed_rate_repeats_until_canceled() {
    let executor = Executor::new("test").unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let counter = count.clone();
    let task = executor.schedule_at_fixed_rate(Duration::from_millis(1),
                                                Duration::from_millis(5),
                                                move || {
                                                  if counter.fetch_add(1, atomic::Ordering::SeqCst)
                                                     == 2
                                                  {
                                                    tx.send(()).ok();
                                                  }
                                                })
                       .unwrap();
    wait(&rx);
    task.cancel();
    assert!(count.load(atomic::Ordering::SeqCst) >= 3);
  }

  #[test]
  fn rejects_work_after_shutdown() {
    let executor = Executor::new("test").unwrap();
    executor.shutdown();
    assert!(executor.is_shutdown());
    assert!(matches!(executor.execute(|| ()), Err(Error::Destroyed)));
    assert!(matches!(executor.schedule(Duration::ZERO, || ()), Err(Error::Destroyed)));
  }
}
