//! Streaming tasks: one thread per streaming element, running a loop
//! function until paused or stopped.
//!
//! Sources and queues start a task when their src pad activates in push
//! mode; the loop function produces one buffer per iteration and pushes it
//! downstream. Pausing parks the thread on a condition variable, stopping
//! ends it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::observability::span_pad;

/// Requested lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not running; the thread has exited or will exit.
    Stopped,
    /// Thread parked until started again.
    Paused,
    /// Loop function is being called repeatedly.
    Started,
}

/// What the loop function wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLoop {
    /// Call the loop function again.
    Continue,
    /// Park until restarted.
    Pause,
    /// Exit the thread.
    Stop,
}

struct Control {
    state: TaskState,
    /// Bumped by every start; a `Pause` returned by an iteration that began
    /// before the latest start is ignored.
    generation: u64,
}

struct TaskShared {
    control: Mutex<Control>,
    cond: Condvar,
}

type LoopFn = Box<dyn FnMut() -> TaskLoop + Send>;

/// A restartable streaming thread.
pub struct Task {
    name: String,
    shared: Arc<TaskShared>,
    func: Arc<Mutex<LoopFn>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    /// Create a stopped task around `func`. The name labels the thread
    /// (`element:pad`).
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: FnMut() -> TaskLoop + Send + 'static,
    {
        Self {
            name: name.into(),
            shared: Arc::new(TaskShared {
                control: Mutex::new(Control {
                    state: TaskState::Stopped,
                    generation: 0,
                }),
                cond: Condvar::new(),
            }),
            func: Arc::new(Mutex::new(Box::new(func))),
            thread: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.shared.control.lock().state
    }

    /// Start (or resume) calling the loop function on the task thread.
    pub fn start(&self) -> std::io::Result<()> {
        let mut thread = self.thread.lock();
        {
            let mut control = self.shared.control.lock();
            control.generation += 1;
            if control.state == TaskState::Started {
                return Ok(());
            }
            control.state = TaskState::Started;
            self.shared.cond.notify_all();
        }
        let alive = thread.as_ref().is_some_and(|h| !h.is_finished());
        if alive {
            trace!(task = %self.name, "task resumed");
            return Ok(());
        }
        if let Some(old) = thread.take() {
            let _ = old.join();
        }
        let shared = Arc::clone(&self.shared);
        let func = Arc::clone(&self.func);
        let name = self.name.clone();
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(&name, &shared, &func))
            .inspect_err(|err| {
                error!(task = %self.name, error = %err, "could not spawn task thread");
                self.shared.control.lock().state = TaskState::Stopped;
            })?;
        *thread = Some(handle);
        debug!(task = %self.name, "task started");
        Ok(())
    }

    /// Park the thread after the current iteration.
    pub fn pause(&self) {
        let mut control = self.shared.control.lock();
        if control.state == TaskState::Started {
            control.state = TaskState::Paused;
        }
    }

    /// Make the thread exit after the current iteration.
    pub fn stop(&self) {
        self.shared.control.lock().state = TaskState::Stopped;
        self.shared.cond.notify_all();
    }

    /// Stop and wait for the thread to exit.
    ///
    /// Whatever blocks the loop function must have been unblocked first
    /// (by flushing the pads it waits on). Called from the task thread
    /// itself, this only stops.
    pub fn join(&self) {
        self.stop();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                trace!(task = %self.name, "join from task thread, detaching");
                return;
            }
            if handle.join().is_err() {
                error!(task = %self.name, "task thread panicked");
            }
            debug!(task = %self.name, "task joined");
        }
    }
}

fn run(name: &str, shared: &TaskShared, func: &Mutex<LoopFn>) {
    let (element, pad) = name.split_once(':').unwrap_or((name, ""));
    let _span = span_pad(element, pad).entered();
    loop {
        let generation = {
            let mut control = shared.control.lock();
            while control.state == TaskState::Paused {
                shared.cond.wait(&mut control);
            }
            if control.state == TaskState::Stopped {
                break;
            }
            control.generation
        };
        let next = {
            let mut f = func.lock();
            (*f)()
        };
        match next {
            TaskLoop::Continue => {}
            TaskLoop::Pause => {
                let mut control = shared.control.lock();
                if control.state == TaskState::Started && control.generation == generation {
                    control.state = TaskState::Paused;
                }
            }
            TaskLoop::Stop => {
                shared.control.lock().state = TaskState::Stopped;
                break;
            }
        }
    }
    trace!(task = name, "task thread exiting");
}

impl Drop for Task {
    fn drop(&mut self) {
        self.join();
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_runs_until_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = Task::new("t:src", move || {
            if c.fetch_add(1, Ordering::SeqCst) == 9 {
                TaskLoop::Stop
            } else {
                TaskLoop::Continue
            }
        });
        task.start().unwrap();
        while task.state() != TaskState::Stopped {
            thread::sleep(Duration::from_millis(1));
        }
        task.join();
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[test]
    fn test_pause_and_resume() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = Task::new("t:src", move || {
            c.fetch_add(1, Ordering::SeqCst);
            TaskLoop::Pause
        });
        task.start().unwrap();
        while task.state() != TaskState::Paused {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        task.start().unwrap();
        while count.load(Ordering::SeqCst) < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        task.join();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_start_during_iteration_wins_over_pause() {
        let count = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (c, r) = (count.clone(), release.clone());
        let task = Task::new("t:src", move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                while !r.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            TaskLoop::Pause
        });
        task.start().unwrap();
        while count.load(Ordering::SeqCst) < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        // Restarted while the first iteration is still running.
        task.start().unwrap();
        release.store(true, Ordering::SeqCst);
        while count.load(Ordering::SeqCst) < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        task.join();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_restart_after_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = Task::new("t:src", move || {
            c.fetch_add(1, Ordering::SeqCst);
            TaskLoop::Stop
        });
        for expected in 1..=2 {
            task.start().unwrap();
            while count.load(Ordering::SeqCst) < expected {
                thread::sleep(Duration::from_millis(1));
            }
            task.join();
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
