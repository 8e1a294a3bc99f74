//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// Handle for a task created by [`Task::spawn`] or [`Task::spawn_blocking`].
///
/// Dropping the handle cancels the task unless [`Task::detach`] was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// Handle for a one-shot timer task.
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimeoutTask {
    _task: Task<()>,
    control: UnboundedSender<TimerCtl>,
}

/// Handle for a periodic timer task.
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct IntervalTask {
    _task: Task<()>,
    control: UnboundedSender<TimerCtl>,
}

#[derive(Debug)]
enum TimerCtl {
    Reset(Option<Duration>),
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Runs the provided closure on a thread where blocking is acceptable.
    pub fn spawn_blocking<F>(f: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn_blocking(f),
            detached: false,
        }
    }

    /// Detach the task so it keeps running after its handle is dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a task that calls the provided async closure once the timeout
    /// expires.
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let task = Task::spawn(
            async move {
                let sleep = time::sleep(timeout);
                tokio::pin!(sleep);

                loop {
                    tokio::select! {
                        _ = &mut sleep => {
                            (cb)().await;
                            break;
                        }
                        ctl = control_rx.recv() => {
                            match ctl {
                                Some(TimerCtl::Reset(new_timeout)) => {
                                    let timeout =
                                        new_timeout.unwrap_or(timeout);
                                    sleep.as_mut()
                                        .reset(Instant::now() + timeout);
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            _task: task,
            control: control_tx,
        }
    }

    /// Resets the timeout, expired or not. Without a new value the previous
    /// timeout is reused.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        if self.control.send(TimerCtl::Reset(timeout)).is_err() {
            error!("failed to reset timeout");
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a task that calls the provided async closure on every interval
    /// tick.
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let task = Task::spawn(
            async move {
                let mut ticker = if tick_on_start {
                    time::interval(interval)
                } else {
                    time::interval_at(Instant::now() + interval, interval)
                };

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            (cb)().await;
                        }
                        ctl = control_rx.recv() => {
                            match ctl {
                                Some(TimerCtl::Reset(new_interval)) => {
                                    let interval =
                                        new_interval.unwrap_or(interval);
                                    ticker = time::interval_at(
                                        Instant::now() + interval,
                                        interval,
                                    );
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            _task: task,
            control: control_tx,
        }
    }

    /// Resets the interval. Without a new value the previous interval is
    /// reused.
    pub fn reset(&mut self, interval: Option<Duration>) {
        if self.control.send(TimerCtl::Reset(interval)).is_err() {
            error!("failed to reset interval");
        }
    }
}
