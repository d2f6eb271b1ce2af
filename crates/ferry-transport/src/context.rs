//! Socket context.
//!
//! A [`Context`] owns the background tasks of every socket created through
//! it. Sockets are closed first; [`Context::term`] then waits for each
//! socket's queued messages to drain, bounded by that socket's linger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::pull::PullSocket;
use crate::push::PushSocket;
use crate::{ChannelConfig, TransportResult};

struct Tracked {
    label: &'static str,
    handle: JoinHandle<()>,
    linger: Option<Duration>,
    closed: Arc<AtomicBool>,
}

/// Owner of socket background tasks
#[derive(Default)]
pub struct Context {
    tasks: Mutex<Vec<Tracked>>,
}

impl Context {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a PUSH socket at `config.bind_addr`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::BindFailed` if the address is unavailable.
    pub async fn bind_push(&self, config: &ChannelConfig) -> TransportResult<PushSocket> {
        PushSocket::bind(self, config).await
    }

    /// Connect a PULL socket to `config.connect_addr`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Timeout` if no sender answers within
    /// `config.connect_timeout`, or a handshake error.
    pub async fn connect_pull(&self, config: &ChannelConfig) -> TransportResult<PullSocket> {
        PullSocket::connect(config).await
    }

    /// Number of socket tasks still owned by the context
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn track(
        &self,
        label: &'static str,
        handle: JoinHandle<()>,
        linger: Option<Duration>,
        closed: Arc<AtomicBool>,
    ) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Tracked {
                label,
                handle,
                linger,
                closed,
            });
    }

    /// Terminate the context.
    ///
    /// Waits for every closed socket to flush its queue, giving up after
    /// the socket's linger. Sockets that were never closed are aborted.
    pub async fn term(self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));

        for Tracked {
            label,
            mut handle,
            linger,
            closed,
        } in tasks
        {
            if !closed.load(Ordering::Acquire) {
                warn!(socket = label, "socket still open at context termination, aborting");
                handle.abort();
                continue;
            }

            let finished = match linger {
                None => (&mut handle).await.is_ok(),
                Some(linger) => match tokio::time::timeout(linger, &mut handle).await {
                    Ok(result) => result.is_ok(),
                    Err(_) => {
                        warn!(
                            socket = label,
                            linger_ms = linger.as_millis() as u64,
                            "linger expired, discarding queued messages"
                        );
                        handle.abort();
                        false
                    }
                },
            };
            debug!(socket = label, finished, "socket task released");
        }
    }

    /// Terminate the context without flushing.
    ///
    /// Every socket task is aborted at once, so messages still queued are
    /// discarded whatever the sockets' linger.
    pub fn term_now(self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));

        for Tracked { label, handle, .. } in tasks {
            if !handle.is_finished() {
                warn!(socket = label, "terminating now, discarding queued messages");
            }
            handle.abort();
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for tracked in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            tracked.handle.abort();
        }
    }
}
