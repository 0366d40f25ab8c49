//! Channel values for CSP-style communication between threads
//!
//! Channels use May's MPMC channels with cooperative blocking: a blocked
//! coroutine yields to the scheduler instead of parking its OS thread.
//! Each message is delivered to exactly one receiver.
//!
//! ## Bounded channels
//!
//! Capacity is enforced with a second MPMC channel pre-filled with one permit
//! per slot. A sender takes a permit before sending; a receiver returns it
//! after taking a value.
//!
//! ## Close
//!
//! `close` sets a flag and enqueues a `Closed` marker behind any pending
//! values. Receivers drain what was sent before the close, then see the
//! marker, put it back for the next receiver, and report `None`.
//!
//! A sender checks the flag and enqueues under a shared `gate`; `close`
//! takes it exclusively, so no value can land behind the marker.
//!
//! ## Cancellation
//!
//! Blocking waits use `recv_timeout` with the thread's poll interval and
//! re-check the thread's cancellation token on every timeout.

use crate::error::ValueError;
use crate::thread::Thread;
use crate::value::Value;
use may::sync::mpmc;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

enum ChannelMessage {
    Value(Value),
    Closed,
}

struct ChannelData {
    sender: mpmc::Sender<ChannelMessage>,
    receiver: mpmc::Receiver<ChannelMessage>,
    permits: Option<(mpmc::Sender<()>, mpmc::Receiver<()>)>,
    capacity: Option<usize>,
    closed: AtomicBool,
    gate: RwLock<()>,
    len: AtomicUsize,
}

// Safety: May's Sender/Receiver are designed for use from any coroutine or
// OS thread; the remaining fields are atomics, a lock, or immutable after
// creation.
unsafe impl Send for ChannelData {}
unsafe impl Sync for ChannelData {}

/// Shared channel handle; clones refer to the same queue
#[derive(Clone)]
pub struct Channel(Arc<ChannelData>);

impl Channel {
    fn with_permits(capacity: Option<usize>) -> Self {
        let (sender, receiver) = mpmc::channel();
        let permits = capacity.map(|n| {
            let (tx, rx) = mpmc::channel();
            for _ in 0..n {
                let _ = tx.send(());
            }
            (tx, rx)
        });
        Channel(Arc::new(ChannelData {
            sender,
            receiver,
            permits,
            capacity,
            closed: AtomicBool::new(false),
            gate: RwLock::new(()),
            len: AtomicUsize::new(0),
        }))
    }

    pub fn unbounded() -> Self {
        Self::with_permits(None)
    }

    /// Channel holding at most `capacity` undelivered values
    ///
    /// A capacity of 0 is treated as 1.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_permits(Some(capacity.max(1)))
    }

    pub fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }

    /// Send a value, blocking while a bounded channel is full
    pub fn send(&self, thread: &Thread, value: Value) -> Result<(), ValueError> {
        thread.check_cancelled()?;
        if self.is_closed() {
            return Err(ValueError::ChannelClosed);
        }

        if let Some((permit_tx, permit_rx)) = &self.0.permits {
            let poll = thread.options().poll_interval;
            loop {
                match permit_rx.recv_timeout(poll) {
                    Ok(()) => break,
                    Err(_) => {
                        if self.is_closed() {
                            return Err(ValueError::ChannelClosed);
                        }
                        thread.check_cancelled()?;
                    }
                }
            }
        }

        let _gate = self.0.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            if let Some((permit_tx, _)) = &self.0.permits {
                let _ = permit_tx.send(());
            }
            return Err(ValueError::ChannelClosed);
        }
        self.0.len.fetch_add(1, Ordering::AcqRel);
        self.0
            .sender
            .send(ChannelMessage::Value(value))
            .map_err(|_| ValueError::ChannelClosed)
    }

    /// Receive the next value
    ///
    /// Blocks until a value arrives. Returns `Ok(None)` once the channel is
    /// closed and drained, and `Err(Cancelled)` if the calling thread is
    /// cancelled while waiting.
    pub fn receive(&self, thread: &Thread) -> Result<Option<Value>, ValueError> {
        thread.check_cancelled()?;
        let poll = thread.options().poll_interval;
        loop {
            match self.0.receiver.recv_timeout(poll) {
                Ok(ChannelMessage::Value(value)) => {
                    self.0.len.fetch_sub(1, Ordering::AcqRel);
                    if let Some((permit_tx, _)) = &self.0.permits {
                        let _ = permit_tx.send(());
                    }
                    return Ok(Some(value));
                }
                Ok(ChannelMessage::Closed) => {
                    let _ = self.0.sender.send(ChannelMessage::Closed);
                    return Ok(None);
                }
                Err(_) => thread.check_cancelled()?,
            }
        }
    }

    /// Close the channel; later sends fail, receivers drain then see `None`
    pub fn close(&self) {
        let _gate = self.0.gate.write().unwrap_or_else(PoisonError::into_inner);
        if !self.0.closed.swap(true, Ordering::AcqRel) {
            let _ = self.0.sender.send(ChannelMessage::Closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Values sent but not yet received
    pub fn len(&self) -> usize {
        self.0.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `None` for unbounded channels
    pub fn capacity(&self) -> Option<usize> {
        self.0.capacity
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel: {:p}", self.as_ptr())
    }
}
