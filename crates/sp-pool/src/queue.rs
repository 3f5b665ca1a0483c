// SPDX-License-Identifier: AGPL-3.0-only

//! Begrenzte FIFO-Queue für rohe Partials.
//!
//! `push` blockiert nie: bei voller Queue geht der Backpressure-Befund an den
//! Produzenten (HTTP-Schicht → 503). `pop` blockiert bis ein Element da ist
//! oder die Queue geschlossen wurde. Dequeue-Reihenfolge ist exakt die
//! Reihenfolge erfolgreicher Enqueues.

use sp_types::Partial;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    Full,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Popped {
    Item(Box<Partial>),
    Shutdown,
}

struct QueueInner {
    items: VecDeque<Partial>,
    closed: bool,
}

pub struct PartialQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
    max_size: usize,
    // separat gepflegt, damit size() lockfrei bleibt
    size: AtomicUsize,
}

impl PartialQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            max_size: max_size.max(1),
            size: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, partial: Partial) -> PushOutcome {
        let Ok(mut g) = self.inner.lock() else {
            return PushOutcome::Full;
        };
        if g.closed || g.items.len() >= self.max_size {
            return PushOutcome::Full;
        }
        g.items.push_back(partial);
        self.size.store(g.items.len(), Ordering::Release);
        drop(g);
        self.cond.notify_one();
        PushOutcome::Enqueued
    }

    /// Blockiert bis ein Partial verfügbar ist. Nach `close()` erhalten alle
    /// Wartenden `Shutdown`; noch eingereihte Elemente werden verworfen.
    pub fn pop(&self) -> Popped {
        let Ok(mut g) = self.inner.lock() else {
            return Popped::Shutdown;
        };
        loop {
            if g.closed {
                return Popped::Shutdown;
            }
            if let Some(p) = g.items.pop_front() {
                self.size.store(g.items.len(), Ordering::Release);
                return Popped::Item(Box::new(p));
            }
            g = match self.cond.wait(g) {
                Ok(g) => g,
                Err(_) => return Popped::Shutdown,
            };
        }
    }

    /// Nicht blockierende Variante (periodische Threads, Tests).
    pub fn try_pop(&self) -> Option<Popped> {
        let mut g = self.inner.lock().ok()?;
        if g.closed {
            return Some(Popped::Shutdown);
        }
        let p = g.items.pop_front()?;
        self.size.store(g.items.len(), Ordering::Release);
        Some(Popped::Item(Box::new(p)))
    }

    /// Idempotent; weckt alle Wartenden.
    pub fn close(&self) {
        if let Ok(mut g) = self.inner.lock() {
            g.closed = true;
            g.items.clear();
            self.size.store(0, Ordering::Release);
        }
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|g| g.closed).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}
