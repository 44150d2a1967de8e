//! Request context pool.
//!
//! Contexts are reused across calls to avoid rebuilding their buffers and
//! maps on every request.
//!
//! # Design
//!
//! - A `parking_lot::Mutex` guards a free list of boxed contexts; the lock
//!   is held only to push or pop
//! - [`ContextPool::acquire`] returns a [`PooledContext`] guard which puts
//!   the context back when dropped, so release happens on every exit path,
//!   unwinding included
//! - Released contexts are reset (envelope cleared in place) before they
//!   become visible to another caller
//! - At most `max_idle` contexts are kept; extras are freed
//!
//! # Usage
//!
//! ```
//! use jrpc_engine::handler::ContextPool;
//!
//! let pool = ContextPool::new();
//! {
//!     let mut ctx = pool.acquire();
//!     ctx.envelope_mut().method.push_str("calc.add");
//! } // released here
//! assert_eq!(pool.idle(), 1);
//! assert!(pool.acquire().envelope().method.is_empty());
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::RequestContext;

/// Default maximum number of idle contexts kept by the pool.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Free list of reusable request contexts.
#[derive(Debug)]
pub struct ContextPool {
    free: Mutex<Vec<Box<RequestContext>>>,
    max_idle: usize,
    allocated: AtomicUsize,
}

impl ContextPool {
    /// Create a pool with [`DEFAULT_MAX_IDLE`].
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Take a context from the free list, allocating one if it is empty.
    pub fn acquire(&self) -> PooledContext<'_> {
        let reused = self.free.lock().pop();
        let ctx = reused.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            Box::new(RequestContext::new())
        });
        PooledContext {
            pool: self,
            ctx: Some(ctx),
        }
    }

    /// Reset `ctx` and return it to the free list.
    fn release(&self, mut ctx: Box<RequestContext>) {
        ctx.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(ctx);
            return;
        }
        drop(free);
        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }

    /// Contexts currently alive, idle or in use.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Contexts waiting on the free list.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    #[inline]
    pub fn max_idle(&self) -> usize {
        self.max_idle
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive handle to a pooled context. Releases on drop.
#[derive(Debug)]
pub struct PooledContext<'a> {
    pool: &'a ContextPool,
    ctx: Option<Box<RequestContext>>,
}

impl Deref for PooledContext<'_> {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        // Only `drop` empties the slot.
        self.ctx.as_deref().unwrap_or_else(|| unreachable!("context used after release"))
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut RequestContext {
        self.ctx
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("context used after release"))
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}
