//! Hierarchical percentage/action propagation with cooperative cancellation.
//!
//! Scheduling model is single-threaded and cooperative: there is no
//! suspension primitive here, only synchronous callbacks fired from
//! `done()`/`check()`. At most one child node is ever live under a given
//! parent at a time, mirroring a classic `libhif`-style state object rather
//! than a generic progress-bar library.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Number of recent byte-deltas kept to compute a smoothed transfer rate.
pub const SPEED_WINDOW: usize = 5;

/// A cooperative cancellation flag shared between a node tree and whatever
/// caller wants to abort it (e.g. a signal handler or a UI "cancel" button).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a node's steps translate into a percentage.
enum Steps {
    /// Linear: percentage = current / n.
    Count(u32),
    /// Weighted: each index contributes `weights[i]` percentage points,
    /// summing to exactly 100.
    Weighted(Vec<u32>),
}

struct Inner {
    steps: Option<Steps>,
    current: u32,
    last_percent: u32,
    action: Option<(String, Option<String>)>,
    action_stack: Vec<(String, Option<String>)>,
    child: Option<Rc<RefCell<Inner>>>,
    parent: Option<Weak<RefCell<Inner>>>,
    cancel: CancelToken,
    speed_window: VecDeque<u64>,
    on_change: Option<Box<dyn FnMut(u32)>>,
}

/// A node in the progress tree. Cheaply clonable (an `Rc` handle); dropping
/// the last handle to a node that never reached 100% logs a warning but
/// still releases cleanly.
#[derive(Clone)]
pub struct Node(Rc<RefCell<Inner>>);

impl Node {
    /// Create a fresh root node with its own cancellation token.
    pub fn root() -> Self {
        Self(Rc::new(RefCell::new(Inner {
            steps: None,
            current: 0,
            last_percent: 0,
            action: None,
            action_stack: Vec::new(),
            child: None,
            parent: None,
            cancel: CancelToken::new(),
            speed_window: VecDeque::with_capacity(SPEED_WINDOW),
            on_change: None,
        })))
    }

    /// Register a callback fired whenever this node's integer percentage
    /// strictly increases.
    pub fn on_change(&self, f: impl FnMut(u32) + 'static) {
        self.0.borrow_mut().on_change = Some(Box::new(f));
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.0.borrow().cancel.clone()
    }

    /// Create a child node occupying one step of `self`. Only one child may
    /// be live at a time; creating a second while the first hasn't reached
    /// 100% replaces it (and logs, since that child's work is now orphaned).
    pub fn child(&self) -> Self {
        let mut inner = self.0.borrow_mut();
        if let Some(existing) = &inner.child {
            if existing.borrow().percent() < 100 {
                log::warn!("progress: creating a new child while the previous one is incomplete");
            }
        }

        let child_inner = Rc::new(RefCell::new(Inner {
            steps: None,
            current: 0,
            last_percent: 0,
            action: None,
            action_stack: Vec::new(),
            child: None,
            parent: Some(Rc::downgrade(&self.0)),
            cancel: inner.cancel.clone(),
            speed_window: VecDeque::with_capacity(SPEED_WINDOW),
            on_change: None,
        }));
        inner.child = Some(child_inner.clone());
        Node(child_inner)
    }

    /// Must be called before any `done()`. Sets a linear step count.
    pub fn set_number_steps(&self, n: u32) {
        self.0.borrow_mut().steps = Some(Steps::Count(n));
    }

    /// Must be called before any `done()`. Sets weighted steps; `weights`
    /// must sum to exactly 100 or this is a programming error.
    pub fn set_steps(&self, weights: Vec<u32>) -> Result<(), Error> {
        let sum: u32 = weights.iter().sum();
        if sum != 100 {
            log::error!("progress: step weights sum to {sum}, not 100");
            return Err(Error::Fatal(format!("step weights sum to {sum}, not 100")));
        }
        self.0.borrow_mut().steps = Some(Steps::Weighted(weights));
        Ok(())
    }

    /// Advance one step. Returns the node's new percentage, or a cancellation
    /// error if the token has been set.
    pub fn done(&self) -> Result<u32, Error> {
        self.check()?;

        let mut inner = self.0.borrow_mut();
        let steps = match &inner.steps {
            Some(s) => s,
            None => {
                log::error!("progress: done() called before set_number_steps/set_steps");
                return Err(Error::Fatal("done() before steps were set".into()));
            }
        };
        let n = match steps {
            Steps::Count(n) => *n,
            Steps::Weighted(w) => w.len() as u32,
        };
        if inner.current >= n {
            log::error!("progress: done() called more than {n} times");
            return Err(Error::Fatal(format!("done() called more than {n} times")));
        }
        inner.current += 1;
        inner.action_stack.clear();
        inner.action = None;

        let percent = inner.percent();
        if percent > inner.last_percent {
            inner.last_percent = percent;
            if let Some(cb) = inner.on_change.as_mut() {
                cb(percent);
            }
        }
        drop(inner);

        if percent >= 100 {
            self.propagate_to_parent()?;
        }

        Ok(percent)
    }

    /// Observe the cancellation token without advancing; suspension points
    /// call this.
    pub fn check(&self) -> Result<(), Error> {
        if self.0.borrow().cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Push a one-level action label (e.g. "downloading", with an optional
    /// hint like a filename).
    pub fn action_start(&self, action: impl Into<String>, hint: Option<String>) {
        let mut inner = self.0.borrow_mut();
        let entry = (action.into(), hint);
        inner.action_stack.push(entry.clone());
        inner.action = Some(entry);
    }

    pub fn action_stop(&self) {
        let mut inner = self.0.borrow_mut();
        inner.action_stack.pop();
        inner.action = inner.action_stack.last().cloned();
    }

    pub fn current_action(&self) -> Option<(String, Option<String>)> {
        self.0.borrow().action.clone()
    }

    pub fn percent(&self) -> u32 {
        self.0.borrow().percent()
    }

    /// Feed a byte-delta sample (e.g. from a download chunk) into the
    /// rolling speed window.
    pub fn report_bytes(&self, delta: u64) {
        let mut inner = self.0.borrow_mut();
        if inner.speed_window.len() == SPEED_WINDOW {
            inner.speed_window.pop_front();
        }
        inner.speed_window.push_back(delta);
    }

    /// Smoothed bytes/sec over the last [`SPEED_WINDOW`] samples, assuming
    /// samples are reported roughly once per second by the caller.
    pub fn speed(&self) -> u64 {
        let inner = self.0.borrow();
        if inner.speed_window.is_empty() {
            return 0;
        }
        inner.speed_window.iter().sum::<u64>() / inner.speed_window.len() as u64
    }

    fn propagate_to_parent(&self) -> Result<(), Error> {
        let parent = match self.0.borrow().parent.as_ref().and_then(Weak::upgrade) {
            Some(p) => p,
            None => return Ok(()),
        };
        Node(parent).done().map(|_| ())
    }
}

impl Inner {
    fn percent(&self) -> u32 {
        match &self.steps {
            None => 0,
            Some(Steps::Count(n)) if *n == 0 => 100,
            Some(Steps::Count(n)) => (self.current * 100 / n).min(100),
            Some(Steps::Weighted(weights)) => {
                weights.iter().take(self.current as usize).sum::<u32>().min(100)
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let percent = self.percent();
        if percent < 100 && self.steps.is_some() {
            log::warn!("progress node released at {percent}%, before reaching 100%");
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cancelled")]
    Cancelled,
    #[error("progress tree invariant violated: {0}")]
    Fatal(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn linear_steps_percentage() {
        let root = Node::root();
        root.set_number_steps(4);
        assert_eq!(root.done().unwrap(), 25);
        assert_eq!(root.done().unwrap(), 50);
        assert_eq!(root.done().unwrap(), 75);
        assert_eq!(root.done().unwrap(), 100);
        assert!(root.done().is_err());
    }

    #[test]
    fn weighted_steps_must_sum_to_100() {
        let root = Node::root();
        assert!(root.set_steps(vec![10, 10, 10]).is_err());
        assert!(root.set_steps(vec![30, 30, 40]).is_ok());
    }

    #[test]
    fn child_advances_parent_at_completion() {
        let root = Node::root();
        root.set_number_steps(2);
        let child = root.child();
        child.set_number_steps(1);
        assert_eq!(root.percent(), 0);
        child.done().unwrap();
        assert_eq!(root.percent(), 50);
    }

    #[test]
    fn cancellation_blocks_done() {
        let root = Node::root();
        root.set_number_steps(1);
        root.cancel_token().cancel();
        assert!(matches!(root.done(), Err(Error::Cancelled)));
    }

    #[test]
    fn change_event_fires_on_strict_increase() {
        let root = Node::root();
        root.set_number_steps(100);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        root.on_change(move |p| seen2.borrow_mut().push(p));
        for _ in 0..3 {
            root.done().unwrap();
        }
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn speed_is_windowed_average() {
        let root = Node::root();
        for d in [10, 20, 30, 40, 50, 60] {
            root.report_bytes(d);
        }
        // Only the last 5 samples (20..=60) should count.
        assert_eq!(root.speed(), (20 + 30 + 40 + 50 + 60) / 5);
    }
}
