//! Transaction steps.

use std::time::Duration;

use uuid::Uuid;

/// Default per-step timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Synthetic step name acquiring the cluster lock.
pub const LOCK_STEP: &str = "txn-lock.Acquire";
/// Synthetic step name releasing the cluster lock.
pub const UNLOCK_STEP: &str = "txn-lock.Release";

/// One named action in a transaction, executed on a set of nodes.
#[derive(Debug, Clone)]
pub struct Step {
    /// Registered name of the handler to run.
    pub do_func: String,
    /// Registered name of the compensating handler, if any.
    pub undo_func: Option<String>,
    /// Nodes to run the handler on. Empty means "once on the initiator".
    pub nodes: Vec<Uuid>,
    /// Per-step deadline.
    pub timeout: Duration,
    /// Lock target; set only on the synthetic lock/unlock steps.
    pub lock_name: Option<String>,
}

impl Step {
    /// Creates a step running `do_func` on `nodes`.
    #[must_use]
    pub fn new(do_func: impl Into<String>, nodes: Vec<Uuid>) -> Self {
        Self {
            do_func: do_func.into(),
            undo_func: None,
            nodes,
            timeout: DEFAULT_STEP_TIMEOUT,
            lock_name: None,
        }
    }

    /// Declares a compensating handler for this step.
    #[must_use]
    pub fn with_undo(mut self, undo_func: impl Into<String>) -> Self {
        self.undo_func = Some(undo_func.into());
        self
    }

    /// Overrides the per-step timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether this is the synthetic lock-acquire step.
    #[must_use]
    pub fn is_lock(&self) -> bool {
        self.do_func == LOCK_STEP
    }

    /// Whether this is the synthetic lock-release step.
    #[must_use]
    pub fn is_unlock(&self) -> bool {
        self.do_func == UNLOCK_STEP
    }
}

/// Builds the lock/unlock step pair for a transaction mutating the
/// entity named `name`.
///
/// The pair must bracket every user step of the plan: the lock step
/// first, the unlock step last. The engine executes both against the
/// store's lock API on the initiator.
#[must_use]
pub fn create_lock_steps(name: &str) -> (Step, Step) {
    let lock = Step {
        do_func: LOCK_STEP.to_string(),
        undo_func: None,
        nodes: Vec::new(),
        timeout: DEFAULT_STEP_TIMEOUT,
        lock_name: Some(name.to_string()),
    };
    let unlock = Step {
        do_func: UNLOCK_STEP.to_string(),
        undo_func: None,
        nodes: Vec::new(),
        timeout: DEFAULT_STEP_TIMEOUT,
        lock_name: Some(name.to_string()),
    };
    (lock, unlock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder() {
        let node = Uuid::new_v4();
        let step = Step::new("vol-create.Validate", vec![node])
            .with_undo("vol-create.Rollback")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(step.do_func, "vol-create.Validate");
        assert_eq!(step.undo_func.as_deref(), Some("vol-create.Rollback"));
        assert_eq!(step.nodes, vec![node]);
        assert_eq!(step.timeout, Duration::from_secs(5));
        assert!(!step.is_lock());
    }

    #[test]
    fn test_lock_step_pair() {
        let (lock, unlock) = create_lock_steps("testvol");
        assert!(lock.is_lock());
        assert!(unlock.is_unlock());
        assert_eq!(lock.lock_name.as_deref(), Some("testvol"));
        assert_eq!(unlock.lock_name.as_deref(), Some("testvol"));
        assert!(lock.nodes.is_empty());
    }
}
