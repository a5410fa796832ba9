// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use parking_lot::Mutex;

type Action = Box<dyn FnOnce() + Send>;

/// One-shot release of a backend resource.
///
/// Whichever caller runs it first performs the cleanup; later calls, including
/// concurrent ones, return immediately.
pub struct Teardown {
    action: Mutex<Option<Action>>,
}

impl Teardown {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self { action: Mutex::new(Some(Box::new(action))) })
    }

    /// A teardown with nothing to release.
    pub fn noop() -> Arc<Self> {
        Arc::new(Self { action: Mutex::new(None) })
    }

    /// Run the cleanup if nobody has yet. Returns `true` for the caller that
    /// ran it.
    pub fn run(&self) -> bool {
        let action = self.action.lock().take();
        match action {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.action.lock().is_none()
    }
}

impl std::fmt::Debug for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teardown").field("done", &self.is_done()).finish()
    }
}

#[cfg(test)]
#[path = "teardown_tests.rs"]
mod tests;
