//! Process-wide training flag consumed by every dropout instance.
//!
//! The driver sets the flag before a forward pass; all [`Dropout`]
//! instances read it during that pass. The default is evaluation mode, in
//! which dropout is the identity.
//!
//! [`Dropout`]: crate::dropout::Dropout

use std::sync::atomic::{AtomicBool, Ordering};

static TRAINING: AtomicBool = AtomicBool::new(false);

/// Switches every dropout instance in the process between training and evaluation.
pub fn set_training(training: bool) {
    TRAINING.store(training, Ordering::SeqCst);
    log::debug!("training mode set to {training}");
}

/// Returns whether dropout is currently active.
pub fn is_training() -> bool {
    TRAINING.load(Ordering::SeqCst)
}

/// Sets the training flag for a scope and restores the previous value on drop.
#[derive(Debug)]
#[must_use = "the previous mode is restored as soon as the guard is dropped"]
pub struct TrainingGuard {
    previous: bool,
}

impl TrainingGuard {
    pub fn new(training: bool) -> Self {
        let previous = TRAINING.swap(training, Ordering::SeqCst);
        Self { previous }
    }

    /// Shorthand for `TrainingGuard::new(true)`.
    pub fn train() -> Self {
        Self::new(true)
    }

    /// Shorthand for `TrainingGuard::new(false)`.
    pub fn eval() -> Self {
        Self::new(false)
    }
}

impl Drop for TrainingGuard {
    fn drop(&mut self) {
        TRAINING.store(self.previous, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mode_lock;

    #[test]
    fn guard_restores_previous_mode() {
        let _lock = mode_lock();
        set_training(false);
        {
            let _guard = TrainingGuard::train();
            assert!(is_training());
            {
                let _inner = TrainingGuard::eval();
                assert!(!is_training());
            }
            assert!(is_training());
        }
        assert!(!is_training());
    }
}
