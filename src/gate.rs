//! Serial state gate.
//!
//! Every graph-mutating operation (start, stop, rewire, reset, completion
//! re-arm) runs through [`Gate::with`], so for any two control operations one
//! fully completes before the next begins — total ordering, no interleaving.
//! The gate does not cover the realtime render callback or the MIDI delivery
//! path; those read lock-free state published from inside the gate.

use std::sync::Mutex;

/// Mutual exclusion over the gated host state.
pub(crate) struct Gate<T> {
    inner: Mutex<T>,
}

impl<T> Gate<T> {
    pub fn new(state: T) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    /// Runs `op` with exclusive access to the state. An operation completes
    /// fully — including all its graph reconnections — before the gate is
    /// released.
    pub fn with<R>(&self, op: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.inner.lock().unwrap();
        op(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn operations_are_totally_ordered() {
        let gate = Arc::new(Gate::new(Vec::<u32>::new()));
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let gate = gate.clone();
            handles.push(thread::spawn(move || {
                gate.with(|log| {
                    // Two appends inside one gated op must stay adjacent.
                    log.push(i);
                    log.push(i);
                });
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        gate.with(|log| {
            assert_eq!(log.len(), 16);
            for pair in log.chunks(2) {
                assert_eq!(pair[0], pair[1]);
            }
        });
    }
}
