//! Reusable N-party rendezvous.
//!
//! Unlike [`std::sync::Barrier`], participants may leave permanently with
//! [`GenerationBarrier::arrive_and_drop`], and an optional completion action is
//! run by the last arriver of every generation before anyone is released.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::trace;

type Completion = Box<dyn Fn() + Send + Sync>;

struct BarrierState {
    /// Arrivals still expected in the current generation.
    pending: usize,
    /// Live participants, the value `pending` is reset to.
    threshold: usize,
    generation: u64,
}

pub struct GenerationBarrier {
    state: Mutex<BarrierState>,
    released: Condvar,
    completion: Option<Completion>,
}

impl GenerationBarrier {
    pub fn new(participants: usize) -> Self {
        Self::build(participants, None)
    }

    /// The completion runs while the barrier is locked: it must not call back
    /// into the same barrier.
    pub fn with_completion<F>(participants: usize, completion: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(participants, Some(Box::new(completion)))
    }

    fn build(participants: usize, completion: Option<Completion>) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                pending: participants,
                threshold: participants,
                generation: 0,
            }),
            released: Condvar::new(),
            completion,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks until every live participant of the current generation arrived.
    ///
    /// Arriving twice from the same participant within one generation is a
    /// caller bug and may deadlock.
    pub fn arrive_and_wait(&self) {
        let mut state = self.lock();
        let generation = state.generation;
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.complete_generation(&mut state);
            drop(state);
            self.released.notify_all();
            return;
        }
        let _state = self
            .released
            .wait_while(state, |state| state.generation == generation)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    /// Leaves the barrier for good without waiting. Reduces the participant
    /// count of this and every later generation.
    pub fn arrive_and_drop(&self) {
        let mut state = self.lock();
        state.threshold = state.threshold.saturating_sub(1);
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.complete_generation(&mut state);
            drop(state);
            self.released.notify_all();
        }
    }

    fn complete_generation(&self, state: &mut BarrierState) {
        if let Some(completion) = &self.completion {
            completion();
        }
        state.generation += 1;
        state.pending = state.threshold;
        trace!(generation = state.generation, participants = state.threshold, "barrier generation advanced");
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Arrivals still expected before the current generation completes.
    pub fn pending(&self) -> usize {
        self.lock().pending
    }

    pub fn participants(&self) -> usize {
        self.lock().threshold
    }

    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }
}

impl fmt::Debug for GenerationBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("GenerationBarrier")
            .field("pending", &state.pending)
            .field("threshold", &state.threshold)
            .field("generation", &state.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_participant_never_blocks() {
        let barrier = GenerationBarrier::new(1);
        for generation in 1..=1000 {
            barrier.arrive_and_wait();
            assert_eq!(barrier.generation(), generation);
            assert_eq!(barrier.pending(), 1);
        }
    }

    #[test]
    fn completion_runs_once_per_generation_before_release() {
        const PARTICIPANTS: usize = 4;
        const GENERATIONS: usize = 1000;

        let completions = Arc::new(AtomicUsize::new(0));
        let barrier = {
            let completions = completions.clone();
            Arc::new(GenerationBarrier::with_completion(PARTICIPANTS, move || {
                completions.fetch_add(1, Ordering::SeqCst);
            }))
        };

        let handles: Vec<_> = (0..PARTICIPANTS)
            .map(|_| {
                let barrier = barrier.clone();
                let completions = completions.clone();
                thread::spawn(move || {
                    for round in 0..GENERATIONS {
                        barrier.arrive_and_wait();
                        // This round's completion has already run; the next
                        // one cannot run before this thread arrives again.
                        assert_eq!(completions.load(Ordering::SeqCst), round + 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(completions.load(Ordering::SeqCst), GENERATIONS);
        assert_eq!(barrier.generation(), GENERATIONS as u64);
        assert_eq!(barrier.pending(), PARTICIPANTS);
        assert_eq!(barrier.participants(), PARTICIPANTS);
    }

    #[test]
    fn dropped_participant_is_excluded_from_later_generations() {
        let barrier = Arc::new(GenerationBarrier::new(3));
        let leaver = {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.arrive_and_drop())
        };
        leaver.join().unwrap();
        assert_eq!(barrier.participants(), 2);

        let other = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    barrier.arrive_and_wait();
                }
            })
        };
        for _ in 0..10 {
            barrier.arrive_and_wait();
        }
        other.join().unwrap();
        assert_eq!(barrier.generation(), 10);
        assert_eq!(barrier.pending(), 2);
    }

    #[test]
    fn drop_by_last_outstanding_participant_releases_waiters() {
        let completions = Arc::new(AtomicUsize::new(0));
        let barrier = {
            let completions = completions.clone();
            Arc::new(GenerationBarrier::with_completion(2, move || {
                completions.fetch_add(1, Ordering::SeqCst);
            }))
        };
        let waiter = {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.arrive_and_wait())
        };
        while barrier.pending() != 1 {
            thread::sleep(Duration::from_millis(1));
        }
        barrier.arrive_and_drop();
        waiter.join().unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.generation(), 1);
        assert_eq!(barrier.pending(), 1);
    }
}
