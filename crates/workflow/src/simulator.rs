//! Unreliable remote calls for development and tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;

use crate::activities::ActivityError;
use crate::error::ConfigError;

/// What a simulated call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Sleep far past any step deadline.
    Hang,
}

#[derive(Debug)]
enum Mode {
    Random { failure_rate: f64, hang_rate: f64 },
    /// Replays a queue; once it runs dry every call succeeds.
    Scripted(VecDeque<Behavior>),
}

/// A remote dependency that fails, hangs or succeeds.
///
/// Clones share the same script or rates.
#[derive(Debug, Clone)]
pub struct FlakySimulator {
    mode: Arc<Mutex<Mode>>,
    hang_for: Duration,
}

impl FlakySimulator {
    pub const DEFAULT_HANG: Duration = Duration::from_secs(1000);
    pub const DEFAULT_FAILURE_RATE: f64 = 0.33;
    pub const DEFAULT_HANG_RATE: f64 = 0.33;

    /// Picks a behavior at random on every call.
    pub fn random(failure_rate: f64, hang_rate: f64) -> Result<Self, ConfigError> {
        let in_unit = |r: f64| (0.0..=1.0).contains(&r);
        if !in_unit(failure_rate) || !in_unit(hang_rate) || failure_rate + hang_rate > 1.0 {
            return Err(ConfigError::InvalidRates {
                failure: failure_rate,
                hang: hang_rate,
            });
        }
        Ok(Self::with_mode(Mode::Random {
            failure_rate,
            hang_rate,
        }))
    }

    /// Plays back `behaviors` in order, then succeeds.
    pub fn scripted(behaviors: impl IntoIterator<Item = Behavior>) -> Self {
        Self::with_mode(Mode::Scripted(behaviors.into_iter().collect()))
    }

    /// Always succeeds.
    pub fn reliable() -> Self {
        Self::scripted([])
    }

    pub fn with_hang_duration(mut self, hang_for: Duration) -> Self {
        self.hang_for = hang_for;
        self
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode: Arc::new(Mutex::new(mode)),
            hang_for: Self::DEFAULT_HANG,
        }
    }

    /// Appends behaviors to a script. Ignored in random mode.
    pub fn push(&self, behaviors: impl IntoIterator<Item = Behavior>) {
        let mut mode = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        if let Mode::Scripted(queue) = &mut *mode {
            queue.extend(behaviors);
        }
    }

    /// Decides what the next call does.
    pub fn next_behavior(&self) -> Behavior {
        let mut mode = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *mode {
            Mode::Random {
                failure_rate,
                hang_rate,
            } => {
                let roll: f64 = rand::thread_rng().r#gen();
                if roll < *failure_rate {
                    Behavior::Fail
                } else if roll < *failure_rate + *hang_rate {
                    Behavior::Hang
                } else {
                    Behavior::Succeed
                }
            }
            Mode::Scripted(queue) => queue.pop_front().unwrap_or(Behavior::Succeed),
        }
    }

    /// Performs one simulated remote call.
    pub async fn call(&self) -> Result<(), ActivityError> {
        match self.next_behavior() {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(ActivityError::SimulatedFailure),
            Behavior::Hang => {
                tokio::time::sleep(self.hang_for).await;
                Ok(())
            }
        }
    }
}

impl Default for FlakySimulator {
    fn default() -> Self {
        Self::with_mode(Mode::Random {
            failure_rate: Self::DEFAULT_FAILURE_RATE,
            hang_rate: Self::DEFAULT_HANG_RATE,
        })
    }
}
