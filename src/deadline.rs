//! Invocation deadline.
//!
//! The platform kills a transformation function that overruns its budget,
//! which would leave the caller with no response at all. Every component that
//! loops over segments calls [`Deadline::check`] between iterations, and every
//! I/O wait goes through [`Deadline::run`], so budget exhaustion surfaces as
//! [`Error::Timeout`] while there is still time to report it.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Point in time after which an invocation must stop processing.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Creates a deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Returns the total budget this deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Returns the time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns true once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Fails with [`Error::Timeout`] if the deadline has passed.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_expired() {
            return Err(self.timeout(operation));
        }
        Ok(())
    }

    /// Runs `fut`, failing with [`Error::Timeout`] if it outlives the deadline.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| self.timeout(operation))?
    }

    fn timeout(&self, operation: &str) -> Error {
        Error::Timeout {
            operation: operation.to_string(),
            duration: self.budget,
        }
    }
}
