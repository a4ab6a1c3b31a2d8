//! One deadline shared by every hop of an operation.

use crate::base::neterror::{NetError, RequestError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn after(budget: Option<Duration>) -> Self {
        Self {
            at: budget.map(|d| Instant::now() + d),
            budget,
        }
    }

    pub fn never() -> Self {
        Self { at: None, budget: None }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn check(&self) -> Result<(), RequestError> {
        if self.is_expired() {
            return Err(self.expired());
        }
        Ok(())
    }

    /// Runs `fut` until it finishes or the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, RequestError>
    where
        F: Future<Output = Result<T, RequestError>>,
    {
        match self.at {
            None => fut.await,
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(result) => result,
                Err(_) => Err(self.expired()),
            },
        }
    }

    fn expired(&self) -> RequestError {
        let budget = self.budget.unwrap_or_default();
        RequestError::new(
            NetError::TimedOut,
            format!("operation exceeded its {}ms deadline", budget.as_millis()),
        )
    }
}
