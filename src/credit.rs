//! Credit-based flow control.
//!
//! A subscriber pre-authorizes deliveries with `REQUEST(count)`. The pool is a
//! single counter per session, shared by all partitions, and every delivered
//! message spends exactly one credit.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreditError {
    #[error("Request count must be positive, got {0}")]
    NonPositive(i64),

    #[error("Request count {requested} would overflow outstanding credit {available}")]
    Overflow { available: u64, requested: i64 },

    #[error("No credit left to deliver")]
    Exhausted,
}

/// Outstanding delivery budget of one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CreditPool {
    available: u64,
}

impl CreditPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    pub fn can_deliver(&self) -> bool {
        self.available > 0
    }

    /// Add `count` credits. The pool is left untouched on error.
    pub fn grant(&mut self, count: i64) -> Result<u64, CreditError> {
        if count <= 0 {
            return Err(CreditError::NonPositive(count));
        }
        self.available = self
            .available
            .checked_add(count as u64)
            .ok_or(CreditError::Overflow {
                available: self.available,
                requested: count,
            })?;
        Ok(self.available)
    }

    /// Spend one credit for a delivered message.
    pub fn consume(&mut self) -> Result<(), CreditError> {
        if self.available == 0 {
            return Err(CreditError::Exhausted);
        }
        self.available -= 1;
        Ok(())
    }
}
