// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The predicate deciding whether a failed request is retried.

use crate::error::MasterError;

/// What a [`RetryPolicy`] sees when deciding whether to retry.
pub struct RetryContext<'a> {
    /// The error the most recent attempt failed with.
    pub error: &'a MasterError,
    /// The number of attempts already made, including the failed one.
    pub attempt: u32,
    /// The configured retry ceiling for this request.
    pub max_retries: u32,
}

/// Decides whether a request is retried after a failed attempt.
pub trait RetryPolicy: Send + Sync {
    fn retry(&self, ctx: &RetryContext<'_>) -> bool;
}

/// Retries iff the failure was a timeout and the retry ceiling has not
/// been reached yet. A non-timeout `MasterError` (validation, a well-
/// formed slave exception, a fatal connection error) is never retried:
/// retrying an exception would just get the same exception again.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn retry(&self, ctx: &RetryContext<'_>) -> bool {
        ctx.error.is_timeout() && ctx.attempt < ctx.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_timeouts_up_to_the_limit() {
        let policy = DefaultRetryPolicy;
        let timeout = MasterError::Timeout { attempts: 1 };
        assert!(policy.retry(&RetryContext { error: &timeout, attempt: 1, max_retries: 3 }));
        assert!(!policy.retry(&RetryContext { error: &timeout, attempt: 3, max_retries: 3 }));
    }

    #[test]
    fn never_retries_an_exception() {
        let policy = DefaultRetryPolicy;
        let exception = MasterError::Cancelled;
        assert!(!policy.retry(&RetryContext { error: &exception, attempt: 1, max_retries: 3 }));
    }
}
