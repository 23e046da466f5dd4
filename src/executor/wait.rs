//! Stage budgets and bounded waits
//!
//! Every stage runs against a [`Budget`]; quality gates and rollout checks
//! additionally poll through a [`Poller`] that sleeps between attempts and
//! gives up when the budget is spent or the run is cancelled.

use super::cancel::CancellationToken;
use crate::pipeline::StageFailure;
use std::time::Duration;
use tokio::time::Instant;

/// Deadline used when `started + limit` does not fit in an [`Instant`]
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Wall-clock allowance for one stage
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    started: Instant,
    deadline: Instant,
}

impl Budget {
    /// Starts a budget of `limit` now
    ///
    /// Limits beyond the representable range are clamped to about 30 years.
    #[must_use]
    pub fn start(limit: Duration) -> Self {
        let started = Instant::now();
        let deadline = started
            .checked_add(limit)
            .or_else(|| started.checked_add(FAR_FUTURE))
            .unwrap_or(started);
        Self { started, deadline }
    }

    /// Time left before the deadline
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns true once the deadline has passed
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Time since the budget started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The failure reported when the budget runs out
    #[must_use]
    pub fn exceeded(&self) -> StageFailure {
        StageFailure::TimeoutExceeded {
            after: self.elapsed(),
        }
    }
}

/// Paces the attempts of a bounded wait
#[derive(Debug)]
pub struct Poller {
    budget: Budget,
    interval: Duration,
    attempts: u32,
}

impl Poller {
    /// Polls every `interval` within `budget`
    #[must_use]
    pub fn new(budget: Budget, interval: Duration) -> Self {
        Self {
            budget,
            interval,
            attempts: 0,
        }
    }

    /// Attempts made so far
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Waits until the next attempt may start
    ///
    /// The first call returns without sleeping. Later calls sleep for the
    /// interval, or for what is left of the budget if that is shorter.
    ///
    /// # Errors
    ///
    /// Returns [`StageFailure::Cancelled`] when the run is cancelled and
    /// [`StageFailure::TimeoutExceeded`] when the budget is spent.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<(), StageFailure> {
        if self.attempts > 0 {
            let pause = self.interval.min(self.budget.remaining());
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = cancel.cancelled() => return Err(StageFailure::Cancelled),
            }
        }

        if cancel.is_cancelled() {
            return Err(StageFailure::Cancelled);
        }
        if self.budget.is_spent() {
            return Err(self.budget.exceeded());
        }

        self.attempts += 1;
        Ok(())
    }
}

/// Reading of a quality gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// `OK`
    Pass,
    /// `WARN`, `ERROR` or `FAILED`
    Unfavorable(String),
    /// Anything else; the check is polled again
    Pending(Option<String>),
}

impl Verdict {
    /// Classifies the output of a check that exited with `exit_code`
    ///
    /// The verdict is the last non-empty line of stdout. A check that exits
    /// non-zero is still pending.
    #[must_use]
    pub fn classify(exit_code: i32, stdout: &str) -> Self {
        let line = stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(str::to_string);

        if exit_code != 0 {
            return Self::Pending(line);
        }

        match line {
            Some(l) if l.eq_ignore_ascii_case("OK") => Self::Pass,
            Some(l)
                if ["WARN", "ERROR", "FAILED"]
                    .iter()
                    .any(|v| l.eq_ignore_ascii_case(v)) =>
            {
                Self::Unfavorable(l.to_ascii_uppercase())
            }
            other => Self::Pending(other),
        }
    }

    /// Verdict text, if the check printed any
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Pass => Some("OK"),
            Self::Unfavorable(v) => Some(v),
            Self::Pending(v) => v.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_verdicts() {
        assert_eq!(Verdict::classify(0, "analysis done\nOK\n"), Verdict::Pass);
        assert_eq!(
            Verdict::classify(0, "WARN\n\n"),
            Verdict::Unfavorable("WARN".into())
        );
        assert_eq!(
            Verdict::classify(0, "error"),
            Verdict::Unfavorable("ERROR".into())
        );
        assert_eq!(
            Verdict::classify(0, "IN_PROGRESS"),
            Verdict::Pending(Some("IN_PROGRESS".into()))
        );
        assert_eq!(Verdict::classify(0, ""), Verdict::Pending(None));
        assert_eq!(
            Verdict::classify(2, "OK"),
            Verdict::Pending(Some("OK".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_budget_is_clamped() {
        let budget = Budget::start(Duration::from_secs(u64::MAX));
        assert!(!budget.is_spent());
        assert!(budget.remaining() > Duration::from_secs(86_400 * 365));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_runs_out() {
        let budget = Budget::start(Duration::from_secs(10));
        assert!(!budget.is_spent());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(budget.remaining(), Duration::from_secs(6));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(budget.is_spent());
        assert!(matches!(budget.exceeded(), StageFailure::TimeoutExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_paces_attempts_until_timeout() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let mut poller = Poller::new(
            Budget::start(Duration::from_secs(120)),
            Duration::from_secs(5),
        );

        let failure = loop {
            if let Err(failure) = poller.tick(&cancel).await {
                break failure;
            }
        };

        assert_eq!(poller.attempts(), 24);
        assert_eq!(started.elapsed(), Duration::from_secs(120));
        assert!(matches!(failure, StageFailure::TimeoutExceeded { after } if after == Duration::from_secs(120)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_last_sleep_is_clamped() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let mut poller = Poller::new(Budget::start(Duration::from_secs(7)), Duration::from_secs(5));

        poller.tick(&cancel).await.unwrap();
        poller.tick(&cancel).await.unwrap();
        assert!(poller.tick(&cancel).await.is_err());
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let mut poller = Poller::new(Budget::start(Duration::from_secs(600)), Duration::from_secs(30));
        poller.tick(&cancel).await.unwrap();

        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                cancel.cancel();
            })
        };

        let started = Instant::now();
        assert_eq!(poller.tick(&cancel).await, Err(StageFailure::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(30));
        trigger.await.unwrap();
    }
}
