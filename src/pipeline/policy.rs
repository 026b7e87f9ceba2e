use std::time::Duration;

/// Exponential backoff with jitter, capped
///
/// attempt 1 failed: base
/// attempt 2 failed: base * 2
/// attempt n failed: min(base * 2^(n-1), cap), then reduced by up to `jitter`
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction (0.0–1.0) of the delay that may be randomly shaved off
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// Delay before retrying after `failed_attempt` (1-based) failed
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        self.delay_with(failed_attempt, random_unit())
    }

    /// Same as [`delay_for`](Self::delay_for) with a caller-supplied random value in [0, 1)
    pub fn delay_with(&self, failed_attempt: u32, unit: f64) -> Duration {
        if failed_attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = 2u32.saturating_pow(failed_attempt - 1);
        let delay = std::cmp::min(self.base.saturating_mul(multiplier), self.cap);

        let jitter = self.jitter.clamp(0.0, 1.0) * unit.clamp(0.0, 1.0);
        delay.mul_f64(1.0 - jitter)
    }
}

/// Uniform value in [0, 1) from the random bits of a v4 uuid
fn random_unit() -> f64 {
    const MANTISSA: u64 = 1 << 53;
    let bits = uuid::Uuid::new_v4().as_u128() as u64 & (MANTISSA - 1);
    bits as f64 / MANTISSA as f64
}

/// Retry, timeout and criticality settings for one stage
#[derive(Debug, Clone, PartialEq)]
pub struct StagePolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff: Backoff,

    /// Each attempt is cancelled after this long
    pub attempt_timeout: Duration,

    /// Required stages block archiving; optional ones only add warnings
    pub required: bool,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            attempt_timeout: Duration::from_secs(600),
            required: false,
        }
    }
}

impl StagePolicy {
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// A named stage, its prerequisites and its policy
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub name: String,
    pub prerequisites: Vec<String>,
    pub policy: StagePolicy,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, policy: StagePolicy) -> Self {
        Self {
            name: name.into(),
            prerequisites: Vec::new(),
            policy,
        }
    }

    pub fn after(mut self, prerequisite: impl Into<String>) -> Self {
        self.prerequisites.push(prerequisite.into());
        self
    }
}
