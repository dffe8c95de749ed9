//! Trigger variants and the declarative trigger parameter bundle.
//!
//! A [`Trigger`] is an immutable policy object producing the next instant a
//! task should fire, given the task's execution history:
//!
//! - **Cron**: calendar schedule, anchored on the last actual start
//! - **FixedRate**: start-to-start cadence, anchored on the last scheduled instant
//! - **FixedDelay**: end-to-start spacing, anchored on the last completion
//! - **Periodic**: like fixed-rate but anchored on the actual start, so task
//!   runtime contributes drift

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::cron::CronExpression;
use crate::error::{Result, SchedulerError};

/// A scheduling policy: when should the task fire next?
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Calendar schedule from a 6-field cron expression.
    Cron {
        /// Parsed expression.
        expression: CronExpression,
        /// Zone the expression is evaluated in.
        zone: Tz,
    },
    /// Start-to-start cadence, independent of task runtime.
    FixedRate {
        /// Interval between consecutive scheduled starts.
        period: Duration,
        /// Offset of the first fire from scheduling time.
        initial_delay: Option<Duration>,
        /// Zone reported by the trigger.
        zone: Tz,
    },
    /// End-to-start spacing; task runtime adds to the cadence.
    FixedDelay {
        /// Interval between a completion and the next start.
        delay: Duration,
        /// Offset of the first fire from scheduling time.
        initial_delay: Option<Duration>,
        /// Zone reported by the trigger.
        zone: Tz,
    },
    /// Simple periodic cadence anchored on the last actual start.
    Periodic {
        /// Interval between consecutive actual starts.
        period: Duration,
        /// Zone reported by the trigger.
        zone: Tz,
    },
}

impl Trigger {
    /// Build a cron trigger.
    pub fn cron(expression: CronExpression, zone: Tz) -> Self {
        Self::Cron { expression, zone }
    }

    /// Build a fixed-rate trigger.
    pub fn fixed_rate(period: Duration, initial_delay: Option<Duration>, zone: Tz) -> Self {
        Self::FixedRate {
            period,
            initial_delay,
            zone,
        }
    }

    /// Build a fixed-delay trigger.
    pub fn fixed_delay(delay: Duration, initial_delay: Option<Duration>, zone: Tz) -> Self {
        Self::FixedDelay {
            delay,
            initial_delay,
            zone,
        }
    }

    /// Build a simple periodic trigger.
    pub fn periodic(period: Duration, zone: Tz) -> Self {
        Self::Periodic { period, zone }
    }

    /// The zone this trigger evaluates in.
    pub fn zone(&self) -> Tz {
        match self {
            Self::Cron { zone, .. }
            | Self::FixedRate { zone, .. }
            | Self::FixedDelay { zone, .. }
            | Self::Periodic { zone, .. } => *zone,
        }
    }

    /// Compute the next fire instant given the task's history.
    ///
    /// `Ok(None)` means the trigger declares completion and the task must
    /// stop. Interval variants always produce a next instant; the cron
    /// variant fails when its five-year search horizon is exhausted.
    pub fn next_fire_time(&self, ctx: &ExecutionContext) -> Result<Option<DateTime<Utc>>> {
        match self {
            Self::Cron { expression, zone } => {
                let reference = ctx.last_actual_start().unwrap_or_else(Utc::now);
                expression.next(reference, *zone).map(Some)
            }
            Self::FixedRate {
                period,
                initial_delay,
                ..
            } => Ok(Some(match ctx.last_scheduled() {
                Some(scheduled) => scheduled + *period,
                None => Utc::now() + initial_delay.unwrap_or_else(Duration::zero),
            })),
            Self::FixedDelay {
                delay,
                initial_delay,
                ..
            } => Ok(Some(match ctx.last_completion() {
                Some(completed) => completed + *delay,
                None => Utc::now() + initial_delay.unwrap_or_else(Duration::zero),
            })),
            Self::Periodic { period, .. } => Ok(Some(match ctx.last_actual_start() {
                Some(started) => started + *period,
                None => Utc::now(),
            })),
        }
    }
}

/// Declarative trigger parameters.
///
/// All fields are optional; exactly one of `cron`, `fixed_rate`,
/// `fixed_delay` and `period` selects the trigger kind. Durations serialize
/// as integer milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// 6-field cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Start-to-start cadence.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "duration_millis")]
    pub fixed_rate: Option<Duration>,
    /// End-to-start spacing.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "duration_millis")]
    pub fixed_delay: Option<Duration>,
    /// Simple periodic cadence.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "duration_millis")]
    pub period: Option<Duration>,
    /// First-fire offset, honored by fixed-rate and fixed-delay.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "duration_millis")]
    pub initial_delay: Option<Duration>,
    /// IANA zone id; the scheduler default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

impl TriggerSpec {
    /// Bundle with only a cron expression set.
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            cron: Some(expression.into()),
            ..Self::default()
        }
    }

    /// Bundle with only a fixed-rate period set.
    pub fn fixed_rate(period: Duration) -> Self {
        Self {
            fixed_rate: Some(period),
            ..Self::default()
        }
    }

    /// Bundle with only a fixed delay set.
    pub fn fixed_delay(delay: Duration) -> Self {
        Self {
            fixed_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Bundle with only a simple period set.
    pub fn periodic(period: Duration) -> Self {
        Self {
            period: Some(period),
            ..Self::default()
        }
    }

    /// Set the first-fire offset.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = Some(initial_delay);
        self
    }

    /// Set the zone by IANA id.
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// How many trigger kinds the bundle names.
    pub fn kind_count(&self) -> usize {
        [
            self.cron.is_some(),
            self.fixed_rate.is_some(),
            self.fixed_delay.is_some(),
            self.period.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Build the concrete trigger.
    ///
    /// When more than one kind is present the precedence is cron >
    /// fixed-delay > fixed-rate > period. The bundle's zone string wins over
    /// `default_zone`.
    ///
    /// # Errors
    ///
    /// Fails when no kind is set, a duration is not strictly positive, the
    /// initial delay is negative, the zone is unknown, or the cron text does
    /// not parse.
    pub fn build(&self, default_zone: Tz) -> Result<Trigger> {
        let zone = self.resolve_zone(default_zone)?;
        let initial_delay = match self.initial_delay {
            Some(delay) if delay < Duration::zero() => {
                return Err(SchedulerError::InvalidConfig(
                    "initial-delay must not be negative".to_string(),
                ))
            }
            other => other,
        };

        if let Some(expression) = &self.cron {
            let expression = CronExpression::parse(expression)?;
            return Ok(Trigger::cron(expression, zone));
        }
        if let Some(delay) = self.fixed_delay {
            require_positive(delay, "fixed-delay")?;
            return Ok(Trigger::fixed_delay(delay, initial_delay, zone));
        }
        if let Some(period) = self.fixed_rate {
            require_positive(period, "fixed-rate")?;
            return Ok(Trigger::fixed_rate(period, initial_delay, zone));
        }
        if let Some(period) = self.period {
            require_positive(period, "period")?;
            return Ok(Trigger::periodic(period, zone));
        }
        Err(SchedulerError::NoTriggerSpecified)
    }

    /// Build, rejecting bundles that name more than one trigger kind.
    ///
    /// Used by the declarative surface, where conflicting parameters on one
    /// declaration are a configuration mistake worth failing loudly on;
    /// `scope` names the offending declaration.
    pub fn build_exclusive(&self, scope: &str, default_zone: Tz) -> Result<Trigger> {
        if self.kind_count() > 1 {
            return Err(SchedulerError::ConflictingTriggers(scope.to_string()));
        }
        self.build(default_zone)
    }

    fn resolve_zone(&self, default_zone: Tz) -> Result<Tz> {
        match &self.zone {
            Some(id) => id
                .parse()
                .map_err(|_| SchedulerError::InvalidTimezone(id.clone())),
            None => Ok(default_zone),
        }
    }
}

fn require_positive(duration: Duration, what: &str) -> Result<()> {
    if duration <= Duration::zero() {
        return Err(SchedulerError::InvalidConfig(format!(
            "{what} must be strictly positive"
        )));
    }
    Ok(())
}

/// Serde helper: `Option<Duration>` as integer milliseconds.
mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.num_milliseconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<i64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::milliseconds))
    }
}
