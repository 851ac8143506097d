//! Pure risk evaluation.
//!
//! No I/O, no clock: the result depends only on the account snapshot and the
//! configured limits, which is what makes replay and property tests cheap.

use crate::domain::account::AccountState;
use crate::domain::risk::limit::RiskLimits;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    DailyRisk,
    MaxRisk,
}

impl ViolationType {
    /// MaxRisk outranks DailyRisk: a permanent block is the more severe
    /// action and must win when both thresholds are breached at once.
    pub fn severity(&self) -> u8 {
        match self {
            ViolationType::DailyRisk => 1,
            ViolationType::MaxRisk => 2,
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationType::DailyRisk => write!(f, "DAILY_RISK"),
            ViolationType::MaxRisk => write!(f, "MAX_RISK"),
        }
    }
}

/// Outcome of evaluating one account snapshot against its limits.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub max_violated: bool,
    pub daily_violated: bool,
    pub warning: bool,
    pub current_loss: Decimal,
    pub daily_loss: Decimal,
    /// `None` when the limit cannot trigger (percentage of non-positive base).
    pub max_threshold: Option<Decimal>,
    pub daily_threshold: Option<Decimal>,
}

impl Evaluation {
    /// The violation to act on, with MaxRisk taking precedence.
    pub fn violation(&self) -> Option<ViolationType> {
        if self.max_violated {
            Some(ViolationType::MaxRisk)
        } else if self.daily_violated {
            Some(ViolationType::DailyRisk)
        } else {
            None
        }
    }
}

// 80% of a threshold puts the account into warning territory.
fn warning_level(threshold: Decimal) -> Decimal {
    threshold * Decimal::new(8, 1)
}

/// Evaluate an account snapshot. Thresholds are inclusive: a loss exactly
/// equal to the limit triggers. Never panics.
pub fn evaluate(state: &AccountState, limits: &RiskLimits) -> Evaluation {
    let max_threshold = limits.max_risk.resolve(state.initial_balance);
    let daily_threshold = limits.daily_risk.resolve(state.daily_start_balance);

    let current_loss = (state.initial_balance - state.current_balance).max(Decimal::ZERO);
    let daily_loss = (state.daily_start_balance - state.current_balance).max(Decimal::ZERO);

    let max_violated = max_threshold.is_some_and(|t| current_loss >= t);
    let daily_violated = daily_threshold.is_some_and(|t| daily_loss >= t);

    let warning = max_threshold.is_some_and(|t| current_loss >= warning_level(t))
        || daily_threshold.is_some_and(|t| daily_loss >= warning_level(t));

    Evaluation {
        max_violated,
        daily_violated,
        warning,
        current_loss,
        daily_loss,
        max_threshold,
        daily_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountState;
    use crate::domain::risk::limit::RiskLimit;
    use crate::domain::types::Venue;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn account(balance: Decimal) -> AccountState {
        let mut s = AccountState::new("c-1", Venue::Futures, dec!(10000), Utc::now());
        s.apply_balance(balance, Utc::now());
        s
    }

    fn limits(daily: RiskLimit, max: RiskLimit) -> RiskLimits {
        RiskLimits {
            daily_risk: daily,
            max_risk: max,
        }
    }

    #[test]
    fn test_no_violation_in_profit() {
        let eval = evaluate(
            &account(dec!(10500)),
            &limits(RiskLimit::Absolute(dec!(200)), RiskLimit::Percentage(dec!(10))),
        );
        assert!(eval.violation().is_none());
        assert!(!eval.warning);
        assert_eq!(eval.current_loss, Decimal::ZERO);
        assert_eq!(eval.daily_loss, Decimal::ZERO);
    }

    #[test]
    fn test_daily_violation() {
        let eval = evaluate(
            &account(dec!(9799)),
            &limits(RiskLimit::Absolute(dec!(200)), RiskLimit::Percentage(dec!(10))),
        );
        assert_eq!(eval.violation(), Some(ViolationType::DailyRisk));
        assert_eq!(eval.daily_loss, dec!(201));
        assert_eq!(eval.daily_threshold, Some(dec!(200)));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let eval = evaluate(
            &account(dec!(9800)),
            &limits(RiskLimit::Absolute(dec!(200)), RiskLimit::Percentage(dec!(10))),
        );
        assert_eq!(eval.violation(), Some(ViolationType::DailyRisk));
        assert_eq!(eval.daily_loss, dec!(200));
    }

    #[test]
    fn test_max_outranks_daily() {
        let eval = evaluate(
            &account(dec!(9400)),
            &limits(RiskLimit::Absolute(dec!(100)), RiskLimit::Absolute(dec!(500))),
        );
        assert!(eval.max_violated);
        assert!(eval.daily_violated);
        assert_eq!(eval.violation(), Some(ViolationType::MaxRisk));
    }

    #[test]
    fn test_percentage_threshold_resolution() {
        // 10% of 10000 initial = 1000
        let eval = evaluate(
            &account(dec!(9000)),
            &limits(RiskLimit::Absolute(dec!(5000)), RiskLimit::Percentage(dec!(10))),
        );
        assert_eq!(eval.max_threshold, Some(dec!(1000)));
        assert_eq!(eval.violation(), Some(ViolationType::MaxRisk));
    }

    #[test]
    fn test_zero_base_percentage_never_triggers() {
        let mut s = account(dec!(0));
        s.initial_balance = Decimal::ZERO;
        s.daily_start_balance = Decimal::ZERO;

        let eval = evaluate(
            &s,
            &limits(RiskLimit::Percentage(dec!(5)), RiskLimit::Percentage(dec!(10))),
        );
        assert!(eval.violation().is_none());
        assert_eq!(eval.max_threshold, None);
        assert_eq!(eval.daily_threshold, None);
    }

    #[test]
    fn test_warning_at_eighty_percent() {
        // daily limit 200, loss 160 -> warning without violation
        let eval = evaluate(
            &account(dec!(9840)),
            &limits(RiskLimit::Absolute(dec!(200)), RiskLimit::Percentage(dec!(50))),
        );
        assert!(eval.warning);
        assert!(eval.violation().is_none());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let s = account(dec!(9650));
        let l = limits(RiskLimit::Absolute(dec!(200)), RiskLimit::Percentage(dec!(10)));
        assert_eq!(evaluate(&s, &l), evaluate(&s, &l));
    }
}
