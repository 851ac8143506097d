use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on loss, as a percentage of a base balance or an absolute
/// amount. Immutable within a monitoring session; edits restart the session.
///
/// JSON form: `{"type":"percentage","value":10}` / `{"type":"absolute","value":500}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RiskLimit {
    Percentage(Decimal),
    Absolute(Decimal),
}

impl RiskLimit {
    /// Validate the configured value: percentages live in (0, 100],
    /// absolute limits must be positive.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RiskLimit::Percentage(p) => {
                if *p <= Decimal::ZERO || *p > Decimal::from(100) {
                    return Err(format!("percentage limit must be in (0, 100], got {}", p));
                }
            }
            RiskLimit::Absolute(a) => {
                if *a <= Decimal::ZERO {
                    return Err(format!("absolute limit must be positive, got {}", a));
                }
            }
        }
        Ok(())
    }

    /// Resolve against a base balance. `None` means the limit cannot
    /// trigger (percentage of a non-positive base).
    pub fn resolve(&self, base: Decimal) -> Option<Decimal> {
        match self {
            RiskLimit::Percentage(p) => {
                if base <= Decimal::ZERO {
                    None
                } else {
                    Some(base * *p / Decimal::from(100))
                }
            }
            RiskLimit::Absolute(a) => Some(*a),
        }
    }
}

impl fmt::Display for RiskLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLimit::Percentage(p) => write!(f, "{}%", p),
            RiskLimit::Absolute(a) => write!(f, "{}", a),
        }
    }
}

/// The pair of limits governing one client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub daily_risk: RiskLimit,
    pub max_risk: RiskLimit,
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), String> {
        self.daily_risk.validate()?;
        self.max_risk.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_percentage_resolution() {
        let limit = RiskLimit::Percentage(dec!(10));
        assert_eq!(limit.resolve(dec!(10000)), Some(dec!(1000)));
    }

    #[test]
    fn test_percentage_of_zero_base_cannot_trigger() {
        let limit = RiskLimit::Percentage(dec!(10));
        assert_eq!(limit.resolve(Decimal::ZERO), None);
        assert_eq!(limit.resolve(dec!(-5)), None);
    }

    #[test]
    fn test_absolute_ignores_base() {
        let limit = RiskLimit::Absolute(dec!(200));
        assert_eq!(limit.resolve(Decimal::ZERO), Some(dec!(200)));
        assert_eq!(limit.resolve(dec!(99999)), Some(dec!(200)));
    }

    #[test]
    fn test_validation_bounds() {
        assert!(RiskLimit::Percentage(dec!(100)).validate().is_ok());
        assert!(RiskLimit::Percentage(dec!(100.01)).validate().is_err());
        assert!(RiskLimit::Percentage(Decimal::ZERO).validate().is_err());
        assert!(RiskLimit::Absolute(dec!(0.01)).validate().is_ok());
        assert!(RiskLimit::Absolute(Decimal::ZERO).validate().is_err());
    }

    #[test]
    fn test_json_wire_format() {
        let limit: RiskLimit = serde_json::from_str(r#"{"type":"percentage","value":10}"#).unwrap();
        assert_eq!(limit, RiskLimit::Percentage(dec!(10)));

        let json = serde_json::to_string(&RiskLimit::Absolute(dec!(200))).unwrap();
        assert_eq!(json, r#"{"type":"absolute","value":"200"}"#);
    }
}
