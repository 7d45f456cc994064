//! Threshold assertion grammar and end-of-run evaluation.
//!
//! A threshold binds a metric selector to one or more assertion
//! expressions of the form `<aggregation> <op> <number>`, e.g. `rate>5`
//! or `p(95)<200`. Expressions are parsed and type-checked against the
//! selected metric before the run starts and evaluated once against the
//! final aggregates.

use crate::error::{Error, Result};
use crate::metrics::{builtin_kind, Aggregate, MetricKind, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Aggregation referenced on the left side of an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Value,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Aggregation {
    /// Which metric kinds this aggregation is meaningful for.
    fn compatible_with(&self, kind: MetricKind) -> bool {
        match self {
            Aggregation::Rate => matches!(kind, MetricKind::Counter | MetricKind::Rate),
            Aggregation::Count => matches!(kind, MetricKind::Counter),
            Aggregation::Value => matches!(kind, MetricKind::Gauge),
            Aggregation::Avg
            | Aggregation::Min
            | Aggregation::Max
            | Aggregation::Med
            | Aggregation::Percentile(_) => matches!(kind, MetricKind::Trend),
        }
    }

    fn observe(&self, aggregate: &Aggregate, elapsed: Duration) -> f64 {
        match self {
            Aggregation::Rate => aggregate.rate(elapsed),
            Aggregation::Count => aggregate.count() as f64,
            Aggregation::Value => aggregate.last(),
            Aggregation::Avg => aggregate.avg(),
            Aggregation::Min => aggregate.min(),
            Aggregation::Max => aggregate.max(),
            Aggregation::Med => aggregate.percentile(50.0),
            Aggregation::Percentile(p) => aggregate.percentile(*p),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Rate => write!(f, "rate"),
            Aggregation::Count => write!(f, "count"),
            Aggregation::Value => write!(f, "value"),
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::Med => write!(f, "med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Op {
    fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Op::Gt => observed > bound,
            Op::Ge => observed >= bound,
            Op::Lt => observed < bound,
            Op::Le => observed <= bound,
            Op::Eq => observed == bound,
            Op::Ne => observed != bound,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Eq => "==",
            Op::Ne => "!=",
        }
    }
}

/// One parsed assertion bound to a selector.
#[derive(Debug, Clone)]
pub struct Threshold {
    pub selector: Selector,
    pub aggregation: Aggregation,
    pub op: Op,
    pub bound: f64,
}

/// Outcome of evaluating one threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub selector: String,
    pub expression: String,
    pub observed: f64,
    pub passed: bool,
}

impl Threshold {
    /// Parse one expression for an already-parsed selector.
    pub fn parse(selector: Selector, expr: &str) -> Result<Self> {
        let kind = builtin_kind(&selector.metric)
            .ok_or_else(|| Error::UnknownMetric(selector.metric.clone()))?;

        let (aggregation, op, bound) = parse_expr(expr)?;
        if !aggregation.compatible_with(kind) {
            return Err(Error::InvalidThreshold {
                expr: expr.to_string(),
                reason: format!(
                    "aggregation '{}' does not apply to {} metric '{}'",
                    aggregation,
                    kind.as_str(),
                    selector.metric
                ),
            });
        }

        Ok(Self {
            selector,
            aggregation,
            op,
            bound,
        })
    }

    /// Evaluate against a final aggregate. `None` means the selector never
    /// matched a sample and is treated as the empty aggregate.
    pub fn evaluate(&self, aggregate: Option<&Aggregate>, elapsed: Duration) -> Verdict {
        let observed = match aggregate {
            Some(aggregate) => self.aggregation.observe(aggregate, elapsed),
            None => 0.0,
        };
        Verdict {
            selector: self.selector.to_string(),
            expression: self.expression(),
            observed,
            passed: self.op.holds(observed, self.bound),
        }
    }

    /// Canonical text form of the assertion.
    pub fn expression(&self) -> String {
        format!("{}{}{}", self.aggregation, self.op.as_str(), self.bound)
    }
}

/// Parse every rule in a scenario's threshold map.
pub fn parse_set(rules: &BTreeMap<String, Vec<String>>) -> Result<Vec<Threshold>> {
    let mut thresholds = Vec::new();
    for (selector_src, exprs) in rules {
        let selector = Selector::parse(selector_src)?;
        if exprs.is_empty() {
            return Err(Error::InvalidThreshold {
                expr: selector_src.clone(),
                reason: "no expressions given for selector".to_string(),
            });
        }
        for expr in exprs {
            thresholds.push(Threshold::parse(selector.clone(), expr)?);
        }
    }
    Ok(thresholds)
}

fn parse_expr(input: &str) -> Result<(Aggregation, Op, f64)> {
    let s = input.trim();
    let invalid = |reason: &str| Error::InvalidThreshold {
        expr: input.to_string(),
        reason: reason.to_string(),
    };

    // Two-character operators have to win over their one-character prefixes.
    let ops: [(&str, Op); 6] = [
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("==", Op::Eq),
        ("!=", Op::Ne),
        (">", Op::Gt),
        ("<", Op::Lt),
    ];

    let (lhs, op, rhs) = ops
        .iter()
        .find_map(|(text, op)| {
            s.find(text)
                .map(|at| (&s[..at], *op, &s[at + text.len()..]))
        })
        .ok_or_else(|| invalid("no comparison operator found"))?;

    let aggregation = parse_aggregation(lhs.trim())
        .ok_or_else(|| invalid("unrecognized aggregation on left-hand side"))?;

    let bound: f64 = rhs
        .trim()
        .parse()
        .map_err(|_| invalid("right-hand side is not a number"))?;
    if !bound.is_finite() {
        return Err(invalid("right-hand side must be finite"));
    }

    Ok((aggregation, op, bound))
}

fn parse_aggregation(s: &str) -> Option<Aggregation> {
    match s {
        "rate" => Some(Aggregation::Rate),
        "count" => Some(Aggregation::Count),
        "value" => Some(Aggregation::Value),
        "avg" => Some(Aggregation::Avg),
        "min" => Some(Aggregation::Min),
        "max" => Some(Aggregation::Max),
        "med" => Some(Aggregation::Med),
        _ => {
            let inner = s.strip_prefix("p(")?.strip_suffix(')')?;
            let p: f64 = inner.trim().parse().ok()?;
            if p > 0.0 && p <= 100.0 {
                Some(Aggregation::Percentile(p))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricKind;

    fn threshold(selector: &str, expr: &str) -> Result<Threshold> {
        Threshold::parse(Selector::parse(selector).unwrap(), expr)
    }

    #[test]
    fn parses_rate_comparison() {
        let t = threshold("http_reqs{expected_response:true}", "rate>5").unwrap();
        assert_eq!(t.aggregation, Aggregation::Rate);
        assert_eq!(t.op, Op::Gt);
        assert_eq!(t.bound, 5.0);
        assert_eq!(t.expression(), "rate>5");
    }

    #[test]
    fn parses_all_operators() {
        for (src, op) in [
            ("count>1", Op::Gt),
            ("count>=1", Op::Ge),
            ("count<1", Op::Lt),
            ("count<=1", Op::Le),
            ("count==1", Op::Eq),
            ("count!=1", Op::Ne),
        ] {
            let t = threshold("http_reqs", src).unwrap();
            assert_eq!(t.op, op, "for '{}'", src);
        }
    }

    #[test]
    fn parses_percentile_and_whitespace() {
        let t = threshold("http_req_duration", "p(95) < 200.5").unwrap();
        assert_eq!(t.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(t.op, Op::Lt);
        assert_eq!(t.bound, 200.5);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "rate", "rate 5", "p95<10", "p(0)<10", "p(101)<10", "rate>abc"] {
            assert!(
                threshold("http_reqs", bad).is_err() && threshold("http_req_duration", bad).is_err(),
                "expected '{}' rejected",
                bad
            );
        }
    }

    #[test]
    fn rejects_kind_mismatches() {
        // p(95) on a counter, rate on a trend, value on a counter.
        assert!(threshold("http_reqs", "p(95)<10").is_err());
        assert!(threshold("http_req_duration", "rate>1").is_err());
        assert!(threshold("http_reqs", "value>1").is_err());
        assert!(threshold("vus", "value<100").is_ok());
        assert!(threshold("http_req_failed", "rate<0.01").is_ok());
    }

    #[test]
    fn rejects_unknown_metric() {
        assert!(matches!(
            threshold("my_custom_metric", "rate>1"),
            Err(Error::UnknownMetric(_))
        ));
    }

    #[test]
    fn evaluates_counter_rate() {
        let t = threshold("http_reqs", "rate>5").unwrap();
        let mut agg = Aggregate::new(MetricKind::Counter);
        for _ in 0..100 {
            agg.add(1.0);
        }
        // 100 requests over 10s is 10/s.
        let verdict = t.evaluate(Some(&agg), Duration::from_secs(10));
        assert!(verdict.passed);
        assert!((verdict.observed - 10.0).abs() < 1e-9);

        // The same window at a tighter bound fails.
        let strict = threshold("http_reqs", "rate>50").unwrap();
        assert!(!strict.evaluate(Some(&agg), Duration::from_secs(10)).passed);
    }

    #[test]
    fn evaluates_empty_aggregate_as_zero() {
        let t = threshold("http_reqs", "rate>5").unwrap();
        let verdict = t.evaluate(None, Duration::from_secs(10));
        assert_eq!(verdict.observed, 0.0);
        assert!(!verdict.passed);

        // count==0 over no samples holds.
        let zero = threshold("http_reqs", "count==0").unwrap();
        assert!(zero.evaluate(None, Duration::from_secs(10)).passed);
    }

    #[test]
    fn parse_set_expands_expression_lists() {
        let mut rules = BTreeMap::new();
        rules.insert(
            "http_req_duration".to_string(),
            vec!["p(95)<200".to_string(), "avg<100".to_string()],
        );
        rules.insert(
            "http_reqs{expected_response:true}".to_string(),
            vec!["rate>5".to_string()],
        );
        let set = parse_set(&rules).unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn parse_set_rejects_empty_expression_list() {
        let mut rules = BTreeMap::new();
        rules.insert("http_reqs".to_string(), vec![]);
        assert!(parse_set(&rules).is_err());
    }
}
