//! Declarative alert rules with firing/resolve hysteresis.
//!
//! Expressions cover metric aggregates: `rate(name[window]) > t`,
//! `avg(name[window]) > t`, `value(name) > t`. A rule fires only after its
//! expression has been continuously true for `for_duration`, and resolves
//! only after it has been continuously false for the same duration.

use crate::bus::EventBus;
use crate::metrics::MetricsRegistry;
use crate::notify::NotificationChannel;
use chrono::{DateTime, Utc};
use quarry_protocol::events::EventKind;
use quarry_protocol::types::{Alert, AlertSeverity, AlertState};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("unparseable alert expression: {0}")]
    Syntax(String),
    #[error("unknown aggregate function: {0}")]
    UnknownFunc(String),
    #[error("bad window: {0}")]
    BadWindow(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Rate,
    Avg,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertExpr {
    func: Func,
    metric: String,
    window: Duration,
    op: Op,
    threshold: f64,
}

impl AlertExpr {
    pub fn eval_at(&self, registry: &MetricsRegistry, now: DateTime<Utc>) -> bool {
        let value = match self.func {
            Func::Rate => registry.rate_at(&self.metric, self.window, now),
            Func::Avg => registry.avg_at(&self.metric, self.window, now),
            Func::Value => registry.gauge(&self.metric),
        };
        match self.op {
            Op::Gt => value > self.threshold,
            Op::Ge => value >= self.threshold,
            Op::Lt => value < self.threshold,
            Op::Le => value <= self.threshold,
        }
    }
}

fn parse_window(raw: &str) -> Result<Duration, ExprError> {
    let raw = raw.trim();
    let (digits, unit) = raw.split_at(raw.len().saturating_sub(1));
    let n: u64 = digits
        .parse()
        .map_err(|_| ExprError::BadWindow(raw.to_string()))?;
    match unit {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3_600)),
        _ => Err(ExprError::BadWindow(raw.to_string())),
    }
}

impl FromStr for AlertExpr {
    type Err = ExprError;

    /// `rate(errors_total[5m]) > 0.1` | `avg(lat[1m]) >= 200` | `value(queue_depth) > 100`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let open = s.find('(').ok_or_else(|| ExprError::Syntax(s.to_string()))?;
        let close = s.find(')').ok_or_else(|| ExprError::Syntax(s.to_string()))?;
        if close <= open {
            return Err(ExprError::Syntax(s.to_string()));
        }

        let func = match &s[..open] {
            "rate" => Func::Rate,
            "avg" => Func::Avg,
            "value" => Func::Value,
            other => return Err(ExprError::UnknownFunc(other.to_string())),
        };

        let inside = &s[open + 1..close];
        let (metric, window) = match inside.find('[') {
            Some(bracket) => {
                let end = inside
                    .find(']')
                    .ok_or_else(|| ExprError::Syntax(s.to_string()))?;
                (
                    inside[..bracket].trim().to_string(),
                    parse_window(&inside[bracket + 1..end])?,
                )
            }
            None => (inside.trim().to_string(), Duration::from_secs(60)),
        };
        if metric.is_empty() {
            return Err(ExprError::Syntax(s.to_string()));
        }

        let rest = s[close + 1..].trim();
        let (op, rest) = if let Some(r) = rest.strip_prefix(">=") {
            (Op::Ge, r)
        } else if let Some(r) = rest.strip_prefix("<=") {
            (Op::Le, r)
        } else if let Some(r) = rest.strip_prefix('>') {
            (Op::Gt, r)
        } else if let Some(r) = rest.strip_prefix('<') {
            (Op::Lt, r)
        } else {
            return Err(ExprError::Syntax(s.to_string()));
        };
        let threshold: f64 = rest
            .trim()
            .parse()
            .map_err(|_| ExprError::Syntax(s.to_string()))?;

        Ok(AlertExpr {
            func,
            metric,
            window,
            op,
            threshold,
        })
    }
}

pub struct AlertRule {
    pub rule_id: String,
    pub expr: AlertExpr,
    pub for_duration: Duration,
    pub severity: AlertSeverity,
    pub labels: HashMap<String, String>,
    pub channels: Vec<Arc<dyn NotificationChannel>>,
}

#[derive(Default)]
struct RuleRuntime {
    true_since: Option<DateTime<Utc>>,
    false_since: Option<DateTime<Utc>>,
    active: Option<Alert>,
}

pub struct AlertEngine {
    rules: Vec<AlertRule>,
    runtime: Mutex<HashMap<String, RuleRuntime>>,
    registry: Arc<MetricsRegistry>,
    bus: Arc<EventBus>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>, registry: Arc<MetricsRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            rules,
            runtime: Mutex::new(HashMap::new()),
            registry,
            bus,
        }
    }

    /// One evaluation pass. Returns alerts that changed state this pass
    /// (opened or resolved); while firing, re-evaluations are deduplicated.
    pub async fn evaluate_at(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let mut transitions = Vec::new();

        for rule in &self.rules {
            let condition = rule.expr.eval_at(&self.registry, now);
            let transition = {
                let mut runtime = self.runtime.lock().expect("alert runtime lock");
                let state = runtime.entry(rule.rule_id.clone()).or_default();
                Self::step(rule, state, condition, now)
            };

            if let Some(alert) = transition {
                debug!(rule = %rule.rule_id, state = alert.state.as_str(), "alert transition");
                self.bus.publish(
                    EventKind::AlertRaised,
                    None,
                    None,
                    serde_json::to_value(&alert).unwrap_or_default(),
                );
                for channel in &rule.channels {
                    if let Err(e) = channel.notify(&alert).await {
                        warn!(rule = %rule.rule_id, channel = channel.name(), "notify failed: {e}");
                    }
                }
                transitions.push(alert);
            }
        }
        transitions
    }

    fn step(
        rule: &AlertRule,
        state: &mut RuleRuntime,
        condition: bool,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let hold = chrono::Duration::from_std(rule.for_duration).unwrap_or_default();

        if condition {
            state.false_since = None;
            let since = *state.true_since.get_or_insert(now);
            if state.active.is_none() && now - since >= hold {
                let alert = Alert {
                    alert_id: Uuid::new_v4(),
                    rule_id: rule.rule_id.clone(),
                    severity: rule.severity,
                    state: AlertState::Firing,
                    opened_at: now,
                    closed_at: None,
                    labels: rule.labels.clone(),
                    message: format!("alert rule {} is firing", rule.rule_id),
                };
                state.active = Some(alert.clone());
                return Some(alert);
            }
        } else {
            state.true_since = None;
            if state.active.is_some() {
                let since = *state.false_since.get_or_insert(now);
                if now - since >= hold {
                    let mut alert = state.active.take().expect("active alert present");
                    alert.state = AlertState::Resolved;
                    alert.closed_at = Some(now);
                    state.false_since = None;
                    return Some(alert);
                }
            } else {
                state.false_since = None;
            }
        }
        None
    }

    /// Currently firing alerts.
    pub fn firing(&self) -> Vec<Alert> {
        let runtime = self.runtime.lock().expect("alert runtime lock");
        runtime
            .values()
            .filter_map(|state| state.active.clone())
            .collect()
    }

    /// Background loop: evaluate every `interval` until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate_at(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn engine_with_rule(for_secs: u64) -> (Arc<MetricsRegistry>, AlertEngine) {
        let registry = Arc::new(MetricsRegistry::new(10, 3_600));
        let bus = Arc::new(EventBus::new(128));
        let rule = AlertRule {
            rule_id: "error-rate".to_string(),
            expr: "rate(errors_total[1m]) > 0".parse().unwrap(),
            for_duration: Duration::from_secs(for_secs),
            severity: AlertSeverity::Warning,
            labels: HashMap::new(),
            channels: vec![Arc::new(crate::notify::LogChannel)],
        };
        let engine = AlertEngine::new(vec![rule], registry.clone(), bus);
        (registry, engine)
    }

    #[test]
    fn expression_parsing() {
        let expr: AlertExpr = "rate(errors_total[5m]) > 0.1".parse().unwrap();
        assert_eq!(expr.metric, "errors_total");
        assert_eq!(expr.window, Duration::from_secs(300));
        assert_eq!(expr.op, Op::Gt);

        let expr: AlertExpr = "value(queue_depth) >= 100".parse().unwrap();
        assert_eq!(expr.func, Func::Value);

        assert!("bogus".parse::<AlertExpr>().is_err());
        assert!("median(x[1m]) > 1".parse::<AlertExpr>().is_err());
        assert!("rate(x[1w]) > 1".parse::<AlertExpr>().is_err());
    }

    #[tokio::test]
    async fn short_spike_does_not_fire() {
        let (registry, engine) = engine_with_rule(30);
        // Errors for 20 seconds, then quiet.
        registry.inc_counter_at("errors_total", 1, at(0));
        registry.inc_counter_at("errors_total", 1, at(10));

        assert!(engine.evaluate_at(at(0)).await.is_empty());
        assert!(engine.evaluate_at(at(10)).await.is_empty());
        assert!(engine.evaluate_at(at(20)).await.is_empty());
        // Window has drained past 60s; condition false before 30s of truth.
        assert!(engine.evaluate_at(at(80)).await.is_empty());
        assert!(engine.firing().is_empty());
    }

    #[tokio::test]
    async fn sustained_condition_fires_once_and_resolves_with_hysteresis() {
        let (registry, engine) = engine_with_rule(30);
        // Errors from t=0 through t=40.
        for t in [0, 10, 20, 30, 40] {
            registry.inc_counter_at("errors_total", 1, at(t));
        }

        assert!(engine.evaluate_at(at(0)).await.is_empty());
        assert!(engine.evaluate_at(at(10)).await.is_empty());
        assert!(engine.evaluate_at(at(20)).await.is_empty());

        let opened = engine.evaluate_at(at(30)).await;
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].state, AlertState::Firing);

        // Still true: deduplicated, no second alert.
        assert!(engine.evaluate_at(at(40)).await.is_empty());
        assert_eq!(engine.firing().len(), 1);

        // Condition goes false at ~t=101 (window drained); must stay
        // firing until 30 continuous seconds of false.
        assert!(engine.evaluate_at(at(110)).await.is_empty());
        assert!(engine.evaluate_at(at(120)).await.is_empty());
        let resolved = engine.evaluate_at(at(140)).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].state, AlertState::Resolved);
        assert!(resolved[0].closed_at.is_some());
        assert!(engine.firing().is_empty());
    }

    #[tokio::test]
    async fn flapping_resets_the_resolve_clock() {
        let (registry, engine) = engine_with_rule(30);
        for t in [0, 10, 20, 30] {
            registry.inc_counter_at("errors_total", 1, at(t));
        }
        let opened = engine.evaluate_at(at(30)).await;
        assert_eq!(opened.len(), 1);

        // False at 100 (window drained), true again at 105, false after.
        assert!(engine.evaluate_at(at(100)).await.is_empty());
        registry.inc_counter_at("errors_total", 1, at(105));
        assert!(engine.evaluate_at(at(110)).await.is_empty());
        // False again from ~166; resolve clock restarts there.
        assert!(engine.evaluate_at(at(170)).await.is_empty());
        assert!(engine.evaluate_at(at(180)).await.is_empty());
        let resolved = engine.evaluate_at(at(200)).await;
        assert_eq!(resolved.len(), 1, "resolve after continuous false period");
    }
}
