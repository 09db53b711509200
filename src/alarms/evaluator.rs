//! Alarm evaluation: one state machine per (target, kind)

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::config::{
    alarm_name, Alarm, AlarmKind, AlarmRule, AlarmRules, AlarmState, MissingDataPolicy,
};
use super::event::AlarmEvent;
use super::notifier::Notifier;
use super::AlarmError;
use crate::metrics::{
    model::bucket_start, AggregateQuery, AggregatedDatapoint, Dimensions, MetricSink,
};

/// Outcome of classifying one evaluation window
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub state: AlarmState,
    pub reason: String,
    pub breaching: u32,
    pub missing: u32,
}

/// Decide the state of `rule` over the `evaluation_periods` buckets that start at `window_start`.
///
/// Present buckets are compared against the threshold; absent ones are
/// classified by the rule's missing-data policy.
pub fn evaluate_window(
    rule: &AlarmRule,
    datapoints: &[AggregatedDatapoint],
    window_start: i64,
) -> Evaluation {
    let period_ms = rule.period_ms();
    let mut present: Vec<&AggregatedDatapoint> = Vec::new();
    let mut breaching = 0;
    let mut missing = 0;

    for i in 0..rule.evaluation_periods as i64 {
        let bucket = window_start + i * period_ms;
        match datapoints.iter().find(|dp| dp.timestamp == bucket) {
            Some(dp) => {
                if rule.comparison.check(dp.value, rule.threshold) {
                    breaching += 1;
                }
                present.push(dp);
            }
            None => {
                missing += 1;
                if rule.missing_data == MissingDataPolicy::Breaching {
                    breaching += 1;
                }
            }
        }
    }

    if present.is_empty() && rule.missing_data == MissingDataPolicy::Missing {
        return Evaluation {
            state: AlarmState::InsufficientData,
            reason: format!(
                "Insufficient Data: {} datapoint{} {} unknown.",
                missing,
                plural(missing),
                if missing == 1 { "was" } else { "were" }
            ),
            breaching,
            missing,
        };
    }

    let state = if breaching >= rule.datapoints_to_alarm {
        AlarmState::Alarm
    } else {
        AlarmState::Ok
    };

    let mut clauses = Vec::new();
    if !present.is_empty() {
        let values: Vec<String> = present
            .iter()
            .rev()
            .map(|dp| format!("{} ({})", dp.value, format_bucket(dp.timestamp)))
            .collect();
        let verb = if present.len() == 1 { "was" } else { "were" };
        let relation = match state {
            AlarmState::Alarm => rule.comparison.phrase().to_string(),
            _ => format!("not {}", rule.comparison.phrase()),
        };
        clauses.push(format!(
            "{} datapoint{} [{}] {} {} the threshold ({})",
            present.len(),
            plural(present.len() as u32),
            values.join(", "),
            verb,
            relation,
            rule.threshold
        ));
    }
    if missing > 0 && rule.missing_data != MissingDataPolicy::Missing {
        let treated = match rule.missing_data {
            MissingDataPolicy::Breaching => "Breaching",
            _ => "NonBreaching",
        };
        clauses.push(format!(
            "no datapoints were received for {} period{} and {} missing datapoint{} {} treated as [{}]",
            missing,
            plural(missing),
            missing,
            plural(missing),
            if missing == 1 { "was" } else { "were" },
            treated
        ));
    }

    Evaluation {
        state,
        reason: format!("Threshold Crossed: {}.", clauses.join(" and ")),
        breaching,
        missing,
    }
}

fn plural(n: u32) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn format_bucket(timestamp: i64) -> String {
    Utc.timestamp_millis_opt(timestamp)
        .single()
        .map(|t| t.format("%d/%m/%y %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Registry of runtime alarms and the loop that evaluates them
pub struct AlarmEvaluator {
    /// Alarms keyed by sanitized alarm name
    alarms: Arc<DashMap<String, Alarm>>,
    sink: Arc<dyn MetricSink>,
    notifier: Arc<Notifier>,
    namespace: String,
    rules: AlarmRules,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl AlarmEvaluator {
    pub fn new(
        namespace: impl Into<String>,
        rules: AlarmRules,
        sink: Arc<dyn MetricSink>,
        notifier: Arc<Notifier>,
    ) -> Result<Self, AlarmError> {
        rules.validate()?;
        Ok(Self {
            alarms: Arc::new(DashMap::new()),
            sink,
            notifier,
            namespace: namespace.into(),
            rules,
            shutdown_tx: Mutex::new(None),
        })
    }

    pub fn rules(&self) -> &AlarmRules {
        &self.rules
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Create the availability and latency alarms for a target.
    ///
    /// Registering the same target twice is a no-op. A different target whose
    /// name sanitizes to an existing alarm name is rejected.
    pub fn register_target(&self, target: &str) -> Result<Vec<String>, AlarmError> {
        let alarms: Vec<Alarm> = AlarmKind::ALL
            .iter()
            .map(|kind| Alarm::new(target, &self.namespace, self.rules.for_kind(*kind).clone()))
            .collect();

        for alarm in &alarms {
            if let Some(existing) = self.alarms.get(&alarm.name) {
                if existing.target != target {
                    return Err(AlarmError::NameCollision {
                        name: alarm.name.clone(),
                        existing: existing.target.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        let mut names = Vec::with_capacity(alarms.len());
        for alarm in alarms {
            names.push(alarm.name.clone());
            self.alarms.entry(alarm.name.clone()).or_insert_with(|| {
                tracing::debug!(alarm = %alarm.name, target = %alarm.target, "Alarm registered");
                alarm
            });
        }
        Ok(names)
    }

    /// Remove both alarms of a target. Returns the number removed.
    pub fn unregister_target(&self, target: &str) -> usize {
        let before = self.alarms.len();
        self.alarms.retain(|_, alarm| alarm.target != target);
        before - self.alarms.len()
    }

    pub fn get(&self, name: &str) -> Option<Alarm> {
        self.alarms.get(name).map(|a| a.clone())
    }

    /// All alarms, sorted by name
    pub fn list(&self) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = self.alarms.iter().map(|a| a.value().clone()).collect();
        alarms.sort_by(|a, b| a.name.cmp(&b.name));
        alarms
    }

    pub fn state_of(&self, target: &str, kind: AlarmKind) -> Option<AlarmState> {
        self.alarms
            .get(&alarm_name(kind, target))
            .filter(|a| a.target == target)
            .map(|a| a.state)
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    /// Evaluate every alarm once at `now` and notify subscribers.
    ///
    /// Returns one event per alarm whose metric query succeeded. Alarms whose
    /// backend query failed keep their state and produce no event.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<AlarmEvent> {
        let alarms: Vec<Alarm> = self.alarms.iter().map(|a| a.value().clone()).collect();

        let evaluations = alarms.iter().map(|alarm| self.evaluate_alarm(alarm, now));
        let evaluated: Vec<(AlarmKind, AlarmEvent)> = futures::future::join_all(evaluations)
            .await
            .into_iter()
            .flatten()
            .collect();

        // Each alarm's notifications go out independently of the others
        let deliveries = evaluated.iter().map(|(kind, event)| async move {
            if let Err(e) = self.notifier.publish(*kind, event).await {
                tracing::error!(
                    alarm = %event.alarm_name,
                    error = %e,
                    "Failed to send notification"
                );
            }
        });
        futures::future::join_all(deliveries).await;
        let events: Vec<AlarmEvent> = evaluated.into_iter().map(|(_, event)| event).collect();

        let in_alarm = events
            .iter()
            .filter(|e| e.new_state_value == AlarmState::Alarm)
            .count();
        tracing::info!(
            alarms = alarms.len(),
            evaluated = events.len(),
            in_alarm,
            "Alarm evaluation finished"
        );

        events
    }

    /// Evaluate one alarm against the latest complete period(s)
    async fn evaluate_alarm(
        &self,
        alarm: &Alarm,
        now: DateTime<Utc>,
    ) -> Option<(AlarmKind, AlarmEvent)> {
        let rule = &alarm.rule;
        let period_ms = rule.period_ms();
        let window_end = bucket_start(now.timestamp_millis(), period_ms);
        let window_start = window_end - rule.evaluation_periods as i64 * period_ms;

        let query = AggregateQuery {
            namespace: alarm.namespace.clone(),
            metric_name: rule.kind.metric_name(),
            dimensions: Dimensions::for_url(&alarm.target),
            start: window_start,
            end: window_end,
            period: rule.period,
            statistic: rule.statistic,
        };

        let datapoints = match self.sink.aggregate(&query).await {
            Ok(points) => points,
            Err(e) => {
                tracing::warn!(
                    alarm = %alarm.name,
                    state = %alarm.state,
                    error = %e,
                    "Metric backend query failed, keeping previous state"
                );
                if let Some(mut current) = self.alarms.get_mut(&alarm.name) {
                    current.last_error = Some(e.to_string());
                }
                return None;
            }
        };

        let evaluation = evaluate_window(rule, &datapoints, window_start);

        let mut current = self.alarms.get_mut(&alarm.name)?;
        let old_state = current.state;
        let now_ms = now.timestamp_millis();
        current.state = evaluation.state;
        current.state_reason = Some(evaluation.reason);
        current.last_evaluated = Some(now_ms);
        current.last_error = None;
        if old_state != evaluation.state {
            current.last_transition = Some(now_ms);
            tracing::info!(
                alarm = %current.name,
                from = %old_state,
                to = %evaluation.state,
                "Alarm state transition"
            );
        }

        Some((rule.kind, AlarmEvent::from_alarm(&current, old_state, now)))
    }

    /// Start ticking once per evaluation period.
    ///
    /// The first tick happens one full period after start so a fresh process
    /// does not judge a period it never probed.
    pub fn start(self: Arc<Self>, check_interval: Duration) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            tracing::info!(
                "Alarm evaluator started with interval {:?} for {} alarms",
                check_interval,
                self.len()
            );
            let first = tokio::time::Instant::now() + check_interval;
            let mut ticker = tokio::time::interval_at(first, check_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick(Utc::now()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Alarm evaluator shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the background loop
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.try_send(());
        }
    }
}
