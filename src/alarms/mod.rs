//! Threshold alarms over probe metrics
//!
//! Every target gets an availability and a latency alarm. Each alarm is an
//! independent OK / ALARM / INSUFFICIENT_DATA state machine evaluated once
//! per period, and every evaluation is fanned out through the [`Notifier`].

pub mod config;
pub mod evaluator;
pub mod event;
pub mod notifier;

pub use config::{
    alarm_name, Alarm, AlarmKind, AlarmRule, AlarmRules, AlarmState, ComparisonOperator,
    MissingDataPolicy,
};
pub use evaluator::{evaluate_window, AlarmEvaluator, Evaluation};
pub use event::{AlarmEvent, DimensionPair, Trigger};
pub use notifier::{
    AlarmSubscriber, EmailSubscriber, LogSubscriber, Notifier, NotifierError, WebhookSubscriber,
};

#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    #[error("Invalid alarm rule: {0}")]
    InvalidRule(String),

    #[error("Alarm name '{name}' for {target} collides with {existing}")]
    NameCollision {
        name: String,
        existing: String,
        target: String,
    },
}
