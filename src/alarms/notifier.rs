//! Fan-out of alarm notifications to subscribers

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::config::AlarmKind;
use super::event::AlarmEvent;

/// Receiver of alarm notifications
#[async_trait]
pub trait AlarmSubscriber: Send + Sync {
    /// Subscriber name for logs
    fn name(&self) -> &str;

    /// Deliver one notification. `message` is the JSON form of `event`.
    async fn deliver(&self, event: &AlarmEvent, message: &str) -> Result<(), NotifierError>;
}

/// Notification bus with one topic per alarm kind
pub struct Notifier {
    topics: RwLock<HashMap<AlarmKind, Vec<Arc<dyn AlarmSubscriber>>>>,
    max_attempts: u32,
    retry_backoff: Duration,
    /// Upper bound on one delivery attempt
    delivery_timeout: Duration,
}

impl Notifier {
    /// Create a new notifier
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            delivery_timeout: Duration::from_secs(15),
        }
    }

    /// Set redelivery attempts per subscriber (at least one)
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Subscribe to notifications of one alarm kind
    pub fn subscribe(&self, kind: AlarmKind, subscriber: Arc<dyn AlarmSubscriber>) {
        tracing::info!(topic = %kind, subscriber = subscriber.name(), "Subscriber added");
        self.topics.write().entry(kind).or_default().push(subscriber);
    }

    /// Subscribe to every topic
    pub fn subscribe_all(&self, subscriber: Arc<dyn AlarmSubscriber>) {
        for kind in AlarmKind::ALL {
            self.subscribe(kind, Arc::clone(&subscriber));
        }
    }

    pub fn subscriber_count(&self, kind: AlarmKind) -> usize {
        self.topics.read().get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Publish an event to every subscriber of its topic.
    ///
    /// Subscribers are delivered independently; a failing subscriber is retried
    /// and never blocks the others. Returns the number of successful deliveries.
    pub async fn publish(
        &self,
        kind: AlarmKind,
        event: &AlarmEvent,
    ) -> Result<usize, NotifierError> {
        let message = event
            .to_message()
            .map_err(|e| NotifierError::Serialization(e.to_string()))?;

        let subscribers: Vec<Arc<dyn AlarmSubscriber>> = self
            .topics
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        if subscribers.is_empty() {
            tracing::debug!(alarm = %event.alarm_name, topic = %kind, "No subscribers");
            return Ok(0);
        }

        let deliveries = subscribers
            .iter()
            .map(|s| self.deliver_with_retry(s.as_ref(), event, &message));
        let results = futures::future::join_all(deliveries).await;

        let total = results.len();
        let errors: Vec<NotifierError> = results.into_iter().filter_map(Result::err).collect();

        if errors.is_empty() {
            Ok(total)
        } else {
            Err(NotifierError::Multiple(errors))
        }
    }

    async fn deliver_with_retry(
        &self,
        subscriber: &dyn AlarmSubscriber,
        event: &AlarmEvent,
        message: &str,
    ) -> Result<(), NotifierError> {
        let mut attempt = 1;
        loop {
            let attempt_result =
                tokio::time::timeout(self.delivery_timeout, subscriber.deliver(event, message))
                    .await
                    .unwrap_or(Err(NotifierError::Timeout(self.delivery_timeout)));
            match attempt_result {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::error!(
                        alarm = %event.alarm_name,
                        subscriber = subscriber.name(),
                        attempts = attempt,
                        error = %e,
                        "Failed to deliver alarm notification"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        alarm = %event.alarm_name,
                        subscriber = subscriber.name(),
                        attempt,
                        error = %e,
                        "Alarm notification delivery failed, retrying"
                    );
                    let jitter_ms =
                        rand::thread_rng().gen_range(0..=self.retry_backoff.as_millis() as u64 / 2);
                    let delay = self.retry_backoff * attempt + Duration::from_millis(jitter_ms);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes notifications to the tracing log
pub struct LogSubscriber;

#[async_trait]
impl AlarmSubscriber for LogSubscriber {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &AlarmEvent, _message: &str) -> Result<(), NotifierError> {
        if event.is_transition() {
            tracing::warn!(
                alarm = %event.alarm_name,
                old_state = %event.old_state_value,
                new_state = %event.new_state_value,
                "Alarm state changed: {}",
                event.new_state_reason
            );
        } else {
            tracing::info!(
                alarm = %event.alarm_name,
                state = %event.new_state_value,
                "Alarm state confirmed: {}",
                event.new_state_reason
            );
        }
        Ok(())
    }
}

/// POSTs the JSON notification to an HTTP endpoint
pub struct WebhookSubscriber {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
}

impl WebhookSubscriber {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Per-request timeout, covering connect and response
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl AlarmSubscriber for WebhookSubscriber {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, event: &AlarmEvent, message: &str) -> Result<(), NotifierError> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(message.to_string());

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            NotifierError::Webhook(format!("Failed to send webhook: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(
            alarm = %event.alarm_name,
            url = %self.url,
            "Webhook notification sent"
        );

        Ok(())
    }
}

/// Alert email destination. Mail transport is outside this service, so
/// notifications addressed here are logged for the relay to pick up.
pub struct EmailSubscriber {
    to: String,
}

impl EmailSubscriber {
    pub fn new(to: impl Into<String>) -> Self {
        Self { to: to.into() }
    }

    pub fn recipient(&self) -> &str {
        &self.to
    }
}

#[async_trait]
impl AlarmSubscriber for EmailSubscriber {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, event: &AlarmEvent, _message: &str) -> Result<(), NotifierError> {
        if self.to.trim().is_empty() || !self.to.contains('@') {
            return Err(NotifierError::Email(format!("invalid recipient '{}'", self.to)));
        }
        tracing::info!(
            alarm = %event.alarm_name,
            recipient = %self.to,
            state = %event.new_state_value,
            "Email notification queued: {}",
            event.alarm_description
        );
        Ok(())
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Subscriber error: {0}")]
    Subscriber(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<NotifierError>),
}
