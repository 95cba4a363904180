use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::SmtpConfig;

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
}

/// Fire-and-forget delivery. Callers never roll back on failure.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let mailer = if config.user.is_empty() {
            SmtpTransport::builder_dangerous(&config.host)
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        } else {
            let creds = Credentials::new(config.user.clone(), config.password.clone());
            SmtpTransport::starttls_relay(&config.host)
                .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?
                .credentials(creds)
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        };

        tracing::info!(host = %config.host, port = config.port, "SMTP notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl NotificationSink for SmtpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(notification.to.parse()?)
            .subject(notification.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(notification.plain_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(notification.html_body.clone()),
                    ),
            )?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email)).await??;

        tracing::info!(to = %notification.to, subject = %notification.subject, "Email sent");
        Ok(())
    }
}

/// Keeps every notification in memory. Optionally reports failure after
/// recording, to exercise the best-effort paths.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<Notification> {
        self.sent().into_iter().filter(|n| n.to == to).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        if self.fail {
            anyhow::bail!("delivery disabled");
        }
        Ok(())
    }
}

/// Sends through a sink with a deadline, logging and counting failures
/// instead of returning them.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub async fn send(&self, notification: Notification) {
        let outcome = tokio::time::timeout(self.timeout, self.sink.notify(&notification)).await;
        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.timeout),
        };

        metrics::counter!("notifications_failed_total").increment(1);
        tracing::warn!(
            to = %notification.to,
            subject = %notification.subject,
            error = %error,
            "Notification not delivered"
        );
    }
}

pub mod templates {
    use super::*;

    pub fn verification_code(to: &str, name: &str, code: &str, window_minutes: i64) -> Notification {
        Notification {
            to: to.to_string(),
            subject: "Verify your email address".to_string(),
            plain_body: format!(
                "Hello {},\n\nYour verification code is {}.\n\nIt expires in {} minutes.",
                name, code, window_minutes
            ),
            html_body: format!(
                r#"<html><body style="font-family: Arial, sans-serif;">
<h2>Hello {},</h2>
<p>Your verification code is <strong>{}</strong>.</p>
<p style="color: #666; font-size: 12px;">It expires in {} minutes.</p>
</body></html>"#,
                name, code, window_minutes
            ),
        }
    }

    pub fn password_reset(to: &str, name: &str, code: &str, window_minutes: i64) -> Notification {
        Notification {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            plain_body: format!(
                "Hello {},\n\nUse the code {} to reset your password.\n\nIt expires in {} minutes. If you did not ask for this, ignore this email.",
                name, code, window_minutes
            ),
            html_body: format!(
                r#"<html><body style="font-family: Arial, sans-serif;">
<h2>Hello {},</h2>
<p>Use the code <strong>{}</strong> to reset your password.</p>
<p style="color: #666; font-size: 12px;">It expires in {} minutes. If you did not ask for this, ignore this email.</p>
</body></html>"#,
                name, code, window_minutes
            ),
        }
    }

    pub fn access_requested(
        to: &str,
        owner_name: &str,
        company_name: &str,
        resource_name: &str,
        purpose: &str,
        duration_hours: i64,
    ) -> Notification {
        Notification {
            to: to.to_string(),
            subject: format!("{} requested access to {}", company_name, resource_name),
            plain_body: format!(
                "Hello {},\n\n{} asked to access \"{}\" for {} hours.\n\nPurpose: {}\n\nSign in to approve or decline.",
                owner_name, company_name, resource_name, duration_hours, purpose
            ),
            html_body: format!(
                r#"<html><body style="font-family: Arial, sans-serif;">
<h2>Hello {},</h2>
<p><strong>{}</strong> asked to access <strong>{}</strong> for {} hours.</p>
<p>Purpose: {}</p>
<p>Sign in to approve or decline.</p>
</body></html>"#,
                owner_name, company_name, resource_name, duration_hours, purpose
            ),
        }
    }

    pub fn access_decided(
        to: &str,
        contact_name: &str,
        resource_name: &str,
        decision: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Notification {
        let until = expires_at
            .map(|exp| format!(" Access is valid until {}.", exp.to_rfc3339()))
            .unwrap_or_default();
        Notification {
            to: to.to_string(),
            subject: format!("Your request for {} was {}", resource_name, decision),
            plain_body: format!(
                "Hello {},\n\nYour request to access \"{}\" was {}.{}",
                contact_name, resource_name, decision, until
            ),
            html_body: format!(
                r#"<html><body style="font-family: Arial, sans-serif;">
<h2>Hello {},</h2>
<p>Your request to access <strong>{}</strong> was {}.{}</p>
</body></html>"#,
                contact_name, resource_name, decision, until
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StallingSink;

    #[async_trait]
    impl NotificationSink for StallingSink {
        async fn notify(&self, _notification: &Notification) -> Result<(), anyhow::Error> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[test]
    fn test_verification_template_states_configured_window() {
        let message = templates::verification_code("a@x.com", "Alice", "123456", 15);
        assert!(message.plain_body.contains("123456"));
        assert!(message.plain_body.contains("15 minutes"));
        assert!(message.html_body.contains("15 minutes"));
    }

    #[tokio::test]
    async fn test_failing_sink_is_swallowed() {
        let sink = Arc::new(RecordingNotifier::failing());
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(1));

        notifier
            .send(templates::verification_code("a@x.com", "Alice", "123456", 15))
            .await;

        assert_eq!(sink.sent_to("a@x.com").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_is_bounded() {
        let notifier = Notifier::new(Arc::new(StallingSink), Duration::from_secs(5));
        let started = tokio::time::Instant::now();

        notifier
            .send(templates::password_reset("a@x.com", "Alice", "654321", 15))
            .await;

        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
