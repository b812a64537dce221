use crate::config::settings::Settings;
use crate::domain::model::JobStatus;
use crate::domain::ports::{Email, Notifier};
use chrono::Local;
use std::sync::Arc;

/// 每三位加逗號
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// 郵件通知。寄送失敗只回傳 false，不會中斷作業。
pub struct EmailService {
    notifier: Option<Arc<dyn Notifier>>,
    from: String,
    team: Vec<String>,
    signature: String,
    variance_threshold: f64,
}

impl EmailService {
    pub fn new(settings: &Settings, notifier: Option<Arc<dyn Notifier>>) -> Self {
        tracing::info!("📧 Email Service initialized");
        if notifier.is_none() {
            tracing::warn!("⚠️ SMTP not configured, email notifications are disabled");
        }
        Self {
            notifier,
            from: settings.email_from.clone(),
            team: settings.email_to_team.clone(),
            signature: settings.email_signature.clone(),
            variance_threshold: settings.data_variance_threshold,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    pub async fn send_email(
        &self,
        to: &[String],
        subject: &str,
        body: &str,
        from: Option<&str>,
    ) -> bool {
        let notifier = match &self.notifier {
            Some(notifier) => notifier,
            None => {
                tracing::warn!("⚠️ Email '{}' not sent: SMTP not configured", subject);
                return false;
            }
        };
        if to.is_empty() {
            tracing::warn!("⚠️ Email '{}' not sent: no recipients", subject);
            return false;
        }

        tracing::info!(
            "📤 Sending email: '{}' to {} recipient(s)",
            subject,
            to.len()
        );
        let email = Email {
            from: from.unwrap_or(&self.from).to_string(),
            to: to.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        };

        match notifier.send(&email).await {
            Ok(()) => {
                tracing::info!("✅ Email sent successfully");
                true
            }
            Err(e) => {
                tracing::error!("❌ Failed to send email: {}", e);
                false
            }
        }
    }

    pub async fn send_data_variance_alert(
        &self,
        variance_percentage: f64,
        job_name: &str,
        previous_count: u64,
        current_count: u64,
    ) -> bool {
        let subject = format!("🚨 Data Variance Alert - {}", job_name);
        let body = format!(
            "🚨 DATA VARIANCE ALERT - IMMEDIATE ATTENTION REQUIRED

Job: {job}
Timestamp: {ts}

📊 VARIANCE DETAILS:
Previous Count: {prev} rows
Current Count: {cur} rows
Variance: {variance:.2}%
Threshold: {threshold}%

⚠️ The data variance exceeds the configured threshold. Please investigate:
• Data source changes
• ETL logic modifications
• Data quality issues
• System performance problems

🔍 RECOMMENDED ACTIONS:
1. Review source data for anomalies
2. Check ETL logs for errors or warnings
3. Validate data transformation logic
4. Compare with historical patterns
5. Contact data engineering team if needed

This is an automated alert from the ETL monitoring system.
Please acknowledge receipt and provide status updates.

Best regards,
{signature}",
            job = job_name,
            ts = timestamp(),
            prev = format_count(previous_count),
            cur = format_count(current_count),
            variance = variance_percentage,
            threshold = self.variance_threshold,
            signature = self.signature,
        );

        self.send_email(&self.team, &subject, &body, None).await
    }

    pub async fn send_job_completion_notification(
        &self,
        job_name: &str,
        status: JobStatus,
        duration_seconds: f64,
        rows_processed: u64,
        error_message: Option<&str>,
    ) -> bool {
        let (emoji, body) = match status {
            JobStatus::Success => (
                "✅",
                format!(
                    "✅ JOB COMPLETED SUCCESSFULLY

Job: {job}
Status: {status}
Completion Time: {ts}
Duration: {duration:.2} seconds
Rows Processed: {rows}

The job executed without any issues.

Best regards,
{signature}",
                    job = job_name,
                    status = status,
                    ts = timestamp(),
                    duration = duration_seconds,
                    rows = format_count(rows_processed),
                    signature = self.signature,
                ),
            ),
            JobStatus::Failed => (
                "❌",
                format!(
                    "❌ JOB EXECUTION FAILED

Job: {job}
Status: {status}
Failure Time: {ts}
Duration: {duration:.2} seconds
Error: {error}

Please investigate the issue and take corrective action.

Best regards,
{signature}",
                    job = job_name,
                    status = status,
                    ts = timestamp(),
                    duration = duration_seconds,
                    error = error_message.unwrap_or("Unknown error"),
                    signature = self.signature,
                ),
            ),
        };

        let subject = format!("{} {} - {}", emoji, job_name, status);
        self.send_email(&self.team, &subject, &body, None).await
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::{EtlError, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Email>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, email: &Email) -> Result<()> {
            if self.fail {
                return Err(EtlError::NotificationError {
                    message: "connection refused".to_string(),
                });
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn settings() -> Settings {
        let env: HashMap<String, String> = [
            ("EMAIL_TO_DNA_TEAM", "team@example.com"),
            ("EMAIL_FROM", "etl@example.com"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Settings::from_sources(&env, &HashMap::new()).unwrap()
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1234567), "1,234,567");
    }

    #[tokio::test]
    async fn test_disabled_service_returns_false() {
        let service = EmailService::new(&settings(), None);
        assert!(!service.is_enabled());
        assert!(
            !service
                .send_email(&["x@example.com".to_string()], "s", "b", None)
                .await
        );
    }

    #[tokio::test]
    async fn test_variance_alert_goes_to_team() {
        let recorder = Arc::new(Recorder::default());
        let service = EmailService::new(&settings(), Some(recorder.clone()));

        assert!(service.send_data_variance_alert(25.0, "JCAP PA", 1000, 1250).await);
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent[0].to, vec!["team@example.com"]);
        assert_eq!(sent[0].from, "etl@example.com");
        assert_eq!(sent[0].subject, "🚨 Data Variance Alert - JCAP PA");
        assert!(sent[0].body.contains("Previous Count: 1,000 rows"));
        assert!(sent[0].body.contains("Variance: 25.00%"));
        assert!(sent[0].body.contains("Threshold: 10%"));
    }

    #[tokio::test]
    async fn test_completion_notifications() {
        let recorder = Arc::new(Recorder::default());
        let service = EmailService::new(&settings(), Some(recorder.clone()));

        assert!(
            service
                .send_job_completion_notification("Job", JobStatus::Failed, 1.5, 0, Some("boom"))
                .await
        );
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "❌ Job - Failed");
        assert!(sent[0].body.contains("Error: boom"));
    }

    #[tokio::test]
    async fn test_delivery_failure_returns_false() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let service = EmailService::new(&settings(), Some(recorder));
        assert!(!service.send_email(&["a@example.com".to_string()], "s", "b", None).await);
    }
}
