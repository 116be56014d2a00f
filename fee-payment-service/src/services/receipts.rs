//! Receipt rendering and receipt delivery.
//!
//! Both are external collaborators behind narrow contracts: the renderer
//! turns a completed record into an artifact reference, the sender delivers
//! it and reports a success flag. Delivery failure never reverses a
//! completed payment.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::SmtpConfig;
use crate::models::PaymentRecord;

#[async_trait]
pub trait ReceiptRenderer: Send + Sync {
    /// Renders a receipt for a completed record and returns an opaque
    /// artifact reference (a path or URL).
    async fn render(&self, record: &PaymentRecord) -> anyhow::Result<String>;
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Delivers the receipt to the record's student. Returns whether
    /// delivery succeeded; callers treat `false` as best-effort-only.
    async fn send_receipt(&self, record: &PaymentRecord, receipt_ref: &str) -> bool;
}

/// Writes plain-text receipts under a configured directory.
pub struct FileReceiptRenderer {
    dir: PathBuf,
}

impl FileReceiptRenderer {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn render_body(record: &PaymentRecord) -> String {
        let mut body = String::new();
        let _ = writeln!(body, "FEE PAYMENT RECEIPT");
        let _ = writeln!(body, "===================");
        let _ = writeln!(body, "Transaction: {}", record.transaction_id);
        let _ = writeln!(body, "Student:     {}", record.student_id);
        let _ = writeln!(body, "College:     {}", record.college_id);
        let _ = writeln!(body, "Department:  {}", record.department_id);
        if let Some(plan) = &record.installment {
            let _ = writeln!(body, "Installment: {} of {}", plan.number, plan.total);
            let _ = writeln!(
                body,
                "Remaining:   {} {}",
                record.currency, plan.remaining_amount
            );
        }
        let _ = writeln!(body, "-------------------");
        for line in &record.fee_details {
            let _ = writeln!(body, "{:<12} {} {}", line.fee_type, record.currency, line.amount);
        }
        let _ = writeln!(body, "-------------------");
        let _ = writeln!(
            body,
            "TOTAL PAID   {} {}",
            record.currency, record.amount_paid
        );
        let _ = writeln!(body, "Date:        {}", record.updated_at);
        body
    }
}

#[async_trait]
impl ReceiptRenderer for FileReceiptRenderer {
    async fn render(&self, record: &PaymentRecord) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(format!("receipt_{}.txt", record.transaction_id));
        tokio::fs::write(&path, Self::render_body(record)).await?;

        tracing::info!(payment_id = %record.id, path = %path.display(), "receipt rendered");
        Ok(path.display().to_string())
    }
}

/// SMTP delivery via lettre. Built only when SMTP is enabled in config.
pub struct SmtpNotifier {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> anyhow::Result<Self> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Self { config, transport })
    }

    fn build_message(&self, record: &PaymentRecord, receipt_ref: &str) -> anyhow::Result<Message> {
        let email = record
            .student_email
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no student email on record"))?;

        let from: Mailbox =
            format!("{} <{}>", self.config.from_name, self.config.from_email).parse()?;
        let to: Mailbox = match record.student_name.as_deref() {
            Some(name) => format!("{} <{}>", name, email).parse()?,
            None => email.parse()?,
        };

        let body = format!(
            "Dear student,\n\nYour fee payment of {} {} was received.\n\
             Transaction: {}\nReceipt: {}\n\nRegards,\nAccounts Office\n",
            record.currency, record.amount_paid, record.transaction_id, receipt_ref
        );

        Ok(Message::builder()
            .from(from)
            .to(to)
            .subject(format!("Fee payment receipt {}", record.transaction_id))
            .header(ContentType::TEXT_PLAIN)
            .body(body)?)
    }
}

#[async_trait]
impl NotificationSender for SmtpNotifier {
    async fn send_receipt(&self, record: &PaymentRecord, receipt_ref: &str) -> bool {
        let message = match self.build_message(record, receipt_ref) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(payment_id = %record.id, error = %err, "receipt email not built");
                return false;
            }
        };

        match self.transport.send(message).await {
            Ok(_) => {
                tracing::info!(payment_id = %record.id, "receipt email sent");
                true
            }
            Err(err) => {
                tracing::warn!(payment_id = %record.id, error = %err, "receipt email failed");
                false
            }
        }
    }
}

/// Stand-in sender for tests and SMTP-less environments.
pub struct MockNotifier {
    succeed: bool,
    sent: AtomicU64,
}

impl MockNotifier {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed,
            sent: AtomicU64::new(0),
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl NotificationSender for MockNotifier {
    async fn send_receipt(&self, record: &PaymentRecord, receipt_ref: &str) -> bool {
        if self.succeed {
            self.sent.fetch_add(1, Ordering::SeqCst);
            tracing::info!(
                payment_id = %record.id,
                receipt = %receipt_ref,
                "[MOCK] receipt email would be sent"
            );
        }
        self.succeed
    }
}
