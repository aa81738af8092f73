use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{load_attachments, LoadedAttachment, Notification, Notifier};
use crate::config::{SmtpSecurity, SmtpSettings};
use crate::error::DeliveryError;

/// Authenticated SMTP relay, either upgraded with STARTTLS or on an
/// implicit TLS port.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings, timeout: Duration) -> Result<Self, DeliveryError> {
        let builder = match settings.security {
            SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?,
            SmtpSecurity::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?,
        };
        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(settings.username.clone(), settings.password.clone()))
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            transport,
            host: settings.host.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let attachments = load_attachments(&notification.attachments).await?;
        let message = build_message(notification, attachments)?;

        tracing::info!(host = %self.host, recipients = notification.to.len(), "Sending mail via SMTP relay");
        let response = self.transport.send(message).await?;
        tracing::debug!(code = %response.code(), "SMTP relay accepted message");
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "smtp"
    }
}

fn mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address.parse().map_err(|source| DeliveryError::Address {
        address: address.to_string(),
        source,
    })
}

/// Plain-text body followed by one `text/csv` part per attachment.
fn build_message(notification: &Notification, attachments: Vec<LoadedAttachment>) -> Result<Message, DeliveryError> {
    let mut builder = Message::builder()
        .from(mailbox(&notification.from)?)
        .subject(notification.subject.clone());
    for recipient in &notification.to {
        builder = builder.to(mailbox(recipient)?);
    }

    let csv_type = ContentType::parse("text/csv").map_err(|e| DeliveryError::ContentType(e.to_string()))?;
    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(notification.body.clone()));
    for attachment in attachments {
        parts = parts.singlepart(Attachment::new(attachment.file_name).body(attachment.content, csv_type.clone()));
    }

    Ok(builder.multipart(parts)?)
}
