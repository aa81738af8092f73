use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;

use super::{load_attachments, LoadedAttachment, Notification, Notifier};
use crate::config::SendGridSettings;
use crate::error::{truncate_body, DeliveryError};

/// SendGrid v3 `mail/send` request body.
#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: EmailAddress<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
    attachments: Vec<EncodedAttachment>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<EmailAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    mime_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct EncodedAttachment {
    content: String,
    #[serde(rename = "type")]
    mime_type: &'static str,
    filename: String,
    disposition: &'static str,
}

fn build_request(notification: &Notification, attachments: Vec<LoadedAttachment>) -> MailSendRequest<'_> {
    MailSendRequest {
        personalizations: vec![Personalization {
            to: notification
                .to
                .iter()
                .map(|email| EmailAddress { email })
                .collect(),
        }],
        from: EmailAddress { email: &notification.from },
        subject: &notification.subject,
        content: vec![Content {
            mime_type: "text/plain",
            value: &notification.body,
        }],
        attachments: attachments
            .into_iter()
            .map(|attachment| EncodedAttachment {
                content: STANDARD.encode(&attachment.content),
                mime_type: "text/csv",
                filename: attachment.file_name,
                disposition: "attachment",
            })
            .collect(),
    }
}

/// Delivery through SendGrid's HTTP API.
pub struct SendGridNotifier {
    http: Client,
    api_key: String,
    api_url: String,
}

impl SendGridNotifier {
    pub fn new(settings: &SendGridSettings, timeout: Duration) -> Result<Self, DeliveryError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, settings))
    }

    pub fn with_client(http: Client, settings: &SendGridSettings) -> Self {
        Self {
            http,
            api_key: settings.api_key.clone(),
            api_url: settings.api_url.clone(),
        }
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let attachments = load_attachments(&notification.attachments).await?;
        let payload = build_request(notification, attachments);

        tracing::info!(url = %self.api_url, recipients = notification.to.len(), "Sending mail via SendGrid");
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "[Failed to read response body]".to_string());
            return Err(DeliveryError::Api {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        tracing::debug!(status = %status, "SendGrid accepted message");
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "sendgrid"
    }
}
