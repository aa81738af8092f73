// Mail delivery of the finished CSV. The run only sees the `Notifier` trait;
// which transport sits behind it is decided once from configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::TransportConfig;
use crate::error::DeliveryError;

mod sendgrid;
mod smtp;

pub use sendgrid::SendGridNotifier;
pub use smtp::SmtpNotifier;

/// One outgoing email.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
    pub from: String,
    pub to: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers the notification or fails; nothing is dropped silently.
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;

    /// Transport name for logging
    fn transport_name(&self) -> &'static str;
}

/// Picks the transport named by the configuration.
pub fn from_config(transport: &TransportConfig, timeout: Duration) -> Result<Box<dyn Notifier>, DeliveryError> {
    let notifier: Box<dyn Notifier> = match transport {
        TransportConfig::Smtp(settings) => Box::new(SmtpNotifier::new(settings, timeout)?),
        TransportConfig::SendGrid(settings) => Box::new(SendGridNotifier::new(settings, timeout)?),
    };
    tracing::info!(transport = notifier.transport_name(), "Mail transport selected");
    Ok(notifier)
}

/// A file ready to be attached: its base name and contents.
#[derive(Debug)]
pub(crate) struct LoadedAttachment {
    pub file_name: String,
    pub content: Vec<u8>,
}

pub(crate) async fn load_attachments(paths: &[PathBuf]) -> Result<Vec<LoadedAttachment>, DeliveryError> {
    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| DeliveryError::Attachment { path: path.clone(), source })?;
        loaded.push(LoadedAttachment {
            file_name: file_name_of(path),
            content,
        });
    }
    Ok(loaded)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment.csv".to_string())
}
