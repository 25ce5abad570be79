//! Outgoing mail seam used by the account flows.
//!
//! Delivery itself (SMTP, HTTP APIs) is not part of the engine. The engine
//! only builds the messages and hands them to a [`Mailer`]; a failed send is
//! logged and never fails the calling operation.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError>;
}

/// Mailer that only records the message in the log.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), MailError> {
        tracing::info!(to, subject, "mail delivery disabled, message dropped");
        Ok(())
    }
}

pub(crate) fn verification_email(app_url: &str, token: &str) -> (String, String) {
    let link = format!("{}/verify-email?token={token}", app_url.trim_end_matches('/'));
    let html = format!(
        "<p>Hi there,</p>\n\
         <p>Thanks for signing up for <strong>Mindoh</strong>! Please verify your email.</p>\n\
         <p><a href=\"{link}\">Verify Email</a></p>\n\
         <p>This link expires in 24 hours.</p>\n"
    );
    ("Verify your Mindoh email".to_string(), html)
}

pub(crate) fn password_reset_email(app_url: &str, token: &str) -> (String, String) {
    let link = format!("{}/reset-password?token={token}", app_url.trim_end_matches('/'));
    let html = format!(
        "<p>Hi,</p>\n\
         <p>We received a request to reset your <strong>Mindoh</strong> password.</p>\n\
         <p><a href=\"{link}\">Reset Password</a></p>\n\
         <p>This link expires in 1 hour. If you did not request it, ignore this email.</p>\n"
    );
    ("Reset your Mindoh password".to_string(), html)
}
