//! Flowmail Mailer - provider dispatch for outbound email
//!
//! Hides per-vendor differences behind a uniform send / register-webhook
//! contract. The dispatcher routes on the integration's provider kind; each
//! adapter validates its own settings block and translates the request to
//! the vendor wire call.

pub mod dispatcher;
pub mod mailgun;
pub mod mailjet;
pub mod postmark;
pub mod ses;
pub mod smtp;
pub mod sparkpost;

pub use dispatcher::ProviderDispatcher;
pub use mailgun::MailgunAdapter;
pub use mailjet::MailjetAdapter;
pub use postmark::PostmarkAdapter;
pub use ses::SesAdapter;
pub use smtp::SmtpAdapter;
pub use sparkpost::SparkpostAdapter;

use async_trait::async_trait;
use flowmail_core::models::{EmailIntegration, EmailProviderKind};
use flowmail_core::types::{IntegrationId, MessageId, WorkspaceId};
use thiserror::Error;

/// Metadata key carrying the message id through HTTP provider APIs, echoed
/// back in their delivery events. The exact name is part of the webhook
/// contract and must not change.
pub const MESSAGE_ID_METADATA_FIELD: &str = "notifuse_message_id";

/// Header carrying the message id over SMTP.
pub const MESSAGE_ID_HEADER: &str = "X-Message-ID";

/// Uniform send request handed to every adapter.
#[derive(Debug, Clone)]
pub struct SendEmailRequest {
    pub workspace_id: WorkspaceId,
    pub integration_id: IntegrationId,
    pub message_id: MessageId,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to: String,
    pub subject: String,
    /// Compiled HTML document
    pub content: String,
    /// The integration whose kind selects the adapter
    pub provider: EmailIntegration,
    pub reply_to: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    /// When set, adapters add the RFC-8058 one-click unsubscribe headers
    pub list_unsubscribe_url: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// File attached to an outbound message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Typed mailer failures, split along the retry taxonomy.
#[derive(Debug, Error)]
pub enum MailerError {
    /// Settings block absent or rejected before any I/O. Never retried.
    #[error("provider configuration missing or invalid: {0}")]
    ConfigMissing(String),

    /// Network-level failure or provider 5xx. Retried with backoff.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Credentials rejected by the provider.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Provider 4xx with its response body.
    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request could not be translated to the vendor wire format.
    #[error("invalid payload: {0}")]
    Payload(String),

    /// The provider kind exposes no webhook capability.
    #[error("webhooks are not supported by the {0} provider")]
    WebhooksUnsupported(EmailProviderKind),
}

/// Email events a webhook subscription can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmailEventKind {
    Delivered,
    Bounce,
    Complaint,
}

impl EmailEventKind {
    pub const ALL: [EmailEventKind; 3] = [
        EmailEventKind::Delivered,
        EmailEventKind::Bounce,
        EmailEventKind::Complaint,
    ];
}

/// Result of registering a webhook subscription with a vendor.
#[derive(Debug, Clone)]
pub struct WebhookRegistration {
    pub endpoint_id: Option<String>,
    pub callback_url: String,
    pub events: Vec<EmailEventKind>,
}

/// Current state of a vendor-side webhook subscription.
#[derive(Debug, Clone, Default)]
pub struct WebhookStatus {
    pub registered: bool,
    pub endpoint_id: Option<String>,
    pub events: Vec<EmailEventKind>,
}

/// Build the callback URL a vendor posts events to. The format is part of
/// the public webhook contract.
pub fn webhook_callback_url(
    base_url: &str,
    kind: EmailProviderKind,
    workspace_id: &WorkspaceId,
    integration_id: &IntegrationId,
) -> String {
    format!(
        "{}/webhooks/email/{}?workspace_id={}&integration_id={}",
        base_url.trim_end_matches('/'),
        kind,
        workspace_id,
        integration_id
    )
}

/// Uniform send capability, one implementation per vendor.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn kind(&self) -> EmailProviderKind;

    async fn send_email(&self, request: &SendEmailRequest) -> Result<(), MailerError>;
}

/// Optional webhook management capability.
#[async_trait]
pub trait WebhookProvider: Send + Sync {
    /// Create or update the subscription for `callback_url`. Registering the
    /// same target twice reuses the existing subscription.
    async fn register_webhooks(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
        events: &[EmailEventKind],
    ) -> Result<WebhookRegistration, MailerError>;

    async fn get_webhook_status(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
    ) -> Result<WebhookStatus, MailerError>;

    async fn unregister_webhooks(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
    ) -> Result<(), MailerError>;
}

/// Shared HTTP client for the API adapters.
pub(crate) fn http_client() -> Result<reqwest::Client, MailerError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| MailerError::ConfigMissing(format!("failed to build HTTP client: {e}")))
}

/// Map a reqwest transport failure.
pub(crate) fn transport_error(e: reqwest::Error) -> MailerError {
    MailerError::Transport(e.to_string())
}

/// Map a non-success provider response along the error taxonomy.
pub(crate) async fn error_from_response(response: reqwest::Response) -> MailerError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => MailerError::Auth(format!("{status}: {message}")),
        s if status.is_server_error() => {
            MailerError::Transport(format!("provider returned {s}: {message}"))
        }
        s => MailerError::Api { status: s, message },
    }
}
