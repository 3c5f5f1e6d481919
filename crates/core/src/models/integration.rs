//! Email provider integrations
//!
//! An integration is a tagged configuration for one email vendor. The mailer
//! dispatches on the kind tag; each adapter validates its own settings block.

use crate::types::{IntegrationId, WorkspaceId};
use secrecy::Secret;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Supported email vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "email_provider_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmailProviderKind {
    Smtp,
    Ses,
    Sparkpost,
    Postmark,
    Mailgun,
    Mailjet,
}

impl EmailProviderKind {
    pub const ALL: [EmailProviderKind; 6] = [
        EmailProviderKind::Smtp,
        EmailProviderKind::Ses,
        EmailProviderKind::Sparkpost,
        EmailProviderKind::Postmark,
        EmailProviderKind::Mailgun,
        EmailProviderKind::Mailjet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmailProviderKind::Smtp => "smtp",
            EmailProviderKind::Ses => "ses",
            EmailProviderKind::Sparkpost => "sparkpost",
            EmailProviderKind::Postmark => "postmark",
            EmailProviderKind::Mailgun => "mailgun",
            EmailProviderKind::Mailjet => "mailjet",
        }
    }
}

impl fmt::Display for EmailProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smtp" => Ok(EmailProviderKind::Smtp),
            "ses" => Ok(EmailProviderKind::Ses),
            "sparkpost" => Ok(EmailProviderKind::Sparkpost),
            "postmark" => Ok(EmailProviderKind::Postmark),
            "mailgun" => Ok(EmailProviderKind::Mailgun),
            "mailjet" => Ok(EmailProviderKind::Mailjet),
            other => Err(CoreError::UnknownProviderKind(other.to_string())),
        }
    }
}

fn default_true() -> bool {
    true
}

/// SMTP relay settings
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<Secret<String>>,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

/// Amazon SES settings
#[derive(Debug, Clone, Deserialize)]
pub struct SesSettings {
    pub region: String,
    pub access_key: String,
    pub secret_key: Secret<String>,
}

/// SparkPost settings
#[derive(Debug, Clone, Deserialize)]
pub struct SparkpostSettings {
    pub api_key: Secret<String>,
    #[serde(default)]
    pub sandbox: bool,
    /// API base, overridable for the EU region
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Postmark settings
#[derive(Debug, Clone, Deserialize)]
pub struct PostmarkSettings {
    pub server_token: Secret<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Mailgun settings
#[derive(Debug, Clone, Deserialize)]
pub struct MailgunSettings {
    pub api_key: Secret<String>,
    pub domain: String,
    /// "us" (default) or "eu"
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Mailjet settings
#[derive(Debug, Clone, Deserialize)]
pub struct MailjetSettings {
    pub api_key: Secret<String>,
    pub secret_key: Secret<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Provider-specific settings, tagged by kind
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderSettings {
    Smtp(SmtpSettings),
    Ses(SesSettings),
    Sparkpost(SparkpostSettings),
    Postmark(PostmarkSettings),
    Mailgun(MailgunSettings),
    Mailjet(MailjetSettings),
}

impl ProviderSettings {
    pub fn kind(&self) -> EmailProviderKind {
        match self {
            ProviderSettings::Smtp(_) => EmailProviderKind::Smtp,
            ProviderSettings::Ses(_) => EmailProviderKind::Ses,
            ProviderSettings::Sparkpost(_) => EmailProviderKind::Sparkpost,
            ProviderSettings::Postmark(_) => EmailProviderKind::Postmark,
            ProviderSettings::Mailgun(_) => EmailProviderKind::Mailgun,
            ProviderSettings::Mailjet(_) => EmailProviderKind::Mailjet,
        }
    }
}

/// A verified sender identity on an integration
#[derive(Debug, Clone, Deserialize)]
pub struct SenderIdentity {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A configured email provider owned by a workspace
#[derive(Debug, Clone, Deserialize)]
pub struct EmailIntegration {
    pub id: IntegrationId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub settings: ProviderSettings,
    #[serde(default)]
    pub senders: Vec<SenderIdentity>,
}

impl EmailIntegration {
    pub fn kind(&self) -> EmailProviderKind {
        self.settings.kind()
    }
}
