//! SMTP adapter
//!
//! Sends through any SMTP relay using lettre. The message id travels in the
//! `X-Message-ID` header. SMTP exposes no webhook capability.

use crate::{MESSAGE_ID_HEADER, MailerError, SendEmailRequest};
use async_trait::async_trait;
use flowmail_core::models::{EmailProviderKind, ProviderSettings, SmtpSettings};
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Attachment as MessageAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::info;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection setup budget, seconds. `SMTP_DIAL_TIMEOUT` overrides the 30 s
/// default.
fn dial_timeout() -> Duration {
    std::env::var("SMTP_DIAL_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(DEFAULT_DIAL_TIMEOUT, Duration::from_secs)
}

/// SMTP relay adapter.
#[derive(Default)]
pub struct SmtpAdapter;

impl SmtpAdapter {
    pub fn new() -> Self {
        Self
    }

    fn validate(settings: &SmtpSettings) -> Result<(), MailerError> {
        if settings.host.trim().is_empty() {
            return Err(MailerError::ConfigMissing("smtp host is empty".into()));
        }
        if settings.port == 0 {
            return Err(MailerError::ConfigMissing("smtp port is zero".into()));
        }
        Ok(())
    }

    fn build_message(request: &SendEmailRequest) -> Result<Message, MailerError> {
        let from: Mailbox = match &request.from_name {
            Some(name) => format!("{name} <{}>", request.from_address).parse(),
            None => request.from_address.parse(),
        }
        .map_err(|e| MailerError::Payload(format!("invalid from address: {e}")))?;

        let to: Mailbox = request
            .to
            .parse()
            .map_err(|e| MailerError::Payload(format!("invalid to address: {e}")))?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(request.subject.clone());

        if let Some(reply_to) = &request.reply_to {
            builder = builder.reply_to(
                reply_to
                    .parse()
                    .map_err(|e| MailerError::Payload(format!("invalid reply-to address: {e}")))?,
            );
        }
        for cc in &request.cc {
            builder = builder.cc(cc
                .parse()
                .map_err(|e| MailerError::Payload(format!("invalid cc address: {e}")))?);
        }
        for bcc in &request.bcc {
            builder = builder.bcc(bcc
                .parse()
                .map_err(|e| MailerError::Payload(format!("invalid bcc address: {e}")))?);
        }

        let mut message = if request.attachments.is_empty() {
            builder
                .header(ContentType::TEXT_HTML)
                .body(request.content.clone())
                .map_err(|e| MailerError::Payload(format!("failed to build message: {e}")))?
        } else {
            let mut multipart = MultiPart::mixed().singlepart(SinglePart::html(request.content.clone()));
            for attachment in &request.attachments {
                let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                    MailerError::Payload(format!(
                        "invalid attachment content type {:?}: {e}",
                        attachment.content_type
                    ))
                })?;
                multipart = multipart.singlepart(
                    MessageAttachment::new(attachment.filename.clone())
                        .body(attachment.data.clone(), content_type),
                );
            }
            builder
                .multipart(multipart)
                .map_err(|e| MailerError::Payload(format!("failed to build message: {e}")))?
        };

        insert_raw_header(&mut message, MESSAGE_ID_HEADER, request.message_id.to_string())?;
        if let Some(url) = &request.list_unsubscribe_url {
            insert_raw_header(&mut message, "List-Unsubscribe", format!("<{url}>"))?;
            insert_raw_header(
                &mut message,
                "List-Unsubscribe-Post",
                "List-Unsubscribe=One-Click".to_string(),
            )?;
        }

        Ok(message)
    }
}

fn insert_raw_header(message: &mut Message, name: &str, value: String) -> Result<(), MailerError> {
    let name = HeaderName::new_from_ascii(name.to_string())
        .map_err(|e| MailerError::Payload(format!("invalid header name {name:?}: {e}")))?;
    message.headers_mut().insert_raw(HeaderValue::new(name, value));
    Ok(())
}

fn map_smtp_error(e: lettre::transport::smtp::Error) -> MailerError {
    if e.is_permanent() {
        MailerError::Api {
            status: 550,
            message: e.to_string(),
        }
    } else {
        MailerError::Transport(e.to_string())
    }
}

#[async_trait]
impl crate::EmailProvider for SmtpAdapter {
    fn kind(&self) -> EmailProviderKind {
        EmailProviderKind::Smtp
    }

    async fn send_email(&self, request: &SendEmailRequest) -> Result<(), MailerError> {
        let ProviderSettings::Smtp(settings) = &request.provider.settings else {
            return Err(MailerError::ConfigMissing(
                "integration has no smtp settings block".into(),
            ));
        };
        Self::validate(settings)?;

        let message = Self::build_message(request)?;

        let mut builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host).map_err(|e| {
                MailerError::ConfigMissing(format!("failed to create transport: {e}"))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };
        builder = builder.port(settings.port).timeout(Some(dial_timeout()));
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().clone(),
            ));
        }
        let transport = builder.build();

        transport.send(message).await.map_err(map_smtp_error)?;

        info!(message_id = %request.message_id, to = %request.to, "email sent via smtp");
        Ok(())
    }
}
