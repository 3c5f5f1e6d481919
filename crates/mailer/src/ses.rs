//! Amazon SES adapter
//!
//! Sends through the SESv2 API with static credentials from the integration
//! settings. The message id travels as an email tag. SES exposes no webhook
//! capability here: its event plumbing is SNS-based and lives outside the
//! adapter contract.

use crate::{EmailProvider, MESSAGE_ID_METADATA_FIELD, MailerError, SendEmailRequest};
use async_trait::async_trait;
use aws_sdk_sesv2::Client;
use aws_sdk_sesv2::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_sesv2::error::SdkError;
use aws_sdk_sesv2::types::{
    Body, Content, Destination, EmailContent, Message, MessageHeader, MessageTag,
};
use flowmail_core::models::{EmailProviderKind, ProviderSettings, SesSettings};
use secrecy::ExposeSecret;
use tracing::info;

/// SESv2 adapter.
#[derive(Default)]
pub struct SesAdapter;

impl SesAdapter {
    pub fn new() -> Self {
        Self
    }

    fn validate(settings: &SesSettings) -> Result<(), MailerError> {
        if settings.region.trim().is_empty() {
            return Err(MailerError::ConfigMissing("ses region is empty".into()));
        }
        if settings.access_key.is_empty() || settings.secret_key.expose_secret().is_empty() {
            return Err(MailerError::ConfigMissing("ses credentials are empty".into()));
        }
        Ok(())
    }

    fn client(settings: &SesSettings) -> Client {
        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.expose_secret().clone(),
            None,
            None,
            "flowmail-integration",
        );
        let config = aws_sdk_sesv2::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .build();
        Client::from_conf(config)
    }

    fn utf8(data: &str) -> Result<Content, MailerError> {
        Content::builder()
            .data(data)
            .charset("UTF-8")
            .build()
            .map_err(|e| MailerError::Payload(format!("failed to build content: {e}")))
    }
}

#[async_trait]
impl EmailProvider for SesAdapter {
    fn kind(&self) -> EmailProviderKind {
        EmailProviderKind::Ses
    }

    async fn send_email(&self, request: &SendEmailRequest) -> Result<(), MailerError> {
        let ProviderSettings::Ses(settings) = &request.provider.settings else {
            return Err(MailerError::ConfigMissing(
                "integration has no ses settings block".into(),
            ));
        };
        Self::validate(settings)?;

        let client = Self::client(settings);

        let destination = Destination::builder()
            .to_addresses(&request.to)
            .set_cc_addresses((!request.cc.is_empty()).then(|| request.cc.clone()))
            .set_bcc_addresses((!request.bcc.is_empty()).then(|| request.bcc.clone()))
            .build();

        let body = Body::builder().html(Self::utf8(&request.content)?).build();
        let mut message = Message::builder()
            .subject(Self::utf8(&request.subject)?)
            .body(body);
        if let Some(url) = &request.list_unsubscribe_url {
            message = message
                .headers(
                    MessageHeader::builder()
                        .name("List-Unsubscribe")
                        .value(format!("<{url}>"))
                        .build()
                        .map_err(|e| MailerError::Payload(format!("failed to build header: {e}")))?,
                )
                .headers(
                    MessageHeader::builder()
                        .name("List-Unsubscribe-Post")
                        .value("List-Unsubscribe=One-Click")
                        .build()
                        .map_err(|e| MailerError::Payload(format!("failed to build header: {e}")))?,
                );
        }

        let from = match &request.from_name {
            Some(name) => format!("{name} <{}>", request.from_address),
            None => request.from_address.clone(),
        };

        let mut send = client
            .send_email()
            .from_email_address(from)
            .destination(destination)
            .content(EmailContent::builder().simple(message.build()).build())
            .email_tags(
                MessageTag::builder()
                    .name(MESSAGE_ID_METADATA_FIELD)
                    .value(request.message_id.to_string())
                    .build()
                    .map_err(|e| MailerError::Payload(format!("failed to build tag: {e}")))?,
            );
        if let Some(reply_to) = &request.reply_to {
            send = send.reply_to_addresses(reply_to);
        }

        send.send().await.map_err(|e| match e {
            SdkError::ServiceError(ctx) => {
                let status = ctx.raw().status().as_u16();
                let message = format!("{:?}", ctx.err());
                match status {
                    401 | 403 => MailerError::Auth(message),
                    s if s >= 500 => MailerError::Transport(message),
                    s => MailerError::Api { status: s, message },
                }
            }
            other => MailerError::Transport(other.to_string()),
        })?;

        info!(message_id = %request.message_id, to = %request.to, "email sent via ses");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SendEmailRequest;
    use flowmail_core::models::EmailIntegration;
    use flowmail_core::types::{IntegrationId, MessageId, WorkspaceId};
    use serde_json::json;

    #[tokio::test]
    async fn empty_credentials_are_rejected_before_io() {
        let workspace_id = WorkspaceId::new();
        let provider: EmailIntegration = serde_json::from_value(json!({
            "id": IntegrationId::new(),
            "workspace_id": workspace_id,
            "name": "ses",
            "settings": {
                "kind": "ses",
                "region": "eu-west-1",
                "access_key": "",
                "secret_key": "",
            },
        }))
        .unwrap();
        let request = SendEmailRequest {
            workspace_id,
            integration_id: provider.id,
            message_id: MessageId::new(),
            from_address: "news@example.com".into(),
            from_name: None,
            to: "reader@example.com".into(),
            subject: "Hello".into(),
            content: "<p>Hi</p>".into(),
            provider,
            reply_to: None,
            cc: vec![],
            bcc: vec![],
            list_unsubscribe_url: None,
            attachments: vec![],
        };

        let err = SesAdapter::new().send_email(&request).await.unwrap_err();
        assert!(matches!(err, MailerError::ConfigMissing(_)));
    }
}
