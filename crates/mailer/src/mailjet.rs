//! Mailjet adapter
//!
//! v3.1 send API with basic auth (api key / secret key). The message id is
//! carried in the per-message `EventPayload`, which Mailjet echoes on every
//! event callback.

use crate::{
    EmailEventKind, EmailProvider, MESSAGE_ID_METADATA_FIELD, MailerError, SendEmailRequest,
    WebhookProvider, WebhookRegistration, WebhookStatus, error_from_response, http_client,
    transport_error,
};
use async_trait::async_trait;
use base64::Engine;
use flowmail_core::models::{EmailIntegration, EmailProviderKind, MailjetSettings, ProviderSettings};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::info;

const DEFAULT_ENDPOINT: &str = "https://api.mailjet.com";

fn event_type(event: EmailEventKind) -> &'static str {
    match event {
        EmailEventKind::Delivered => "sent",
        EmailEventKind::Bounce => "bounce",
        EmailEventKind::Complaint => "spam",
    }
}

/// Mailjet API adapter.
#[derive(Clone)]
pub struct MailjetAdapter {
    client: Client,
}

impl MailjetAdapter {
    pub fn new() -> Result<Self, MailerError> {
        Ok(Self {
            client: http_client()?,
        })
    }

    fn settings(integration: &EmailIntegration) -> Result<&MailjetSettings, MailerError> {
        let ProviderSettings::Mailjet(settings) = &integration.settings else {
            return Err(MailerError::ConfigMissing(
                "integration has no mailjet settings block".into(),
            ));
        };
        if settings.api_key.expose_secret().is_empty()
            || settings.secret_key.expose_secret().is_empty()
        {
            return Err(MailerError::ConfigMissing(
                "mailjet api key or secret key is empty".into(),
            ));
        }
        Ok(settings)
    }

    fn endpoint(settings: &MailjetSettings) -> String {
        settings
            .endpoint
            .clone()
            .map_or_else(|| DEFAULT_ENDPOINT.to_string(), |e| e.trim_end_matches('/').to_string())
    }
}

#[async_trait]
impl EmailProvider for MailjetAdapter {
    fn kind(&self) -> EmailProviderKind {
        EmailProviderKind::Mailjet
    }

    async fn send_email(&self, request: &SendEmailRequest) -> Result<(), MailerError> {
        let settings = Self::settings(&request.provider)?;

        let mut message = json!({
            "From": {
                "Email": request.from_address,
                "Name": request.from_name,
            },
            "To": [{ "Email": request.to }],
            "Subject": request.subject,
            "HTMLPart": request.content,
            "EventPayload": json!({ MESSAGE_ID_METADATA_FIELD: request.message_id }).to_string(),
        });
        if !request.cc.is_empty() {
            message["Cc"] = request.cc.iter().map(|c| json!({ "Email": c })).collect();
        }
        if !request.bcc.is_empty() {
            message["Bcc"] = request.bcc.iter().map(|b| json!({ "Email": b })).collect();
        }
        if let Some(reply_to) = &request.reply_to {
            message["ReplyTo"] = json!({ "Email": reply_to });
        }
        if let Some(url) = &request.list_unsubscribe_url {
            message["Headers"] = json!({
                "List-Unsubscribe": format!("<{url}>"),
                "List-Unsubscribe-Post": "List-Unsubscribe=One-Click",
            });
        }
        if !request.attachments.is_empty() {
            message["Attachments"] = request
                .attachments
                .iter()
                .map(|a| {
                    json!({
                        "ContentType": a.content_type,
                        "Filename": a.filename,
                        "Base64Content": base64::engine::general_purpose::STANDARD.encode(&a.data),
                    })
                })
                .collect();
        }

        let response = self
            .client
            .post(format!("{}/v3.1/send", Self::endpoint(settings)))
            .basic_auth(
                settings.api_key.expose_secret(),
                Some(settings.secret_key.expose_secret()),
            )
            .json(&json!({ "Messages": [message] }))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        info!(message_id = %request.message_id, to = %request.to, "email sent via mailjet");
        Ok(())
    }
}

#[async_trait]
impl WebhookProvider for MailjetAdapter {
    async fn register_webhooks(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
        events: &[EmailEventKind],
    ) -> Result<WebhookRegistration, MailerError> {
        let settings = Self::settings(integration)?;
        let existing = self.existing_callbacks(settings, callback_url).await?;

        for event in events {
            let event_type = event_type(*event);
            if existing.iter().any(|(_, et)| et == event_type) {
                continue;
            }
            let response = self
                .client
                .post(format!("{}/v3/REST/eventcallbackurl", Self::endpoint(settings)))
                .basic_auth(
                    settings.api_key.expose_secret(),
                    Some(settings.secret_key.expose_secret()),
                )
                .json(&json!({ "EventType": event_type, "Url": callback_url }))
                .send()
                .await
                .map_err(transport_error)?;
            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
        }

        Ok(WebhookRegistration {
            endpoint_id: None,
            callback_url: callback_url.to_string(),
            events: events.to_vec(),
        })
    }

    async fn get_webhook_status(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
    ) -> Result<WebhookStatus, MailerError> {
        let settings = Self::settings(integration)?;
        let existing = self.existing_callbacks(settings, callback_url).await?;

        let events = EmailEventKind::ALL
            .into_iter()
            .filter(|e| existing.iter().any(|(_, et)| et == event_type(*e)))
            .collect::<Vec<_>>();

        Ok(WebhookStatus {
            registered: !events.is_empty(),
            endpoint_id: None,
            events,
        })
    }

    async fn unregister_webhooks(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
    ) -> Result<(), MailerError> {
        let settings = Self::settings(integration)?;
        for (id, _) in self.existing_callbacks(settings, callback_url).await? {
            let response = self
                .client
                .delete(format!(
                    "{}/v3/REST/eventcallbackurl/{id}",
                    Self::endpoint(settings)
                ))
                .basic_auth(
                    settings.api_key.expose_secret(),
                    Some(settings.secret_key.expose_secret()),
                )
                .send()
                .await
                .map_err(transport_error)?;
            if !response.status().is_success() && response.status().as_u16() != 404 {
                return Err(error_from_response(response).await);
            }
        }
        Ok(())
    }
}

impl MailjetAdapter {
    /// Callback subscriptions matching our URL, as (id, event type) pairs.
    async fn existing_callbacks(
        &self,
        settings: &MailjetSettings,
        callback_url: &str,
    ) -> Result<Vec<(i64, String)>, MailerError> {
        let response = self
            .client
            .get(format!("{}/v3/REST/eventcallbackurl", Self::endpoint(settings)))
            .basic_auth(
                settings.api_key.expose_secret(),
                Some(settings.secret_key.expose_secret()),
            )
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MailerError::Payload(format!("unexpected callback list body: {e}")))?;

        let callbacks = body["Data"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|c| c["Url"] == callback_url)
            .filter_map(|c| {
                let id = c["ID"].as_i64()?;
                let event_type = c["EventType"].as_str()?.to_string();
                Some((id, event_type))
            })
            .collect();
        Ok(callbacks)
    }
}
