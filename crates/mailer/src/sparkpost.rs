//! SparkPost adapter
//!
//! Transmissions API authenticated with a bare `Authorization` header. The
//! message id rides in transmission metadata.

use crate::{
    EmailEventKind, EmailProvider, MESSAGE_ID_METADATA_FIELD, MailerError, SendEmailRequest,
    WebhookProvider, WebhookRegistration, WebhookStatus, error_from_response, http_client,
    transport_error,
};
use async_trait::async_trait;
use base64::Engine;
use flowmail_core::models::{
    EmailIntegration, EmailProviderKind, ProviderSettings, SparkpostSettings,
};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::info;

const DEFAULT_ENDPOINT: &str = "https://api.sparkpost.com";

fn event_names(events: &[EmailEventKind]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            EmailEventKind::Delivered => "delivery",
            EmailEventKind::Bounce => "bounce",
            EmailEventKind::Complaint => "spam_complaint",
        })
        .collect()
}

/// SparkPost API adapter.
#[derive(Clone)]
pub struct SparkpostAdapter {
    client: Client,
}

impl SparkpostAdapter {
    pub fn new() -> Result<Self, MailerError> {
        Ok(Self {
            client: http_client()?,
        })
    }

    fn settings(integration: &EmailIntegration) -> Result<&SparkpostSettings, MailerError> {
        let ProviderSettings::Sparkpost(settings) = &integration.settings else {
            return Err(MailerError::ConfigMissing(
                "integration has no sparkpost settings block".into(),
            ));
        };
        if settings.api_key.expose_secret().is_empty() {
            return Err(MailerError::ConfigMissing("sparkpost api key is empty".into()));
        }
        Ok(settings)
    }

    fn endpoint(settings: &SparkpostSettings) -> String {
        settings
            .endpoint
            .clone()
            .map_or_else(|| DEFAULT_ENDPOINT.to_string(), |e| e.trim_end_matches('/').to_string())
    }
}

#[async_trait]
impl EmailProvider for SparkpostAdapter {
    fn kind(&self) -> EmailProviderKind {
        EmailProviderKind::Sparkpost
    }

    async fn send_email(&self, request: &SendEmailRequest) -> Result<(), MailerError> {
        let settings = Self::settings(&request.provider)?;

        let mut recipients = vec![json!({ "address": { "email": request.to } })];
        for cc in &request.cc {
            recipients.push(json!({
                "address": { "email": cc, "header_to": request.to }
            }));
        }
        for bcc in &request.bcc {
            recipients.push(json!({
                "address": { "email": bcc, "header_to": request.to }
            }));
        }

        let mut headers = serde_json::Map::new();
        if !request.cc.is_empty() {
            headers.insert("CC".into(), json!(request.cc.join(",")));
        }
        if let Some(url) = &request.list_unsubscribe_url {
            headers.insert("List-Unsubscribe".into(), json!(format!("<{url}>")));
            headers.insert(
                "List-Unsubscribe-Post".into(),
                json!("List-Unsubscribe=One-Click"),
            );
        }

        let attachments: Vec<serde_json::Value> = request
            .attachments
            .iter()
            .map(|a| {
                json!({
                    "name": a.filename,
                    "type": a.content_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(&a.data),
                })
            })
            .collect();

        let mut content = json!({
            "from": {
                "email": request.from_address,
                "name": request.from_name,
            },
            "subject": request.subject,
            "html": request.content,
            "reply_to": request.reply_to,
        });
        if !headers.is_empty() {
            content["headers"] = serde_json::Value::Object(headers);
        }
        if !attachments.is_empty() {
            content["attachments"] = json!(attachments);
        }

        let body = json!({
            "options": { "sandbox": settings.sandbox },
            "metadata": { MESSAGE_ID_METADATA_FIELD: request.message_id },
            "recipients": recipients,
            "content": content,
        });

        let response = self
            .client
            .post(format!("{}/api/v1/transmissions", Self::endpoint(settings)))
            .header("Authorization", settings.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        info!(message_id = %request.message_id, to = %request.to, "email sent via sparkpost");
        Ok(())
    }
}

#[async_trait]
impl WebhookProvider for SparkpostAdapter {
    async fn register_webhooks(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
        events: &[EmailEventKind],
    ) -> Result<WebhookRegistration, MailerError> {
        let settings = Self::settings(integration)?;

        let body = json!({
            "name": "flowmail events",
            "target": callback_url,
            "events": event_names(events),
        });

        // reuse an existing subscription for the same target
        let existing = self.find_webhook(settings, callback_url).await?;
        let response = match &existing {
            Some(id) => self
                .client
                .put(format!("{}/api/v1/webhooks/{id}", Self::endpoint(settings)))
                .header("Authorization", settings.api_key.expose_secret())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?,
            None => self
                .client
                .post(format!("{}/api/v1/webhooks", Self::endpoint(settings)))
                .header("Authorization", settings.api_key.expose_secret())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?,
        };
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let created: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MailerError::Payload(format!("unexpected webhook body: {e}")))?;
        let endpoint_id = created["results"]["id"]
            .as_str()
            .map(ToString::to_string)
            .or(existing);

        Ok(WebhookRegistration {
            endpoint_id,
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
        let webhook = self.find_webhook(settings, callback_url).await?;
        Ok(WebhookStatus {
            registered: webhook.is_some(),
            endpoint_id: webhook,
            events: EmailEventKind::ALL.to_vec(),
        })
    }

    async fn unregister_webhooks(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
    ) -> Result<(), MailerError> {
        let settings = Self::settings(integration)?;
        let Some(id) = self.find_webhook(settings, callback_url).await? else {
            return Ok(());
        };
        let response = self
            .client
            .delete(format!("{}/api/v1/webhooks/{id}", Self::endpoint(settings)))
            .header("Authorization", settings.api_key.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}

impl SparkpostAdapter {
    async fn find_webhook(
        &self,
        settings: &SparkpostSettings,
        callback_url: &str,
    ) -> Result<Option<String>, MailerError> {
        let response = self
            .client
            .get(format!("{}/api/v1/webhooks", Self::endpoint(settings)))
            .header("Authorization", settings.api_key.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MailerError::Payload(format!("unexpected webhook list body: {e}")))?;
        let id = body["results"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|w| w["target"] == callback_url)
            .and_then(|w| w["id"].as_str())
            .map(ToString::to_string);
        Ok(id)
    }
}
