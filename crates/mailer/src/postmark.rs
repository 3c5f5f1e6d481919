//! Postmark adapter
//!
//! JSON API authenticated with the `X-Postmark-Server-Token` header. The
//! message id rides in the `Metadata` object and comes back on delivery
//! events.

use crate::{
    EmailEventKind, EmailProvider, MESSAGE_ID_METADATA_FIELD, MailerError, SendEmailRequest,
    WebhookProvider, WebhookRegistration, WebhookStatus, error_from_response, http_client,
    transport_error,
};
use async_trait::async_trait;
use base64::Engine;
use flowmail_core::models::{
    EmailIntegration, EmailProviderKind, PostmarkSettings, ProviderSettings,
};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

const DEFAULT_ENDPOINT: &str = "https://api.postmarkapp.com";
const TOKEN_HEADER: &str = "X-Postmark-Server-Token";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkEmail {
    from: String,
    to: String,
    subject: String,
    html_body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bcc: Option<String>,
    metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<PostmarkHeader>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<PostmarkAttachment>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkHeader {
    name: String,
    value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkAttachment {
    name: String,
    content: String,
    content_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkWebhook {
    #[serde(rename = "ID")]
    id: i64,
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkWebhookList {
    webhooks: Vec<PostmarkWebhook>,
}

/// Postmark API adapter.
#[derive(Clone)]
pub struct PostmarkAdapter {
    client: Client,
}

impl PostmarkAdapter {
    pub fn new() -> Result<Self, MailerError> {
        Ok(Self {
            client: http_client()?,
        })
    }

    fn settings(integration: &EmailIntegration) -> Result<&PostmarkSettings, MailerError> {
        let ProviderSettings::Postmark(settings) = &integration.settings else {
            return Err(MailerError::ConfigMissing(
                "integration has no postmark settings block".into(),
            ));
        };
        if settings.server_token.expose_secret().is_empty() {
            return Err(MailerError::ConfigMissing(
                "postmark server token is empty".into(),
            ));
        }
        Ok(settings)
    }

    fn endpoint(settings: &PostmarkSettings) -> String {
        settings
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    fn triggers(events: &[EmailEventKind]) -> serde_json::Value {
        json!({
            "Delivery": { "Enabled": events.contains(&EmailEventKind::Delivered) },
            "Bounce": { "Enabled": events.contains(&EmailEventKind::Bounce), "IncludeContent": false },
            "SpamComplaint": { "Enabled": events.contains(&EmailEventKind::Complaint), "IncludeContent": false },
        })
    }

    async fn find_webhook(
        &self,
        settings: &PostmarkSettings,
        callback_url: &str,
    ) -> Result<Option<PostmarkWebhook>, MailerError> {
        let response = self
            .client
            .get(format!("{}/webhooks", Self::endpoint(settings)))
            .header(TOKEN_HEADER, settings.server_token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let list: PostmarkWebhookList = response
            .json()
            .await
            .map_err(|e| MailerError::Payload(format!("unexpected webhook list body: {e}")))?;
        Ok(list.webhooks.into_iter().find(|w| w.url == callback_url))
    }
}

#[async_trait]
impl EmailProvider for PostmarkAdapter {
    fn kind(&self) -> EmailProviderKind {
        EmailProviderKind::Postmark
    }

    async fn send_email(&self, request: &SendEmailRequest) -> Result<(), MailerError> {
        let settings = Self::settings(&request.provider)?;

        let from = match &request.from_name {
            Some(name) => format!("{name} <{}>", request.from_address),
            None => request.from_address.clone(),
        };

        let mut headers = Vec::new();
        if let Some(url) = &request.list_unsubscribe_url {
            headers.push(PostmarkHeader {
                name: "List-Unsubscribe".into(),
                value: format!("<{url}>"),
            });
            headers.push(PostmarkHeader {
                name: "List-Unsubscribe-Post".into(),
                value: "List-Unsubscribe=One-Click".into(),
            });
        }

        let attachments = request
            .attachments
            .iter()
            .map(|a| PostmarkAttachment {
                name: a.filename.clone(),
                content: base64::engine::general_purpose::STANDARD.encode(&a.data),
                content_type: a.content_type.clone(),
            })
            .collect();

        let body = PostmarkEmail {
            from,
            to: request.to.clone(),
            subject: request.subject.clone(),
            html_body: request.content.clone(),
            reply_to: request.reply_to.clone(),
            cc: (!request.cc.is_empty()).then(|| request.cc.join(",")),
            bcc: (!request.bcc.is_empty()).then(|| request.bcc.join(",")),
            metadata: json!({ MESSAGE_ID_METADATA_FIELD: request.message_id }),
            headers,
            attachments,
        };

        let response = self
            .client
            .post(format!("{}/email", Self::endpoint(settings)))
            .header(TOKEN_HEADER, settings.server_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        info!(message_id = %request.message_id, to = %request.to, "email sent via postmark");
        Ok(())
    }
}

#[async_trait]
impl WebhookProvider for PostmarkAdapter {
    async fn register_webhooks(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
        events: &[EmailEventKind],
    ) -> Result<WebhookRegistration, MailerError> {
        let settings = Self::settings(integration)?;

        let body = json!({
            "Url": callback_url,
            "MessageStream": "outbound",
            "Triggers": Self::triggers(events),
        });

        // registering the same target twice updates the existing hook
        let existing = self.find_webhook(settings, callback_url).await?;
        let response = match &existing {
            Some(webhook) => self
                .client
                .put(format!("{}/webhooks/{}", Self::endpoint(settings), webhook.id))
                .header(TOKEN_HEADER, settings.server_token.expose_secret())
                .json(&body)
                .send()
                .await
                .map_err(transport_error)?,
            None => self
                .client
                .post(format!("{}/webhooks", Self::endpoint(settings)))
                .header(TOKEN_HEADER, settings.server_token.expose_secret())
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
        let endpoint_id = created
            .get("ID")
            .and_then(serde_json::Value::as_i64)
            .map(|id| id.to_string())
            .or_else(|| existing.map(|w| w.id.to_string()));

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
            endpoint_id: webhook.map(|w| w.id.to_string()),
            events: EmailEventKind::ALL.to_vec(),
        })
    }

    async fn unregister_webhooks(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
    ) -> Result<(), MailerError> {
        let settings = Self::settings(integration)?;
        let Some(webhook) = self.find_webhook(settings, callback_url).await? else {
            return Ok(());
        };
        let response = self
            .client
            .delete(format!("{}/webhooks/{}", Self::endpoint(settings), webhook.id))
            .header(TOKEN_HEADER, settings.server_token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmail_core::types::{IntegrationId, MessageId, WorkspaceId};
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn request_for(endpoint: String) -> SendEmailRequest {
        let workspace_id = WorkspaceId::new();
        let provider: EmailIntegration = serde_json::from_value(json!({
            "id": IntegrationId::new(),
            "workspace_id": workspace_id,
            "name": "postmark",
            "settings": {
                "kind": "postmark",
                "server_token": "pm-token",
                "endpoint": endpoint,
            },
        }))
        .unwrap();
        SendEmailRequest {
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
            list_unsubscribe_url: Some("https://example.com/u/1".into()),
            attachments: vec![],
        }
    }

    struct SendBodyMatcher;

    impl wiremock::Match for SendBodyMatcher {
        fn matches(&self, request: &Request) -> bool {
            let Ok(body) = serde_json::from_slice::<serde_json::Value>(&request.body) else {
                return false;
            };
            body.get("From").is_some()
                && body.get("To").is_some()
                && body.get("HtmlBody").is_some()
                && body["Metadata"].get(MESSAGE_ID_METADATA_FIELD).is_some()
                && body["Headers"]
                    .as_array()
                    .is_some_and(|hs| hs.iter().any(|h| h["Name"] == "List-Unsubscribe-Post"))
        }
    }

    #[tokio::test]
    async fn send_posts_the_expected_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/email"))
            .and(header(TOKEN_HEADER, "pm-token"))
            .and(header("Content-Type", "application/json"))
            .and(SendBodyMatcher)
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let request = request_for(server.uri());
        let outcome = PostmarkAdapter::new().unwrap().send_email(&request).await;
        claims::assert_ok!(outcome);
    }

    #[tokio::test]
    async fn server_errors_map_to_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let request = request_for(server.uri());
        let err = PostmarkAdapter::new().unwrap().send_email(&request).await.unwrap_err();
        assert!(matches!(err, MailerError::Transport(_)));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let request = request_for(server.uri());
        let err = PostmarkAdapter::new().unwrap().send_email(&request).await.unwrap_err();
        assert!(matches!(err, MailerError::Auth(_)));
    }

    #[tokio::test]
    async fn client_errors_map_to_api_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad from"))
            .expect(1)
            .mount(&server)
            .await;

        let request = request_for(server.uri());
        let err = PostmarkAdapter::new().unwrap().send_email(&request).await.unwrap_err();
        match err {
            MailerError::Api { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "bad from");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn double_registration_reuses_the_existing_webhook() {
        let server = MockServer::start().await;
        let callback = "https://app.example.com/webhooks/email/postmark?workspace_id=w&integration_id=i";

        Mock::given(method("GET"))
            .and(path("/webhooks"))
            .and(header_exists(TOKEN_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Webhooks": [{ "ID": 42, "Url": callback }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/webhooks/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ID": 42 })))
            .expect(1)
            .mount(&server)
            .await;

        let request = request_for(server.uri());
        let registration = PostmarkAdapter::new()
            .unwrap()
            .register_webhooks(&request.provider, callback, &EmailEventKind::ALL)
            .await
            .unwrap();
        assert_eq!(registration.endpoint_id.as_deref(), Some("42"));
    }
}
