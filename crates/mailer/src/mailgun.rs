//! Mailgun adapter
//!
//! Multipart-form API authenticated with HTTP basic auth (`api` / key). The
//! message id travels as a `v:` custom variable and comes back inside the
//! event payload.

use crate::{
    EmailEventKind, EmailProvider, MESSAGE_ID_METADATA_FIELD, MailerError, SendEmailRequest,
    WebhookProvider, WebhookRegistration, WebhookStatus, error_from_response, http_client,
    transport_error,
};
use async_trait::async_trait;
use flowmail_core::models::{EmailIntegration, EmailProviderKind, MailgunSettings, ProviderSettings};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::info;

/// Mailgun webhook ids for the events the platform consumes.
fn event_id(event: EmailEventKind) -> &'static str {
    match event {
        EmailEventKind::Delivered => "delivered",
        EmailEventKind::Bounce => "permanent_fail",
        EmailEventKind::Complaint => "complained",
    }
}

/// Mailgun API adapter.
#[derive(Clone)]
pub struct MailgunAdapter {
    client: Client,
}

impl MailgunAdapter {
    pub fn new() -> Result<Self, MailerError> {
        Ok(Self {
            client: http_client()?,
        })
    }

    fn settings(integration: &EmailIntegration) -> Result<&MailgunSettings, MailerError> {
        let ProviderSettings::Mailgun(settings) = &integration.settings else {
            return Err(MailerError::ConfigMissing(
                "integration has no mailgun settings block".into(),
            ));
        };
        if settings.api_key.expose_secret().is_empty() {
            return Err(MailerError::ConfigMissing("mailgun api key is empty".into()));
        }
        if settings.domain.trim().is_empty() {
            return Err(MailerError::ConfigMissing("mailgun domain is empty".into()));
        }
        Ok(settings)
    }

    fn endpoint(settings: &MailgunSettings) -> String {
        if let Some(endpoint) = &settings.endpoint {
            return endpoint.trim_end_matches('/').to_string();
        }
        match settings.region.as_deref() {
            Some("eu") => "https://api.eu.mailgun.net".to_string(),
            _ => "https://api.mailgun.net".to_string(),
        }
    }

    fn build_form(request: &SendEmailRequest) -> Result<Form, MailerError> {
        let from = match &request.from_name {
            Some(name) => format!("{name} <{}>", request.from_address),
            None => request.from_address.clone(),
        };

        let mut form = Form::new()
            .text("from", from)
            .text("to", request.to.clone())
            .text("subject", request.subject.clone())
            .text("html", request.content.clone())
            .text(
                format!("v:{MESSAGE_ID_METADATA_FIELD}"),
                request.message_id.to_string(),
            );

        if !request.cc.is_empty() {
            form = form.text("cc", request.cc.join(","));
        }
        if !request.bcc.is_empty() {
            form = form.text("bcc", request.bcc.join(","));
        }
        if let Some(reply_to) = &request.reply_to {
            form = form.text("h:Reply-To", reply_to.clone());
        }
        if let Some(url) = &request.list_unsubscribe_url {
            form = form.text("h:List-Unsubscribe", format!("<{url}>"));
            form = form.text("h:List-Unsubscribe-Post", "List-Unsubscribe=One-Click");
        }

        for attachment in &request.attachments {
            let part = Part::bytes(attachment.data.clone())
                .file_name(attachment.filename.clone())
                .mime_str(&attachment.content_type)
                .map_err(|e| {
                    MailerError::Payload(format!(
                        "invalid attachment content type {:?}: {e}",
                        attachment.content_type
                    ))
                })?;
            form = form.part("attachment", part);
        }

        Ok(form)
    }
}

#[async_trait]
impl EmailProvider for MailgunAdapter {
    fn kind(&self) -> EmailProviderKind {
        EmailProviderKind::Mailgun
    }

    async fn send_email(&self, request: &SendEmailRequest) -> Result<(), MailerError> {
        let settings = Self::settings(&request.provider)?;
        let form = Self::build_form(request)?;

        let response = self
            .client
            .post(format!(
                "{}/v3/{}/messages",
                Self::endpoint(settings),
                settings.domain
            ))
            .basic_auth("api", Some(settings.api_key.expose_secret()))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        info!(message_id = %request.message_id, to = %request.to, "email sent via mailgun");
        Ok(())
    }
}

#[async_trait]
impl WebhookProvider for MailgunAdapter {
    async fn register_webhooks(
        &self,
        integration: &EmailIntegration,
        callback_url: &str,
        events: &[EmailEventKind],
    ) -> Result<WebhookRegistration, MailerError> {
        let settings = Self::settings(integration)?;
        let base = format!(
            "{}/v3/domains/{}/webhooks",
            Self::endpoint(settings),
            settings.domain
        );

        for event in events {
            let id = event_id(*event);
            // try create; an existing hook for the event is updated instead
            let response = self
                .client
                .post(&base)
                .basic_auth("api", Some(settings.api_key.expose_secret()))
                .form(&[("id", id), ("url", callback_url)])
                .send()
                .await
                .map_err(transport_error)?;

            if response.status().is_success() {
                continue;
            }
            if response.status().as_u16() == 400 {
                // already registered for this event; repoint it
                let response = self
                    .client
                    .put(format!("{base}/{id}"))
                    .basic_auth("api", Some(settings.api_key.expose_secret()))
                    .form(&[("url", callback_url)])
                    .send()
                    .await
                    .map_err(transport_error)?;
                if !response.status().is_success() {
                    return Err(error_from_response(response).await);
                }
                continue;
            }
            return Err(error_from_response(response).await);
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
        let response = self
            .client
            .get(format!(
                "{}/v3/domains/{}/webhooks",
                Self::endpoint(settings),
                settings.domain
            ))
            .basic_auth("api", Some(settings.api_key.expose_secret()))
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
        let hooks = &body["webhooks"];

        let mut events = Vec::new();
        for event in EmailEventKind::ALL {
            let urls = &hooks[event_id(event)]["urls"];
            let registered = urls
                .as_array()
                .is_some_and(|urls| urls.iter().any(|u| u == callback_url));
            if registered {
                events.push(event);
            }
        }

        Ok(WebhookStatus {
            registered: !events.is_empty(),
            endpoint_id: None,
            events,
        })
    }

    async fn unregister_webhooks(
        &self,
        integration: &EmailIntegration,
        _callback_url: &str,
    ) -> Result<(), MailerError> {
        let settings = Self::settings(integration)?;
        for event in EmailEventKind::ALL {
            let response = self
                .client
                .delete(format!(
                    "{}/v3/domains/{}/webhooks/{}",
                    Self::endpoint(settings),
                    settings.domain,
                    event_id(event)
                ))
                .basic_auth("api", Some(settings.api_key.expose_secret()))
                .send()
                .await
                .map_err(transport_error)?;
            // a hook that was never registered is fine to "remove"
            if !response.status().is_success() && response.status().as_u16() != 404 {
                return Err(error_from_response(response).await);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmail_core::types::{IntegrationId, MessageId, WorkspaceId};
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_for(endpoint: String) -> SendEmailRequest {
        let workspace_id = WorkspaceId::new();
        let provider: EmailIntegration = serde_json::from_value(json!({
            "id": IntegrationId::new(),
            "workspace_id": workspace_id,
            "name": "mailgun",
            "settings": {
                "kind": "mailgun",
                "api_key": "key-abc",
                "domain": "mg.example.com",
                "endpoint": endpoint,
            },
        }))
        .unwrap();
        SendEmailRequest {
            workspace_id,
            integration_id: provider.id,
            message_id: MessageId::new(),
            from_address: "news@example.com".into(),
            from_name: Some("News".into()),
            to: "reader@example.com".into(),
            subject: "Hello".into(),
            content: "<p>Hi</p>".into(),
            provider,
            reply_to: None,
            cc: vec![],
            bcc: vec![],
            list_unsubscribe_url: None,
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn send_posts_a_multipart_form_to_the_domain_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mg.example.com/messages"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "<msg@mg.example.com>", "message": "Queued."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = request_for(server.uri());
        MailgunAdapter::new().unwrap().send_email(&request).await.unwrap();
    }

    #[tokio::test]
    async fn missing_domain_is_rejected_before_io() {
        let mut request = request_for("http://127.0.0.1:9".into());
        request.provider = serde_json::from_value(json!({
            "id": IntegrationId::new(),
            "workspace_id": request.workspace_id,
            "name": "mailgun",
            "settings": { "kind": "mailgun", "api_key": "key", "domain": " " },
        }))
        .unwrap();

        let err = MailgunAdapter::new().unwrap().send_email(&request).await.unwrap_err();
        assert!(matches!(err, MailerError::ConfigMissing(_)));
    }

    #[tokio::test]
    async fn webhook_status_reads_per_event_urls() {
        let server = MockServer::start().await;
        let callback = "https://app.example.com/webhooks/email/mailgun?workspace_id=w&integration_id=i";
        Mock::given(method("GET"))
            .and(path("/v3/domains/mg.example.com/webhooks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "webhooks": {
                    "delivered": { "urls": [callback] },
                    "permanent_fail": { "urls": [] },
                    "complained": { "urls": [callback] },
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = request_for(server.uri());
        let status = MailgunAdapter::new()
            .unwrap()
            .get_webhook_status(&request.provider, callback)
            .await
            .unwrap();
        assert!(status.registered);
        assert_eq!(
            status.events,
            vec![EmailEventKind::Delivered, EmailEventKind::Complaint]
        );
    }
}
