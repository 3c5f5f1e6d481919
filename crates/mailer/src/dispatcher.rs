//! Provider dispatcher
//!
//! Kind-keyed registries of send and webhook capabilities. A new vendor is
//! added by registering its adapter; nothing here matches on vendors.

use crate::{
    EmailProvider, MailerError, MailgunAdapter, MailjetAdapter, PostmarkAdapter, SendEmailRequest,
    SesAdapter, SmtpAdapter, SparkpostAdapter, WebhookProvider,
};
use flowmail_core::models::EmailProviderKind;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Routes send and webhook calls to the adapter for the integration's kind.
#[derive(Default, Clone)]
pub struct ProviderDispatcher {
    senders: HashMap<EmailProviderKind, Arc<dyn EmailProvider>>,
    webhooks: HashMap<EmailProviderKind, Arc<dyn WebhookProvider>>,
}

impl ProviderDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with every built-in adapter registered. SMTP and SES carry
    /// no webhook capability.
    pub fn with_defaults() -> Result<Self, MailerError> {
        let mut dispatcher = Self::new();

        dispatcher.register_sender(Arc::new(SmtpAdapter::new()));
        dispatcher.register_sender(Arc::new(SesAdapter::new()));

        let postmark = Arc::new(PostmarkAdapter::new()?);
        dispatcher.register_sender(Arc::clone(&postmark) as _);
        dispatcher.register_webhook_provider(EmailProviderKind::Postmark, postmark);

        let mailgun = Arc::new(MailgunAdapter::new()?);
        dispatcher.register_sender(Arc::clone(&mailgun) as _);
        dispatcher.register_webhook_provider(EmailProviderKind::Mailgun, mailgun);

        let mailjet = Arc::new(MailjetAdapter::new()?);
        dispatcher.register_sender(Arc::clone(&mailjet) as _);
        dispatcher.register_webhook_provider(EmailProviderKind::Mailjet, mailjet);

        let sparkpost = Arc::new(SparkpostAdapter::new()?);
        dispatcher.register_sender(Arc::clone(&sparkpost) as _);
        dispatcher.register_webhook_provider(EmailProviderKind::Sparkpost, sparkpost);

        Ok(dispatcher)
    }

    pub fn register_sender(&mut self, adapter: Arc<dyn EmailProvider>) -> &mut Self {
        self.senders.insert(adapter.kind(), adapter);
        self
    }

    pub fn register_webhook_provider(
        &mut self,
        kind: EmailProviderKind,
        adapter: Arc<dyn WebhookProvider>,
    ) -> &mut Self {
        self.webhooks.insert(kind, adapter);
        self
    }

    /// Send through the adapter selected by the request's provider kind.
    pub async fn send_email(&self, request: &SendEmailRequest) -> Result<(), MailerError> {
        let kind = request.provider.kind();
        let adapter = self.senders.get(&kind).ok_or_else(|| {
            MailerError::ConfigMissing(format!("no adapter registered for provider kind {kind}"))
        })?;
        debug!(message_id = %request.message_id, provider = %kind, "dispatching send");
        adapter.send_email(request).await
    }

    /// The webhook capability for a kind, if the vendor has one.
    pub fn webhook_provider(
        &self,
        kind: EmailProviderKind,
    ) -> Result<Arc<dyn WebhookProvider>, MailerError> {
        self.webhooks
            .get(&kind)
            .cloned()
            .ok_or(MailerError::WebhooksUnsupported(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SendEmailRequest;
    use flowmail_core::models::EmailIntegration;
    use flowmail_core::types::{IntegrationId, MessageId, WorkspaceId};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn send_routes_on_the_provider_kind() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mg.example.com/messages"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let workspace_id = WorkspaceId::new();
        let provider: EmailIntegration = serde_json::from_value(json!({
            "id": IntegrationId::new(),
            "workspace_id": workspace_id,
            "name": "mailgun",
            "settings": {
                "kind": "mailgun",
                "api_key": "key",
                "domain": "mg.example.com",
                "endpoint": server.uri(),
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

        let dispatcher = ProviderDispatcher::with_defaults().unwrap();
        dispatcher.send_email(&request).await.unwrap();
    }

    #[test]
    fn smtp_and_ses_have_no_webhook_capability() {
        let dispatcher = ProviderDispatcher::with_defaults().unwrap();
        for kind in [EmailProviderKind::Smtp, EmailProviderKind::Ses] {
            let err = dispatcher.webhook_provider(kind).err().unwrap();
            assert!(matches!(err, MailerError::WebhooksUnsupported(k) if k == kind));
        }
    }

    #[test]
    fn http_vendors_expose_webhook_capability() {
        let dispatcher = ProviderDispatcher::with_defaults().unwrap();
        for kind in [
            EmailProviderKind::Postmark,
            EmailProviderKind::Mailgun,
            EmailProviderKind::Mailjet,
            EmailProviderKind::Sparkpost,
        ] {
            assert!(dispatcher.webhook_provider(kind).is_ok(), "{kind}");
        }
    }
}
