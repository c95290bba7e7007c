use async_trait::async_trait;
use tracing::info;

use super::{EmailProvider, ProviderError, ProviderReceipt};
use crate::types::SendRequest;

/// Accepts every message and writes it to the log
#[derive(Debug, Clone)]
pub struct LogProvider {
    name: String,
}

impl LogProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl EmailProvider for LogProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_email(&self, request: &SendRequest) -> Result<ProviderReceipt, ProviderError> {
        let message_id = format!("{}-{}", self.name, ulid::Ulid::new());

        info!(
            provider = %self.name,
            message_id = %message_id,
            to = %request.to,
            from = %request.from,
            subject = %request.subject,
            body_len = request.effective_body().len(),
            "Message accepted"
        );

        Ok(ProviderReceipt {
            message_id: Some(message_id),
        })
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
