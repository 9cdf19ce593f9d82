//! Credentials providers and the auth interceptor.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Status};

use ydbx_core::{Ctx, Result};

/// Metadata key the server expects the auth ticket under.
pub const AUTH_TICKET_HEADER: &str = "x-ydb-auth-ticket";

/// Source of auth tokens.
#[async_trait]
pub trait Credentials: Send + Sync + 'static {
    /// Produce a token. `force` bypasses any provider-side cache.
    async fn get_token(&self, force: bool, ctx: &Ctx) -> Result<String>;
}

/// No authentication: requests carry no ticket.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousCredentials;

#[async_trait]
impl Credentials for AnonymousCredentials {
    async fn get_token(&self, _force: bool, _ctx: &Ctx) -> Result<String> {
        Ok(String::new())
    }
}

/// A fixed token, e.g. from an environment variable.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        StaticCredentials {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Credentials for StaticCredentials {
    async fn get_token(&self, _force: bool, _ctx: &Ctx) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Shared slot holding the most recent token. The driver refreshes it; the
/// interceptor reads it on every outgoing request.
#[derive(Clone, Default)]
pub struct TokenSlot {
    token: Arc<RwLock<String>>,
}

impl TokenSlot {
    pub fn set(&self, token: String) {
        *self.token.write() = token;
    }

    pub fn get(&self) -> String {
        self.token.read().clone()
    }
}

/// Attaches the current auth ticket to every outgoing request.
#[derive(Clone)]
pub struct AuthTicketInterceptor {
    slot: TokenSlot,
}

impl AuthTicketInterceptor {
    pub fn new(slot: TokenSlot) -> Self {
        AuthTicketInterceptor { slot }
    }
}

impl Interceptor for AuthTicketInterceptor {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        let token = self.slot.get();
        if !token.is_empty() {
            let value = AsciiMetadataValue::try_from(token.as_str())
                .map_err(|_| Status::invalid_argument("auth ticket is not valid metadata"))?;
            request.metadata_mut().insert(AUTH_TICKET_HEADER, value);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials_return_their_token() {
        let creds = StaticCredentials::new("ticket-1");
        let token = creds.get_token(false, &Ctx::background()).await.unwrap();
        assert_eq!(token, "ticket-1");
    }

    #[test]
    fn interceptor_attaches_header() {
        let slot = TokenSlot::default();
        slot.set("ticket-2".into());
        let mut interceptor = AuthTicketInterceptor::new(slot);
        let request = interceptor.call(Request::new(())).unwrap();
        assert_eq!(
            request.metadata().get(AUTH_TICKET_HEADER).unwrap(),
            "ticket-2"
        );
    }

    #[test]
    fn interceptor_skips_empty_token() {
        let mut interceptor = AuthTicketInterceptor::new(TokenSlot::default());
        let request = interceptor.call(Request::new(())).unwrap();
        assert!(request.metadata().get(AUTH_TICKET_HEADER).is_none());
    }
}
