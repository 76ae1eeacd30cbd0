use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use xs_auth::{Authenticator, WebAuthSurface, XsAuthError};

type InputLines = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

/// Terminal stand-in for the login web view
///
/// Prints the login URL and waits for the user to paste the URL the browser was
/// redirected to. An empty line or end of input abandons the login.
pub struct ConsoleSurface {
    input: Arc<Mutex<InputLines>>,
    auth: OnceLock<Weak<Authenticator>>,
}

impl ConsoleSurface {
    /// Surface reading redirects from standard input
    pub fn stdin() -> Self {
        Self::with_input(Box::new(tokio::io::stdin()))
    }

    pub fn with_input(input: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            input: Arc::new(Mutex::new(BufReader::new(input).lines())),
            auth: OnceLock::new(),
        }
    }

    /// Route observed redirects to `auth`; only the first call has an effect
    pub fn attach(&self, auth: &Arc<Authenticator>) {
        if self.auth.set(Arc::downgrade(auth)).is_err() {
            warn!("Console surface already attached");
        }
    }

    fn authenticator(&self) -> xs_auth::Result<Arc<Authenticator>> {
        self.auth
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| XsAuthError::Surface("Console surface is not attached".to_string()))
    }
}

#[async_trait]
impl WebAuthSurface for ConsoleSurface {
    async fn open(&self, url: &str) -> xs_auth::Result<()> {
        let auth = self.authenticator()?;

        println!("Sign in with your Microsoft account:\n\n  {url}\n");
        println!("Then paste the address you were redirected to (empty line to cancel):");

        let input = self.input.clone();
        tokio::spawn(async move {
            let line = match input.lock().await.next_line().await {
                Ok(line) => line.map(|line| line.trim().to_string()),
                Err(e) => {
                    warn!("Failed to read redirect: {}", e);
                    None
                }
            };

            match line.filter(|line| !line.is_empty()) {
                Some(location) if auth.observe_redirect(&location) => {}
                Some(location) => {
                    warn!("Not a login redirect: {}", location);
                    auth.surface_closed();
                }
                None => {
                    debug!("Login abandoned");
                    auth.surface_closed();
                }
            }
        });
        Ok(())
    }

    fn close(&self) {
        debug!("Console surface closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NullHost, xbox_token};
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use xs_auth::{AuthFlowOutcome, Endpoints, XalConfig};
    use xs_core::{Capabilities, Settings};

    async fn authenticator(server: &MockServer, input: &'static str) -> Arc<Authenticator> {
        Mock::given(method("POST"))
            .and(path("/device/authenticate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(xbox_token("device-token")))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/authenticate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-SessionId", "session-1")
                    .set_body_json(json!({
                        "MsaOauthRedirect": "https://login.example/oauth20_authorize.srf",
                        "MsaRequestParameters": {}
                    })),
            )
            .mount(server)
            .await;

        let config = XalConfig {
            endpoints: Endpoints::with_base(&Url::parse(&server.uri()).unwrap()).unwrap(),
            ..Default::default()
        };
        let surface = Arc::new(ConsoleSurface::with_input(Box::new(input.as_bytes())));
        let auth = Arc::new(
            Authenticator::new(
                Capabilities::in_memory(Settings::default()),
                config,
                Arc::new(NullHost),
                surface.clone(),
            )
            .await
            .unwrap(),
        );
        surface.attach(&auth);
        auth
    }

    #[tokio::test]
    async fn test_empty_line_cancels_login() {
        let server = MockServer::start().await;
        let auth = authenticator(&server, "\n").await;

        let outcome = auth.start_auth_flow().await.unwrap();
        assert_eq!(outcome, AuthFlowOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_unrelated_address_cancels_login() {
        let server = MockServer::start().await;
        let auth = authenticator(&server, "https://example.com/elsewhere\n").await;

        let outcome = auth.start_auth_flow().await.unwrap();
        assert_eq!(outcome, AuthFlowOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_redirect_is_forwarded() {
        let server = MockServer::start().await;
        let auth = authenticator(&server, "ms-xal-000000004c20a908://auth?error=access_denied\n").await;

        let result = auth.start_auth_flow().await;
        assert!(matches!(result, Err(XsAuthError::UserCancelled)));
    }

    #[tokio::test]
    async fn test_unattached_surface_refuses_to_open() {
        let surface = ConsoleSurface::with_input(Box::new("".as_bytes()));
        assert!(matches!(surface.open("https://login.example").await, Err(XsAuthError::Surface(_))));
    }
}
