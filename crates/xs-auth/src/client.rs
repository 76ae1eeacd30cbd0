use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{
    Offering, RP_AUTH_XBOXLIVE, SANDBOX, TRANSFER_TOKEN_SCOPE, USER_AUTH_SCOPE, XalConfig,
};
use crate::errors::{Result, XsAuthError, XstsError};
use crate::models::*;
use crate::pkce::{CodeChallenge, random_state};
use crate::signer::{JwtKeys, RequestSigner};
use crate::store::TokenStore;
use crate::streaming::{StreamingToken, StreamingTokenData};
use crate::tokens::{DeviceToken, MsalToken, SisuToken, UserToken, XstsToken};

const NO_CACHE: &str = "no-store, must-revalidate, no-cache";

/// Everything the interactive flow needs to finish once the redirect arrives
#[derive(Debug, Clone)]
pub struct RedirectContext {
    pub sisu_auth: SisuAuthentication,
    pub state: String,
    pub code_challenge: CodeChallenge,
}

impl RedirectContext {
    /// URL the web surface must open
    pub fn authorize_url(&self) -> &str {
        &self.sisu_auth.msa_oauth_redirect
    }
}

/// Base tokens produced by a refresh
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub user_token: UserToken,
    pub device_token: DeviceToken,
    pub sisu_token: SisuToken,
}

/// Client for the Xbox Live token chain
///
/// Device, SISU and XSTS requests are signed with the client's proof key, which is
/// persisted alongside the tokens so device-bound tokens stay usable across restarts.
#[derive(Debug, Clone)]
pub struct XalClient {
    config: XalConfig,
    http: Client,
    signer: RequestSigner,
}

impl XalClient {
    /// Create a client, restoring the proof key from `keys` when possible
    pub fn new(config: XalConfig, keys: Option<&JwtKeys>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or("xstream"))
            .build()?;

        let signer = match keys.map(RequestSigner::from_jwt_keys) {
            Some(Ok(signer)) => signer,
            Some(Err(e)) => {
                warn!("Stored proof key unusable, generating a new one: {}", e);
                RequestSigner::generate()
            }
            None => RequestSigner::generate(),
        };

        Ok(Self {
            config,
            http,
            signer,
        })
    }

    pub fn config(&self) -> &XalConfig {
        &self.config
    }

    /// Key set to persist with the tokens
    pub fn jwt_keys(&self) -> JwtKeys {
        self.signer.jwt_keys()
    }

    /// Request a device token bound to the proof key
    #[instrument(skip(self))]
    pub async fn get_device_token(&self) -> Result<DeviceToken> {
        let device_id = format!("{{{}}}", uuid::Uuid::new_v4());
        let request = DeviceAuthRequest {
            properties: DeviceAuthProperties {
                auth_method: "ProofOfPossession".to_string(),
                id: device_id.clone(),
                device_type: "Android".to_string(),
                serial_number: device_id,
                version: "15.0".to_string(),
                proof_key: self.signer.proof_key(),
            },
            relying_party: RP_AUTH_XBOXLIVE.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Requesting device token");
        let url = &self.config.endpoints.device_authenticate;
        let response = self.signed_post(url, &request).await?;
        read_json(url, response).await
    }

    /// Start SISU authentication; the response carries the Microsoft login URL
    #[instrument(skip(self, device_token, code_challenge, state))]
    pub async fn do_sisu_authentication(
        &self,
        device_token: &DeviceToken,
        code_challenge: &CodeChallenge,
        state: &str,
    ) -> Result<SisuAuthentication> {
        let request = SisuAuthenticateRequest {
            app_id: self.config.app_id.clone(),
            title_id: self.config.title_id.clone(),
            redirect_uri: self.config.redirect_uri.clone(),
            device_token: device_token.token.clone(),
            sandbox: SANDBOX.to_string(),
            token_type: "code".to_string(),
            offers: vec![USER_AUTH_SCOPE.to_string()],
            query: SisuQuery {
                display: "android_phone".to_string(),
                code_challenge: code_challenge.value.clone(),
                code_challenge_method: code_challenge.method.to_string(),
                state: state.to_string(),
            },
        };

        debug!("Starting SISU authentication");
        let url = &self.config.endpoints.sisu_authenticate;
        let response = ensure_success(url, self.signed_post(url, &request).await?).await?;

        let session_id = response
            .headers()
            .get("x-sessionid")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut auth: SisuAuthentication = response.json().await?;
        auth.session_id = session_id;
        Ok(auth)
    }

    /// Exchange a user token and device token for the SISU token bundle
    #[instrument(skip(self, user_token, device_token))]
    pub async fn do_sisu_authorization(
        &self,
        user_token: &UserToken,
        device_token: &DeviceToken,
        session_id: Option<&str>,
    ) -> Result<SisuToken> {
        let request = SisuAuthorizeRequest {
            access_token: format!("t={}", user_token.access_token),
            app_id: self.config.app_id.clone(),
            device_token: device_token.token.clone(),
            sandbox: SANDBOX.to_string(),
            site_name: "user.auth.xboxlive.com".to_string(),
            use_modern_gamertag: true,
            proof_key: self.signer.proof_key(),
            session_id: session_id.map(str::to_string),
        };

        debug!("Authorizing with SISU");
        let url = &self.config.endpoints.sisu_authorize;
        let response = self.signed_post(url, &request).await?;
        read_json(url, response).await
    }

    /// Exchange an authorization code for a user token
    #[instrument(skip(self, code, code_verifier))]
    pub async fn exchange_code_for_token(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<UserToken> {
        let form = [
            ("client_id", self.config.app_id.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", USER_AUTH_SCOPE),
        ];

        debug!("Exchanging authorization code for tokens");
        self.token_grant(&form).await
    }

    /// Refresh the user token with its refresh token
    #[instrument(skip(self, user_token))]
    pub async fn refresh_user_token(&self, user_token: &UserToken) -> Result<UserToken> {
        let refresh_token = user_token
            .refresh_token
            .as_deref()
            .ok_or(XsAuthError::MissingRefreshToken)?;

        let form = [
            ("client_id", self.config.app_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", USER_AUTH_SCOPE),
        ];

        debug!("Refreshing user token");
        self.token_grant(&form).await
    }

    /// Exchange the refresh token for the xCloud console transfer token
    #[instrument(skip(self, user_token))]
    pub async fn exchange_refresh_token_for_transfer_token(
        &self,
        user_token: &UserToken,
    ) -> Result<MsalToken> {
        let refresh_token = user_token
            .refresh_token
            .as_deref()
            .ok_or(XsAuthError::MissingRefreshToken)?;

        let form = [
            ("client_id", self.config.app_id.as_str()),
            ("grant_type", "refresh_token"),
            ("scope", TRANSFER_TOKEN_SCOPE),
            ("refresh_token", refresh_token),
            ("code", ""),
            ("code_verifier", ""),
            ("redirect_uri", ""),
        ];

        debug!("Requesting transfer token");
        self.token_grant(&form).await
    }

    /// Authorize the SISU token for `relying_party`
    #[instrument(skip(self, sisu_token))]
    pub async fn do_xsts_authorization(
        &self,
        sisu_token: &SisuToken,
        relying_party: &str,
    ) -> Result<XstsToken> {
        let request = XstsAuthRequest {
            properties: XstsAuthProperties {
                sandbox_id: SANDBOX.to_string(),
                device_token: sisu_token.device_token.clone(),
                title_token: sisu_token.title_token.token.clone(),
                user_tokens: vec![sisu_token.user_token.token.clone()],
            },
            relying_party: relying_party.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authorizing with XSTS");
        let url = &self.config.endpoints.xsts_authorize;
        let response = self.signed_post(url, &request).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<XstsErrorResponse>(&body) {
                warn!("XSTS denied with XErr {}", error.xerr);
                return Err(XstsError::from_xerr(error.xerr).into());
            }
            return Err(http_error(url, status, &body));
        }

        read_json(url, response).await
    }

    /// Exchange an XSTS token for a streaming token of one offering
    ///
    /// `forwarded_for` pins the service region to the given address.
    #[instrument(skip(self, xsts_token))]
    pub async fn get_stream_token(
        &self,
        xsts_token: &XstsToken,
        offering: Offering,
        forwarded_for: Option<&str>,
    ) -> Result<StreamingToken> {
        let url = self.config.endpoints.gssv_login_url(offering)?;
        let request = StreamLoginRequest {
            token: xsts_token.token.clone(),
            offering_id: offering.as_str().to_string(),
        };

        let mut builder = self
            .http
            .post(url.clone())
            .header("Cache-Control", NO_CACHE)
            .header("x-gssv-client", "XboxComBrowser")
            .json(&request);
        if let Some(address) = forwarded_for.filter(|address| !address.is_empty()) {
            builder = builder.header("x-forwarded-for", address);
        }

        debug!("Requesting {} streaming token", offering);
        let response = builder.send().await?;
        let data: StreamingTokenData = read_json(&url, response).await?;
        Ok(StreamingToken::new(data))
    }

    /// Fetch the profile settings of the signed-in user
    #[instrument(skip(self, web_token))]
    pub async fn get_profile(&self, web_token: &XstsToken) -> Result<XboxProfile> {
        let authorization = web_token.authorization_header().ok_or_else(|| {
            XsAuthError::InvalidResponse("Web token has no user hash".to_string())
        })?;

        let mut url = self.config.endpoints.profile_settings.clone();
        url.query_pairs_mut().append_pair(
            "settings",
            "GameDisplayName,GameDisplayPicRaw,Gamerscore,Gamertag",
        );

        let response = self
            .http
            .get(url.clone())
            .header("Authorization", authorization)
            .header("x-xbl-contract-version", "3")
            .send()
            .await?;

        let profile: ProfileResponse = read_json(&url, response).await?;
        profile
            .profile_users
            .into_iter()
            .next()
            .map(XboxProfile::from)
            .ok_or_else(|| XsAuthError::InvalidResponse("Empty profile response".to_string()))
    }

    /// Prepare the interactive login: device token, PKCE challenge, state and login URL
    #[instrument(skip(self))]
    pub async fn get_redirect_uri(&self) -> Result<RedirectContext> {
        let device_token = self.get_device_token().await?;
        let code_challenge = CodeChallenge::generate();
        let state = random_state(64);
        let sisu_auth = self
            .do_sisu_authentication(&device_token, &code_challenge, &state)
            .await?;

        Ok(RedirectContext {
            sisu_auth,
            state,
            code_challenge,
        })
    }

    /// Finish the interactive login from the captured redirect URI
    ///
    /// Stores the new user token (dropping any SISU token of a previous login) and the
    /// proof key, then saves the store.
    #[instrument(skip(self, store, context, redirect_uri))]
    pub async fn authenticate_user(
        &self,
        store: &mut TokenStore,
        context: &RedirectContext,
        redirect_uri: &str,
    ) -> Result<()> {
        let code = parse_redirect(redirect_uri, &context.state)?;
        let user_token = self
            .exchange_code_for_token(&code, &context.code_challenge.verifier)
            .await?;

        store.replace_login(user_token);
        store.set_jwt_keys(self.jwt_keys());
        store.save().await?;
        Ok(())
    }

    /// Refresh the user token and derive a new device and SISU token from it
    ///
    /// The store is only updated when every step succeeded.
    #[instrument(skip(self, store))]
    pub async fn refresh_tokens(&self, store: &mut TokenStore) -> Result<RefreshedTokens> {
        let current = store
            .user_token()
            .cloned()
            .ok_or(XsAuthError::MissingUserToken)?;

        let refreshed = async {
            let mut user_token = self.refresh_user_token(&current).await?;
            if user_token.refresh_token.is_none() {
                user_token.refresh_token = current.refresh_token.clone();
            }
            let device_token = self.get_device_token().await?;
            let sisu_token = self
                .do_sisu_authorization(&user_token, &device_token, None)
                .await?;

            Ok::<_, XsAuthError>(RefreshedTokens {
                user_token,
                device_token,
                sisu_token,
            })
        }
        .await
        .map_err(|e| XsAuthError::TokenRefresh(Box::new(e)))?;

        store.set_user_token(refreshed.user_token.clone());
        store.set_sisu_token(refreshed.sisu_token.clone());
        store.set_jwt_keys(self.jwt_keys());
        store.save().await?;

        Ok(refreshed)
    }

    /// Transfer token for MSAL connect, from the stored user token
    pub async fn get_msal_token(&self, store: &TokenStore) -> Result<MsalToken> {
        let user_token = store.user_token().ok_or(XsAuthError::MissingUserToken)?;
        self.exchange_refresh_token_for_transfer_token(user_token)
            .await
    }

    async fn signed_post<T: Serialize>(&self, url: &Url, payload: &T) -> Result<Response> {
        let body = serde_json::to_vec(payload)?;
        let signature = self.signer.sign(url.path(), "", &body);

        let response = self
            .http
            .post(url.clone())
            .header("x-xbl-contract-version", "1")
            .header("Cache-Control", NO_CACHE)
            .header("Content-Type", "application/json")
            .header("Signature", signature)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }

    async fn token_grant<T: DeserializeOwned>(&self, form: &[(&str, &str)]) -> Result<T> {
        let url = &self.config.endpoints.ms_token;
        let response = self
            .http
            .post(url.clone())
            .header("Cache-Control", NO_CACHE)
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if body.contains("invalid_grant") {
                return Err(XsAuthError::OAuthInvalidGrant);
            }
            return Err(http_error(url, status, &body));
        }

        Ok(response.json().await?)
    }
}

/// Extract the authorization code from the redirect, checking `state`
fn parse_redirect(redirect_uri: &str, expected_state: &str) -> Result<String> {
    let url = Url::parse(redirect_uri)?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };

    if let Some(error) = param("error") {
        if error == "access_denied" {
            return Err(XsAuthError::UserCancelled);
        }
        let description = param("error_description").unwrap_or_default();
        return Err(XsAuthError::RedirectError(format!("{error}: {description}")));
    }

    let code = param("code").ok_or(XsAuthError::InvalidRedirect)?;
    match param("state") {
        Some(state) if state == expected_state => Ok(code),
        _ => Err(XsAuthError::StateMismatch),
    }
}

fn http_error(url: &Url, status: StatusCode, body: &str) -> XsAuthError {
    XsAuthError::Http {
        url: url.to_string(),
        status,
        body_snippet: body.chars().take(200).collect(),
    }
}

async fn ensure_success(url: &Url, response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(http_error(url, status, &body))
}

async fn read_json<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T> {
    Ok(ensure_success(url, response).await?.json().await?)
}
