//! REST client for a hosted identity toolkit (`/v1/accounts:*` endpoints).

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::{AuthBackend, AuthProvider, AuthProviderError, AuthSignal};
use crate::config::IdentityToolkitConfig;
use crate::models::Identity;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    id_token: String,
    local_id: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
    display_name: Option<String>,
    photo_url: Option<String>,
}

impl From<AccountInfo> for Identity {
    fn from(account: AccountInfo) -> Self {
        Self {
            uid: account.local_id,
            email: account.email,
            display_name: account.display_name,
            email_verified: account.email_verified,
            photo_url: account.photo_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdTokenRequest<'a> {
    id_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OobCodeRequest<'a> {
    request_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

/// Map a toolkit error message (e.g. `"WEAK_PASSWORD : Password should be
/// at least 6 characters"`) onto our error kinds.
fn map_error_message(message: &str) -> AuthProviderError {
    let (code, detail) = match message.split_once(" : ") {
        Some((code, detail)) => (code.trim(), detail.trim()),
        None => (message.trim(), ""),
    };

    match code {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS"
        | "USER_DISABLED" => AuthProviderError::InvalidCredentials,
        "EMAIL_EXISTS" => AuthProviderError::EmailInUse,
        "INVALID_EMAIL" | "MISSING_EMAIL" => AuthProviderError::InvalidEmail,
        "WEAK_PASSWORD" => AuthProviderError::WeakPassword(detail.to_string()),
        "USER_NOT_FOUND" => AuthProviderError::UserNotFound,
        "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => {
            AuthProviderError::NoCurrentUser
        }
        _ => AuthProviderError::Provider(message.to_string()),
    }
}

struct CurrentUser {
    identity: Identity,
    id_token: String,
}

/// HTTP client, endpoint and key shared by every browser's client.
struct ToolkitApi {
    client: Client,
    base_url: String,
    api_key: Secret<String>,
}

impl ToolkitApi {
    async fn call<B, R>(&self, method: &str, body: &B) -> Result<R, AuthProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/accounts:{}", self.base_url, method);

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.expose_secret().as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(method = %method, "Identity toolkit request failed: {}", e);
                AuthProviderError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status));
            tracing::warn!(method = %method, status = %status, error = %message, "Identity toolkit rejected request");
            return Err(map_error_message(&message));
        }

        response.json::<R>().await.map_err(|e| {
            tracing::error!(method = %method, "Malformed identity toolkit response: {}", e);
            AuthProviderError::Provider(format!("Malformed response: {}", e))
        })
    }

    async fn lookup(&self, id_token: &str) -> Result<Identity, AuthProviderError> {
        let response: LookupResponse = self
            .call("lookup", &IdTokenRequest { id_token })
            .await?;
        response
            .users
            .into_iter()
            .next()
            .map(Identity::from)
            .ok_or(AuthProviderError::UserNotFound)
    }
}

#[derive(Clone)]
pub struct IdentityToolkitBackend {
    api: Arc<ToolkitApi>,
}

impl IdentityToolkitBackend {
    pub fn new(config: &IdentityToolkitConfig) -> Self {
        Self {
            api: Arc::new(ToolkitApi {
                client: Client::new(),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                api_key: Secret::new(config.api_key.expose_secret().clone()),
            }),
        }
    }

    /// No credentials are persisted, so every client starts out signed out.
    pub fn client(&self) -> IdentityToolkitProvider {
        let (signal, _) = watch::channel(AuthSignal::SignedOut);
        IdentityToolkitProvider {
            api: self.api.clone(),
            current: Mutex::new(None),
            signal,
        }
    }
}

impl AuthBackend for IdentityToolkitBackend {
    fn connect(&self) -> Arc<dyn AuthProvider> {
        Arc::new(self.client())
    }

    fn provider_name(&self) -> &'static str {
        "identity_toolkit"
    }
}

pub struct IdentityToolkitProvider {
    api: Arc<ToolkitApi>,
    current: Mutex<Option<CurrentUser>>,
    signal: watch::Sender<AuthSignal>,
}

impl IdentityToolkitProvider {
    pub fn new(config: &IdentityToolkitConfig) -> Self {
        IdentityToolkitBackend::new(config).client()
    }

    fn id_token(&self) -> Option<String> {
        self.current
            .lock()
            .ok()
            .and_then(|current| current.as_ref().map(|user| user.id_token.clone()))
    }

    fn establish(&self, identity: Identity, id_token: String) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(CurrentUser {
                identity: identity.clone(),
                id_token,
            });
        }
        self.signal.send_replace(AuthSignal::SignedIn(identity));
    }

    fn drop_session(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
        self.signal.send_replace(AuthSignal::SignedOut);
    }

    pub fn current(&self) -> Option<Identity> {
        self.current
            .lock()
            .ok()
            .and_then(|current| current.as_ref().map(|user| user.identity.clone()))
    }
}

#[async_trait]
impl AuthProvider for IdentityToolkitProvider {
    fn subscribe(&self) -> watch::Receiver<AuthSignal> {
        self.signal.subscribe()
    }

    #[tracing::instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthProviderError> {
        let tokens: TokenResponse = self
            .api
            .call(
                "signInWithPassword",
                &PasswordRequest {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;

        let identity = self.api.lookup(&tokens.id_token).await?;
        tracing::info!(uid = %tokens.local_id, "Signed in");
        self.establish(identity.clone(), tokens.id_token);
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthProviderError> {
        self.drop_session();
        Ok(())
    }

    #[tracing::instrument(skip(self, password))]
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity, AuthProviderError> {
        let tokens: TokenResponse = self
            .api
            .call(
                "signUp",
                &PasswordRequest {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;

        if !display_name.trim().is_empty() {
            let _: serde_json::Value = self
                .api
                .call(
                    "update",
                    &UpdateProfileRequest {
                        id_token: &tokens.id_token,
                        display_name: display_name.trim(),
                        return_secure_token: false,
                    },
                )
                .await?;
        }

        let identity = self.api.lookup(&tokens.id_token).await?;
        tracing::info!(uid = %tokens.local_id, "Account created");
        self.establish(identity.clone(), tokens.id_token);
        Ok(identity)
    }

    async fn send_email_verification(&self) -> Result<(), AuthProviderError> {
        let id_token = self.id_token().ok_or(AuthProviderError::NoCurrentUser)?;
        if self.current().map(|identity| identity.email_verified) == Some(true) {
            return Ok(());
        }

        let _: serde_json::Value = self
            .api
            .call(
                "sendOobCode",
                &OobCodeRequest {
                    request_type: "VERIFY_EMAIL",
                    id_token: Some(&id_token),
                    email: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthProviderError> {
        let _: serde_json::Value = self
            .api
            .call(
                "sendOobCode",
                &OobCodeRequest {
                    request_type: "PASSWORD_RESET",
                    id_token: None,
                    email: Some(email),
                },
            )
            .await?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), AuthProviderError> {
        let id_token = self.id_token().ok_or(AuthProviderError::NoCurrentUser)?;

        match self.api.lookup(&id_token).await {
            Ok(identity) => {
                self.establish(identity, id_token);
                Ok(())
            }
            Err(err @ (AuthProviderError::NoCurrentUser | AuthProviderError::UserNotFound)) => {
                tracing::warn!("Stored credentials rejected, signing out: {}", err);
                self.drop_session();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn provider_name(&self) -> &'static str {
        "identity_toolkit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> IdentityToolkitProvider {
        IdentityToolkitProvider::new(&IdentityToolkitConfig {
            api_key: Secret::new("test-key".to_string()),
            base_url: format!("{}/v1", server.uri()),
        })
    }

    fn lookup_body(verified: bool) -> serde_json::Value {
        json!({
            "users": [{
                "localId": "uid-1",
                "email": "ada@example.com",
                "emailVerified": verified,
                "displayName": "Ada"
            }]
        })
    }

    async fn mount_lookup(server: &MockServer, verified: bool) {
        Mock::given(method("POST"))
            .and(path("/v1/accounts:lookup"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(lookup_body(verified)))
            .mount(server)
            .await;
    }

    #[test]
    fn error_messages_map_to_kinds() {
        assert!(matches!(
            map_error_message("INVALID_LOGIN_CREDENTIALS"),
            AuthProviderError::InvalidCredentials
        ));
        assert!(matches!(
            map_error_message("EMAIL_EXISTS"),
            AuthProviderError::EmailInUse
        ));
        match map_error_message("WEAK_PASSWORD : Password should be at least 6 characters") {
            AuthProviderError::WeakPassword(detail) => {
                assert_eq!(detail, "Password should be at least 6 characters")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            map_error_message("QUOTA_EXCEEDED"),
            AuthProviderError::Provider(_)
        ));
    }

    #[tokio::test]
    async fn sign_in_looks_up_profile_and_announces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPassword"))
            .and(body_partial_json(json!({
                "email": "ada@example.com",
                "returnSecureToken": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "idToken": "token-1",
                "localId": "uid-1",
                "refreshToken": "refresh-1"
            })))
            .mount(&server)
            .await;
        mount_lookup(&server, true).await;

        let provider = provider(&server);
        let changes = provider.subscribe();

        let identity = provider.sign_in("ada@example.com", "secret1").await.unwrap();
        assert_eq!(identity.uid, "uid-1");
        assert!(identity.email_verified);
        assert_eq!(identity.display_name.as_deref(), Some("Ada"));
        assert_eq!(*changes.borrow(), AuthSignal::SignedIn(identity));
    }

    #[tokio::test]
    async fn clients_of_one_backend_hold_separate_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPassword"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "idToken": "token-1",
                "localId": "uid-1"
            })))
            .mount(&server)
            .await;
        mount_lookup(&server, true).await;

        let backend = IdentityToolkitBackend::new(&IdentityToolkitConfig {
            api_key: Secret::new("test-key".to_string()),
            base_url: format!("{}/v1", server.uri()),
        });
        let first = backend.client();
        let second = backend.client();

        first.sign_in("ada@example.com", "secret1").await.unwrap();

        assert!(first.current().is_some());
        assert!(second.current().is_none());
        assert!(matches!(
            second.send_email_verification().await,
            Err(AuthProviderError::NoCurrentUser)
        ));
        assert_eq!(backend.provider_name(), "identity_toolkit");
    }

    #[tokio::test]
    async fn rejected_sign_in_maps_error_and_stays_signed_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPassword"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "INVALID_PASSWORD" }
            })))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let err = provider
            .sign_in("ada@example.com", "wrong")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthProviderError::InvalidCredentials));
        assert_eq!(*provider.subscribe().borrow(), AuthSignal::SignedOut);
    }

    #[tokio::test]
    async fn reload_with_revoked_token_signs_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPassword"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "idToken": "token-1",
                "localId": "uid-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:lookup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(lookup_body(false)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:lookup"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "TOKEN_EXPIRED" }
            })))
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider.sign_in("ada@example.com", "secret1").await.unwrap();

        assert!(provider.reload().await.is_err());
        assert_eq!(*provider.subscribe().borrow(), AuthSignal::SignedOut);
        assert!(provider.current().is_none());
    }

    #[tokio::test]
    async fn password_reset_sends_oob_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:sendOobCode"))
            .and(body_partial_json(json!({
                "requestType": "PASSWORD_RESET",
                "email": "ada@example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "email": "ada@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider
            .send_password_reset("ada@example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn verification_requires_signed_in_user() {
        let server = MockServer::start().await;
        let provider = provider(&server);

        assert!(matches!(
            provider.send_email_verification().await,
            Err(AuthProviderError::NoCurrentUser)
        ));
    }
}
