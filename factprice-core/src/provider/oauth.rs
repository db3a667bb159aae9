//! OAuth session manager.
//!
//! Owns the [`CredentialState`] and walks it through
//! `NoCredentials → Authorizing → Authorized`, refreshing in place while
//! authorized:
//!
//! - no access token and no refresh token: full authorization-code flow
//! - refresh token but no access token, or token older than the refresh
//!   interval: refresh-token grant
//! - otherwise: the cached access token, with no external call
//!
//! Every successful issuance is persisted before the token is handed out, so
//! an interrupted run resumes without re-authorizing.
//!
//! The interactive part of authorization (showing a URL, capturing the
//! redirect) is a pluggable [`AuthorizationCodeProvider`]; the token endpoint
//! sits behind [`TokenTransport`] so both can be mocked.

use super::credentials::{CredentialState, CredentialStore};
use super::error::AuthError;
use chrono::{Duration, Local, NaiveDateTime};
use serde::Deserialize;
use tracing::{info, warn};

/// Where the session stands. Derived from the credential state, except for
/// the transient `Authorizing` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoCredentials,
    Authorizing,
    Authorized,
}

/// A token request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode { code: String, redirect_uri: String },
    RefreshToken { refresh_token: String },
}

impl TokenGrant {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }

    /// Form-encoded fields for the token endpoint.
    pub fn form(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::AuthorizationCode { code, redirect_uri } => vec![
                ("grant_type", self.kind().to_string()),
                ("code", code.clone()),
                ("redirect_uri", redirect_uri.clone()),
            ],
            Self::RefreshToken { refresh_token } => vec![
                ("grant_type", self.kind().to_string()),
                ("refresh_token", refresh_token.clone()),
            ],
        }
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Exchanges a grant for tokens (Basic-authenticated with the app key pair).
pub trait TokenTransport: Send {
    fn request_token(
        &self,
        grant: &TokenGrant,
        app_key: &str,
        app_secret: &str,
    ) -> Result<TokenResponse, AuthError>;
}

/// Supplied by the surrounding environment: show `authorization_url` to the
/// user and return the URL the browser was redirected to.
pub trait AuthorizationCodeProvider: Send {
    fn authorize(&self, authorization_url: &str) -> Result<String, AuthError>;
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub authorize_url: String,
    pub refresh_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            authorize_url: "https://api.schwabapi.com/v1/oauth/authorize".into(),
            refresh_interval: Duration::minutes(29),
        }
    }
}

/// The OAuth session. Sole writer of the credential state.
pub struct OAuthSession {
    store: CredentialStore,
    state: CredentialState,
    transport: Box<dyn TokenTransport>,
    code_provider: Box<dyn AuthorizationCodeProvider>,
    settings: SessionSettings,
    phase: SessionPhase,
}

impl OAuthSession {
    /// Load (or initialise) the credential store and build a session on it.
    pub fn open(
        store: CredentialStore,
        transport: Box<dyn TokenTransport>,
        code_provider: Box<dyn AuthorizationCodeProvider>,
        settings: SessionSettings,
    ) -> Result<Self, AuthError> {
        let state = store.load_or_init()?;
        let phase = if state.access_token.is_some() {
            SessionPhase::Authorized
        } else {
            SessionPhase::NoCredentials
        };
        Ok(Self {
            store,
            state,
            transport,
            code_provider,
            settings,
            phase,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn credentials(&self) -> &CredentialState {
        &self.state
    }

    /// Return a usable access token, issuing or refreshing one if needed.
    pub fn acquire(&mut self) -> Result<String, AuthError> {
        self.acquire_at(Local::now().naive_local())
    }

    /// [`acquire`](Self::acquire) against an explicit clock reading.
    pub fn acquire_at(&mut self, now: NaiveDateTime) -> Result<String, AuthError> {
        let stale = self.is_stale(now);
        let access = self.state.access_token.clone();
        let refresh = self.state.refresh_token.clone();

        match (access, refresh) {
            (None, None) => self.authorize(now),
            (None, Some(refresh)) => self.refresh(refresh, now),
            (Some(_), Some(refresh)) if stale => self.refresh(refresh, now),
            (Some(_), None) if stale => self.authorize(now),
            (Some(token), _) => Ok(token),
        }
    }

    /// Token age exceeds the refresh interval, or is unknown.
    fn is_stale(&self, now: NaiveDateTime) -> bool {
        match self.state.last_issued_at {
            Some(issued) => now - issued > self.settings.refresh_interval,
            None => true,
        }
    }

    fn authorize(&mut self, now: NaiveDateTime) -> Result<String, AuthError> {
        self.require_app_credentials()?;
        if self.state.redirect_uri.is_empty() {
            return Err(AuthError::MissingCredential("redirect_uri"));
        }

        self.phase = SessionPhase::Authorizing;
        info!("no usable token: starting authorization");

        let result = self.run_authorization(now);
        if result.is_err() {
            self.phase = SessionPhase::NoCredentials;
        }
        result
    }

    fn run_authorization(&mut self, now: NaiveDateTime) -> Result<String, AuthError> {
        let url = authorization_url(
            &self.settings.authorize_url,
            &self.state.app_key,
            &self.state.redirect_uri,
        )?;
        let redirect = self.code_provider.authorize(&url)?;
        let code = extract_authorization_code(&redirect)?;

        let grant = TokenGrant::AuthorizationCode {
            code,
            redirect_uri: self.state.redirect_uri.clone(),
        };
        let response =
            self.transport
                .request_token(&grant, &self.state.app_key, &self.state.app_secret)?;
        self.issue(response, now)
    }

    fn refresh(&mut self, refresh_token: String, now: NaiveDateTime) -> Result<String, AuthError> {
        self.require_app_credentials()?;
        info!("refreshing access token");

        let grant = TokenGrant::RefreshToken { refresh_token };
        let response = self
            .transport
            .request_token(&grant, &self.state.app_key, &self.state.app_secret)
            .map_err(|e| {
                warn!(%e, "token refresh failed");
                e
            })?;
        self.issue(response, now)
    }

    /// Record a new token pair and persist it before returning the token.
    fn issue(&mut self, response: TokenResponse, now: NaiveDateTime) -> Result<String, AuthError> {
        let refresh_token = response
            .refresh_token
            .or_else(|| self.state.refresh_token.clone())
            .ok_or_else(|| AuthError::MalformedResponse("no refresh_token issued".into()))?;

        let mut next = self.state.clone();
        next.record_issuance(response.access_token.clone(), refresh_token, now);
        self.store.save(&next)?;

        self.state = next;
        self.phase = SessionPhase::Authorized;
        info!(path = %self.store.path().display(), "token issued and persisted");
        Ok(response.access_token)
    }

    fn require_app_credentials(&self) -> Result<(), AuthError> {
        if self.state.app_key.is_empty() {
            return Err(AuthError::MissingCredential("app_key"));
        }
        if self.state.app_secret.is_empty() {
            return Err(AuthError::MissingCredential("app_secret"));
        }
        Ok(())
    }
}

/// Build the URL the user must visit to grant access.
pub fn authorization_url(base: &str, app_key: &str, redirect_uri: &str) -> Result<String, AuthError> {
    reqwest::Url::parse_with_params(base, &[("client_id", app_key), ("redirect_uri", redirect_uri)])
        .map(String::from)
        .map_err(|e| AuthError::InvalidUrl(format!("{base}: {e}")))
}

/// Pull the (percent-decoded) `code` query parameter out of a redirect URL.
pub fn extract_authorization_code(redirect_url: &str) -> Result<String, AuthError> {
    let url = reqwest::Url::parse(redirect_url.trim())
        .map_err(|e| AuthError::InvalidUrl(format!("redirect: {e}")))?;
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .filter(|code| !code.is_empty())
        .ok_or(AuthError::MissingCode)
}

/// Token endpoint over HTTPS.
pub struct HttpTokenTransport {
    client: reqwest::blocking::Client,
    token_url: String,
}

impl HttpTokenTransport {
    pub fn new(token_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, AuthError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Network(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
        })
    }
}

impl TokenTransport for HttpTokenTransport {
    fn request_token(
        &self,
        grant: &TokenGrant,
        app_key: &str,
        app_secret: &str,
    ) -> Result<TokenResponse, AuthError> {
        let resp = self
            .client
            .post(&self.token_url)
            .basic_auth(app_key, Some(app_secret))
            .form(&grant.form())
            .send()
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                grant: grant.kind(),
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }

        resp.json::<TokenResponse>()
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Calls(Arc<Mutex<Vec<TokenGrant>>>);

    impl Calls {
        fn grants(&self) -> Vec<TokenGrant> {
            self.0.lock().unwrap().clone()
        }
    }

    struct MockTransport {
        calls: Calls,
        status: Option<u16>,
        refresh_in_response: bool,
    }

    impl TokenTransport for MockTransport {
        fn request_token(&self, grant: &TokenGrant, key: &str, secret: &str) -> Result<TokenResponse, AuthError> {
            assert_eq!((key, secret), ("key", "secret"));
            self.calls.0.lock().unwrap().push(grant.clone());
            if let Some(status) = self.status {
                return Err(AuthError::Rejected {
                    grant: grant.kind(),
                    status,
                    body: "denied".into(),
                });
            }
            let n = self.calls.0.lock().unwrap().len();
            Ok(TokenResponse {
                access_token: format!("access-{n}"),
                refresh_token: self.refresh_in_response.then(|| format!("refresh-{n}")),
                expires_in: Some(1800),
            })
        }
    }

    struct Redirect(&'static str, Arc<Mutex<Vec<String>>>);

    impl AuthorizationCodeProvider for Redirect {
        fn authorize(&self, url: &str) -> Result<String, AuthError> {
            self.1.lock().unwrap().push(url.to_string());
            Ok(self.0.to_string())
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: CredentialStore,
        calls: Calls,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new(state: CredentialState) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = CredentialStore::new(dir.path().join("creds.txt"));
            store.save(&state).unwrap();
            Self {
                _dir: dir,
                store,
                calls: Calls::default(),
                prompts: Arc::default(),
            }
        }

        fn session(&self, redirect: &'static str, status: Option<u16>) -> OAuthSession {
            self.session_with(redirect, status, true)
        }

        fn session_with(&self, redirect: &'static str, status: Option<u16>, refresh: bool) -> OAuthSession {
            OAuthSession::open(
                self.store.clone(),
                Box::new(MockTransport {
                    calls: self.calls.clone(),
                    status,
                    refresh_in_response: refresh,
                }),
                Box::new(Redirect(redirect, self.prompts.clone())),
                SessionSettings::default(),
            )
            .unwrap()
        }
    }

    fn app_only() -> CredentialState {
        CredentialState {
            app_key: "key".into(),
            app_secret: "secret".into(),
            redirect_uri: "https://127.0.0.1".into(),
            ..Default::default()
        }
    }

    fn authorized(issued_minutes_ago: i64) -> CredentialState {
        CredentialState {
            access_token: Some("cached".into()),
            refresh_token: Some("refresh-0".into()),
            last_issued_at: Some(noon() - Duration::minutes(issued_minutes_ago)),
            ..app_only()
        }
    }

    const REDIRECT: &str = "https://127.0.0.1/?code=C0.abc%40&session=xyz";

    #[test]
    fn fresh_token_is_returned_without_calls() {
        let h = Harness::new(authorized(10));
        let mut session = h.session(REDIRECT, None);
        assert_eq!(session.phase(), SessionPhase::Authorized);

        assert_eq!(session.acquire_at(noon()).unwrap(), "cached");
        assert!(h.calls.grants().is_empty());
        assert!(h.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn stale_token_is_refreshed_and_persisted() {
        let h = Harness::new(authorized(30));
        let mut session = h.session(REDIRECT, None);

        assert_eq!(session.acquire_at(noon()).unwrap(), "access-1");
        assert_eq!(
            h.calls.grants(),
            vec![TokenGrant::RefreshToken {
                refresh_token: "refresh-0".into()
            }]
        );

        let persisted = h.store.load_or_init().unwrap();
        assert_eq!(persisted.access_token.as_deref(), Some("access-1"));
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(persisted.last_issued_at, Some(noon()));
        assert_eq!(persisted.app_key, "key");

        // Now fresh again: no further calls.
        assert_eq!(session.acquire_at(noon()).unwrap(), "access-1");
        assert_eq!(h.calls.grants().len(), 1);
    }

    #[test]
    fn refresh_token_without_access_token_refreshes() {
        let h = Harness::new(CredentialState {
            refresh_token: Some("refresh-0".into()),
            ..app_only()
        });
        let mut session = h.session(REDIRECT, None);
        session.acquire_at(noon()).unwrap();
        assert_eq!(h.calls.grants()[0].kind(), "refresh_token");
        assert!(h.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn refresh_without_new_refresh_token_keeps_the_old_one() {
        let h = Harness::new(authorized(45));
        let mut session = h.session_with(REDIRECT, None, false);
        session.acquire_at(noon()).unwrap();
        let persisted = h.store.load_or_init().unwrap();
        assert_eq!(persisted.access_token.as_deref(), Some("access-1"));
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-0"));
    }

    #[test]
    fn no_tokens_runs_full_authorization() {
        let h = Harness::new(app_only());
        let mut session = h.session(REDIRECT, None);
        assert_eq!(session.phase(), SessionPhase::NoCredentials);

        assert_eq!(session.acquire_at(noon()).unwrap(), "access-1");
        assert_eq!(session.phase(), SessionPhase::Authorized);

        let prompts = h.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("https://api.schwabapi.com/v1/oauth/authorize?client_id=key"));
        assert_eq!(
            h.calls.grants(),
            vec![TokenGrant::AuthorizationCode {
                code: "C0.abc@".into(),
                redirect_uri: "https://127.0.0.1".into(),
            }]
        );
    }

    #[test]
    fn stale_token_without_refresh_token_reauthorizes() {
        let h = Harness::new(CredentialState {
            refresh_token: None,
            ..authorized(30)
        });
        let mut session = h.session(REDIRECT, None);

        assert_eq!(session.acquire_at(noon()).unwrap(), "access-1");
        assert_eq!(h.prompts.lock().unwrap().len(), 1);
        assert_eq!(h.calls.grants()[0].kind(), "authorization_code");

        let persisted = h.store.load_or_init().unwrap();
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn fresh_token_without_refresh_token_is_still_used() {
        let h = Harness::new(CredentialState {
            refresh_token: None,
            ..authorized(5)
        });
        let mut session = h.session(REDIRECT, None);
        assert_eq!(session.acquire_at(noon()).unwrap(), "cached");
        assert!(h.calls.grants().is_empty());
    }

    #[test]
    fn redirect_without_code_is_an_auth_failure() {
        let h = Harness::new(app_only());
        let mut session = h.session("https://127.0.0.1/?error=access_denied", None);
        let err = session.acquire_at(noon()).unwrap_err();
        assert!(matches!(err, AuthError::MissingCode));
        assert_eq!(session.phase(), SessionPhase::NoCredentials);
        assert!(h.calls.grants().is_empty());
    }

    #[test]
    fn rejected_exchange_is_an_auth_failure() {
        let h = Harness::new(authorized(60));
        let mut session = h.session(REDIRECT, Some(400));
        let err = session.acquire_at(noon()).unwrap_err();
        assert!(matches!(err, AuthError::Rejected { status: 400, .. }));

        // Nothing persisted on failure.
        let persisted = h.store.load_or_init().unwrap();
        assert_eq!(persisted.access_token.as_deref(), Some("cached"));
    }

    #[test]
    fn missing_app_key_fails_before_any_call() {
        let h = Harness::new(CredentialState::default());
        let mut session = h.session(REDIRECT, None);
        let err = session.acquire_at(noon()).unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential("app_key")));
        assert!(h.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn extracts_percent_decoded_code() {
        assert_eq!(extract_authorization_code(REDIRECT).unwrap(), "C0.abc@");
        assert!(matches!(
            extract_authorization_code("https://127.0.0.1/?code="),
            Err(AuthError::MissingCode)
        ));
        assert!(matches!(
            extract_authorization_code("not a url"),
            Err(AuthError::InvalidUrl(_))
        ));
    }

    #[test]
    fn grant_forms() {
        let refresh = TokenGrant::RefreshToken {
            refresh_token: "r".into(),
        };
        assert_eq!(
            refresh.form(),
            vec![("grant_type", "refresh_token".to_string()), ("refresh_token", "r".to_string())]
        );
    }
}
