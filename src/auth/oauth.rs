use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::AuthError;
use crate::args::BaseArgs;

pub const LOGIN_HOST: &str = "https://login.microsoftonline.com";

const BASE_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const SUCCESS_PAGE: &str = "<html><body><h1>Signed in</h1>\
    <p>You can close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Sign-in failed</h1>\
    <p>Return to the terminal for details.</p></body></html>";

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub client_id: String,
    pub authority: String,
    pub redirect_uri: Option<String>,
}

impl AuthSettings {
    pub fn from_args(base: &BaseArgs) -> Result<Self, AuthError> {
        let client_id = base
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingClientId)?;
        Ok(Self {
            client_id: client_id.to_string(),
            authority: base.authority.trim_end_matches('/').to_string(),
            redirect_uri: base.redirect_uri.clone(),
        })
    }

    /// Authority for a specific directory, or the configured one when none is given.
    pub fn authority_for(&self, tenant: Option<&str>) -> String {
        match tenant {
            Some(tenant) => format!("{LOGIN_HOST}/{tenant}"),
            None => self.authority.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AuthorizationCodeRequest<'a> {
    client_id: &'a str,
    grant_type: &'static str,
    code: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
    scope: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshTokenRequest<'a> {
    client_id: &'a str,
    grant_type: &'static str,
    refresh_token: &'a str,
    scope: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Identity claims read from the id token payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IdTokenClaims {
    pub oid: Option<String>,
    pub tid: Option<String>,
    pub preferred_username: Option<String>,
    pub name: Option<String>,
}

/// Resource scopes plus the OpenID scopes needed for an id and refresh token.
pub fn scope_string(scopes: &[&str]) -> String {
    let mut all: Vec<&str> = BASE_SCOPES.to_vec();
    for scope in scopes {
        if !all.contains(scope) {
            all.push(scope);
        }
    }
    all.join(" ")
}

pub fn generate_code_verifier() -> Result<String> {
    Ok(base64_url_encode(&random_bytes::<64>()?))
}

pub fn generate_code_challenge(verifier: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let hash = hasher.finalize();
    base64_url_encode(&hash)
}

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|e| anyhow!("failed to generate random bytes: {e}"))?;
    Ok(bytes)
}

fn base64_url_encode(input: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(input)
}

/// Decodes the claims of a JWT without checking its signature. Only used on
/// tokens received directly from the token endpoint.
pub fn decode_id_token(token: &str) -> Result<IdTokenClaims> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| anyhow!("id token is not a JWT"))?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("id token payload is not base64url")?;
    serde_json::from_slice(&bytes).context("id token payload is not JSON")
}

pub fn authorize_url(
    authority: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    code_challenge: &str,
    state: &str,
) -> String {
    format!(
        "{authority}/oauth2/v2.0/authorize?client_id={}&response_type=code&redirect_uri={}&response_mode=query&scope={}&code_challenge={}&code_challenge_method=S256&state={}&prompt=select_account",
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(scope),
        urlencoding::encode(code_challenge),
        urlencoding::encode(state),
    )
}

/// Loopback listener and the redirect URI that points at it.
async fn bind_redirect(configured: Option<&str>) -> Result<(TcpListener, String)> {
    match configured {
        Some(uri) => {
            let url = Url::parse(uri).with_context(|| format!("invalid redirect URI {uri}"))?;
            let port = url
                .port_or_known_default()
                .ok_or_else(|| anyhow!("redirect URI {uri} has no port"))?;
            let listener = TcpListener::bind(("127.0.0.1", port))
                .await
                .with_context(|| format!("failed to listen on port {port} for {uri}"))?;
            Ok((listener, uri.to_string()))
        }
        None => {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .context("failed to bind local server for sign-in callback")?;
            let port = listener.local_addr()?.port();
            Ok((listener, format!("http://localhost:{port}")))
        }
    }
}

/// Runs the browser sign-in and returns the raw token response.
///
/// `announce` controls whether progress is printed to stderr; the terminal
/// UI owns the screen and only logs.
pub async fn acquire_interactive(
    http: &Client,
    settings: &AuthSettings,
    scopes: &[&str],
    tenant: Option<&str>,
    announce: bool,
) -> Result<TokenResponse> {
    let authority = settings.authority_for(tenant);
    let scope = scope_string(scopes);
    let code_verifier = generate_code_verifier()?;
    let code_challenge = generate_code_challenge(&code_verifier);
    let state = base64_url_encode(&random_bytes::<16>()?);

    let (listener, redirect_uri) = bind_redirect(settings.redirect_uri.as_deref()).await?;
    let auth_url = authorize_url(
        &authority,
        &settings.client_id,
        &redirect_uri,
        &scope,
        &code_challenge,
        &state,
    );

    tracing::info!(%authority, "starting interactive sign-in");
    if announce {
        eprintln!("Opening browser for sign-in...");
        eprintln!("If the browser doesn't open, visit: {auth_url}");
    }
    if let Err(e) = open::that(&auth_url) {
        tracing::warn!(error = %e, url = %auth_url, "failed to open browser");
    }

    let code = tokio::time::timeout(CALLBACK_TIMEOUT, receive_callback(listener, &state))
        .await
        .map_err(|_| AuthError::CallbackFailed("timed out waiting for the browser".into()))??;

    exchange_code_for_token(
        http,
        &authority,
        &settings.client_id,
        &code,
        &redirect_uri,
        &code_verifier,
        &scope,
    )
    .await
}

#[derive(Debug, Default, PartialEq)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn is_empty(&self) -> bool {
        self.code.is_none() && self.error.is_none()
    }
}

async fn receive_callback(listener: TcpListener, expected_state: &str) -> Result<String> {
    loop {
        let (mut stream, _) = listener.accept().await?;

        let mut buffer = vec![0u8; 8192];
        let n = stream.read(&mut buffer).await?;
        let request = String::from_utf8_lossy(&buffer[..n]);
        let params = parse_callback_request(&request);

        // favicon and preconnect requests carry neither a code nor an error
        if params.is_empty() {
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await;
            continue;
        }

        let outcome = match (&params.error, &params.code) {
            (Some(error), _) => Err(AuthError::CallbackFailed(format!(
                "{error}: {}",
                params.error_description.as_deref().unwrap_or_default()
            ))),
            (None, Some(_)) if params.state.as_deref() != Some(expected_state) => Err(
                AuthError::CallbackFailed("state parameter mismatch".to_string()),
            ),
            (None, Some(code)) => Ok(code.clone()),
            (None, None) => Err(AuthError::CallbackFailed("no authorization code".into())),
        };

        let page = if outcome.is_ok() {
            SUCCESS_PAGE
        } else {
            FAILURE_PAGE
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{page}",
            page.len()
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        return outcome.map_err(Into::into);
    }
}

fn parse_callback_request(request: &str) -> CallbackParams {
    let mut params = CallbackParams::default();
    // GET /?code=...&state=... HTTP/1.1
    let Some(target) = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
    else {
        return params;
    };
    let Some((_, query)) = target.split_once('?') else {
        return params;
    };

    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(&value.replace('+', " "))
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match key {
            "code" => params.code = Some(value),
            "state" => params.state = Some(value),
            "error" => params.error = Some(value),
            "error_description" => params.error_description = Some(value),
            _ => {}
        }
    }
    params
}

async fn exchange_code_for_token(
    http: &Client,
    authority: &str,
    client_id: &str,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
    scope: &str,
) -> Result<TokenResponse> {
    let params = AuthorizationCodeRequest {
        client_id,
        grant_type: "authorization_code",
        code,
        redirect_uri,
        code_verifier,
        scope,
    };
    post_token_request(http, authority, &params)
        .await
        .context("failed to exchange code for token")
}

pub async fn refresh_access_token(
    http: &Client,
    authority: &str,
    client_id: &str,
    refresh_token: &str,
    scopes: &[&str],
) -> Result<TokenResponse> {
    let scope = scope_string(scopes);
    let params = RefreshTokenRequest {
        client_id,
        grant_type: "refresh_token",
        refresh_token,
        scope: &scope,
    };
    post_token_request(http, authority, &params)
        .await
        .context("failed to refresh token")
}

async fn post_token_request<P: Serialize>(
    http: &Client,
    authority: &str,
    params: &P,
) -> Result<TokenResponse> {
    let token_endpoint = format!("{authority}/oauth2/v2.0/token");
    let response = http
        .post(&token_endpoint)
        .form(params)
        .send()
        .await
        .with_context(|| format!("request to {token_endpoint} failed"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(token_error(status.as_u16(), body).into());
    }

    response
        .json::<TokenResponse>()
        .await
        .context("failed to parse token response")
}

fn token_error(status: u16, body: String) -> AuthError {
    match serde_json::from_str::<TokenErrorResponse>(&body) {
        Ok(parsed)
            if matches!(
                parsed.error.as_str(),
                "interaction_required" | "consent_required" | "invalid_grant" | "login_required"
            ) =>
        {
            AuthError::ConsentRequired(parsed.error_description.unwrap_or(parsed.error))
        }
        _ => AuthError::TokenEndpoint { status, body },
    }
}

pub fn mask_token(token: &str) -> String {
    if token.len() <= 8 {
        return "***".to_string();
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server::serve_once;

    fn settings() -> AuthSettings {
        AuthSettings {
            client_id: "client-1".into(),
            authority: "https://login.microsoftonline.com/common".into(),
            redirect_uri: None,
        }
    }

    #[test]
    fn code_verifier_is_pkce_compliant() {
        let verifier = generate_code_verifier().unwrap();
        assert!(verifier.len() >= 43 && verifier.len() <= 128);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(verifier, generate_code_verifier().unwrap());
    }

    #[test]
    fn code_challenge_is_sha256_base64url() {
        // RFC 7636 appendix B
        let challenge = generate_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn scopes_always_include_openid_set() {
        assert_eq!(
            scope_string(&["https://api.loganalytics.io/.default"]),
            "openid profile offline_access https://api.loganalytics.io/.default"
        );
        assert_eq!(scope_string(&["openid"]), "openid profile offline_access");
    }

    #[test]
    fn authority_for_tenant_uses_login_host() {
        let settings = settings();
        assert_eq!(
            settings.authority_for(Some("t-1")),
            "https://login.microsoftonline.com/t-1"
        );
        assert_eq!(
            settings.authority_for(None),
            "https://login.microsoftonline.com/common"
        );
    }

    #[test]
    fn authorize_url_encodes_parameters() {
        let url = authorize_url(
            "https://login.microsoftonline.com/common",
            "client-1",
            "http://localhost:5000",
            "openid profile",
            "challenge",
            "state-1",
        );
        assert!(url.starts_with("https://login.microsoftonline.com/common/oauth2/v2.0/authorize?"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A5000"));
        assert!(url.contains("scope=openid%20profile"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=state-1"));
    }

    #[test]
    fn parse_callback_with_code_and_state() {
        let params =
            parse_callback_request("GET /?code=abc%2F123&state=xyz HTTP/1.1\r\nHost: localhost\r\n");
        assert_eq!(params.code.as_deref(), Some("abc/123"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
    }

    #[test]
    fn parse_callback_with_error() {
        let params = parse_callback_request(
            "GET /?error=access_denied&error_description=user+cancelled HTTP/1.1\r\n",
        );
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("user cancelled"));
        assert_eq!(params.code, None);
    }

    #[test]
    fn parse_callback_without_query() {
        assert!(parse_callback_request("GET /favicon.ico HTTP/1.1\r\n").is_empty());
        assert!(parse_callback_request("").is_empty());
    }

    #[test]
    fn decode_id_token_reads_claims() {
        let payload = base64_url_encode(
            br#"{"oid":"o-1","tid":"t-1","preferred_username":"dev@contoso.com","name":"Dev"}"#,
        );
        let token = format!("header.{payload}.signature");
        let claims = decode_id_token(&token).unwrap();
        assert_eq!(claims.oid.as_deref(), Some("o-1"));
        assert_eq!(claims.tid.as_deref(), Some("t-1"));
        assert_eq!(claims.preferred_username.as_deref(), Some("dev@contoso.com"));
        assert!(decode_id_token("not-a-jwt").is_err());
    }

    #[test]
    fn interaction_errors_map_to_consent_required() {
        let err = token_error(
            400,
            r#"{"error":"invalid_grant","error_description":"AADSTS50076 MFA required"}"#.into(),
        );
        assert!(matches!(err, AuthError::ConsentRequired(ref msg) if msg.contains("AADSTS50076")));

        let err = token_error(500, "oops".into());
        assert!(matches!(err, AuthError::TokenEndpoint { status: 500, .. }));
    }

    #[test]
    fn mask_token_hides_middle() {
        assert_eq!(mask_token("short"), "***");
        assert_eq!(mask_token("abcdefghijkl"), "abcd...ijkl");
    }

    #[tokio::test]
    async fn refresh_posts_form_to_token_endpoint() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"access_token":"at-2","refresh_token":"rt-2","expires_in":3600}"#,
        )
        .await;
        let http = crate::http::build_client().unwrap();
        let response = refresh_access_token(
            &http,
            &base,
            "client-1",
            "rt-1",
            &["https://management.azure.com/user_impersonation"],
        )
        .await
        .unwrap();

        assert_eq!(response.access_token, "at-2");
        assert_eq!(response.refresh_token.as_deref(), Some("rt-2"));
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /oauth2/v2.0/token "));
        assert!(request.contains("grant_type=refresh_token"));
        assert!(request.contains("refresh_token=rt-1"));
        assert!(request.contains("offline_access"));
    }

    #[tokio::test]
    async fn callback_rejects_state_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(async move { receive_callback(listener, "expected").await });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /?code=c&state=other HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut reply = String::new();
        let _ = stream.read_to_string(&mut reply).await;

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("state parameter mismatch"));
        assert!(reply.contains("Sign-in failed"));
    }
}
