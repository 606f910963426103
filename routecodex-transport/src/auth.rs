use routecodex_core::RouterError;
use routecodex_core::config::AuthConfig;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A credential resolved for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAuth {
    pub header_name: String,
    pub header_value: String,
    /// Identifies which credential was used, for error correlation
    /// (`bearer#1`, `tokenfile`, ...). Never contains the secret.
    pub provider_key: String,
}

impl ResolvedAuth {
    /// The bare secret, for adapters that put the key in a non-standard
    /// header (`x-goog-api-key` carries the key without a scheme).
    pub fn bare_value(&self) -> &str {
        self.header_value
            .strip_prefix("Bearer ")
            .unwrap_or(&self.header_value)
    }
}

struct OauthState {
    token: String,
    expires_at: Instant,
}

/// Assembles credentials per request. Static keys rotate round-robin;
/// tokenfiles are read at request time and never cached; OAuth tokens
/// are cached until shortly before expiry.
pub struct AuthAssembler {
    config: AuthConfig,
    cursor: AtomicUsize,
    oauth: Mutex<Option<OauthState>>,
    http: reqwest::Client,
}

impl AuthAssembler {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            cursor: AtomicUsize::new(0),
            oauth: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    pub async fn resolve(&self) -> Result<ResolvedAuth, RouterError> {
        match &self.config {
            AuthConfig::Apikey { key, header } => Ok(ResolvedAuth {
                header_name: header.clone(),
                header_value: if header.eq_ignore_ascii_case("authorization") {
                    format!("Bearer {key}")
                } else {
                    key.clone()
                },
                provider_key: "apikey".to_string(),
            }),
            AuthConfig::Bearer { keys } => {
                if keys.is_empty() {
                    return Err(RouterError::AuthMissing("no bearer keys configured".into()));
                }
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % keys.len();
                Ok(ResolvedAuth {
                    header_name: "Authorization".to_string(),
                    header_value: format!("Bearer {}", keys[index]),
                    provider_key: format!("bearer#{index}"),
                })
            }
            AuthConfig::Tokenfile { path } => {
                let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                    RouterError::AuthMissing(format!("tokenfile '{path}': {e}"))
                })?;
                let token = token.trim();
                if token.is_empty() {
                    return Err(RouterError::AuthMissing(format!(
                        "tokenfile '{path}' is empty"
                    )));
                }
                Ok(ResolvedAuth {
                    header_name: "Authorization".to_string(),
                    header_value: format!("Bearer {token}"),
                    provider_key: "tokenfile".to_string(),
                })
            }
            AuthConfig::Cookie { cookie } => Ok(ResolvedAuth {
                header_name: "Cookie".to_string(),
                header_value: cookie.clone(),
                provider_key: "cookie".to_string(),
            }),
            AuthConfig::Oauth {
                token_url,
                client_id,
                client_secret,
                scopes,
            } => {
                let mut guard = self.oauth.lock().await;
                if let Some(state) = guard.as_ref() {
                    if state.expires_at > Instant::now() {
                        return Ok(ResolvedAuth {
                            header_name: "Authorization".to_string(),
                            header_value: format!("Bearer {}", state.token),
                            provider_key: "oauth".to_string(),
                        });
                    }
                }

                let mut form = json!({
                    "grant_type": "client_credentials",
                    "client_id": client_id,
                });
                if let Some(secret) = client_secret {
                    form["client_secret"] = json!(secret);
                }
                if !scopes.is_empty() {
                    form["scope"] = json!(scopes.join(" "));
                }

                let response = self
                    .http
                    .post(token_url)
                    .json(&form)
                    .send()
                    .await
                    .map_err(|e| RouterError::AuthInvalid(format!("token endpoint: {e}")))?;
                if !response.status().is_success() {
                    return Err(RouterError::AuthInvalid(format!(
                        "token endpoint returned {}",
                        response.status()
                    )));
                }
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| RouterError::AuthInvalid(format!("token body: {e}")))?;
                let token = body["access_token"]
                    .as_str()
                    .ok_or_else(|| RouterError::AuthInvalid("no access_token".into()))?
                    .to_string();
                let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
                // Refresh a minute early so in-flight requests never race
                // an expiring token.
                *guard = Some(OauthState {
                    token: token.clone(),
                    expires_at: Instant::now()
                        + Duration::from_secs(expires_in.saturating_sub(60).max(30)),
                });
                Ok(ResolvedAuth {
                    header_name: "Authorization".to_string(),
                    header_value: format!("Bearer {token}"),
                    provider_key: "oauth".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apikey_custom_header() {
        let auth = AuthAssembler::new(AuthConfig::Apikey {
            key: "sk-1".into(),
            header: "x-api-key".into(),
        });
        let resolved = auth.resolve().await.unwrap();
        assert_eq!(resolved.header_name, "x-api-key");
        assert_eq!(resolved.header_value, "sk-1");
        assert_eq!(resolved.bare_value(), "sk-1");
    }

    #[tokio::test]
    async fn test_apikey_authorization_gets_bearer_scheme() {
        let auth = AuthAssembler::new(AuthConfig::Apikey {
            key: "sk-1".into(),
            header: "Authorization".into(),
        });
        let resolved = auth.resolve().await.unwrap();
        assert_eq!(resolved.header_value, "Bearer sk-1");
        assert_eq!(resolved.bare_value(), "sk-1");
    }

    #[tokio::test]
    async fn test_bearer_rotation() {
        let auth = AuthAssembler::new(AuthConfig::Bearer {
            keys: vec!["a".into(), "b".into()],
        });
        let first = auth.resolve().await.unwrap();
        let second = auth.resolve().await.unwrap();
        let third = auth.resolve().await.unwrap();
        assert_eq!(first.provider_key, "bearer#0");
        assert_eq!(second.provider_key, "bearer#1");
        assert_eq!(third.provider_key, "bearer#0");
        assert_eq!(first.header_value, "Bearer a");
    }

    #[tokio::test]
    async fn test_tokenfile_read_at_request_time() {
        let dir = std::env::temp_dir().join(format!("rcx-auth-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("token");
        std::fs::write(&path, "tok-1\n").unwrap();

        let auth = AuthAssembler::new(AuthConfig::Tokenfile {
            path: path.to_string_lossy().into_owned(),
        });
        assert_eq!(auth.resolve().await.unwrap().header_value, "Bearer tok-1");

        // A rotated file is picked up by the very next request.
        std::fs::write(&path, "tok-2").unwrap();
        assert_eq!(auth.resolve().await.unwrap().header_value, "Bearer tok-2");
    }

    #[tokio::test]
    async fn test_missing_tokenfile_is_auth_error() {
        let auth = AuthAssembler::new(AuthConfig::Tokenfile {
            path: "/nonexistent/token".into(),
        });
        let err = auth.resolve().await.unwrap_err();
        assert_eq!(err.kind(), routecodex_core::error::ErrorKind::Auth);
    }
}
