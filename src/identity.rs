//! Actor resolution from opaque request tokens.
//!
//! Tokens are HS256 JWTs whose claims carry the user id, a display name and
//! an expiry timestamp.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::{ServiceAccountConfig, TokenManagerConfig};
use crate::error::{SearchError, SearchResult};
use crate::model::Actor;

/// Turns request tokens into actors.
pub trait TokenManager: Send + Sync {
    /// Resolves the actor behind `token`, failing with `Unauthenticated`.
    fn dismantle_token(&self, token: &str) -> SearchResult<Actor>;

    /// Privileged identity used to enumerate every space.
    fn service_actor(&self) -> SearchResult<Actor>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    name: String,
    exp: i64,
    #[serde(default)]
    svc: bool,
}

pub struct JwtTokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_ttl_secs: i64,
    service_account: ServiceAccountConfig,
}

impl JwtTokenManager {
    pub fn new(cfg: &TokenManagerConfig, service_account: ServiceAccountConfig) -> SearchResult<Self> {
        if cfg.secret.is_empty() {
            return Err(SearchError::Internal(
                "token manager secret is not configured".into(),
            ));
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Ok(Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            validation,
            token_ttl_secs: cfg.token_ttl_secs,
            service_account,
        })
    }

    /// Issues a token for `user_id` valid for the configured lifetime.
    pub fn mint(&self, user_id: &str, display_name: &str) -> SearchResult<String> {
        self.mint_with_expiry(user_id, display_name, Utc::now().timestamp() + self.token_ttl_secs)
    }

    pub fn mint_with_expiry(
        &self,
        user_id: &str,
        display_name: &str,
        exp: i64,
    ) -> SearchResult<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            name: display_name.to_string(),
            exp,
            svc: false,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SearchError::Internal(format!("signing token: {e}")))
    }

    fn verify(&self, token: &str) -> SearchResult<Claims> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| SearchError::Unauthenticated(format!("invalid token: {e}")))
    }
}

impl TokenManager for JwtTokenManager {
    fn dismantle_token(&self, token: &str) -> SearchResult<Actor> {
        if token.trim().is_empty() {
            return Err(SearchError::Unauthenticated("missing token".into()));
        }
        let claims = self.verify(token)?;
        Ok(Actor {
            username: claims.sub.clone(),
            id: claims.sub,
            display_name: Some(claims.name).filter(|n| !n.is_empty()),
            service: claims.svc,
        })
    }

    fn service_actor(&self) -> SearchResult<Actor> {
        let account = &self.service_account;
        if account.id.is_empty() || account.secret.is_empty() {
            return Err(SearchError::Unauthenticated(
                "service account is not configured".into(),
            ));
        }
        Ok(Actor {
            id: account.id.clone(),
            username: account.id.clone(),
            display_name: Some("service account".to_string()),
            service: true,
        })
    }
}
