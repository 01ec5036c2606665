use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::{
    auth::claims::Claims, config::JwtConfig, state::AppState, users::repo_types::User,
};

/// Signing and verification keys plus token lifetime.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::from_config(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            ttl: Duration::seconds(cfg.ttl_days.saturating_mul(86_400)),
        }
    }

    pub fn sign(&self, user: &User) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now
            .checked_add(self.ttl)
            .ok_or_else(|| anyhow::anyhow!("token expiry out of range"))?;
        let claims = Claims {
            id: user.id,
            username: user.name.clone(),
            email: user.email.clone(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = user.id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        debug!(user_id = data.claims.id, "jwt verified");
        Ok(data.claims)
    }
}
