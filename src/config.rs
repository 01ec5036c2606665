use std::str::FromStr;

use serde::Deserialize;

/// How new password hashes are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PasswordScheme {
    Argon2,
    /// Unsalted HMAC-SHA256 keyed by the plaintext. Only for existing data.
    LegacyHmac,
}

impl FromStr for PasswordScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "argon2" => Ok(Self::Argon2),
            "legacy-hmac" | "legacy_hmac" | "hmac" => Ok(Self::LegacyHmac),
            other => anyhow::bail!("unknown PASSWORD_SCHEME: {other}"),
        }
    }
}

pub const DEFAULT_TTL_DAYS: i64 = 60;
pub const MAX_TTL_DAYS: i64 = 36_500;

fn parse_ttl_days(raw: &str) -> anyhow::Result<i64> {
    let days = raw
        .trim()
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("invalid JWT_TTL_DAYS {raw:?}: {e}"))?;
    if !(1..=MAX_TTL_DAYS).contains(&days) {
        anyhow::bail!("JWT_TTL_DAYS must be between 1 and {MAX_TTL_DAYS}, got {days}");
    }
    Ok(days)
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub password_scheme: PasswordScheme,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so callers other than `from_env`
    /// don't have to touch the process environment.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            get("DATABASE_URL").ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
        let jwt = JwtConfig {
            secret: get("JWT_SECRET").ok_or_else(|| anyhow::anyhow!("JWT_SECRET is not set"))?,
            ttl_days: match get("JWT_TTL_DAYS") {
                Some(v) => parse_ttl_days(&v)?,
                None => DEFAULT_TTL_DAYS,
            },
        };
        let password_scheme = match get("PASSWORD_SCHEME") {
            Some(v) => v.parse()?,
            None => PasswordScheme::Argon2,
        };
        Ok(Self {
            database_url,
            jwt,
            password_scheme,
        })
    }
}
