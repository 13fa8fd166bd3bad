use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

/// Audience every accepted token must carry
const AUDIENCE: &str = "https://lights.krantz.dev";

/// Name of the claim carrying the permission strings
const GROUPS_CLAIM: &str = "groups";

/// How long a fetched JWKS document stays valid
const JWKS_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid issuer url: {0}")]
    InvalidIssuer(String),
    #[error("failed to fetch signing keys: {0}")]
    Jwks(#[from] reqwest::Error),
    #[error("token is missing a key id")]
    MissingKeyId,
    #[error("token signed with an unknown key")]
    UnknownKeyId,
    #[error("invalid token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Modify stored entities (animations, presets, schedules)
    Edit,
    /// Drive the strip over the realtime connection
    ControlLights,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Edit => "lights-edit",
            Permission::ControlLights => "lights-control",
        }
    }

    fn from_scope(scope: &str) -> Option<Permission> {
        match scope {
            "lights-edit" => Some(Permission::Edit),
            "lights-control" => Some(Permission::ControlLights),
            _ => None,
        }
    }
}

/// The permissions granted to a session or request
#[derive(Debug, Clone, Default)]
pub struct Permissions(HashSet<Permission>);

impl Permissions {
    /// Build from raw scope strings, ignoring unrecognised ones
    pub fn from_scopes<S: AsRef<str>>(scopes: &[S]) -> Permissions {
        Permissions(
            scopes
                .iter()
                .filter_map(|scope| Permission::from_scope(scope.as_ref()))
                .collect(),
        )
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// The granted permissions as strings for transport
    pub fn as_strings(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|permission| permission.as_str().to_owned())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "groups", default)]
    groups: Vec<String>,
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

/// Validates bearer tokens against the issuer's published signing keys.
///
/// Keys are fetched lazily and cached for five minutes; validation checks
/// the RS256 signature, issuer, audience, and expiry, and extracts the
/// permission strings from the groups claim.
pub struct Validator {
    issuer: String,
    client: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl Validator {
    pub fn new(issuer: &str) -> Result<Validator, AuthError> {
        let issuer = issuer.trim_end_matches('/').to_owned();
        if !issuer.starts_with("http://") && !issuer.starts_with("https://") {
            return Err(AuthError::InvalidIssuer(issuer));
        }

        Ok(Validator {
            issuer,
            client: reqwest::Client::new(),
            cache: RwLock::new(None),
        })
    }

    /// Validate a token and return the permissions it grants
    pub async fn validate(&self, token: &str) -> Result<Permissions, AuthError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;
        let key = self.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[AUDIENCE]);
        validation.set_issuer(&[format!("{}/", self.issuer)]);

        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)?;
        debug!(claim = GROUPS_CLAIM, count = data.claims.groups.len(), "token validated");

        Ok(Permissions::from_scopes(&data.claims.groups))
    }

    async fn signing_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = &*cache {
                if cached.fetched_at.elapsed() < JWKS_TTL {
                    return cached
                        .keys
                        .get(kid)
                        .cloned()
                        .ok_or(AuthError::UnknownKeyId);
                }
            }
        }

        let mut cache = self.cache.write().await;
        let keys = self.fetch_keys().await?;
        let key = keys.get(kid).cloned();
        *cache = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        key.ok_or(AuthError::UnknownKeyId)
    }

    async fn fetch_keys(&self) -> Result<HashMap<String, DecodingKey>, AuthError> {
        let url = format!("{}/.well-known/jwks.json", self.issuer);
        debug!(url = %url, "refreshing signing keys");

        let document: JwksDocument = self.client.get(&url).send().await?.json().await?;

        let mut keys = HashMap::with_capacity(document.keys.len());
        for jwk in document.keys {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(error) => warn!(kid = %jwk.kid, %error, "skipping unusable signing key"),
            }
        }

        Ok(keys)
    }
}
