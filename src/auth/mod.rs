//! Identity verification and project access checks.
//!
//! User tokens are JWTs issued by the identity provider and signed with a
//! shared HS256 secret. A token only proves who the caller is; every mutating
//! handler also checks that the decoded subject equals the uid the caller
//! claims, and then consults the project role map.

use axum::http::{header, HeaderMap};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{ProjectMetadata, Role};

/// Claims we read from an identity token. `exp` is enforced by the validator.
#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
}

/// Verifies identity-provider tokens against a claimed uid.
#[derive(Clone)]
pub struct IdentityVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn new(secret: Option<&str>, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }

        Self {
            key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.idp_secret.as_deref(),
            config.idp_issuer.as_deref(),
            config.idp_audience.as_deref(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Fail unless `token` is valid and was issued to `uid`.
    pub fn verify_uid_token(&self, token: &str, uid: &str) -> Result<(), AppError> {
        let Some(key) = &self.key else {
            return Err(AppError::Forbidden(
                "Identity verification is not configured".to_string(),
            ));
        };

        let decoded = jsonwebtoken::decode::<IdentityClaims>(token, key, &self.validation)?;

        if !constant_time_compare(&decoded.claims.sub, uid) {
            return Err(AppError::Forbidden("Token doesn't match UID".to_string()));
        }
        Ok(())
    }
}

/// Load project metadata and fail unless `uid` holds at least `required`.
pub async fn verify_project_access(
    repo: &Repository,
    uid: &str,
    project_id: &str,
    required: Role,
) -> Result<ProjectMetadata, AppError> {
    let metadata = repo
        .get_project_metadata(project_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {} not found", project_id)))?;

    match metadata.role_of(uid) {
        Some(role) if role.grants(required) => Ok(metadata),
        _ => Err(AppError::Forbidden(format!(
            "Only {}s can perform this action",
            required.as_str()
        ))),
    }
}

/// Pick the caller's token: an explicit field wins over the bearer header.
pub fn resolve_token(explicit: Option<&str>, headers: &HeaderMap) -> Option<String> {
    explicit
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
        .or_else(|| bearer_token(headers))
}

/// Extract a bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
