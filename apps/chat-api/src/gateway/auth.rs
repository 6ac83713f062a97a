//! Bearer-token authentication for incoming connections.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::ids::{CompanyId, UserId};

/// Claims carried by the account service's bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Display name.
    pub name: String,
    /// The user's active company, if any.
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    /// Companies the user may act for (for the optional per-connection
    /// company selection).
    #[serde(default)]
    pub companies: Vec<String>,
    pub exp: i64,
}

/// The resolved identity of an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthedIdentity {
    pub user_id: UserId,
    pub user_name: String,
    pub company_id: CompanyId,
    pub company_name: String,
}

/// Verify a bearer token and resolve it to exactly one active company.
///
/// `selected_company` is the client's optional `companyId` field on the
/// authenticate payload; it is honored only when the token lists that company.
/// A user with no resolvable active company is a hard failure, not a
/// degraded session.
pub fn verify_token(
    secret: &str,
    token: Option<&str>,
    selected_company: Option<&CompanyId>,
) -> Result<AuthedIdentity, AuthError> {
    let token = match token {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Err(AuthError::MissingToken),
    };

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
        _ => AuthError::InvalidToken,
    })?
    .claims;

    if claims.sub.trim().is_empty() {
        return Err(AuthError::InvalidToken);
    }

    let company_id = match selected_company {
        Some(selected) if claims.companies.iter().any(|c| c == selected.as_str()) => {
            selected.clone()
        }
        _ => match claims.company_id.as_deref() {
            Some(id) if !id.trim().is_empty() => CompanyId::new(id),
            _ => return Err(AuthError::NoActiveCompany),
        },
    };

    Ok(AuthedIdentity {
        user_id: UserId::new(claims.sub),
        user_name: claims.name,
        company_id,
        company_name: claims.company_name.unwrap_or_default(),
    })
}
