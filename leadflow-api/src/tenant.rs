use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use leadflow_common::types::TenantId;

use crate::api::ApiError;

pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Tenant scope for a request, taken from the `X-Tenant-Id` header. The
/// gateway in front of this service authenticates the caller and stamps the
/// header; here it only has to be present and numeric.
#[derive(Debug)]
pub struct Tenant(pub TenantId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .map(|id| Tenant(TenantId(id)))
            .ok_or(ApiError::MissingTenant)
    }
}
