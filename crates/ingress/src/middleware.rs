//! Ingress filter: the unit-of-work boundary for inbound requests.
//!
//! For every request: extract the bearer token, validate it, push the
//! principal's tenant onto the context stack, attach the principal to the
//! request, run the request inside the scope, and pop on every exit path
//! (guard drop plus scope teardown). Validation failures of any kind answer
//! with the one generic denial body - no claim-level leakage.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use nimbus_auth::{
    Principal, RevocationStore, SecurityError, SignatureVerifier, TokenValidator, UserDirectory,
};
use nimbus_core::GENERIC_DENIAL;
use nimbus_observability::metrics;
use nimbus_tenant::TenantContext;

/// Object-safe facade over [`TokenValidator`], so the middleware state does
/// not carry the validator's type parameters.
#[async_trait]
pub trait TokenGate: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Principal, SecurityError>;
}

#[async_trait]
impl<V, R, D> TokenGate for TokenValidator<V, R, D>
where
    V: SignatureVerifier,
    R: RevocationStore,
    D: UserDirectory,
{
    async fn validate(&self, token: &str) -> Result<Principal, SecurityError> {
        TokenValidator::validate(self, token).await
    }
}

#[derive(Clone)]
pub struct IngressState {
    pub validator: Arc<dyn TokenGate>,
}

impl IngressState {
    pub fn new(validator: Arc<dyn TokenGate>) -> Self {
        Self { validator }
    }
}

/// The ingress middleware.
pub async fn tenant_ingress(
    State(state): State<IngressState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Ok(token) = extract_bearer(req.headers()) else {
        metrics::incr("ingress.denied", "missing_bearer");
        return denial();
    };
    let token = token.to_string();

    let principal = match state.validator.validate(&token).await {
        Ok(principal) => principal,
        Err(err) => {
            // The specific variant stays here; the response is generic.
            metrics::incr("ingress.denied", err.label());
            warn!(layer = err.layer(), error = %err, "request rejected at ingress");
            return denial();
        }
    };

    let tenant_id = principal.tenant_id();
    req.extensions_mut().insert(principal);

    TenantContext::scope(async move {
        let _guard = match TenantContext::push(tenant_id) {
            Ok(guard) => guard,
            Err(err) => {
                warn!(error = %err, "tenant push rejected at ingress");
                return denial();
            }
        };

        next.run(req).await
    })
    .await
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?
        .trim();

    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}

fn denial() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({ "error": GENERIC_DENIAL })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{Extension, Router, body::Body, http::Request as HttpRequest, routing::get};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use nimbus_auth::{InMemoryRevocationStore, StaticSignatureVerifier, StaticUserDirectory};
    use nimbus_core::JwtConfig;

    const ISSUER: &str = "https://idp.example.com/realms/nimbus";
    const AUDIENCE: &str = "nimbus-api";
    const TENANT: &str = "11111111-1111-1111-1111-111111111111";

    fn token() -> String {
        let header = json!({"alg": "RS256", "typ": "JWT"});
        let now = Utc::now().timestamp();
        let payload = json!({
            "sub": "0195cb1e-9b7a-7e70-8a40-1d6b2f1f3a11",
            "iss": ISSUER,
            "aud": AUDIENCE,
            "exp": now + 3600,
            "iat": now - 10,
            "jti": "jti-ingress",
            "tenant_id": TENANT,
            "roles": ["operator"],
        });
        let seg = |v: &Value| URL_SAFE_NO_PAD.encode(serde_json::to_vec(v).unwrap());
        format!("{}.{}.sig", seg(&header), seg(&payload))
    }

    fn app() -> Router {
        let validator = TokenValidator::new(
            JwtConfig::new(ISSUER, AUDIENCE, "https://idp.example.com/certs"),
            StaticSignatureVerifier::accepting(),
            InMemoryRevocationStore::new(),
            StaticUserDirectory::all_active(),
        );
        let state = IngressState::new(Arc::new(validator));

        Router::new()
            .route("/whoami", get(whoami))
            .layer(axum::middleware::from_fn_with_state(state, tenant_ingress))
    }

    async fn whoami(Extension(principal): Extension<Principal>) -> String {
        let context = TenantContext::current()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!("{}|{}", principal.tenant_id(), context)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn valid_token_attaches_principal_and_context() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header("authorization", format!("Bearer {}", token()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // Principal tenant and ambient context agree inside the handler.
        assert_eq!(body_string(response).await, format!("{TENANT}|{TENANT}"));
        // The scope ended with the request.
        assert_eq!(TenantContext::current(), None);
    }

    #[tokio::test]
    async fn missing_header_gets_the_generic_denial() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(response).await.contains(GENERIC_DENIAL));
    }

    #[tokio::test]
    async fn invalid_token_gets_the_same_generic_denial() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header("authorization", "Bearer not.a.token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(response).await.contains(GENERIC_DENIAL));
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_rejected() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header("authorization", "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
