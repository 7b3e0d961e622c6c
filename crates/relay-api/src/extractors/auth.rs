//! Caller extractors: turn request credentials into an authenticated tenant.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use relay_core::error::AppError;
use relay_realtime::AuthenticatedStream;

use crate::dto::request::StreamQuery;
use crate::error::ApiError;
use crate::state::AppState;

/// Caller authenticated by `Authorization: Bearer <identity token>`.
#[derive(Debug, Clone)]
pub struct BearerCaller(pub AuthenticatedStream);

impl std::ops::Deref for BearerCaller {
    type Target = AuthenticatedStream;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequestParts<AppState> for BearerCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let caller = state.authenticator.authenticate(header).await?;
        Ok(Self(caller))
    }
}

/// Caller of the event stream.
///
/// Accepts a bearer identity token, or a `?ticket=` issued by negotiate.
/// The header wins when both are present.
#[derive(Debug, Clone)]
pub struct StreamCaller(pub AuthenticatedStream);

impl std::ops::Deref for StreamCaller {
    type Target = AuthenticatedStream;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequestParts<AppState> for StreamCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if parts.headers.contains_key(AUTHORIZATION) {
            return BearerCaller::from_request_parts(parts, state)
                .await
                .map(|caller| Self(caller.0));
        }

        let ticket = Query::<StreamQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(query)| query.ticket)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::authentication("Missing bearer credential"))?;

        let issuer = state
            .ticket_issuer
            .as_ref()
            .ok_or_else(|| AppError::authentication("Stream tickets are not enabled"))?;

        let claims = issuer.verify(ticket.trim()).map_err(|e| {
            debug!(error = %e, "Stream ticket rejected");
            ApiError(e)
        })?;

        Ok(Self(AuthenticatedStream {
            tenant_id: claims.tid,
            email: String::new(),
            subject: claims.sub,
        }))
    }
}
