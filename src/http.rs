//! HTTP surface for the step-up protocol.
//!
//! Every route needs a bearer identity token. Guarded routes additionally
//! need the `X-PQC-Session` header naming a live session of the same subject.

use crate::identity::{AuthError, IdentityVerifier, SubjectId};
use crate::kem::{AlgorithmDetails, KemAlgorithm};
use crate::session::{
    ErrorKind, HandshakeId, PqcError, PqcProtocol, PqcStats, Session, SessionId,
};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const PQC_SESSION_HEADER: &str = "x-pqc-session";

const SESSION_REQUIRED: &str = "pqc_session_required";
const INVALID_REQUEST: &str = "invalid_request";
const SESSION_REMEDIATION: &str = "Valid PQC session required for this operation. \
     Establish one via POST /pqc/handshake/init followed by POST /pqc/handshake/complete, \
     then send its id in the X-PQC-Session header.";

/// Server state shared with every handler
pub struct AppState {
    pub protocol: Arc<PqcProtocol>,
    pub identity: Arc<dyn IdentityVerifier>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/pqc/kems", get(list_kems_handler))
        .route("/pqc/handshake/init", post(handshake_init_handler))
        .route("/pqc/handshake/complete", post(handshake_complete_handler))
        .route("/pqc/session/:session_id", delete(revoke_session_handler))
        .route("/pqc/sessions/stats", get(stats_handler))
        .route("/pqc/step-up/whoami", get(whoami_handler))
        .with_state(state)
}

/// Error body returned by every route
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }

    fn session_required() -> Self {
        Self::new(SESSION_REQUIRED, SESSION_REMEDIATION)
    }

    fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "authentication_failed" => StatusCode::UNAUTHORIZED,
            SESSION_REQUIRED | "subject_mismatch" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "unsupported_algorithm" | "malformed_ciphertext" | INVALID_REQUEST => {
                StatusCode::BAD_REQUEST
            }
            "too_many_pending_handshakes" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<PqcError> for ErrorResponse {
    fn from(e: PqcError) -> Self {
        let kind = e.kind();
        if kind == ErrorKind::Internal {
            // Backend details stay in the log.
            error!("Internal error: {}", e);
            return Self::new(kind.as_str(), "Internal server error");
        }
        if kind == ErrorKind::NotFound {
            // Expired and missing ids must read the same.
            debug!("Not found: {}", e);
            return Self::new(kind.as_str(), PqcError::NotFound.to_string());
        }
        Self::new(kind.as_str(), e.to_string())
    }
}

impl From<AuthError> for ErrorResponse {
    fn from(e: AuthError) -> Self {
        PqcError::from(e).into()
    }
}

impl From<JsonRejection> for ErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected request body: {}", rejection.body_text());
        Self::new(INVALID_REQUEST, rejection.body_text())
    }
}

/// Subject of a verified bearer identity token.
pub struct AuthenticatedSubject(pub SubjectId);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedSubject {
    type Rejection = ErrorResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let credential = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingCredential)?;

        let subject = state.identity.verify(credential).await?;
        Ok(AuthenticatedSubject(subject))
    }
}

/// Identity plus a live step-up session bound to it.
pub struct StepUpSubject {
    pub subject_id: SubjectId,
    pub session: Session,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for StepUpSubject {
    type Rejection = ErrorResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthenticatedSubject(subject_id) =
            AuthenticatedSubject::from_request_parts(parts, state).await?;

        let session_id = parts
            .headers
            .get(PQC_SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(SessionId::from)
            .ok_or_else(|| {
                debug!("Guarded call by {} without a session header", subject_id);
                ErrorResponse::session_required()
            })?;

        match state
            .protocol
            .validate_session(&subject_id, &session_id)
            .await
        {
            Ok(session) => Ok(StepUpSubject {
                subject_id,
                session,
            }),
            Err(PqcError::NoValidSession) => Err(ErrorResponse::session_required()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KemListResponse {
    pub default: KemAlgorithm,
    pub algorithms: Vec<AlgorithmDetails>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HandshakeInitRequest {
    #[serde(default)]
    pub algorithm: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandshakeInitResponse {
    pub handshake_id: HandshakeId,
    pub algorithm: KemAlgorithm,
    /// Base64
    pub public_key: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandshakeCompleteRequest {
    pub handshake_id: HandshakeId,
    /// Base64
    pub ciphertext: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandshakeCompleteResponse {
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
    pub key_confirmation: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub revoked: bool,
    pub session_id: SessionId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    pub subject_id: SubjectId,
    pub session_id: SessionId,
    pub algorithm: KemAlgorithm,
    pub session_expires_at: DateTime<Utc>,
}

/// GET /pqc/kems
async fn list_kems_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedSubject(_subject): AuthenticatedSubject,
) -> Json<KemListResponse> {
    Json(KemListResponse {
        default: state.protocol.settings().default_algorithm,
        algorithms: state.protocol.list_algorithms(),
    })
}

/// POST /pqc/handshake/init
async fn handshake_init_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    request: Result<Json<HandshakeInitRequest>, JsonRejection>,
) -> Result<Json<HandshakeInitResponse>, ErrorResponse> {
    let Json(request) = request?;
    let init = state
        .protocol
        .handshake_init(&subject, request.algorithm.as_deref())
        .await?;

    Ok(Json(HandshakeInitResponse {
        handshake_id: init.handshake_id,
        algorithm: init.algorithm,
        public_key: STANDARD.encode(&init.public_key),
        expires_at: init.expires_at,
    }))
}

/// POST /pqc/handshake/complete
async fn handshake_complete_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    request: Result<Json<HandshakeCompleteRequest>, JsonRejection>,
) -> Result<Json<HandshakeCompleteResponse>, ErrorResponse> {
    let Json(request) = request?;
    let ciphertext = STANDARD.decode(request.ciphertext.trim()).map_err(|e| {
        ErrorResponse::new(INVALID_REQUEST, format!("ciphertext is not valid base64: {}", e))
    })?;

    let completion = state
        .protocol
        .handshake_complete(&subject, &request.handshake_id, &ciphertext)
        .await?;

    Ok(Json(HandshakeCompleteResponse {
        session_id: completion.session_id,
        expires_at: completion.expires_at,
        key_confirmation: completion.key_confirmation,
    }))
}

/// DELETE /pqc/session/:session_id
async fn revoke_session_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedSubject(subject): AuthenticatedSubject,
    Path(session_id): Path<String>,
) -> Result<Json<RevokeResponse>, ErrorResponse> {
    let session_id = SessionId::from(session_id);
    state.protocol.revoke_session(&subject, &session_id).await?;
    Ok(Json(RevokeResponse {
        revoked: true,
        session_id,
    }))
}

/// GET /pqc/sessions/stats
async fn stats_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedSubject(_subject): AuthenticatedSubject,
) -> Result<Json<PqcStats>, ErrorResponse> {
    Ok(Json(state.protocol.stats().await?))
}

/// GET /pqc/step-up/whoami (guarded)
async fn whoami_handler(step_up: StepUpSubject) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        subject_id: step_up.subject_id,
        session_id: step_up.session.session_id,
        algorithm: step_up.session.algorithm,
        session_expires_at: step_up.session.expires_at,
    })
}
