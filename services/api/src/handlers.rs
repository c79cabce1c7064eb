//! Axum Handlers for the REST API
//!
//! Authentication, profile and practice-session management. Chat turns run
//! over the WebSocket in `ws`.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use parley_core::{
    identity::IdentityError,
    profile::{ProfileUpdate, UserProfile},
    session::{PracticeSession, SessionError, SharedSession},
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{
        ErrorResponse, LoginPayload, ProfileView, RegisterPayload, SessionView,
        StartSessionPayload, UpdateProfilePayload,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::UsernameTaken(_) => ApiError::Conflict(err.to_string()),
            IdentityError::UnknownUser(_) | IdentityError::WrongPassword => {
                ApiError::Unauthorized("Invalid username or password".to_string())
            }
            IdentityError::NotLoggedIn => ApiError::Unauthorized(err.to_string()),
            IdentityError::InvalidInput(message) => ApiError::BadRequest(message),
            IdentityError::Store(e) => ApiError::InternalServerError(e.into()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

async fn require_user(state: &AppState) -> Result<UserProfile, ApiError> {
    state
        .current_user()
        .await
        .ok_or_else(|| ApiError::Unauthorized("Please log in first".to_string()))
}

/// Looks up an open session that belongs to the current user.
async fn owned_session(state: &AppState, id: Uuid) -> Result<Arc<SharedSession>, ApiError> {
    let user = require_user(state).await?;
    let not_found = || ApiError::NotFound(format!("Session with id '{}' not found", id));
    let session = state.sessions.get(id).await.ok_or_else(not_found)?;
    if session.state().lock().await.owner != user.username {
        return Err(not_found());
    }
    Ok(session)
}

/// Register a new student and log them in.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterPayload,
    responses(
        (status = 201, description = "Registered and logged in", body = ProfileView),
        (status = 400, description = "Empty username or password", body = ErrorResponse),
        (status = 409, description = "Username already taken", body = ErrorResponse)
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.identity.lock().await.register(
        &payload.username,
        &payload.password,
        payload.level,
        payload.target_language,
    )?;
    Ok((StatusCode::CREATED, Json(ProfileView::from(profile))))
}

/// Log in with an existing username and password.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginPayload,
    responses(
        (status = 200, description = "Logged in", body = ProfileView),
        (status = 401, description = "Invalid credentials", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<ProfileView>, ApiError> {
    let profile = state
        .identity
        .lock()
        .await
        .login(&payload.username, &payload.password)?;
    Ok(Json(ProfileView::from(profile)))
}

/// Log out and close the student's open practice sessions.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Logged out")
    )
)]
pub async fn logout(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    let current = state.current_user().await;
    state.identity.lock().await.logout()?;
    if let Some(user) = current {
        let closed = state.sessions.remove_owned_by(&user.username).await;
        info!(username = %user.username, closed, "User logged out");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Get the logged-in student's profile.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "Current profile", body = ProfileView),
        (status = 401, description = "Not logged in", body = ErrorResponse)
    )
)]
pub async fn get_profile(State(state): State<Arc<AppState>>) -> Result<Json<ProfileView>, ApiError> {
    Ok(Json(ProfileView::from(require_user(&state).await?)))
}

/// Change the logged-in student's level or target language.
#[utoipa::path(
    patch,
    path = "/profile",
    request_body = UpdateProfilePayload,
    responses(
        (status = 200, description = "Profile updated", body = ProfileView),
        (status = 401, description = "Not logged in", body = ErrorResponse)
    )
)]
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateProfilePayload>,
) -> Result<Json<ProfileView>, ApiError> {
    let update = ProfileUpdate {
        proficiency_level: payload.level,
        target_language: payload.target_language,
    };
    let profile = state.identity.lock().await.update_profile(&update)?;
    Ok(Json(ProfileView::from(profile)))
}

/// Start a practice session in the chosen mode.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = StartSessionPayload,
    responses(
        (status = 201, description = "Session started", body = SessionView),
        (status = 400, description = "Custom mode without a scenario", body = ErrorResponse),
        (status = 401, description = "Not logged in", body = ErrorResponse)
    )
)]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state).await?;
    let session = PracticeSession::start(&user, payload.mode, &payload.scenario)?;
    let view = SessionView::from(&session);
    state.sessions.insert(session).await;
    info!(session_id = %view.id, mode = ?view.mode, "Practice session started");
    Ok((StatusCode::CREATED, Json(view)))
}

/// Get a practice session with its message thread.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let session = owned_session(&state, id).await?;
    let snapshot = session.snapshot().await;
    Ok(Json(SessionView::from(&snapshot)))
}

/// Clear a session's message thread.
#[utoipa::path(
    post,
    path = "/sessions/{id}/reset",
    responses(
        (status = 200, description = "Thread cleared", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "A turn is in progress", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let session = owned_session(&state, id).await?;
    let _guard = session
        .try_begin_processing()
        .ok_or_else(|| ApiError::Conflict("The tutor is still answering".to_string()))?;
    let mut practice = session.state().lock().await;
    practice.reset();
    Ok(Json(SessionView::from(&*practice)))
}

/// Close a practice session and return to the menu.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    owned_session(&state, id).await?;
    state.sessions.remove(id).await;
    info!(session_id = %id, "Practice session closed");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::identity::StoreError;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_identity_errors_map_to_status_codes() {
        assert_eq!(
            status_of(IdentityError::UsernameTaken("anna".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(IdentityError::UnknownUser("anna".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(IdentityError::WrongPassword), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(IdentityError::NotLoggedIn), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(IdentityError::InvalidInput("Password must not be empty".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(IdentityError::Store(StoreError::Io(std::io::Error::other(
                "disk full"
            )))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_login_failures_share_one_message() {
        let unknown = ApiError::from(IdentityError::UnknownUser("anna".to_string()));
        let wrong = ApiError::from(IdentityError::WrongPassword);
        match (unknown, wrong) {
            (ApiError::Unauthorized(a), ApiError::Unauthorized(b)) => assert_eq!(a, b),
            _ => panic!("login failures should be Unauthorized"),
        }
    }

    #[test]
    fn test_session_error_is_bad_request() {
        assert_eq!(
            status_of(SessionError::MissingScenario),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_remaining_variants_status_codes() {
        assert_eq!(
            ApiError::NotFound("Session not found".to_string())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("busy".to_string()).into_response().status(),
            StatusCode::CONFLICT
        );
    }
}
