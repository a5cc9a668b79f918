// Auth API: login, client auth, and identity CRUD

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use lodestar_auth::authn::AuthContext;
use lodestar_auth::manager::{NewClient, NewUser, UpdateClient};
use lodestar_auth::types::{ClientCredential, Role};
use lodestar_auth::{Claims, Subject, SubjectKind, User};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ClientAuthRequest {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(flatten)]
    pub user: NewUser,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RotateSecretRequest {
    /// Explicit replacement secret, or generated when absent.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetDisabledRequest {
    pub disabled: bool,
}

/// Client record as exposed over the API; the stored bcrypt hash never
/// leaves the process.
#[derive(Debug, Serialize)]
pub struct ClientSummary {
    pub client_id: String,
    pub subject_kind: SubjectKind,
    pub updated_at: i64,
}

impl From<ClientCredential> for ClientSummary {
    fn from(credential: ClientCredential) -> Self {
        ClientSummary {
            client_id: credential.client_id,
            subject_kind: credential.subject_kind,
            updated_at: credential.updated_at,
        }
    }
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let result = state.auth.login(&request.username, &request.password).await?;
    Ok(Json(LoginResponse {
        user: result.user,
        token: result.token,
    }))
}

async fn client_auth(
    State(state): State<AppState>,
    Json(request): Json<ClientAuthRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state
        .auth
        .authenticate_client(&request.client_id, &request.client_secret)
        .await?;
    Ok(Json(TokenResponse { token }))
}

async fn whoami(Extension(context): Extension<AuthContext>) -> Json<Claims> {
    Json(context.claims)
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.auth.list_users().await?))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.auth.get_user(&id).await?))
}

async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.auth.create_user(request.user, request.roles).await?))
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut user): Json<User>,
) -> Result<Json<User>, ApiError> {
    user.id = id;
    Ok(Json(state.auth.update_user(user).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.auth.delete_user(&id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

async fn change_password(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.auth.change_password(&username, &request.password).await?;
    Ok(Json(serde_json::json!({"changed": username})))
}

async fn list_roles(State(state): State<AppState>) -> Result<Json<Vec<Role>>, ApiError> {
    Ok(Json(state.auth.list_roles().await?))
}

async fn get_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Role>, ApiError> {
    Ok(Json(state.auth.get_role(&id).await?))
}

async fn save_role(
    State(state): State<AppState>,
    Json(role): Json<Role>,
) -> Result<Json<Role>, ApiError> {
    Ok(Json(state.auth.save_role(role).await?))
}

async fn delete_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.auth.delete_role(&id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

async fn create_client(
    State(state): State<AppState>,
    Json(request): Json<NewClient>,
) -> Result<Json<lodestar_auth::manager::CreatedClient>, ApiError> {
    Ok(Json(state.auth.create_client(request).await?))
}

async fn list_clients(
    State(state): State<AppState>,
) -> Result<Json<Vec<ClientSummary>>, ApiError> {
    let clients = state.auth.list_clients().await?;
    Ok(Json(clients.into_iter().map(ClientSummary::from).collect()))
}

async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClientSummary>, ApiError> {
    Ok(Json(state.auth.get_client(&id).await?.into()))
}

async fn update_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateClient>,
) -> Result<Json<ClientSummary>, ApiError> {
    Ok(Json(state.auth.update_client(&id, request).await?.into()))
}

async fn rotate_client_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RotateSecretRequest>,
) -> Result<Json<lodestar_auth::manager::CreatedClient>, ApiError> {
    Ok(Json(
        state.auth.rotate_client_secret(&id, request.secret).await?,
    ))
}

async fn delete_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.auth.delete_client(&id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

async fn set_subject_disabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SetDisabledRequest>,
) -> Result<Json<Subject>, ApiError> {
    Ok(Json(
        state.auth.set_subject_disabled(&id, request.disabled).await?,
    ))
}

/// Routes reachable without a token.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/client", post(client_auth))
}

/// Routes behind the auth middleware.
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/me", get(whoami))
        .route("/api/auth/users", get(list_users).post(create_user))
        .route(
            "/api/auth/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/auth/passwords/:username", put(change_password))
        .route("/api/auth/roles", get(list_roles).post(save_role))
        .route("/api/auth/roles/:id", get(get_role).delete(delete_role))
        .route("/api/auth/clients", get(list_clients).post(create_client))
        .route(
            "/api/auth/clients/:id",
            get(get_client).put(update_client).delete(delete_client),
        )
        .route("/api/auth/clients/:id/secret", put(rotate_client_secret))
        .route("/api/auth/subjects/:id/disabled", put(set_subject_disabled))
}
