//! In-memory stand-in for the account service exercised by `authquest`.
//!
//! Implements `/register`, `/login` and `/me` with the same status codes and
//! body shapes as the remote API, plus a `/health` route used as a readiness
//! probe. Nothing is persisted: every `AppState` starts empty.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::COOKIE;
use axum::http::header::SET_COOKIE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone)]
struct Account {
    email: String,
    given_name: String,
    surname: String,
    password: String,
    member_id: String,
}

#[derive(Debug, Default)]
struct Store {
    accounts: HashMap<String, Account>,
    // session token -> account email
    sessions: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppState {
    store: Arc<RwLock<Store>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account up front so `/login` works without a prior
    /// `/register` call.
    pub async fn seed_account(&self, email: &str, given_name: &str, surname: &str, password: &str) {
        let mut store = self.store.write().await;
        store.accounts.insert(
            email.to_string(),
            Account {
                email: email.to_string(),
                given_name: given_name.to_string(),
                surname: surname.to_string(),
                password: password.to_string(),
                member_id: Uuid::new_v4().to_string(),
            },
        );
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: Option<String>,
    given_name: Option<String>,
    surname: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    login: Option<String>,
    password: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves the app until the process exits.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "auth_app listening");
    axum::serve(listener, router(state)).await
}

/// Serves the app on a random local port in a background task and returns the
/// bound address.
pub async fn serve_ephemeral(state: AppState) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            tracing::error!(%error, "auth_app stopped");
        }
    });

    Ok(addr)
}

async fn health() -> &'static str {
    "ok"
}

async fn register(State(state): State<AppState>, Json(payload): Json<RegisterRequest>) -> Response {
    let (Some(email), Some(given_name), Some(surname), Some(password)) = (
        required(payload.email),
        required(payload.given_name),
        required(payload.surname),
        required(payload.password),
    ) else {
        return message(
            StatusCode::BAD_REQUEST,
            "email, givenName, surname and password are required",
        );
    };

    let mut store = state.store.write().await;
    if store.accounts.contains_key(&email) {
        return message(StatusCode::CONFLICT, "an account with this email already exists");
    }

    let member_id = Uuid::new_v4().to_string();
    store.accounts.insert(
        email.clone(),
        Account {
            email: email.clone(),
            given_name,
            surname,
            password,
            member_id: member_id.clone(),
        },
    );
    tracing::debug!(%email, "registered account");

    (
        StatusCode::CREATED,
        Json(json!({
            "account": {
                "email": email,
                "status": "active",
                "memberId": member_id,
            }
        })),
    )
        .into_response()
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> Response {
    let (Some(login), Some(password)) = (required(payload.login), required(payload.password))
    else {
        return message(StatusCode::BAD_REQUEST, "login and password are required");
    };

    let mut store = state.store.write().await;
    let Some(account) = store
        .accounts
        .get(&login)
        .filter(|account| account.password == password)
        .cloned()
    else {
        return message(StatusCode::UNAUTHORIZED, "invalid login or password");
    };

    let token = Uuid::new_v4().simple().to_string();
    store.sessions.insert(token.clone(), account.email.clone());

    (
        StatusCode::OK,
        [(
            SET_COOKIE,
            format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly"),
        )],
        Json(json!({
            "account": {
                "email": account.email,
                "username": login,
                "memberId": account.member_id,
            }
        })),
    )
        .into_response()
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let store = state.store.read().await;

    let account = session_token(&headers)
        .and_then(|token| store.sessions.get(&token))
        .and_then(|email| store.accounts.get(email));

    match account {
        Some(account) => (
            StatusCode::OK,
            Json(json!({
                "account": {
                    "email": account.email,
                    "username": account.email,
                    "givenName": account.given_name,
                    "surname": account.surname,
                }
            })),
        )
            .into_response(),
        None => message(StatusCode::UNAUTHORIZED, "not authenticated"),
    }
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}
