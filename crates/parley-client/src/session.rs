//! Session lifecycle: login, register, logout, restore
//!
//! The current session lives in a `watch` channel. Reads are snapshots and
//! the scheduler subscribes to it to start or halt background sync.

use std::sync::Arc;

use parley_core::Session;
use reqwest::{Method, Response, StatusCode};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{error_message, http_error, ApiClient, AuthResponse, Credentials, MeResponse};
use crate::error::{ClientError, ClientResult};
use crate::local_store::{KeyValueBackend, TOKEN_KEY, USER_KEY};

/// Trimmed, lower-cased username as the server stores it
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

pub struct SessionManager {
    api: ApiClient,
    backend: Arc<dyn KeyValueBackend>,
    current: watch::Sender<Option<Session>>,
}

impl SessionManager {
    pub fn new(api: ApiClient, backend: Arc<dyn KeyValueBackend>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            api,
            backend,
            current,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn current_session(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }

    pub async fn login(&self, username: &str, password: &str) -> ClientResult<Session> {
        let username = normalize_username(username);
        let response = self
            .api
            .request(Method::POST, "/auth/login")
            .json(&Credentials {
                username: &username,
                password,
            })
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(ClientError::InvalidCredentials),
            _ => return Err(http_error(response).await),
        }

        let session = read_session(response).await?;
        self.set_session(session.clone()).await?;
        info!("Signed in as {}", session.username);
        Ok(session)
    }

    pub async fn register(&self, username: &str, password: &str) -> ClientResult<Session> {
        let username = normalize_username(username);
        let response = self
            .api
            .request(Method::POST, "/auth/register")
            .json(&Credentials {
                username: &username,
                password,
            })
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::FORBIDDEN => return Err(ClientError::NotAllowed),
            StatusCode::CONFLICT => return Err(ClientError::AlreadyRegistered),
            _ => return Err(http_error(response).await),
        }

        let session = read_session(response).await?;
        self.set_session(session.clone()).await?;
        info!("Registered and signed in as {}", session.username);
        Ok(session)
    }

    /// Best-effort server logout, then unconditionally forget the session
    pub async fn logout(&self) -> ClientResult<()> {
        if let Some(session) = self.current_session() {
            let result = self
                .api
                .request(Method::POST, "/auth/logout")
                .header(reqwest::header::AUTHORIZATION, session.bearer())
                .send()
                .await;
            if let Err(e) = result {
                debug!("Logout request failed: {}", e);
            }
        }
        self.clear().await
    }

    /// Bring back a persisted session and check it with `GET /auth/me`.
    ///
    /// A 401 clears it and returns `Unauthorized`. When the server cannot be
    /// reached the persisted session is kept.
    pub async fn restore(&self) -> ClientResult<Option<Session>> {
        let token = self.backend.get(TOKEN_KEY).await?;
        let user = self.backend.get(USER_KEY).await?;
        let (Some(token), Some(username)) = (token, user) else {
            return Ok(None);
        };
        if token.is_empty() {
            return Ok(None);
        }

        let session = Session::new(token, username);
        let result = self
            .api
            .request(Method::GET, "/auth/me")
            .header(reqwest::header::AUTHORIZATION, session.bearer())
            .send()
            .await;

        let session = match result {
            Ok(response) if response.status().is_success() => {
                let me: MeResponse = response.json().await?;
                Session::new(session.token, me.username)
            }
            Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                info!("Stored session for {} is no longer valid", session.username);
                self.clear().await?;
                return Err(ClientError::Unauthorized);
            }
            Ok(response) => {
                warn!(
                    "Could not verify stored session: {}",
                    error_message(response).await
                );
                session
            }
            Err(e) => {
                warn!("Could not verify stored session: {}", e);
                session
            }
        };

        self.current.send_replace(Some(session.clone()));
        Ok(Some(session))
    }

    /// Install a session, persisting it and notifying subscribers
    pub async fn set_session(&self, session: Session) -> ClientResult<()> {
        self.backend.set(TOKEN_KEY, &session.token).await?;
        self.backend.set(USER_KEY, &session.username).await?;
        self.current.send_replace(Some(session));
        Ok(())
    }

    /// Forget the session in memory and on disk
    pub async fn clear(&self) -> ClientResult<()> {
        self.current.send_replace(None);
        self.backend.remove(TOKEN_KEY).await?;
        self.backend.remove(USER_KEY).await?;
        Ok(())
    }

    /// Send a request with `Authorization: Bearer <token>`.
    ///
    /// `None` means there is no session and the call was skipped. A 401
    /// answer clears the session before the response is handed back.
    pub async fn authorized_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<Option<Response>> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };

        let mut request = self
            .api
            .request(method, path)
            .header(reqwest::header::AUTHORIZATION, session.bearer());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // a concurrent re-login may already have replaced the token
            if self.current_session().as_ref() == Some(&session) {
                warn!("Server rejected the session token, signing out");
                self.clear().await?;
            }
        }
        Ok(Some(response))
    }
}

async fn read_session(response: Response) -> ClientResult<Session> {
    let auth: AuthResponse = response
        .json()
        .await
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
    if auth.token.is_empty() {
        return Err(ClientError::InvalidResponse("missing token".to_string()));
    }
    Ok(Session::new(auth.token, auth.username))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::MemoryBackend;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn manager(url: &str) -> (SessionManager, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let api = ApiClient::new(url, Duration::from_secs(5)).unwrap();
        (SessionManager::new(api, backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_login_persists_and_notifies() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/login")
            .match_body(Matcher::Json(json!({"username": "curtis", "password": "pw"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token":"abc","username":"curtis"}"#)
            .create_async()
            .await;

        let (sessions, backend) = manager(&server.url());
        let mut rx = sessions.subscribe();

        let session = sessions.login("  Curtis ", "pw").await.unwrap();
        mock.assert_async().await;
        assert_eq!(session, Session::new("abc", "curtis"));
        assert_eq!(sessions.current_session(), Some(session));
        assert!(rx.has_changed().unwrap());
        assert_eq!(backend.get(TOKEN_KEY).await.unwrap().as_deref(), Some("abc"));
        assert_eq!(backend.get(USER_KEY).await.unwrap().as_deref(), Some("curtis"));
    }

    #[tokio::test]
    async fn test_login_bad_credentials() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/auth/login")
            .with_status(401)
            .with_body(r#"{"error":"Invalid credentials"}"#)
            .create_async()
            .await;

        let (sessions, _) = manager(&server.url());
        let err = sessions.login("curtis", "nope").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidCredentials));
        assert!(!sessions.is_signed_in());
    }

    #[tokio::test]
    async fn test_register_not_allowed_creates_no_session() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/auth/register")
            .with_status(403)
            .with_body(r#"{"error":"Registration not allowed for this username"}"#)
            .create_async()
            .await;

        let (sessions, backend) = manager(&server.url());
        let err = sessions.register("bob", "pw").await.unwrap_err();
        assert!(matches!(err, ClientError::NotAllowed));
        assert!(sessions.current_session().is_none());
        assert!(backend.get(TOKEN_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_conflict() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/auth/register")
            .with_status(409)
            .with_body(r#"{"error":"User already exists"}"#)
            .create_async()
            .await;

        let (sessions, _) = manager(&server.url());
        let err = sessions.register("curtis", "pw").await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn test_login_transport_failure() {
        // nothing listens on port 9
        let (sessions, _) = manager("http://127.0.0.1:9");
        let err = sessions.login("curtis", "pw").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn test_login_server_error_is_transport() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/auth/login")
            .with_status(500)
            .with_body(r#"{"error":"boom"}"#)
            .create_async()
            .await;

        let (sessions, _) = manager(&server.url());
        let err = sessions.login("curtis", "pw").await.unwrap_err();
        assert!(err.is_transport(), "{:?}", err);
        assert!(sessions.current_session().is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_fails() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/logout")
            .match_header("authorization", "Bearer abc")
            .with_status(500)
            .create_async()
            .await;

        let (sessions, backend) = manager(&server.url());
        sessions.set_session(Session::new("abc", "curtis")).await.unwrap();

        sessions.logout().await.unwrap();
        mock.assert_async().await;
        assert!(sessions.current_session().is_none());
        assert!(backend.get(TOKEN_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_authorized_request_skips_without_session() {
        let (sessions, _) = manager("http://127.0.0.1:9");
        let response = sessions
            .authorized_request(Method::GET, "/conversations", None)
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_authorized_request_attaches_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/conversations")
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .create_async()
            .await;

        let (sessions, _) = manager(&server.url());
        sessions.set_session(Session::new("abc", "curtis")).await.unwrap();
        let response = sessions
            .authorized_request(Method::GET, "/conversations", None)
            .await
            .unwrap()
            .unwrap();
        assert!(response.status().is_success());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_authorized_request_401_signs_out() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/conversations")
            .with_status(401)
            .with_body(r#"{"error":"Unauthorized"}"#)
            .create_async()
            .await;

        let (sessions, _) = manager(&server.url());
        sessions.set_session(Session::new("abc", "curtis")).await.unwrap();
        let response = sessions
            .authorized_request(Method::GET, "/conversations", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!sessions.is_signed_in());
    }

    #[tokio::test]
    async fn test_restore_valid_session() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/auth/me")
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_body(r#"{"username":"curtis"}"#)
            .create_async()
            .await;

        let (sessions, backend) = manager(&server.url());
        backend.set(TOKEN_KEY, "abc").await.unwrap();
        backend.set(USER_KEY, "curtis").await.unwrap();

        let restored = sessions.restore().await.unwrap();
        assert_eq!(restored, Some(Session::new("abc", "curtis")));
        assert!(sessions.is_signed_in());
    }

    #[tokio::test]
    async fn test_restore_expired_session() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/auth/me")
            .with_status(401)
            .create_async()
            .await;

        let (sessions, backend) = manager(&server.url());
        backend.set(TOKEN_KEY, "stale").await.unwrap();
        backend.set(USER_KEY, "curtis").await.unwrap();

        let err = sessions.restore().await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized));
        assert!(!sessions.is_signed_in());
        assert!(backend.get(TOKEN_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_offline_keeps_session() {
        let (sessions, backend) = manager("http://127.0.0.1:9");
        backend.set(TOKEN_KEY, "abc").await.unwrap();
        backend.set(USER_KEY, "curtis").await.unwrap();

        let restored = sessions.restore().await.unwrap();
        assert_eq!(restored, Some(Session::new("abc", "curtis")));
    }

    #[tokio::test]
    async fn test_restore_nothing_stored() {
        let (sessions, _) = manager("http://127.0.0.1:9");
        assert_eq!(sessions.restore().await.unwrap(), None);
    }
}
