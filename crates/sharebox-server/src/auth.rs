//! Session-backed authentication gate.
//!
//! A request is either anonymous or carries a [`SessionUser`] in its
//! `tower-sessions` session.  Handlers receive that state explicitly through
//! the [`AuthContext`] and [`RequireUser`] extractors instead of reading it
//! from ambient state.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Redirect, Response};
use serde::{Deserialize, Serialize};
use sharebox_store::User;
use tower_sessions::Session;

use crate::error::ServerError;

/// Session key under which the signed-in user is stored.
pub const SESSION_USER_KEY: &str = "user";

/// Where anonymous visitors are sent when they hit a protected route.
pub const LOGIN_PATH: &str = "/login";

/// Identity kept in the session after a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: i64,
    pub username: String,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
        }
    }
}

/// Per-request authentication state: the session plus the user, if any.
pub struct AuthContext {
    session: Session,
    user: Option<SessionUser>,
}

impl AuthContext {
    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Anonymous -> Authenticated.
    pub async fn login(&mut self, user: &User) -> Result<(), ServerError> {
        let session_user = SessionUser::from(user);
        self.session
            .insert(SESSION_USER_KEY, &session_user)
            .await?;
        self.user = Some(session_user);
        Ok(())
    }

    /// Authenticated -> Anonymous.  Drops all session data and the session
    /// record itself.
    pub async fn logout(self) -> Result<(), ServerError> {
        self.session.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| ServerError::Internal(msg.to_string()))?;
        let user = session.get::<SessionUser>(SESSION_USER_KEY).await?;

        Ok(Self { session, user })
    }
}

/// Extractor for protected routes.  Anonymous requests are redirected to
/// the login page before the handler (or its body extractors) run.
pub struct RequireUser(pub SessionUser);

#[async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        match auth.user {
            Some(user) => Ok(Self(user)),
            None => Err(Redirect::to(LOGIN_PATH).into_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use chrono::Utc;
    use tower::ServiceExt;
    use tower_sessions::{MemoryStore, SessionManagerLayer};

    fn test_user() -> User {
        User {
            id: 7,
            username: "alice".into(),
            password_hash: "unused".into(),
            created_at: Utc::now(),
        }
    }

    fn app() -> Router {
        Router::new()
            .route(
                "/login",
                get(|mut auth: AuthContext| async move {
                    auth.login(&test_user()).await.unwrap();
                    "ok"
                }),
            )
            .route(
                "/logout",
                get(|auth: AuthContext| async move {
                    auth.logout().await.unwrap();
                    "bye"
                }),
            )
            .route(
                "/whoami",
                get(|RequireUser(user): RequireUser| async move { user.username }),
            )
            .layer(SessionManagerLayer::new(MemoryStore::default()).with_secure(false))
    }

    fn cookie_from(response: &Response) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("session cookie")
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn get_with_cookie(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        req.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn anonymous_is_redirected_to_login() {
        let response = app().oneshot(get_with_cookie("/whoami", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], LOGIN_PATH);
    }

    #[tokio::test]
    async fn login_then_logout_cycle() {
        let app = app();

        let response = app.clone().oneshot(get_with_cookie("/login", None)).await.unwrap();
        let cookie = cookie_from(&response);

        let response = app
            .clone()
            .oneshot(get_with_cookie("/whoami", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        app.clone()
            .oneshot(get_with_cookie("/logout", Some(&cookie)))
            .await
            .unwrap();

        let response = app
            .oneshot(get_with_cookie("/whoami", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
}
