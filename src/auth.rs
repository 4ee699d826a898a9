use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::model::Actor;
use crate::observability;

/// `admin`, `member:<ULID>` or `trainer:<ULID>`.
pub fn actor_from_login(user: &str) -> Option<Actor> {
    if user == "admin" {
        return Some(Actor::Admin);
    }
    let (role, id) = user.split_once(':')?;
    let id = Ulid::from_string(id).ok()?;
    match role {
        "member" => Some(Actor::Member(id)),
        "trainer" => Some(Actor::Trainer(id)),
        _ => None,
    }
}

/// One shared password; the login user name carries the identity.
#[derive(Debug)]
pub struct GymSlotAuthSource {
    password: String,
}

impl GymSlotAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for GymSlotAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if actor_from_login(user).is_none() {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("login refused for user {user:?}");
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                format!("unknown user {user:?}: expected admin, member:<id> or trainer:<id>"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
