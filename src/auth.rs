use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::tenant;

/// Single shared password for every pool. Connections naming a database that
/// cannot be a pool are turned away before the password exchange.
#[derive(Debug)]
pub struct GearloanAuthSource {
    password: String,
}

impl GearloanAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for GearloanAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        if let Some(db) = login.database().as_deref()
            && let Err(reason) = tenant::pool_file_stem(db)
        {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("rejecting login for database {db:?}: {reason}");
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "3D000".into(),
                format!("invalid pool name: {reason}"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
