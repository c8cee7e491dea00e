use sqlx::postgres::PgConnectOptions;

use crate::RuntimeEndpoint;

pub const POSTGRES_PORT: u16 = 5432;

/// Database credentials and location. This is never mutated in place, the
/// `with_*` functions return fresh values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub user: String,
    pub db: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl Default for ConnectInfo {
    fn default() -> Self {
        Self {
            user: "nycdb".to_owned(),
            db: "nycdb".to_owned(),
            password: "nycdb".to_owned(),
            host: "localhost".to_owned(),
            port: POSTGRES_PORT,
        }
    }
}

impl ConnectInfo {
    /// Points the host at wherever the runtime publishes its ports. For a
    /// remote TLS endpoint (a docker machine) this is the endpoint's hostname,
    /// anything else publishes on the local machine.
    pub fn with_runtime_host(&self, endpoint: &RuntimeEndpoint) -> Self {
        let host = if endpoint.tls {
            url::Url::parse(&endpoint.url)
                .ok()
                .and_then(|url| url.host_str().map(ToOwned::to_owned))
        } else {
            None
        };
        Self {
            host: host.unwrap_or_else(|| "localhost".to_owned()),
            ..self.clone()
        }
    }

    /// The environment the official postgres image uses to initialize itself
    pub fn to_postgres_environment(&self) -> Vec<(&'static str, String)> {
        vec![
            ("POSTGRES_USER", self.user.clone()),
            ("POSTGRES_PASSWORD", self.password.clone()),
            ("POSTGRES_DB", self.db.clone()),
        ]
    }

    pub fn to_connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.db)
    }
}
