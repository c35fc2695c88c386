//! Connection options.

use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Connection options for PostgreSQL.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path. Takes precedence over `host`/`port`.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// Additional startup parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// TCP keepalive idle time.
    ///
    /// Default: `None`
    pub tcp_keepalive: Option<Duration>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            socket: None,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            params: Vec::new(),
            tcp_keepalive: None,
        }
    }
}

impl Opts {
    /// Where this connects to, for logs.
    pub fn target(&self) -> String {
        match &self.socket {
            Some(path) => path.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Recognised query parameters:
    /// - `sslmode`: only `disable`
    /// - `application_name`
    /// - `host`: a path starting with `/` selects a Unix socket directory
    /// - `keepalives_idle`: seconds
    ///
    /// Anything else is sent to the server as a startup parameter.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::Options(format!(
                "invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url
                .path()
                .strip_prefix('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" => {
                    if value != "disable" {
                        return Err(Error::Options(format!(
                            "unsupported sslmode {value:?}: only 'disable' is available"
                        )));
                    }
                }
                "application_name" => opts.application_name = Some(value.to_string()),
                "host" if value.starts_with('/') => {
                    opts.socket = Some(format!("{}/.s.PGSQL.{}", value, opts.port));
                }
                "keepalives_idle" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Options(format!("invalid keepalives_idle: {value}")))?;
                    opts.tcp_keepalive = Some(Duration::from_secs(secs));
                }
                _ => opts.params.push((key.to_string(), value.to_string())),
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::Options(format!("invalid URL: {e}")))?;
        Self::try_from(&url)
    }
}
