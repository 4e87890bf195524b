//! Endpoint descriptors for multi-host connection strings
//!
//! A [`Dsn`] describes exactly one physical endpoint (host:port plus the
//! credentials and parameters shared by the whole logical connection string).
//! Equality and hashing go through the canonical rendering, so two descriptors
//! that render the same are the same endpoint.

mod split;

use std::fmt;
use std::hash::{Hash, Hasher};

pub use split::{split_dsn, DEFAULT_PORT};

/// Placeholder used instead of the real password in logs
pub const REDACTED_PASSWORD: &str = "******";

/// Error while parsing a connection string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DsnError {
    #[error("Unsupported connection string scheme: {0}")]
    Scheme(String),
    #[error("Connection string has no hosts")]
    NoHosts,
    #[error("Empty host in connection string")]
    EmptyHost,
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    #[error("Host and port amounts mismatch: {hosts} hosts, {ports} ports")]
    PortCountMismatch { hosts: usize, ports: usize },
    #[error("Malformed connection string: {0}")]
    Malformed(String),
}

/// Immutable description of one database endpoint
#[derive(Debug, Clone)]
pub struct Dsn {
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    dbname: Option<String>,
    params: Vec<(String, String)>,
    rendered: String,
}

impl Dsn {
    /// Create a descriptor for `host:port` without credentials
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::build(host.into(), port, None, None, None, Vec::new())
    }

    fn build(
        host: String,
        port: u16,
        user: Option<String>,
        password: Option<String>,
        dbname: Option<String>,
        params: Vec<(String, String)>,
    ) -> Self {
        let mut dsn = Self {
            host,
            port,
            user,
            password,
            dbname,
            params,
            rendered: String::new(),
        };
        dsn.rendered = dsn.render();
        dsn
    }

    fn render(&self) -> String {
        let mut out = String::from("postgresql://");
        if let Some(user) = &self.user {
            out.push_str(&urlencoding::encode(user));
            if let Some(password) = &self.password {
                out.push(':');
                // The redaction marker stays readable in logs
                if password == REDACTED_PASSWORD {
                    out.push_str(password);
                } else {
                    out.push_str(&urlencoding::encode(password));
                }
            }
            out.push('@');
        }

        if is_ipv6_host(&self.host) {
            out.push_str(&format!("[{}]:{}", self.host, self.port));
        } else {
            out.push_str(&format!("{}:{}", self.host, self.port));
        }

        if let Some(dbname) = &self.dbname {
            out.push('/');
            out.push_str(&urlencoding::encode(dbname));
        }

        if !self.params.is_empty() {
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            out.push('?');
            out.push_str(&query.join("&"));
        }

        out
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn dbname(&self) -> Option<&str> {
        self.dbname.as_deref()
    }

    /// Extra connection parameters in their original order
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Address in `host:port` form
    pub fn addr(&self) -> String {
        if is_ipv6_host(&self.host) {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Canonical rendering, identical to `to_string()`
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn with_host(&self, host: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.host = host.into();
        next.refresh()
    }

    pub fn with_port(&self, port: u16) -> Self {
        let mut next = self.clone();
        next.port = port;
        next.refresh()
    }

    pub fn with_user(&self, user: Option<String>) -> Self {
        let mut next = self.clone();
        next.user = user;
        next.refresh()
    }

    pub fn with_password(&self, password: Option<String>) -> Self {
        let mut next = self.clone();
        next.password = password;
        next.refresh()
    }

    pub fn with_dbname(&self, dbname: Option<String>) -> Self {
        let mut next = self.clone();
        next.dbname = dbname;
        next.refresh()
    }

    /// Copy with `key` set to `value`, replacing an existing entry in place
    pub fn with_param(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let mut next = self.clone();
        match next.params.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => next.params.push((key, value)),
        }
        next.refresh()
    }

    /// Copy safe for logging: the password (if any) is masked
    pub fn redacted(&self) -> Self {
        match self.password {
            Some(_) => self.with_password(Some(REDACTED_PASSWORD.to_string())),
            None => self.clone(),
        }
    }

    fn refresh(mut self) -> Self {
        self.rendered = self.render();
        self
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl PartialEq for Dsn {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for Dsn {}

impl Hash for Dsn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

/// More than one colon means an IPv6 literal
pub fn is_ipv6_host(host: &str) -> bool {
    host.matches(':').count() > 1
}
