//! Multi-host connection string splitting
//!
//! Accepts both the URI form (`postgresql://u:p@h1:5432,h2:5433/db?k=v`) and
//! the keyword form (`host=h1,h2 port=5432,5433 dbname=db`). Every resolved
//! (host, port) pair becomes one [`Dsn`]; duplicates are dropped keeping the
//! first occurrence.

use std::collections::HashSet;

use super::{is_ipv6_host, Dsn, DsnError};

/// Port used when the connection string does not name one
pub const DEFAULT_PORT: u16 = 5432;

/// Fields shared by every endpoint of one connection string
#[derive(Debug, Default)]
struct Parsed {
    hosts: Vec<(String, Option<u16>)>,
    user: Option<String>,
    password: Option<String>,
    dbname: Option<String>,
    params: Vec<(String, String)>,
}

/// Split a multi-host connection string into de-duplicated endpoint descriptors
pub fn split_dsn(dsn: &str) -> Result<Vec<Dsn>, DsnError> {
    let dsn = dsn.trim();
    let parsed = if let Some(rest) = strip_scheme(dsn) {
        parse_uri(rest)?
    } else if dsn.contains("://") {
        let scheme = dsn.split("://").next().unwrap_or_default();
        return Err(DsnError::Scheme(scheme.to_string()));
    } else {
        parse_keywords(dsn)?
    };

    if parsed.hosts.is_empty() {
        return Err(DsnError::NoHosts);
    }

    let mut seen = HashSet::new();
    let mut endpoints = Vec::with_capacity(parsed.hosts.len());
    for (host, port) in parsed.hosts {
        let endpoint = Dsn::build(
            host,
            port.unwrap_or(DEFAULT_PORT),
            parsed.user.clone(),
            parsed.password.clone(),
            parsed.dbname.clone(),
            parsed.params.clone(),
        );
        if seen.insert(endpoint.as_str().to_string()) {
            endpoints.push(endpoint);
        }
    }

    Ok(endpoints)
}

fn strip_scheme(dsn: &str) -> Option<&str> {
    dsn.strip_prefix("postgresql://")
        .or_else(|| dsn.strip_prefix("postgres://"))
}

fn decode(value: &str) -> Result<String, DsnError> {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .map_err(|_| DsnError::Malformed(format!("invalid percent-encoding in {:?}", value)))
}

fn parse_port(value: &str) -> Result<Option<u16>, DsnError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<u16>()
        .map(Some)
        .map_err(|_| DsnError::InvalidPort(value.to_string()))
}

fn parse_uri(rest: &str) -> Result<Parsed, DsnError> {
    let mut parsed = Parsed::default();

    let (rest, query) = match rest.split_once('?') {
        Some((rest, query)) => (rest, Some(query)),
        None => (rest, None),
    };

    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, Some(path)),
        None => (rest, None),
    };

    let hosts = match authority.rsplit_once('@') {
        Some((userinfo, hosts)) => {
            match userinfo.split_once(':') {
                Some((user, password)) => {
                    parsed.user = Some(decode(user)?);
                    parsed.password = Some(decode(password)?);
                }
                None if !userinfo.is_empty() => parsed.user = Some(decode(userinfo)?),
                None => {}
            }
            hosts
        }
        None => authority,
    };

    if let Some(path) = path.filter(|p| !p.is_empty()) {
        parsed.dbname = Some(decode(path)?);
    }

    for item in hosts.split(',').filter(|item| !item.is_empty()) {
        parsed.hosts.push(parse_host_item(item)?);
    }

    if let Some(query) = query {
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            parsed.params.push((decode(key)?, decode(value)?));
        }
    }

    Ok(parsed)
}

/// Parse `host`, `host:port`, `[v6]` or `[v6]:port`
fn parse_host_item(item: &str) -> Result<(String, Option<u16>), DsnError> {
    if let Some(bracketed) = item.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| DsnError::Malformed(format!("unterminated IPv6 host {:?}", item)))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None if tail.is_empty() => None,
            None => return Err(DsnError::Malformed(format!("unexpected {:?} after host", tail))),
        };
        if host.is_empty() {
            return Err(DsnError::EmptyHost);
        }
        return Ok((host.to_string(), port));
    }

    // A bare IPv6 literal cannot carry a port
    if is_ipv6_host(item) {
        return Ok((item.to_string(), None));
    }

    let (host, port) = match item.split_once(':') {
        Some((host, port)) => (host, parse_port(port)?),
        None => (item, None),
    };
    if host.is_empty() {
        return Err(DsnError::EmptyHost);
    }
    Ok((decode(host)?, port))
}

fn parse_keywords(dsn: &str) -> Result<Parsed, DsnError> {
    let mut parsed = Parsed::default();
    let mut hosts: Vec<String> = Vec::new();
    let mut ports: Option<Vec<Option<u16>>> = None;

    for (key, value) in tokenize_keywords(dsn)? {
        match key.as_str() {
            "host" => {
                hosts = value.split(',').map(|h| h.trim().to_string()).collect();
            }
            "port" => {
                ports = Some(value.split(',').map(parse_port).collect::<Result<_, _>>()?);
            }
            "user" => parsed.user = Some(value),
            "password" => parsed.password = Some(value),
            "dbname" => parsed.dbname = Some(value),
            _ => parsed.params.push((key, value)),
        }
    }

    if hosts.iter().any(|h| h.is_empty()) {
        return Err(DsnError::EmptyHost);
    }

    let ports = match ports {
        Some(ports) if ports.len() != hosts.len() => {
            return Err(DsnError::PortCountMismatch {
                hosts: hosts.len(),
                ports: ports.len(),
            });
        }
        Some(ports) => ports,
        None => vec![None; hosts.len()],
    };

    parsed.hosts = hosts.into_iter().zip(ports).collect();
    Ok(parsed)
}

/// Split `key=value` pairs, honouring single quotes and backslash escapes
fn tokenize_keywords(dsn: &str) -> Result<Vec<(String, String)>, DsnError> {
    let mut pairs = Vec::new();
    let mut chars = dsn.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(DsnError::Malformed(format!("missing \"=\" after {:?}", key)));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(c) => value.push(c),
                        None => return Err(DsnError::Malformed("dangling escape".into())),
                    },
                    Some('\'') => break,
                    Some(c) => value.push(c),
                    None => return Err(DsnError::Malformed("unterminated quoted value".into())),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                } else {
                    value.push(c);
                }
            }
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}
