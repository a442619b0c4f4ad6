//! Remote targets and their credentials

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Schemes a session can be opened for
pub const SUPPORTED_SCHEMES: [&str; 2] = ["ssh", "scp"];

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 22;

/// Authentication material attached to a target by the caller
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Remote user name
    pub username: String,
    /// Password, used for password authentication and sudo prompts
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Private key for key authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

impl Credential {
    /// Create a credential for a user
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the identity file (private key)
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("identity_file", &self.identity_file)
            .finish()
    }
}

/// A remote host addressed as `scheme://[user[:password]@]host[:port]/path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// URL scheme, lowercased
    pub scheme: String,
    /// Host name or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// User from the URL, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Remote path sessions change into on open and reuse
    #[serde(default)]
    pub path: String,
    /// Credential resolved by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

impl Target {
    /// Parse a target URL
    ///
    /// A password embedded in the URL becomes the target's credential. The
    /// scheme is not checked here; see [`Target::validate_scheme`].
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::invalid_target(url, "missing scheme"))?;
        if scheme.is_empty() {
            return Err(Error::invalid_target(url, "missing scheme"));
        }
        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash..]),
            None => (rest, ""),
        };
        let (userinfo, host_port) = match authority.rsplit_once('@') {
            Some((userinfo, host_port)) => (Some(userinfo), host_port),
            None => (None, authority),
        };
        let (user, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, password)) => (Some(user), Some(password)),
                None => (Some(info), None),
            },
            None => (None, None),
        };
        let (host, port) = split_host_port(url, host_port)?;

        let user = user.filter(|u| !u.is_empty()).map(str::to_string);
        let credential = password.map(|password| {
            Credential::new(user.clone().unwrap_or_default()).with_password(password)
        });

        Ok(Self {
            scheme: scheme.to_lowercase(),
            host: if host.is_empty() { DEFAULT_HOST.to_string() } else { host.to_string() },
            port: port.unwrap_or(DEFAULT_PORT),
            user,
            path: path.to_string(),
            credential,
        })
    }

    /// Attach a credential
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Reject schemes a session can not be opened for
    pub fn validate_scheme(&self) -> Result<()> {
        if SUPPORTED_SCHEMES.contains(&self.scheme.as_str()) {
            Ok(())
        } else {
            Err(Error::UnsupportedScheme {
                scheme: self.scheme.clone(),
                url: self.to_string(),
            })
        }
    }

    /// Remote user: the credential's, then the URL's, else empty
    pub fn username(&self) -> &str {
        self.credential
            .as_ref()
            .map(|c| c.username.as_str())
            .filter(|name| !name.is_empty())
            .or(self.user.as_deref())
            .unwrap_or_default()
    }

    /// Password from the credential, if any
    pub fn password(&self) -> Option<&str> {
        self.credential
            .as_ref()
            .and_then(|c| c.password.as_deref())
            .filter(|password| !password.is_empty())
    }

    /// Identity file from the credential, if any
    pub fn identity_file(&self) -> Option<&PathBuf> {
        self.credential.as_ref().and_then(|c| c.identity_file.as_ref())
    }

    /// Key sessions are cached under: `user@host:port`
    pub fn session_key(&self) -> String {
        format!("{}@{}:{}", self.username(), self.host, self.port)
    }

    /// `user@host` as passed to ssh, or just the host without a user
    pub fn host_string(&self) -> String {
        match self.username() {
            "" => self.host.clone(),
            user => format!("{}@{}", user, self.host),
        }
    }
}

fn split_host_port<'a>(url: &str, host_port: &'a str) -> Result<(&'a str, Option<u16>)> {
    // bracketed IPv6 literal
    if let Some(rest) = host_port.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::invalid_target(url, "unterminated IPv6 address"))?;
        return match after.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(url, port)?))),
            None => Ok((host, None)),
        };
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(url, port)?))),
        None => Ok((host_port, None)),
    }
}

fn parse_port(url: &str, port: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| Error::invalid_target(url, format!("invalid port '{port}'")))
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        Self::parse(url)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}
