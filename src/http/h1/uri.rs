//! Minimal request URI model.
//!
//! Covers the forms HTTP/1.x request targets and client requests use:
//! `scheme://[userinfo@]host[:port][/path][?query][#fragment]` and
//! origin-form `/path[?query]`. Percent-encoding is carried through
//! untouched.

use crate::error::{Error, Result};
use std::fmt;

/// A parsed URI reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    scheme: Option<String>,
    userinfo: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

/// Host, port and user info parsed from an authority component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    /// User info before `@`.
    pub userinfo: Option<String>,
    /// Host name or bracketed IPv6 literal.
    pub host: String,
    /// Explicit port.
    pub port: Option<u16>,
}

impl Authority {
    /// Parses `[userinfo@]host[:port]`.
    pub fn parse(text: &str) -> Result<Self> {
        let (userinfo, rest) = match text.rfind('@') {
            Some(at) => (Some(text[..at].to_owned()), &text[at + 1..]),
            None => (None, text),
        };
        let (host, port) = if rest.starts_with('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| Error::protocol(format!("Unterminated IPv6 literal: {text}")))?;
            let host = &rest[..=end];
            match &rest[end + 1..] {
                "" => (host, None),
                port => (
                    host,
                    Some(port.strip_prefix(':').ok_or_else(|| {
                        Error::protocol(format!("Invalid authority: {text}"))
                    })?),
                ),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };
        if host.is_empty() {
            return Err(Error::protocol(format!("Empty host: {text}")));
        }
        let port = match port {
            None | Some("") => None,
            Some(port) => Some(
                port.parse()
                    .map_err(|_| Error::protocol(format!("Invalid port: {text}")))?,
            ),
        };
        Ok(Self {
            userinfo,
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Default port for `scheme`, if the scheme is known.
#[must_use]
pub fn default_port(scheme: &str) -> Option<u16> {
    if scheme.eq_ignore_ascii_case("http") {
        Some(80)
    } else if scheme.eq_ignore_ascii_case("https") {
        Some(443)
    } else {
        None
    }
}

impl Uri {
    /// Parses an absolute URI or an origin-form reference.
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(Error::protocol("Empty URI"));
        }
        if text.chars().any(|c| c.is_ascii_whitespace() || c.is_ascii_control()) {
            return Err(Error::protocol(format!("Invalid character in URI: {text}")));
        }
        let (rest, fragment) = match text.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_owned())),
            None => (text, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query.to_owned())),
            None => (rest, None),
        };
        let mut uri = Self {
            query,
            fragment,
            ..Self::default()
        };
        let path = match rest.split_once("://") {
            Some((scheme, after)) if is_scheme(scheme) => {
                uri.scheme = Some(scheme.to_ascii_lowercase());
                let (authority, path) = after
                    .find('/')
                    .map_or((after, ""), |slash| (&after[..slash], &after[slash..]));
                let authority = Authority::parse(authority)?;
                uri.userinfo = authority.userinfo;
                uri.host = Some(authority.host);
                uri.port = authority.port;
                path
            }
            _ => rest,
        };
        uri.path = path.to_owned();
        Ok(uri)
    }

    /// Builds `scheme://authority` with an empty path.
    pub fn from_authority(scheme: &str, authority: &str) -> Result<Self> {
        let parsed = Authority::parse(authority)?;
        Ok(Self {
            scheme: Some(scheme.to_ascii_lowercase()),
            userinfo: parsed.userinfo,
            host: Some(parsed.host),
            port: parsed.port,
            ..Self::default()
        })
    }

    /// Lowercased scheme of an absolute URI.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// User info, if present.
    #[must_use]
    pub fn userinfo(&self) -> Option<&str> {
        self.userinfo.as_deref()
    }

    /// Host of an absolute URI.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Explicit port.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Explicit port or the scheme default.
    #[must_use]
    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or_else(|| self.scheme().and_then(default_port))
    }

    /// Path, possibly empty.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query without `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Fragment without `#`.
    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Returns true if the URI has a scheme and host.
    #[must_use]
    pub const fn is_absolute(&self) -> bool {
        self.scheme.is_some() && self.host.is_some()
    }

    /// `host[:port]` without user info.
    #[must_use]
    pub fn authority(&self) -> Option<String> {
        self.host.as_ref().map(|host| {
            Authority {
                userinfo: None,
                host: host.clone(),
                port: self.port,
            }
            .to_string()
        })
    }

    /// Path and query, as sent in origin-form.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    /// The same URI without its fragment.
    #[must_use]
    pub fn without_fragment(mut self) -> Self {
        self.fragment = None;
        self
    }
}

fn is_scheme(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}://")?;
        }
        if let Some(userinfo) = &self.userinfo {
            write!(f, "{userinfo}@")?;
        }
        if let Some(host) = &self.host {
            f.write_str(host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        f.write_str(&self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Uri {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_uri() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("parses_absolute_uri");
        let uri = Uri::parse("HTTP://user@Example.com:8080/a/b?x=1#top").expect("parse");
        assert_eq!(uri.scheme(), Some("http"));
        assert_eq!(uri.userinfo(), Some("user"));
        assert_eq!(uri.host(), Some("Example.com"));
        assert_eq!(uri.port(), Some(8080));
        assert_eq!(uri.path(), "/a/b");
        assert_eq!(uri.query(), Some("x=1"));
        assert_eq!(uri.fragment(), Some("top"));
        assert_eq!(uri.authority().as_deref(), Some("Example.com:8080"));
        assert_eq!(
            uri.clone().without_fragment().to_string(),
            "http://user@Example.com:8080/a/b?x=1"
        );
        crate::test_complete!("parses_absolute_uri");
    }

    #[test]
    fn parses_origin_form_and_ipv6() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("parses_origin_form_and_ipv6");
        let origin = Uri::parse("/index.html?q").expect("origin");
        assert!(!origin.is_absolute());
        assert_eq!(origin.path_and_query(), "/index.html?q");

        let v6 = Uri::parse("http://[::1]:81").expect("v6");
        assert_eq!(v6.host(), Some("[::1]"));
        assert_eq!(v6.port(), Some(81));
        assert_eq!(v6.path(), "");
        assert_eq!(Uri::parse("http://h").expect("h").port_or_default(), Some(80));
        crate::test_complete!("parses_origin_form_and_ipv6");
    }

    #[test]
    fn rejects_bad_authorities() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("rejects_bad_authorities");
        assert!(Uri::parse("http://:80/").is_err());
        assert!(Uri::parse("http://h:port/").is_err());
        assert!(Uri::parse("http://[::1/").is_err());
        assert!(Uri::parse("/a b").is_err());
        assert!(Authority::parse("example.com:99999").is_err());
        crate::test_complete!("rejects_bad_authorities");
    }
}
