//! CoRE Link Format (RFC 6690) for registration and Discover payloads

use std::fmt;

use crate::error::{Lwm2mError, Result};
use crate::path::Path;

/// One link-value: `</3/0/9>;pmin=10`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub path: Path,
    /// Link parameters in insertion order
    pub params: Vec<(String, String)>,
}

impl Link {
    pub fn new(path: Path) -> Self {
        Self {
            path,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    /// Value of a link parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.path)?;
        for (key, value) in &self.params {
            if value.is_empty() {
                write!(f, ";{}", key)?;
            } else {
                write!(f, ";{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

/// Serialize links as a comma separated list
pub fn format(links: &[Link]) -> String {
    links
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Registration payload: `</1/0>,</3/0>`
pub fn format_paths(paths: &[Path]) -> String {
    let links: Vec<Link> = paths.iter().copied().map(Link::new).collect();
    format(&links)
}

/// Parse a link-format payload
///
/// Links whose target is not an LwM2M path (such as `</>;rt="oma.lwm2m"`)
/// are skipped.
pub fn parse(payload: &str) -> Result<Vec<Link>> {
    let mut links = Vec::new();
    for entry in payload.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.split(';');
        let target = parts
            .next()
            .and_then(|t| t.strip_prefix('<'))
            .and_then(|t| t.strip_suffix('>'))
            .ok_or_else(|| Lwm2mError::Decode(format!("bad link `{}`", entry)))?;

        let Ok(path) = target.parse::<Path>() else {
            continue;
        };
        let mut link = Link::new(path);
        for param in parts {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            link.params
                .push((key.trim().to_string(), value.trim_matches('"').to_string()));
        }
        links.push(link);
    }
    Ok(links)
}
