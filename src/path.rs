//! LwM2M resource addressing
//!
//! Paths follow the `/Object/Instance/Resource/ResourceInstance` hierarchy.
//! Any suffix may be omitted, so `/3` names the Device object and `/3/0/9`
//! its battery level resource.

use std::fmt;
use std::str::FromStr;

use crate::error::{Lwm2mError, Result};

/// A (possibly partial) LwM2M path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    pub object: u16,
    pub instance: Option<u16>,
    pub resource: Option<u16>,
    pub resource_instance: Option<u16>,
}

impl Path {
    /// Path to a whole object
    pub const fn object(object: u16) -> Self {
        Self {
            object,
            instance: None,
            resource: None,
            resource_instance: None,
        }
    }

    /// Path to an object instance
    pub const fn instance(object: u16, instance: u16) -> Self {
        Self {
            object,
            instance: Some(instance),
            resource: None,
            resource_instance: None,
        }
    }

    /// Path to a resource
    pub const fn resource(object: u16, instance: u16, resource: u16) -> Self {
        Self {
            object,
            instance: Some(instance),
            resource: Some(resource),
            resource_instance: None,
        }
    }

    /// Path to one instance of a multiple-instance resource
    pub const fn resource_instance(object: u16, instance: u16, resource: u16, ri: u16) -> Self {
        Self {
            object,
            instance: Some(instance),
            resource: Some(resource),
            resource_instance: Some(ri),
        }
    }

    /// Parse from CoAP Uri-Path segments (`["3", "0", "9"]`)
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Result<Self> {
        if segments.is_empty() || segments.len() > 4 {
            let joined: Vec<&str> = segments.iter().map(AsRef::as_ref).collect();
            return Err(Lwm2mError::InvalidPath(format!("/{}", joined.join("/"))));
        }

        let mut ids = [None; 4];
        for (slot, segment) in ids.iter_mut().zip(segments) {
            let segment = segment.as_ref();
            let id = segment
                .parse::<u16>()
                .map_err(|_| Lwm2mError::InvalidPath(segment.to_string()))?;
            // 65535 is reserved by the protocol
            if id == u16::MAX {
                return Err(Lwm2mError::InvalidPath(segment.to_string()));
            }
            *slot = Some(id);
        }

        Ok(Self {
            object: ids[0].unwrap_or_default(),
            instance: ids[1],
            resource: ids[2],
            resource_instance: ids[3],
        })
    }

    /// Number of addressed levels (1 = object .. 4 = resource instance)
    pub fn depth(&self) -> usize {
        1 + [self.instance, self.resource, self.resource_instance]
            .iter()
            .take_while(|id| id.is_some())
            .count()
    }

    pub fn is_resource(&self) -> bool {
        self.resource.is_some() && self.resource_instance.is_none()
    }

    pub fn is_instance(&self) -> bool {
        self.instance.is_some() && self.resource.is_none()
    }

    pub fn is_object(&self) -> bool {
        self.instance.is_none()
    }

    /// True if `other` is this path or lies beneath it
    pub fn contains(&self, other: &Path) -> bool {
        if self.object != other.object {
            return false;
        }
        let mine = [self.instance, self.resource, self.resource_instance];
        let theirs = [other.instance, other.resource, other.resource_instance];
        mine.iter()
            .zip(theirs.iter())
            .all(|(m, t)| m.is_none() || m == t)
    }

    /// The path truncated to its resource level
    pub fn without_resource_instance(&self) -> Self {
        Self {
            resource_instance: None,
            ..*self
        }
    }

    /// Uri-Path segments for this path
    pub fn segments(&self) -> Vec<String> {
        let mut out = vec![self.object.to_string()];
        for id in [self.instance, self.resource, self.resource_instance]
            .into_iter()
            .map_while(|id| id)
        {
            out.push(id.to_string());
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments().join("/"))
    }
}

impl FromStr for Path {
    type Err = Lwm2mError;

    fn from_str(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split('/').filter(|p| !p.is_empty()).collect();
        Self::from_segments(&segments)
    }
}
