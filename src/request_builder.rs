//! Client-side request building utilities
//!
//! Helpers for constructing registration interface requests and reading
//! their responses.

use crate::coap_types::{ContentFormat, Method, Request, Response};
use crate::error::{Lwm2mError, Result};
use crate::link;
use crate::path::Path;

/// LwM2M enabler version announced at registration
pub const LWM2M_VERSION: &str = "1.0";

/// Registration interface request builder
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    endpoint_name: String,
    lifetime: u32,
    binding: String,
}

impl RequestBuilder {
    /// Create a new request builder
    pub fn new(endpoint_name: &str, lifetime: u32, binding: &str) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            lifetime,
            binding: binding.to_string(),
        }
    }

    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    pub fn set_lifetime(&mut self, lifetime: u32) {
        self.lifetime = lifetime;
    }

    /// Build the Register request
    ///
    /// `POST /rd?ep=<ep>&lt=<lt>&b=<b>&lwm2m=1.0` with the object links as
    /// link-format payload.
    pub fn build_register(&self, links: &[Path]) -> Request {
        Request::new(Method::Post, "/rd")
            .with_query(format!("ep={}", self.endpoint_name))
            .with_query(format!("lt={}", self.lifetime))
            .with_query(format!("b={}", self.binding))
            .with_query(format!("lwm2m={}", LWM2M_VERSION))
            .with_payload(link::format_paths(links).into_bytes(), ContentFormat::LinkFormat)
    }

    /// Build the Update request for a registration location
    ///
    /// Links are only sent when the object list changed; the lifetime only
    /// when it differs from the registered one.
    pub fn build_update(
        &self,
        location: &[String],
        links: Option<&[Path]>,
        lifetime_changed: bool,
    ) -> Request {
        let mut request = Request::new(Method::Post, &location.join("/"));
        if lifetime_changed {
            request = request.with_query(format!("lt={}", self.lifetime));
        }
        if let Some(links) = links {
            request = request
                .with_payload(link::format_paths(links).into_bytes(), ContentFormat::LinkFormat);
        }
        request
    }

    /// Build the De-register request
    pub fn build_deregister(&self, location: &[String]) -> Request {
        Request::new(Method::Delete, &location.join("/"))
    }

    /// Extract the registration location from a Register response
    pub fn parse_location(response: &Response) -> Result<Vec<String>> {
        if response.location_path.is_empty() {
            return Err(Lwm2mError::Registration(
                "register response carries no Location-Path".into(),
            ));
        }
        Ok(response.location_path.clone())
    }
}
