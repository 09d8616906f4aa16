//! LwM2M-specific CoAP types and constants
//!
//! This module defines transport-agnostic request and response types.
//! The wire encoding lives in [`crate::transport`].

use crate::error::Lwm2mError;

/// CoAP Content-Format identifiers used by LwM2M
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ContentFormat {
    /// text/plain; charset=utf-8
    TextPlain = 0,
    /// application/link-format
    LinkFormat = 40,
    /// application/octet-stream
    OctetStream = 42,
    /// application/senml+json
    SenmlJson = 110,
    /// application/senml+cbor
    SenmlCbor = 112,
    /// application/vnd.oma.lwm2m+tlv
    Tlv = 11542,
}

impl ContentFormat {
    /// Convert from raw content-format ID
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::TextPlain),
            40 => Some(Self::LinkFormat),
            42 => Some(Self::OctetStream),
            110 => Some(Self::SenmlJson),
            112 => Some(Self::SenmlCbor),
            11542 => Some(Self::Tlv),
            _ => None,
        }
    }

    /// Get the raw content-format ID
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// CoAP request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
            Method::Put => f.write_str("PUT"),
            Method::Delete => f.write_str("DELETE"),
        }
    }
}

/// CoAP response codes used by LwM2M
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    // Success codes
    /// 2.01 Created
    Created,
    /// 2.02 Deleted
    Deleted,
    /// 2.03 Valid
    Valid,
    /// 2.04 Changed
    Changed,
    /// 2.05 Content
    Content,

    // Client error codes
    /// 4.00 Bad Request
    BadRequest,
    /// 4.01 Unauthorized
    Unauthorized,
    /// 4.02 Bad Option
    BadOption,
    /// 4.03 Forbidden
    Forbidden,
    /// 4.04 Not Found
    NotFound,
    /// 4.05 Method Not Allowed
    MethodNotAllowed,
    /// 4.06 Not Acceptable
    NotAcceptable,
    /// 4.12 Precondition Failed
    PreconditionFailed,
    /// 4.13 Request Entity Too Large
    RequestEntityTooLarge,
    /// 4.15 Unsupported Content-Format
    UnsupportedContentFormat,

    // Server error codes
    /// 5.00 Internal Server Error
    InternalServerError,
    /// 5.01 Not Implemented
    NotImplemented,
    /// 5.03 Service Unavailable
    ServiceUnavailable,
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (class, detail) = self.to_code_pair();
        write!(f, "{}.{:02}", class, detail)
    }
}

impl ResponseCode {
    /// Convert to CoAP response code format (class.detail)
    pub fn to_code_pair(self) -> (u8, u8) {
        match self {
            Self::Created => (2, 1),
            Self::Deleted => (2, 2),
            Self::Valid => (2, 3),
            Self::Changed => (2, 4),
            Self::Content => (2, 5),
            Self::BadRequest => (4, 0),
            Self::Unauthorized => (4, 1),
            Self::BadOption => (4, 2),
            Self::Forbidden => (4, 3),
            Self::NotFound => (4, 4),
            Self::MethodNotAllowed => (4, 5),
            Self::NotAcceptable => (4, 6),
            Self::PreconditionFailed => (4, 12),
            Self::RequestEntityTooLarge => (4, 13),
            Self::UnsupportedContentFormat => (4, 15),
            Self::InternalServerError => (5, 0),
            Self::NotImplemented => (5, 1),
            Self::ServiceUnavailable => (5, 3),
        }
    }

    /// Convert from CoAP class.detail
    pub fn from_code_pair(class: u8, detail: u8) -> Option<Self> {
        let code = match (class, detail) {
            (2, 1) => Self::Created,
            (2, 2) => Self::Deleted,
            (2, 3) => Self::Valid,
            (2, 4) => Self::Changed,
            (2, 5) => Self::Content,
            (4, 0) => Self::BadRequest,
            (4, 1) => Self::Unauthorized,
            (4, 2) => Self::BadOption,
            (4, 3) => Self::Forbidden,
            (4, 4) => Self::NotFound,
            (4, 5) => Self::MethodNotAllowed,
            (4, 6) => Self::NotAcceptable,
            (4, 12) => Self::PreconditionFailed,
            (4, 13) => Self::RequestEntityTooLarge,
            (4, 15) => Self::UnsupportedContentFormat,
            (5, 0) => Self::InternalServerError,
            (5, 1) => Self::NotImplemented,
            (5, 3) => Self::ServiceUnavailable,
            _ => return None,
        };
        Some(code)
    }

    /// Check if this is a success code
    pub fn is_success(self) -> bool {
        self.to_code_pair().0 == 2
    }
}

impl From<&Lwm2mError> for ResponseCode {
    fn from(err: &Lwm2mError) -> Self {
        match err {
            Lwm2mError::ResourceNotFound(_) | Lwm2mError::ObservationNotFound => Self::NotFound,
            Lwm2mError::TypeMismatch { .. }
            | Lwm2mError::InvalidPath(_)
            | Lwm2mError::Decode(_)
            | Lwm2mError::AlreadyExists(_) => Self::BadRequest,
            Lwm2mError::ReadOnly(_) | Lwm2mError::NotReadable(_) | Lwm2mError::NotExecutable(_) => {
                Self::MethodNotAllowed
            }
            Lwm2mError::NotAcceptable(_) => Self::NotAcceptable,
            Lwm2mError::UnsupportedContentFormat(_) => Self::UnsupportedContentFormat,
            _ => Self::InternalServerError,
        }
    }
}

/// Notification attributes carried in Uri-Query (Write-Attributes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryParams {
    /// Minimum seconds between notifications
    pub pmin: Option<u32>,
    /// Maximum seconds without a notification
    pub pmax: Option<u32>,
}

impl QueryParams {
    /// Parse attributes from Uri-Query options (`pmin=10`, `pmax=60`)
    pub fn parse<S: AsRef<str>>(queries: &[S]) -> Result<Self, Lwm2mError> {
        let mut params = Self::default();
        for query in queries {
            let query = query.as_ref();
            let (key, value) = query.split_once('=').unwrap_or((query, ""));
            let parsed = || {
                value
                    .parse::<u32>()
                    .map_err(|_| Lwm2mError::Decode(format!("bad attribute `{}`", query)))
            };
            match key {
                "pmin" => params.pmin = Some(parsed()?),
                "pmax" => params.pmax = Some(parsed()?),
                _ => {}
            }
        }
        Ok(params)
    }

    pub fn is_empty(&self) -> bool {
        self.pmin.is_none() && self.pmax.is_none()
    }
}

/// An LwM2M request (transport-agnostic)
#[derive(Debug, Clone)]
pub struct Request {
    /// The request method
    pub method: Method,
    /// Uri-Path segments
    pub path: Vec<String>,
    /// Uri-Query options
    pub query: Vec<String>,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Content format of the payload (raw, may be unknown)
    pub content_format: Option<u16>,
    /// Requested response format (raw, may be unknown)
    pub accept: Option<u16>,
    /// Observe option value
    pub observe: Option<u32>,
}

impl Request {
    /// Create a new request
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
            payload: Vec::new(),
            content_format: None,
            accept: None,
            observe: None,
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Vec<u8>, format: ContentFormat) -> Self {
        self.payload = payload;
        self.content_format = Some(format.as_u16());
        self
    }

    /// Add a Uri-Query option
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query.push(query.into());
        self
    }

    /// Set the Accept option
    pub fn with_accept(mut self, format: ContentFormat) -> Self {
        self.accept = Some(format.as_u16());
        self
    }

    /// Set the Observe option
    pub fn with_observe(mut self, observe: u32) -> Self {
        self.observe = Some(observe);
        self
    }

    /// Uri-Path joined with `/`
    pub fn path_string(&self) -> String {
        format!("/{}", self.path.join("/"))
    }
}

/// An LwM2M response (transport-agnostic)
#[derive(Debug, Clone)]
pub struct Response {
    /// Response code
    pub code: ResponseCode,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Content format of the payload
    pub content_format: Option<ContentFormat>,
    /// Observe sequence number, set when the response starts an observation
    pub observe: Option<u32>,
    /// Location-Path segments (registration responses)
    pub location_path: Vec<String>,
}

impl Response {
    /// Create a response without payload
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            payload: Vec::new(),
            content_format: None,
            observe: None,
            location_path: Vec::new(),
        }
    }

    /// Create a success response with content
    pub fn content(payload: Vec<u8>, format: ContentFormat) -> Self {
        Self {
            payload,
            content_format: Some(format),
            ..Self::new(ResponseCode::Content)
        }
    }

    /// Create a changed response (write, execute, write-attributes)
    pub fn changed() -> Self {
        Self::new(ResponseCode::Changed)
    }

    /// Create an error response
    pub fn error(code: ResponseCode, message: &str) -> Self {
        Self {
            payload: message.as_bytes().to_vec(),
            content_format: Some(ContentFormat::TextPlain),
            ..Self::new(code)
        }
    }

    /// Create an error response for a client error
    pub fn from_error(err: &Lwm2mError) -> Self {
        Self::error(ResponseCode::from(err), &err.to_string())
    }

    /// Create a method not allowed error
    pub fn method_not_allowed(method: Method) -> Self {
        Self::error(
            ResponseCode::MethodNotAllowed,
            &format!("Method {} not allowed", method),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;

    #[test]
    fn test_content_format_conversion() {
        assert_eq!(ContentFormat::from_u16(11542), Some(ContentFormat::Tlv));
        assert_eq!(ContentFormat::SenmlCbor.as_u16(), 112);
        assert_eq!(ContentFormat::from_u16(50), None);
    }

    #[test]
    fn test_response_code() {
        assert_eq!(ResponseCode::Content.to_code_pair(), (2, 5));
        assert_eq!(ResponseCode::from_code_pair(4, 4), Some(ResponseCode::NotFound));
        assert_eq!(ResponseCode::UnsupportedContentFormat.to_string(), "4.15");
        assert!(ResponseCode::Deleted.is_success());
        assert!(!ResponseCode::NotFound.is_success());
    }

    #[test]
    fn test_error_mapping() {
        let path = Path::resource(3, 0, 9);
        assert_eq!(
            ResponseCode::from(&Lwm2mError::ReadOnly(path)),
            ResponseCode::MethodNotAllowed
        );
        assert_eq!(
            ResponseCode::from(&Lwm2mError::ResourceNotFound(path)),
            ResponseCode::NotFound
        );
        assert_eq!(
            ResponseCode::from(&Lwm2mError::TypeMismatch {
                path,
                expected: crate::value::ValueKind::Integer,
                actual: crate::value::ValueKind::String,
            }),
            ResponseCode::BadRequest
        );
    }

    #[test]
    fn test_query_params_parse() {
        let params = QueryParams::parse(&["pmin=10", "pmax=60", "ep=x"]).unwrap();
        assert_eq!(params.pmin, Some(10));
        assert_eq!(params.pmax, Some(60));
        assert!(QueryParams::parse(&["pmin=soon"]).is_err());
        assert!(QueryParams::parse::<&str>(&[]).unwrap().is_empty());
    }
}
