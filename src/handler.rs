//! LwM2M Request Handler
//!
//! Transport-agnostic handling of Device Management and Information
//! Reporting requests: Read, Discover, Write, Write-Attributes, Execute,
//! Observe and Cancel Observation.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::debug;

use crate::coap_types::{ContentFormat, Method, QueryParams, Request, Response, ResponseCode};
use crate::error::{Lwm2mError, Result};
use crate::link::{self, Link};
use crate::model::{Content, ResourceModel, ResourceValue, Resources};
use crate::observe::ObservationManager;
use crate::path::Path;
use crate::senml;
use crate::tlv;
use crate::value::{Value, ValueKind};

/// Where a request came from
#[derive(Debug, Clone, Copy)]
pub struct Origin<'a> {
    pub peer: SocketAddr,
    pub token: &'a [u8],
}

/// Main LwM2M request handler
///
/// Owns the resource model and the observation manager. Writes are only
/// journaled in the model; the caller drains the journal and reports it to
/// the observation manager before handling the next event.
///
/// # Example
/// ```ignore
/// let mut handler = RequestHandler::new(model);
/// let response = handler.handle(&request, origin, Instant::now());
/// // Send response via your CoAP transport
/// ```
#[derive(Debug)]
pub struct RequestHandler {
    model: ResourceModel,
    observations: ObservationManager,
}

impl RequestHandler {
    pub fn new(model: ResourceModel) -> Self {
        Self {
            model,
            observations: ObservationManager::new(),
        }
    }

    pub fn model(&self) -> &ResourceModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut ResourceModel {
        &mut self.model
    }

    pub fn observations(&self) -> &ObservationManager {
        &self.observations
    }

    pub fn observations_mut(&mut self) -> &mut ObservationManager {
        &mut self.observations
    }

    /// Both halves at once, for reporting model changes to observers
    pub fn split_mut(&mut self) -> (&mut ResourceModel, &mut ObservationManager) {
        (&mut self.model, &mut self.observations)
    }

    /// Handle an incoming request
    pub fn handle(&mut self, request: &Request, origin: Origin<'_>, now: Instant) -> Response {
        let path = match Path::from_segments(&request.path) {
            Ok(path) => path,
            Err(e) => return Response::error(ResponseCode::NotFound, &e.to_string()),
        };

        let result = match request.method {
            Method::Get => self.handle_get(&path, request, origin, now),
            Method::Put => self.handle_put(&path, request),
            Method::Post => self.handle_post(&path, request),
            Method::Delete => self.handle_delete(&path),
        };
        result.unwrap_or_else(|e| {
            debug!(method = %request.method, %path, error = %e, "request failed");
            Response::from_error(&e)
        })
    }

    /// GET: Read, Discover, Observe and Cancel Observation
    fn handle_get(
        &mut self,
        path: &Path,
        request: &Request,
        origin: Origin<'_>,
        now: Instant,
    ) -> Result<Response> {
        if request.accept == Some(ContentFormat::LinkFormat.as_u16()) {
            return self.discover(path);
        }

        match request.observe {
            Some(0) => {
                let content = self.model.read(path)?;
                let format = select_format(request.accept, path, &content)?;
                let payload = encode_payload(path, &content, format)?;

                // A repeated registration with the same token refreshes it
                if self.observations.is_observing(origin.peer, origin.token) {
                    self.observations.stop(origin.peer, origin.token)?;
                }
                let observation = self.observations.start(
                    *path,
                    origin.token.to_vec(),
                    origin.peer,
                    format,
                    content,
                    now,
                )?;
                Ok(Response {
                    observe: Some(observation.sequence),
                    ..Response::content(payload, format)
                })
            }
            Some(1) => {
                if self.observations.stop(origin.peer, origin.token).is_err() {
                    debug!(%path, "cancel for unknown observation");
                }
                self.read(path, request.accept)
            }
            _ => self.read(path, request.accept),
        }
    }

    fn read(&self, path: &Path, accept: Option<u16>) -> Result<Response> {
        let content = self.model.read(path)?;
        let format = select_format(accept, path, &content)?;
        Ok(Response::content(
            encode_payload(path, &content, format)?,
            format,
        ))
    }

    fn discover(&self, path: &Path) -> Result<Response> {
        let links: Vec<Link> = self
            .model
            .discover(path)?
            .into_iter()
            .map(|target| {
                let params = self.observations.attributes(&target);
                let mut link = Link::new(target);
                if let Some(pmin) = params.pmin {
                    link = link.with_param("pmin", pmin);
                }
                if let Some(pmax) = params.pmax {
                    link = link.with_param("pmax", pmax);
                }
                if target.is_resource() {
                    if let Ok(def) = self.model.resource_def(&target) {
                        if def.multiple {
                            let count = match self.model.read(&target) {
                                Ok(Content::Multiple(values)) => values.len(),
                                _ => 0,
                            };
                            link = link.with_param("dim", count);
                        }
                    }
                }
                link
            })
            .collect();
        Ok(Response::content(
            link::format(&links).into_bytes(),
            ContentFormat::LinkFormat,
        ))
    }

    /// PUT: Write (replace) or Write-Attributes
    fn handle_put(&mut self, path: &Path, request: &Request) -> Result<Response> {
        if request.payload.is_empty() && !request.query.is_empty() {
            let params = QueryParams::parse(&request.query)?;
            self.model.discover(path)?;
            self.observations.set_attributes(*path, params);
            return Ok(Response::changed());
        }
        self.write(path, request)
    }

    /// POST: Execute on a resource, partial update on an instance
    fn handle_post(&mut self, path: &Path, request: &Request) -> Result<Response> {
        if path.is_resource() {
            self.model.execute(path)?;
            return Ok(Response::changed());
        }
        if path.is_instance() {
            return self.write(path, request);
        }
        Ok(Response::method_not_allowed(Method::Post))
    }

    /// DELETE: only stops observations of the path
    fn handle_delete(&mut self, path: &Path) -> Result<Response> {
        if self.observations.stop_path(path) > 0 {
            return Ok(Response::new(ResponseCode::Deleted));
        }
        self.model.discover(path)?;
        Ok(Response::method_not_allowed(Method::Delete))
    }

    fn write(&mut self, path: &Path, request: &Request) -> Result<Response> {
        if path.is_object() {
            return Ok(Response::method_not_allowed(request.method));
        }

        // Single value written as text or opaque
        if path.resource.is_some() {
            let format = request.content_format.unwrap_or(0);
            if format == ContentFormat::TextPlain.as_u16() || format == ContentFormat::OctetStream.as_u16() {
                let def = self.model.resource_def(path)?;
                let value = decode_single(def.kind, *path, format, &request.payload)?;
                match path.resource_instance {
                    Some(_) => self.model.set(path, value)?,
                    None => self.model.set_resource(path, ResourceValue::Single(value))?,
                }
                return Ok(Response::changed());
            }
        }

        let resources = self.decode_resources(path, request)?;
        if path.resource.is_some() {
            let resource = resources
                .into_iter()
                .next()
                .map(|(_, value)| value)
                .ok_or_else(|| Lwm2mError::Decode("empty payload".into()))?;
            self.model.set_resource(&path.without_resource_instance(), resource)?;
            return Ok(Response::changed());
        }

        let results = self.model.write_batch(path, resources);
        let failed = results.iter().find_map(|(_, r)| r.as_ref().err());
        let Some(first_error) = failed else {
            return Ok(Response::changed());
        };

        let code = ResponseCode::from(first_error);
        let mut report = String::new();
        for (resource, result) in &results {
            let outcome = match result {
                Ok(()) => ResponseCode::Changed.to_string(),
                Err(e) => format!("{} {}", ResponseCode::from(e), e),
            };
            let _ = writeln!(report, "{} {}", resource, outcome);
        }
        Ok(Response::error(code, report.trim_end()))
    }

    fn decode_resources(&self, path: &Path, request: &Request) -> Result<Resources> {
        let schema = self
            .model
            .schema_for(path.object)
            .ok_or(Lwm2mError::ResourceNotFound(*path))?;
        let format = request.content_format.unwrap_or(ContentFormat::Tlv.as_u16());
        match ContentFormat::from_u16(format) {
            Some(ContentFormat::Tlv) => tlv::decode_resources(schema, path, &request.payload),
            Some(ContentFormat::SenmlJson) => senml::decode_json(schema, path, &request.payload),
            Some(ContentFormat::SenmlCbor) => senml::decode_cbor(schema, path, &request.payload),
            _ => Err(Lwm2mError::UnsupportedContentFormat(format)),
        }
    }
}

/// Response format for read content: the Accept option when given,
/// otherwise text/plain for one value and TLV for everything else
pub fn select_format(accept: Option<u16>, path: &Path, content: &Content) -> Result<ContentFormat> {
    let Some(accept) = accept else {
        return Ok(match content {
            Content::Value(Value::Opaque(_)) => ContentFormat::OctetStream,
            Content::Value(_) => ContentFormat::TextPlain,
            _ => ContentFormat::Tlv,
        });
    };

    match (ContentFormat::from_u16(accept), content) {
        (Some(ContentFormat::TextPlain), Content::Value(_)) => Ok(ContentFormat::TextPlain),
        (Some(ContentFormat::OctetStream), Content::Value(Value::Opaque(_))) => {
            Ok(ContentFormat::OctetStream)
        }
        (Some(format @ (ContentFormat::Tlv | ContentFormat::SenmlJson | ContentFormat::SenmlCbor)), _) => {
            Ok(format)
        }
        _ => {
            debug!(%path, accept, "no acceptable representation");
            Err(Lwm2mError::NotAcceptable(accept))
        }
    }
}

/// Encode read content in the given format
pub fn encode_payload(path: &Path, content: &Content, format: ContentFormat) -> Result<Vec<u8>> {
    match (format, content) {
        (ContentFormat::TextPlain, Content::Value(value)) => Ok(value.to_text().into_bytes()),
        (ContentFormat::OctetStream, Content::Value(Value::Opaque(bytes))) => Ok(bytes.clone()),
        (ContentFormat::Tlv, _) => tlv::encode_content(path, content),
        (ContentFormat::SenmlJson, _) => senml::encode_json(path, content),
        (ContentFormat::SenmlCbor, _) => senml::encode_cbor(path, content),
        _ => Err(Lwm2mError::NotAcceptable(format.as_u16())),
    }
}

fn decode_single(kind: ValueKind, path: Path, format: u16, payload: &[u8]) -> Result<Value> {
    if format == ContentFormat::OctetStream.as_u16() {
        return match kind {
            ValueKind::Opaque => Ok(Value::Opaque(payload.to_vec())),
            expected => Err(Lwm2mError::TypeMismatch {
                path,
                expected,
                actual: ValueKind::Opaque,
            }),
        };
    }

    let text = std::str::from_utf8(payload)
        .map_err(|_| Lwm2mError::Decode("text payload is not UTF-8".into()))?;
    Value::from_text(kind, text).ok_or(Lwm2mError::TypeMismatch {
        path,
        expected: kind,
        actual: ValueKind::String,
    })
}
