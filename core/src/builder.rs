//! Turns a logical `Request` into an `EncodedRequest`.
//!
//! # Design
//! Encoding is deterministic apart from the multipart boundary and performs
//! no I/O. The only failures are an unusable URL and a self-contradictory
//! descriptor, both reported before any connection is attempted.
//!
//! Content-Type resolution: files force `multipart/form-data`; otherwise an
//! explicit header wins; otherwise a body is labelled
//! `application/x-www-form-urlencoded`.

use tracing::debug;
use url::Url;

use crate::error::ClientError;
use crate::form::{encode_fields, FORM_URLENCODED};
use crate::http::{find_header, set_header, EncodedRequest, HttpMethod, RequestBody, Scheme};
use crate::multipart::{self, MULTIPART_FORM_DATA};
use crate::types::{BodyData, Request, RequestDescriptor};

pub fn encode(request: Request) -> Result<EncodedRequest, ClientError> {
    let descriptor = match request {
        Request::Get(url) => RequestDescriptor::new(&url),
        Request::Options(descriptor) => descriptor,
    };
    let RequestDescriptor {
        url: raw_url,
        method,
        mut headers,
        data,
        files,
        proxy,
    } = descriptor;

    let url = parse_url(&raw_url)?;
    let scheme = match url.scheme() {
        "http" => Scheme::Http,
        "https" => Scheme::Https,
        other => {
            return Err(ClientError::InvalidUrl {
                url: raw_url,
                reason: format!("unsupported scheme {other:?}"),
            })
        }
    };
    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => {
            return Err(ClientError::InvalidUrl {
                url: raw_url,
                reason: "missing host".to_string(),
            })
        }
    };
    let port = url.port_or_known_default().unwrap_or(match scheme {
        Scheme::Http => 80,
        Scheme::Https => 443,
    });

    let has_body = !files.is_empty() || data.as_ref().is_some_and(BodyData::is_present);
    let method = method.unwrap_or(if has_body {
        HttpMethod::Post
    } else {
        HttpMethod::Get
    });
    validate(method, data.as_ref(), files.len())?;

    let explicit_type = find_header(&headers, "content-type").map(str::to_string);
    let multipart = !files.is_empty()
        || (method.allows_body()
            && matches!(data, None | Some(BodyData::Fields(_)))
            && explicit_type
                .as_deref()
                .is_some_and(|ct| ct.trim().eq_ignore_ascii_case(MULTIPART_FORM_DATA)));

    let mut path = path_and_query(&url);
    let body = if multipart {
        let fields = match data {
            Some(BodyData::Fields(fields)) => fields,
            _ => Vec::new(),
        };
        let encoded = multipart::encode(&fields, &files);
        set_header(&mut headers, "Content-Type", encoded.content_type());
        RequestBody::Fixed(encoded.into_body())
    } else {
        let labelled = data.is_some();
        let body = match data {
            None if method.allows_body() => RequestBody::Fixed(Vec::new()),
            None => RequestBody::Empty,
            Some(BodyData::Fields(fields)) if !method.allows_body() => {
                append_query(&mut path, &encode_fields(&fields));
                RequestBody::Empty
            }
            Some(BodyData::Fields(fields)) => RequestBody::Fixed(encode_fields(&fields).into_bytes()),
            Some(BodyData::Raw(bytes)) => RequestBody::Fixed(bytes),
            Some(BodyData::Producer(producer)) => RequestBody::Producer(producer),
            Some(BodyData::Stream(reader)) => RequestBody::Stream(reader),
        };
        if labelled && method.allows_body() && explicit_type.is_none() {
            headers.push(("Content-Type".to_string(), FORM_URLENCODED.to_string()));
        }
        body
    };

    match &body {
        RequestBody::Empty => {}
        RequestBody::Fixed(bytes) => {
            if find_header(&headers, "content-length").is_none() {
                headers.push(("Content-Length".to_string(), bytes.len().to_string()));
            }
        }
        RequestBody::Producer(_) | RequestBody::Stream(_) => {
            if find_header(&headers, "content-length").is_none()
                && find_header(&headers, "transfer-encoding").is_none()
            {
                headers.push(("Transfer-Encoding".to_string(), "chunked".to_string()));
            }
        }
    }

    let (host, port, path, proxied) = match proxy {
        Some(proxy) => {
            let absolute = format!("{}://{}{}", scheme.as_str(), authority(&url, &host), path);
            (proxy.host, proxy.port, absolute, true)
        }
        None => (host, port, path, false),
    };

    debug!(
        %method,
        %host,
        port,
        %path,
        proxied,
        body = body.kind(),
        "encoded request"
    );

    Ok(EncodedRequest {
        method,
        scheme,
        host,
        port,
        path,
        proxied,
        headers,
        body,
    })
}

fn parse_url(raw: &str) -> Result<Url, ClientError> {
    Url::parse(raw).map_err(|e| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn validate(method: HttpMethod, data: Option<&BodyData>, file_count: usize) -> Result<(), ClientError> {
    let opaque_body = matches!(
        data,
        Some(BodyData::Raw(_) | BodyData::Producer(_) | BodyData::Stream(_))
    );
    if file_count > 0 && opaque_body {
        return Err(ClientError::Validation(
            "files cannot be combined with a raw, producer or stream body".to_string(),
        ));
    }
    if !method.allows_body() && (file_count > 0 || opaque_body) {
        return Err(ClientError::Validation(format!(
            "{method} requests cannot carry a body"
        )));
    }
    Ok(())
}

fn path_and_query(url: &Url) -> String {
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    path
}

fn append_query(path: &mut String, encoded: &str) {
    if encoded.is_empty() {
        return;
    }
    match path.find('?') {
        Some(index) if index + 1 == path.len() => {}
        Some(_) => path.push('&'),
        None => path.push('?'),
    }
    path.push_str(encoded);
}

/// Host plus the port when the URL spelled out a non-default one.
fn authority(url: &Url, host: &str) -> String {
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
