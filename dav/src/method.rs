use axum::http::{HeaderMap, Method, StatusCode};

use crate::Error;

/// The methods served by the DAV handler. Anything else is answered with
/// 405.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DavMethod {
    Options,
    Get,
    Head,
    Post,
    Delete,
    Put,
    Mkcol,
    Copy,
    Move,
    Lock,
    Unlock,
    Propfind,
    Proppatch,
}

impl DavMethod {
    pub fn from_http(method: &Method) -> Option<Self> {
        Some(match method.as_str() {
            "OPTIONS" => DavMethod::Options,
            "GET" => DavMethod::Get,
            "HEAD" => DavMethod::Head,
            "POST" => DavMethod::Post,
            "DELETE" => DavMethod::Delete,
            "PUT" => DavMethod::Put,
            "MKCOL" => DavMethod::Mkcol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            "PROPFIND" => DavMethod::Propfind,
            "PROPPATCH" => DavMethod::Proppatch,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DavMethod::Options => "OPTIONS",
            DavMethod::Get => "GET",
            DavMethod::Head => "HEAD",
            DavMethod::Post => "POST",
            DavMethod::Delete => "DELETE",
            DavMethod::Put => "PUT",
            DavMethod::Mkcol => "MKCOL",
            DavMethod::Copy => "COPY",
            DavMethod::Move => "MOVE",
            DavMethod::Lock => "LOCK",
            DavMethod::Unlock => "UNLOCK",
            DavMethod::Propfind => "PROPFIND",
            DavMethod::Proppatch => "PROPPATCH",
        }
    }
}

/// Value of the Depth header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    pub fn parse(s: &str) -> Option<Depth> {
        match s {
            "0" => Some(Depth::Zero),
            "1" => Some(Depth::One),
            "infinity" => Some(Depth::Infinity),
            _ => None,
        }
    }

    /// The depth left for the children of a visited node, None when they
    /// are out of reach.
    pub fn descend(self) -> Option<Depth> {
        match self {
            Depth::Zero => None,
            Depth::One => Some(Depth::Zero),
            Depth::Infinity => Some(Depth::Infinity),
        }
    }

    /// Reads the Depth header, falling back to `default` when absent.
    pub fn from_headers(headers: &HeaderMap, default: Depth) -> Result<Depth, Error> {
        let Some(value) = headers.get("Depth") else {
            return Ok(default);
        };

        value
            .to_str()
            .ok()
            .and_then(Depth::parse)
            .ok_or_else(|| Error::new(StatusCode::BAD_REQUEST, "invalid depth"))
    }
}
