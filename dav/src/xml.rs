//! Reading and writing the XML bodies of PROPFIND, PROPPATCH and LOCK.

use axum::http::StatusCode;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::errors::status_line;
use crate::locks::LockDetails;
use crate::Error;

pub const DAV_NS: &str = "DAV:";

/// A property name, qualified by its namespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropName {
    pub ns: String,
    pub local: String,
}

impl PropName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
        }
    }

    pub fn dav(local: &str) -> Self {
        Self::new(DAV_NS, local)
    }

    pub fn is_dav(&self) -> bool {
        self.ns == DAV_NS
    }
}

/// A property and its value, kept as raw XML.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub name: PropName,
    pub inner_xml: String,
}

impl Property {
    pub fn empty(name: PropName) -> Self {
        Self {
            name,
            inner_xml: String::new(),
        }
    }
}

/// A group of properties sharing the same status.
#[derive(Debug, PartialEq, Eq)]
pub struct Propstat {
    pub status: StatusCode,
    pub props: Vec<Property>,
    /// Precondition element reported inside DAV:error.
    pub error: Option<&'static str>,
}

impl Propstat {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            props: Vec::new(),
            error: None,
        }
    }
}

/// What a PROPFIND asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Propfind {
    /// All properties, plus the included ones.
    AllProp(Vec<PropName>),
    PropName,
    Prop(Vec<PropName>),
}

/// One set or remove instruction of a PROPPATCH.
#[derive(Debug, PartialEq, Eq)]
pub struct Proppatch {
    pub remove: bool,
    pub props: Vec<Property>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct LockInfo {
    pub owner_xml: String,
}

#[derive(Debug)]
struct Element {
    name: PropName,
    inner: String,
    children: Vec<Element>,
}

impl Element {
    fn is(&self, local: &str) -> bool {
        self.name.is_dav() && self.name.local == local
    }

    fn child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(local))
    }
}

fn namespace(ns: &ResolveResult) -> String {
    match ns {
        ResolveResult::Bound(Namespace(ns)) => String::from_utf8_lossy(ns).into_owned(),
        _ => String::new(),
    }
}

/// Parses a document into a tree of elements, keeping the raw inner XML of
/// each. Returns None for a document without any element.
fn parse(body: &[u8]) -> Result<Option<Element>, Error> {
    let mut reader = NsReader::from_reader(body);
    let mut stack: Vec<(Element, usize)> = Vec::new();
    let mut root = None;

    loop {
        let before = reader.buffer_position() as usize;
        let (ns, event) = reader.read_resolved_event()?;
        let ns = namespace(&ns);

        let done = match event {
            Event::Start(e) => {
                let local = std::str::from_utf8(e.local_name().as_ref())?.to_string();
                let elem = Element {
                    name: PropName::new(ns, local),
                    inner: String::new(),
                    children: Vec::new(),
                };
                stack.push((elem, reader.buffer_position() as usize));
                None
            }
            Event::Empty(e) => {
                let local = std::str::from_utf8(e.local_name().as_ref())?.to_string();
                Some(Element {
                    name: PropName::new(ns, local),
                    inner: String::new(),
                    children: Vec::new(),
                })
            }
            Event::End(_) => {
                let (mut elem, start) = stack
                    .pop()
                    .ok_or_else(|| Error::bad_request("unexpected end tag"))?;
                elem.inner = std::str::from_utf8(&body[start..before])?.to_string();
                Some(elem)
            }
            Event::Text(t) if stack.is_empty() && !t.iter().all(u8::is_ascii_whitespace) => {
                return Err(Error::bad_request("text outside of the root element"));
            }
            Event::Eof => break,
            _ => None,
        };

        if let Some(elem) = done {
            match stack.last_mut() {
                Some((parent, _)) => parent.children.push(elem),
                None if root.is_none() => root = Some(elem),
                None => return Err(Error::bad_request("more than one root element")),
            }
        }
    }

    if !stack.is_empty() {
        return Err(Error::bad_request("unexpected end of document"));
    }

    Ok(root)
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

fn prop_names(prop: &Element) -> Vec<PropName> {
    prop.children.iter().map(|c| c.name.clone()).collect()
}

/// Reads a PROPFIND body. An empty body asks for all properties.
pub fn read_propfind(body: &[u8]) -> Result<Propfind, Error> {
    if is_blank(body) {
        return Ok(Propfind::AllProp(Vec::new()));
    }

    let invalid = || Error::bad_request("invalid propfind");
    let root = parse(body)?.filter(|r| r.is("propfind")).ok_or_else(invalid)?;

    let allprop = root.child("allprop").is_some();
    let propname = root.child("propname").is_some();
    let prop = root.child("prop").map(prop_names);
    let include = root.child("include").map(prop_names);

    match (allprop, propname, prop, include) {
        (true, false, None, include) => Ok(Propfind::AllProp(include.unwrap_or_default())),
        (false, true, None, None) => Ok(Propfind::PropName),
        (false, false, Some(names), None) => Ok(Propfind::Prop(names)),
        _ => Err(invalid()),
    }
}

/// Reads a PROPPATCH body into its instructions, in document order.
pub fn read_proppatch(body: &[u8]) -> Result<Vec<Proppatch>, Error> {
    let invalid = || Error::bad_request("invalid proppatch");
    let root = parse(body)?
        .filter(|r| r.is("propertyupdate"))
        .ok_or_else(invalid)?;

    let mut patches = Vec::new();
    for op in &root.children {
        let remove = match op {
            op if op.is("set") => false,
            op if op.is("remove") => true,
            _ => continue,
        };

        let props: Vec<Property> = op
            .children
            .iter()
            .filter(|c| c.is("prop"))
            .flat_map(|p| p.children.iter())
            .map(|c| Property {
                name: c.name.clone(),
                inner_xml: c.inner.clone(),
            })
            .collect();

        // remove only takes empty elements.
        if props.is_empty() || (remove && props.iter().any(|p| !p.inner_xml.trim().is_empty())) {
            return Err(invalid());
        }

        patches.push(Proppatch { remove, props });
    }

    if patches.is_empty() {
        return Err(invalid());
    }

    Ok(patches)
}

/// Reads a LOCK body. None for an empty body, which refreshes a lock.
/// Only exclusive write locks are supported.
pub fn read_lockinfo(body: &[u8]) -> Result<Option<LockInfo>, Error> {
    if is_blank(body) {
        return Ok(None);
    }

    let root = parse(body)?
        .filter(|r| r.is("lockinfo"))
        .ok_or_else(|| Error::bad_request("invalid lock info"))?;

    let exclusive = root
        .child("lockscope")
        .is_some_and(|s| s.child("exclusive").is_some() && s.child("shared").is_none());
    let write = root
        .child("locktype")
        .is_some_and(|t| t.child("write").is_some());
    if !exclusive || !write {
        return Err(Error::new(StatusCode::NOT_IMPLEMENTED, "unsupported lock info"));
    }

    Ok(Some(LockInfo {
        owner_xml: root.child("owner").map(|o| o.inner.clone()).unwrap_or_default(),
    }))
}

fn write_property(buf: &mut String, p: &Property) {
    let (open, close) = if p.name.is_dav() {
        (format!("D:{}", p.name.local), format!("D:{}", p.name.local))
    } else {
        (
            format!("{} xmlns=\"{}\"", p.name.local, escape(p.name.ns.as_str())),
            p.name.local.clone(),
        )
    };

    if p.inner_xml.is_empty() {
        buf.push_str(&format!("<{}/>", open));
    } else {
        buf.push_str(&format!("<{}>{}</{}>", open, p.inner_xml, close));
    }
}

/// Builds a DAV:multistatus body one response at a time.
pub struct MultiStatus {
    buf: String,
}

impl Default for MultiStatus {
    fn default() -> Self {
        Self {
            buf: String::from(
                r#"<?xml version="1.0" encoding="UTF-8"?><D:multistatus xmlns:D="DAV:">"#,
            ),
        }
    }
}

impl MultiStatus {
    /// Adds the response for `href`, which must already be escaped.
    pub fn push(&mut self, href: &str, propstats: &[Propstat]) {
        self.buf.push_str("<D:response><D:href>");
        self.buf.push_str(&escape(href));
        self.buf.push_str("</D:href>");

        for ps in propstats {
            self.buf.push_str("<D:propstat><D:prop>");
            for p in &ps.props {
                write_property(&mut self.buf, p);
            }
            self.buf.push_str("</D:prop><D:status>");
            self.buf.push_str(&status_line(ps.status));
            self.buf.push_str("</D:status>");
            if let Some(err) = ps.error {
                self.buf.push_str(&format!("<D:error><D:{}/></D:error>", err));
            }
            self.buf.push_str("</D:propstat>");
        }

        self.buf.push_str("</D:response>");
    }

    pub fn finish(mut self) -> String {
        self.buf.push_str("</D:multistatus>");
        self.buf
    }
}

/// Renders a DAV:activelock element. `root_href` must already be escaped.
pub fn active_lock(token: &str, details: &LockDetails, root_href: &str) -> String {
    let depth = if details.zero_depth { "0" } else { "infinity" };
    let timeout = match details.duration {
        Some(d) => format!("Second-{}", d.as_secs()),
        None => "Infinite".to_string(),
    };
    let owner = if details.owner_xml.is_empty() {
        String::new()
    } else {
        format!("<D:owner>{}</D:owner>", details.owner_xml)
    };

    format!(
        "<D:activelock><D:locktype><D:write/></D:locktype><D:lockscope><D:exclusive/></D:lockscope><D:depth>{}</D:depth>{}<D:timeout>{}</D:timeout><D:locktoken><D:href>{}</D:href></D:locktoken><D:lockroot><D:href>{}</D:href></D:lockroot></D:activelock>",
        depth,
        owner,
        timeout,
        escape(token),
        escape(root_href),
    )
}

/// The body answered to LOCK requests.
pub fn lock_discovery(token: &str, details: &LockDetails, root_href: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><D:prop xmlns:D="DAV:"><D:lockdiscovery>{}</D:lockdiscovery></D:prop>"#,
        active_lock(token, details, root_href)
    )
}
