//! Live properties derived from nodes, and the dead properties clients
//! store through PROPPATCH.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use duckcloud_fs::Node;
use parking_lot::RwLock;
use quick_xml::escape::escape;

use crate::locks::LockSystem;
use crate::xml::{active_lock, PropName, Property, Propstat, Proppatch};

const SUPPORTED_LOCK: &str = "<D:lockentry><D:lockscope><D:exclusive/></D:lockscope><D:locktype><D:write/></D:locktype></D:lockentry>";

/// Live properties, and whether they apply to directories.
const LIVE_PROPS: &[(&str, bool)] = &[
    ("resourcetype", true),
    ("displayname", true),
    ("getcontentlength", false),
    ("getlastmodified", true),
    ("creationdate", true),
    ("getcontenttype", false),
    ("getetag", false),
    ("supportedlock", true),
    ("lockdiscovery", true),
];

pub fn is_live(name: &PropName) -> bool {
    name.is_dav() && LIVE_PROPS.iter().any(|(local, _)| *local == name.local)
}

/// Formats a date the way HTTP headers expect it.
pub fn http_date(t: &DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// The stored mime type, or one guessed from the name.
pub fn content_type(node: &Node) -> String {
    node.mime.clone().unwrap_or_else(|| {
        mime_guess::from_path(&node.name)
            .first_or_octet_stream()
            .to_string()
    })
}

/// The quoted entity tag of a file, derived from its content checksum.
pub fn etag(node: &Node) -> String {
    format!("\"{}\"", node.checksum.as_deref().unwrap_or_default())
}

/// A node as seen by the property functions.
pub struct Resource<'a> {
    pub path: &'a str,
    pub node: &'a Node,
    pub locks: &'a dyn LockSystem,
    pub prefix: &'a str,
}

impl Resource<'_> {
    fn live_names(&self) -> impl Iterator<Item = PropName> + '_ {
        LIVE_PROPS
            .iter()
            .filter(|(_, dir)| *dir || !self.node.is_dir())
            .map(|(local, _)| PropName::dav(local))
    }

    /// The value of a live property, None if it doesn't apply.
    fn live(&self, name: &PropName) -> Option<String> {
        if !name.is_dav() {
            return None;
        }

        let node = self.node;
        let file = !node.is_dir();
        Some(match name.local.as_str() {
            "resourcetype" if file => String::new(),
            "resourcetype" => "<D:collection/>".to_string(),
            "displayname" => escape(node.name.as_str()).into_owned(),
            "getcontentlength" if file => node.size.to_string(),
            "getlastmodified" => http_date(&node.last_modified_at),
            "creationdate" => node.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "getcontenttype" if file => escape(content_type(node).as_str()).into_owned(),
            "getetag" if file => etag(node),
            "supportedlock" => SUPPORTED_LOCK.to_string(),
            "lockdiscovery" => self
                .locks
                .discover(Instant::now(), self.path)
                .iter()
                .map(|(token, details)| {
                    let root = format!("{}{}", self.prefix, details.root);
                    active_lock(token, details, &crate::handler::escape_path(&root))
                })
                .collect(),
            _ => return None,
        })
    }

    /// Looks up each of `names`, grouping them into found and not found.
    pub fn props(&self, dead: &BTreeMap<PropName, Property>, names: &[PropName]) -> Vec<Propstat> {
        let mut found = Propstat::new(StatusCode::OK);
        let mut missing = Propstat::new(StatusCode::NOT_FOUND);

        for name in names {
            if let Some(p) = dead.get(name) {
                found.props.push(p.clone());
            } else if let Some(inner_xml) = self.live(name) {
                found.props.push(Property {
                    name: name.clone(),
                    inner_xml,
                });
            } else {
                missing.props.push(Property::empty(name.clone()));
            }
        }

        [found, missing]
            .into_iter()
            .filter(|ps| !ps.props.is_empty())
            .collect()
    }

    /// Names of all properties the resource has.
    pub fn propnames(&self, dead: &BTreeMap<PropName, Property>) -> Vec<PropName> {
        self.live_names().chain(dead.keys().cloned()).collect()
    }

    /// All properties, plus the `include`d ones.
    pub fn allprop(
        &self,
        dead: &BTreeMap<PropName, Property>,
        include: &[PropName],
    ) -> Vec<Propstat> {
        let mut names = self.propnames(dead);
        for name in include {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        self.props(dead, &names)
    }
}

/// Dead properties of one space, keyed by path.
#[derive(Default)]
pub struct DeadProps {
    props: RwLock<HashMap<String, BTreeMap<PropName, Property>>>,
}

fn in_tree(p: &str, root: &str) -> bool {
    p == root || root == "/" || p.starts_with(&format!("{}/", root))
}

fn rebase(p: &str, from: &str, to: &str) -> String {
    duckcloud_fs::path::join(to, p.strip_prefix(from).unwrap_or_default())
}

impl DeadProps {
    pub fn get(&self, p: &str) -> BTreeMap<PropName, Property> {
        self.props.read().get(p).cloned().unwrap_or_default()
    }

    /// Applies a PROPPATCH. Any live property fails the whole patch, with
    /// 403 for the live ones and 424 for the others.
    pub fn patch(&self, p: &str, patches: &[Proppatch]) -> Vec<Propstat> {
        let all = || patches.iter().flat_map(|patch| patch.props.iter());

        if all().any(|prop| is_live(&prop.name)) {
            let mut forbidden = Propstat::new(StatusCode::FORBIDDEN);
            forbidden.error = Some("cannot-modify-protected-property");
            let mut failed = Propstat::new(StatusCode::FAILED_DEPENDENCY);

            for prop in all() {
                let target = if is_live(&prop.name) {
                    &mut forbidden
                } else {
                    &mut failed
                };
                target.props.push(Property::empty(prop.name.clone()));
            }

            return [forbidden, failed]
                .into_iter()
                .filter(|ps| !ps.props.is_empty())
                .collect();
        }

        let mut props = self.props.write();
        let entry = props.entry(p.to_string()).or_default();
        let mut ok = Propstat::new(StatusCode::OK);
        for patch in patches {
            for prop in &patch.props {
                if patch.remove {
                    entry.remove(&prop.name);
                } else {
                    entry.insert(prop.name.clone(), prop.clone());
                }
                ok.props.push(Property::empty(prop.name.clone()));
            }
        }
        if entry.is_empty() {
            props.remove(p);
        }

        vec![ok]
    }

    /// Drops the properties of `root` and everything below it.
    pub fn remove_tree(&self, root: &str) {
        self.props.write().retain(|p, _| !in_tree(p, root));
    }

    /// Moves the properties of the `src` tree under `dst`, replacing what
    /// was there.
    pub fn move_tree(&self, src: &str, dst: &str) {
        let mut props = self.props.write();
        props.retain(|p, _| !in_tree(p, dst));

        let moved: Vec<_> = props
            .keys()
            .filter(|p| in_tree(p, src))
            .cloned()
            .collect();
        for p in moved {
            if let Some(v) = props.remove(&p) {
                props.insert(rebase(&p, src, dst), v);
            }
        }
    }

    /// Copies the properties of the `src` tree under `dst`.
    pub fn copy_tree(&self, src: &str, dst: &str) {
        let mut props = self.props.write();
        let copied: Vec<_> = props
            .iter()
            .filter(|(p, _)| in_tree(p, src))
            .map(|(p, v)| (rebase(p, src, dst), v.clone()))
            .collect();
        props.extend(copied);
    }
}
