//! Advisory WebDAV locks.
//!
//! Locks are only checked by the DAV handler itself, nothing below it in the
//! filesystem knows about them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use duckcloud_fs::path;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::Error;

/// Timeouts above this are rejected, same as an unparseable one.
const MAX_TIMEOUT_SECS: u64 = u32::MAX as u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockDetails {
    /// Path of the locked resource.
    pub root: String,
    /// None for a lock that never expires.
    pub duration: Option<Duration>,
    /// Raw content of the DAV:owner element sent by the client.
    pub owner_xml: String,
    /// Covers the root only, not its descendants.
    pub zero_depth: bool,
}

impl LockDetails {
    fn covers(&self, name: &str) -> bool {
        self.root == name || (!self.zero_depth && is_descendant(name, &self.root))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LockError {
    #[error("resource is locked")]
    Locked,

    #[error("no such lock")]
    NoSuchLock,

    #[error("lock confirmation failed")]
    ConfirmationFailed,
}

pub trait LockSystem: Send + Sync {
    /// Locks `details.root`, returning the new lock token.
    fn create(&self, now: Instant, details: LockDetails) -> Result<String, LockError>;

    /// Extends the lock behind `token` by `duration` from `now`.
    fn refresh(
        &self,
        now: Instant,
        token: &str,
        duration: Option<Duration>,
    ) -> Result<LockDetails, LockError>;

    fn unlock(&self, now: Instant, token: &str) -> Result<(), LockError>;

    /// Checks that `src` and `dst`, when not empty, are each covered by a
    /// lock whose token is in `tokens`. The matching locks are held, and
    /// can't be refreshed or unlocked, until they are given to
    /// [LockSystem::release].
    fn confirm(
        &self,
        now: Instant,
        src: &str,
        dst: &str,
        tokens: &[String],
    ) -> Result<Vec<String>, LockError>;

    fn release(&self, tokens: &[String]);

    /// Lists the live locks covering `name`.
    fn discover(&self, now: Instant, name: &str) -> Vec<(String, LockDetails)>;
}

struct MemLock {
    details: LockDetails,
    expiry: Option<Instant>,
    held: bool,
}

/// Keeps the locks in memory, they are lost on restart.
#[derive(Default)]
pub struct MemLockSystem {
    locks: Mutex<HashMap<String, MemLock>>,
}

impl MemLockSystem {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expire(locks: &mut HashMap<String, MemLock>, now: Instant) {
    locks.retain(|_, l| l.held || l.expiry.map_or(true, |e| e > now));
}

/// Whether `p` lies strictly below `ancestor`.
fn is_descendant(p: &str, ancestor: &str) -> bool {
    p != ancestor && (ancestor == "/" || p.starts_with(&format!("{}/", ancestor)))
}

/// Finds the lock covering `name` among `tokens`.
fn lookup(locks: &HashMap<String, MemLock>, name: &str, tokens: &[String]) -> Option<String> {
    tokens
        .iter()
        .find(|t| {
            locks
                .get(t.as_str())
                .is_some_and(|l| !l.held && l.details.covers(name))
        })
        .cloned()
}

impl LockSystem for MemLockSystem {
    fn create(&self, now: Instant, mut details: LockDetails) -> Result<String, LockError> {
        let mut locks = self.locks.lock();
        expire(&mut locks, now);

        details.root = path::clean(&details.root);
        let conflict = locks.values().any(|l| {
            l.details.covers(&details.root)
                || (!details.zero_depth && is_descendant(&l.details.root, &details.root))
        });
        if conflict {
            return Err(LockError::Locked);
        }

        let token = format!("urn:uuid:{}", Uuid::new_v4());
        locks.insert(
            token.clone(),
            MemLock {
                expiry: details.duration.map(|d| now + d),
                details,
                held: false,
            },
        );

        Ok(token)
    }

    fn refresh(
        &self,
        now: Instant,
        token: &str,
        duration: Option<Duration>,
    ) -> Result<LockDetails, LockError> {
        let mut locks = self.locks.lock();
        expire(&mut locks, now);

        let lock = locks.get_mut(token).ok_or(LockError::NoSuchLock)?;
        if lock.held {
            return Err(LockError::Locked);
        }

        lock.details.duration = duration;
        lock.expiry = duration.map(|d| now + d);

        Ok(lock.details.clone())
    }

    fn unlock(&self, now: Instant, token: &str) -> Result<(), LockError> {
        let mut locks = self.locks.lock();
        expire(&mut locks, now);

        match locks.get(token) {
            None => Err(LockError::NoSuchLock),
            Some(l) if l.held => Err(LockError::Locked),
            Some(_) => {
                locks.remove(token);
                Ok(())
            }
        }
    }

    fn confirm(
        &self,
        now: Instant,
        src: &str,
        dst: &str,
        tokens: &[String],
    ) -> Result<Vec<String>, LockError> {
        let mut locks = self.locks.lock();
        expire(&mut locks, now);

        let mut held = Vec::new();
        for name in [src, dst].into_iter().filter(|n| !n.is_empty()) {
            let token =
                lookup(&locks, &path::clean(name), tokens).ok_or(LockError::ConfirmationFailed)?;
            if !held.contains(&token) {
                held.push(token);
            }
        }

        for token in &held {
            if let Some(l) = locks.get_mut(token) {
                l.held = true;
            }
        }

        Ok(held)
    }

    fn release(&self, tokens: &[String]) {
        let mut locks = self.locks.lock();
        for token in tokens {
            if let Some(l) = locks.get_mut(token) {
                l.held = false;
            }
        }
    }

    fn discover(&self, now: Instant, name: &str) -> Vec<(String, LockDetails)> {
        let mut locks = self.locks.lock();
        expire(&mut locks, now);

        let name = path::clean(name);
        let mut found: Vec<_> = locks
            .iter()
            .filter(|(_, l)| l.details.covers(&name))
            .map(|(t, l)| (t.clone(), l.details.clone()))
            .collect();
        found.sort_by(|a, b| a.1.root.cmp(&b.1.root));
        found
    }
}

enum Release {
    Unlock(Vec<String>),
    Release(Vec<String>),
}

/// Locks taken or held for the duration of one request, given back on
/// drop.
pub struct LockGuard {
    locks: Arc<dyn LockSystem>,
    release: Release,
}

impl LockGuard {
    /// Wraps locks created for the request only, they get unlocked.
    pub fn temporary(locks: Arc<dyn LockSystem>, tokens: Vec<String>) -> Self {
        Self {
            locks,
            release: Release::Unlock(tokens),
        }
    }

    /// Wraps client locks held by [LockSystem::confirm], they get released.
    pub fn held(locks: Arc<dyn LockSystem>, tokens: Vec<String>) -> Self {
        Self {
            locks,
            release: Release::Release(tokens),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match &self.release {
            Release::Unlock(tokens) => {
                for token in tokens.iter().rev() {
                    if let Err(e) = self.locks.unlock(Instant::now(), token) {
                        debug!(err=%e, lock.token=%token, "failed to drop temporary lock");
                    }
                }
            }
            Release::Release(tokens) => self.locks.release(tokens),
        }
    }
}

/// One parenthesized list of an If header, optionally tagged with the
/// resource it applies to.
#[derive(Debug, PartialEq, Eq)]
pub struct IfList {
    pub resource_tag: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Condition {
    pub not: bool,
    pub token: String,
    pub etag: String,
}

impl IfList {
    /// Lock tokens the list asserts to hold.
    pub fn tokens(&self) -> Vec<String> {
        self.conditions
            .iter()
            .filter(|c| !c.not && !c.token.is_empty())
            .map(|c| c.token.clone())
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Open,
    Close,
    Angle(&'a str),
    Square(&'a str),
    Word(&'a str),
}

fn lex(s: &str) -> Option<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = s.trim_start();

    while let Some(c) = rest.chars().next() {
        match c {
            '(' => {
                tokens.push(Token::Open);
                rest = &rest[1..];
            }
            ')' => {
                tokens.push(Token::Close);
                rest = &rest[1..];
            }
            '<' | '[' => {
                let close = if c == '<' { '>' } else { ']' };
                let end = rest.find(close)?;
                let inner = &rest[1..end];
                tokens.push(if c == '<' {
                    Token::Angle(inner)
                } else {
                    Token::Square(inner)
                });
                rest = &rest[end + 1..];
            }
            '>' | ']' => return None,
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || "()<>[]".contains(c))
                    .unwrap_or(rest.len());
                tokens.push(Token::Word(&rest[..end]));
                rest = &rest[end..];
            }
        }
        rest = rest.trim_start();
    }

    Some(tokens)
}

/// Parses an If header into its lists, None when malformed or empty.
pub fn parse_if_header(s: &str) -> Option<Vec<IfList>> {
    let mut tokens = lex(s)?.into_iter().peekable();
    let tagged = matches!(tokens.peek(), Some(Token::Angle(_)));

    let mut lists = Vec::new();
    let mut tag = String::new();
    while let Some(token) = tokens.next() {
        match token {
            Token::Angle(t) if tagged => {
                if tokens.peek() != Some(&Token::Open) {
                    return None;
                }
                tag = t.to_string();
            }
            Token::Open => lists.push(IfList {
                resource_tag: tag.clone(),
                conditions: parse_conditions(&mut tokens)?,
            }),
            _ => return None,
        }
    }

    (!lists.is_empty()).then_some(lists)
}

fn parse_conditions<'a>(tokens: &mut impl Iterator<Item = Token<'a>>) -> Option<Vec<Condition>> {
    let mut conditions = Vec::new();
    let mut not = false;

    loop {
        match tokens.next()? {
            Token::Close if !not && !conditions.is_empty() => return Some(conditions),
            Token::Word("Not") if !not => not = true,
            Token::Angle(t) => {
                conditions.push(Condition {
                    not,
                    token: t.to_string(),
                    etag: String::new(),
                });
                not = false;
            }
            Token::Square(e) => {
                conditions.push(Condition {
                    not,
                    token: String::new(),
                    etag: e.to_string(),
                });
                not = false;
            }
            _ => return None,
        }
    }
}

/// Parses a Timeout header, only its first value is considered. None stands
/// for an infinite timeout, which is also what an absent header means.
pub fn parse_timeout(s: &str) -> Result<Option<Duration>, Error> {
    let invalid = || Error::new(StatusCode::BAD_REQUEST, "invalid timeout");

    let s = s.split(',').next().unwrap_or_default().trim();
    if s.is_empty() || s == "Infinite" {
        return Ok(None);
    }

    let secs = s
        .strip_prefix("Second-")
        .filter(|n| n.starts_with(|c: char| c.is_ascii_digit()))
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n <= MAX_TIMEOUT_SECS)
        .ok_or_else(invalid)?;

    Ok(Some(Duration::from_secs(secs)))
}
