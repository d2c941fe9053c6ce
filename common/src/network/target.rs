//! # Scan Target Model
//!
//! Defines what a scan is allowed to touch.
//!
//! A [`Target`] holds three [`ScopeSet`]s:
//! * **Seeds**: the hosts the scan starts from.
//! * **Whitelist**: what counts as in-scope. When absent, the seeds are used.
//! * **Blacklist**: what must never be touched. Always matched by suffix/subnet.
//!
//! `strict_scope` narrows DNS matching of seeds and whitelist to exact names.

use serde::{Deserialize, Serialize};

use crate::error::ScopeError;
use crate::event::Event;
use crate::network::host::Host;
use crate::network::scope::ScopeSet;
use crate::utils::hash;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub seeds: ScopeSet,
    pub whitelist: Option<ScopeSet>,
    pub blacklist: ScopeSet,
    pub strict_scope: bool,
}

/// Flat, storable form of a [`Target`], identified by its content hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub name: String,
    pub strict_scope: bool,
    pub seeds: Vec<String>,
    pub whitelist: Option<Vec<String>>,
    pub blacklist: Vec<String>,
    pub hash: String,
    pub scope_hash: String,
    pub seed_hash: String,
    pub whitelist_hash: String,
    pub blacklist_hash: String,
}

impl Target {
    pub fn new<I, S>(seeds: I) -> Result<Self, ScopeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            seeds: ScopeSet::parse(seeds)?,
            ..Self::default()
        })
    }

    pub fn with_whitelist<I, S>(mut self, whitelist: I) -> Result<Self, ScopeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let whitelist = ScopeSet::parse(whitelist)?;
        self.whitelist = (!whitelist.is_empty()).then_some(whitelist);
        Ok(self)
    }

    pub fn with_blacklist<I, S>(mut self, blacklist: I) -> Result<Self, ScopeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blacklist = ScopeSet::parse(blacklist)?;
        Ok(self)
    }

    pub fn with_strict_scope(mut self, strict_scope: bool) -> Self {
        self.strict_scope = strict_scope;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// The whitelist in effect: the explicit one, or the seeds when there is none.
    pub fn effective_whitelist(&self) -> &ScopeSet {
        match &self.whitelist {
            Some(whitelist) if !whitelist.is_empty() => whitelist,
            _ => &self.seeds,
        }
    }

    /// Whether `host` falls under one of the seeds.
    pub fn targets(&self, host: &str) -> bool {
        self.seeds.matches(host, self.strict_scope)
    }

    pub fn whitelisted(&self, host: &str) -> bool {
        self.effective_whitelist().matches(host, self.strict_scope)
    }

    /// Blacklist matching ignores `strict_scope`: strictness narrows what is
    /// allowed, never what is excluded.
    pub fn blacklisted(&self, host: &str) -> bool {
        self.blacklist.matches(host, false)
    }

    pub fn in_scope(&self, host: &str) -> bool {
        self.whitelisted(host) && !self.blacklisted(host)
    }

    pub fn host_in_scope(&self, host: &Host) -> bool {
        self.effective_whitelist().contains(host, self.strict_scope)
            && !self.blacklist.contains(host, false)
    }

    /// Unions every set; strictness wins if either side is strict.
    pub fn merge(&mut self, other: &Target) {
        self.seeds.merge(&other.seeds);
        self.blacklist.merge(&other.blacklist);
        self.strict_scope |= other.strict_scope;
        match (&mut self.whitelist, &other.whitelist) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.whitelist = Some(theirs.clone()),
            _ => {}
        }
    }

    /// A copy with the effective whitelist written out explicitly.
    pub fn baked(&self) -> Target {
        Target {
            whitelist: Some(self.effective_whitelist().clone()),
            ..self.clone()
        }
    }

    pub fn seed_hash(&self) -> String {
        self.seeds.hash()
    }

    pub fn whitelist_hash(&self) -> String {
        self.effective_whitelist().hash()
    }

    pub fn blacklist_hash(&self) -> String {
        self.blacklist.hash()
    }

    /// Identity of the in/out rules alone, ignoring which seeds start the scan.
    pub fn scope_hash(&self) -> String {
        hash::digest_hex([
            self.whitelist_hash(),
            self.blacklist_hash(),
            self.strict_scope.to_string(),
        ])
    }

    pub fn hash(&self) -> String {
        hash::digest_hex([self.seed_hash(), self.scope_hash()])
    }

    pub fn to_record(&self, name: &str) -> TargetRecord {
        TargetRecord {
            name: name.to_string(),
            strict_scope: self.strict_scope,
            seeds: self.seeds.entries(),
            whitelist: self.whitelist.as_ref().map(ScopeSet::entries),
            blacklist: self.blacklist.entries(),
            hash: self.hash(),
            scope_hash: self.scope_hash(),
            seed_hash: self.seed_hash(),
            whitelist_hash: self.whitelist_hash(),
            blacklist_hash: self.blacklist_hash(),
        }
    }

    /// One in-scope event per seed, parented to `root`.
    pub fn seed_events(&self, root: &Event) -> Vec<Event> {
        self.seeds
            .hosts()
            .into_iter()
            .map(|host| Event::target_seed(host, root))
            .collect()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
