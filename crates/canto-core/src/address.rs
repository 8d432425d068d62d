//! Hierarchical cache addresses.
//!
//! An [`Address`] is an immutable path of typed segments, for example
//! `layout:0/page:3/system:1`. Segment kinds always nest in the fixed order
//! `layout > page > system > staff > measure`, so the depth of an address is
//! also its granularity: a shorter address is coarser than any longer address
//! it is a prefix of.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Granularity level of a path segment, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    Layout = 0,
    Page = 1,
    System = 2,
    Staff = 3,
    Measure = 4,
}

impl Granularity {
    const ALL: [Granularity; 5] = [
        Granularity::Layout,
        Granularity::Page,
        Granularity::System,
        Granularity::Staff,
        Granularity::Measure,
    ];

    /// The granularity found at the given zero-based depth.
    pub fn at_depth(depth: usize) -> Option<Self> {
        Self::ALL.get(depth).copied()
    }

    /// The next finer granularity, if any.
    pub fn finer(self) -> Option<Self> {
        Self::at_depth(self as usize + 1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Layout => "layout",
            Granularity::Page => "page",
            Granularity::System => "system",
            Granularity::Staff => "staff",
            Granularity::Measure => "measure",
        }
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "layout" => Ok(Granularity::Layout),
            "page" => Ok(Granularity::Page),
            "system" => Ok(Granularity::System),
            "staff" => Ok(Granularity::Staff),
            "measure" => Ok(Granularity::Measure),
            other => Err(Error::InvalidAddress(format!(
                "unknown segment kind '{}'",
                other
            ))),
        }
    }
}

/// One typed path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Segment {
    pub kind: Granularity,
    pub index: u32,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.index)
    }
}

/// Immutable hierarchical cache key.
///
/// Cloning is cheap: segments are shared behind an `Arc`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address(Arc<[Segment]>);

impl Address {
    /// A layout-level root address.
    pub fn root(layout: u32) -> Self {
        Self(Arc::from(vec![Segment {
            kind: Granularity::Layout,
            index: layout,
        }]))
    }

    /// Build an address from raw indices, one per granularity level.
    pub fn from_indices(indices: &[u32]) -> Result<Self> {
        if indices.is_empty() {
            return Err(Error::InvalidAddress("address has no segments".to_string()));
        }
        let segments = indices
            .iter()
            .enumerate()
            .map(|(depth, &index)| {
                Granularity::at_depth(depth)
                    .map(|kind| Segment { kind, index })
                    .ok_or_else(|| {
                        Error::InvalidAddress(format!("address deeper than {} levels", depth))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(Arc::from(segments)))
    }

    /// The child at the next finer granularity.
    pub fn child(&self, index: u32) -> Result<Self> {
        let kind = self
            .granularity()
            .finer()
            .ok_or_else(|| Error::InvalidAddress(format!("{} has no finer level", self)))?;
        let mut segments = self.0.to_vec();
        segments.push(Segment { kind, index });
        Ok(Self(Arc::from(segments)))
    }

    /// The enclosing address one level coarser, or `None` at layout level.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(Arc::from(&self.0[..self.0.len() - 1])))
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn granularity(&self) -> Granularity {
        // Non-empty by construction.
        self.0[self.0.len() - 1].kind
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Whether this address equals `other` or is a coarser ancestor of it.
    pub fn is_prefix_of(&self, other: &Address) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Whether this address is a strictly finer descendant of `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Address) -> bool {
        self.0.len() > ancestor.0.len() && ancestor.is_prefix_of(self)
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        // Coarser (shallower) addresses sort first, then by path.
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for (depth, part) in s.split('/').enumerate() {
            let (kind, index) = part
                .split_once(':')
                .ok_or_else(|| Error::InvalidAddress(format!("segment '{}' lacks ':'", part)))?;
            let kind: Granularity = kind.parse()?;
            if Granularity::at_depth(depth) != Some(kind) {
                return Err(Error::InvalidAddress(format!(
                    "'{}' cannot appear at depth {} in '{}'",
                    kind.as_str(),
                    depth,
                    s
                )));
            }
            let index = index
                .parse::<u32>()
                .map_err(|e| Error::InvalidAddress(format!("bad index in '{}': {}", part, e)))?;
            segments.push(Segment { kind, index });
        }
        Ok(Self(Arc::from(segments)))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
