//! Object identifiers.

use std::fmt;
use std::str::FromStr;

use crate::SnmpError;

/// An SNMP object identifier, e.g. `1.3.6.1.2.1.1.1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn from_slice(arcs: &[u32]) -> Self {
        Oid(arcs.to_vec())
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// True if `self` lies under `root` (proper subtree or equal).
    pub fn starts_with(&self, root: &Oid) -> bool {
        self.0.len() >= root.0.len() && self.0[..root.0.len()] == root.0[..]
    }

    /// Append an arc, e.g. a table column index.
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }

    /// The arcs following `root`, for decoding table row indices.
    pub fn suffix(&self, root: &Oid) -> Option<&[u32]> {
        if self.starts_with(root) {
            Some(&self.0[root.0.len()..])
        } else {
            None
        }
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let arcs: Result<Vec<u32>, _> = s
            .trim_start_matches('.')
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect();
        let arcs = arcs.map_err(|_| SnmpError::Decode(format!("bad OID string: {}", s)))?;
        if arcs.len() < 2 {
            return Err(SnmpError::Decode(format!("OID too short: {}", s)));
        }
        Ok(Oid(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
            first = false;
        }
        Ok(())
    }
}
