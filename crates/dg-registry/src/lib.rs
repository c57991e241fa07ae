//! dg-registry
//!
//! Stateless namespace view over a chain: which namespaces exist, who holds
//! permissions in them, and which cross-namespace bridges are in force.
//!
//! Nothing is cached between queries — the chain is the source of truth, and
//! a registry is rebuilt from it wherever one is needed. Namespaces are
//! hierarchical but not implicitly permissive: access to a child namespace
//! requires a bridge or an explicit permission, never inheritance.

use std::collections::{HashMap, HashSet};

use dg_chain::Chain;
use dg_core::{
    parse_utc, CellId, DgError, PREDICATE_GRANTS_ACCESS, PREDICATE_HAS_PERMISSION,
    PREDICATE_REVOKE_BRIDGE,
};

/// Bridge subjects encode the source namespace as `namespace:<source>`.
const BRIDGE_SUBJECT_TYPE: &str = "namespace:";

// ── Records ──────────────────────────────────────────────────────────────────

/// One `grants_access_to` (or `revoke_bridge`) cell, flattened for lookups.
#[derive(Clone, Debug)]
struct BridgeRecord {
    cell_id: CellId,
    source: String,
    target: String,
    system_time: String,
    valid_from: String,
    valid_to: Option<String>,
}

/// A permission set on a subject within a namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct Permission {
    pub namespace: String,
    pub subject: String,
    pub permission: String,
    pub granted_by: CellId,
}

/// Effectiveness of a bridge at a bitemporal coordinate.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeStatus {
    /// In force; `cells_used` are the granting cells backing the decision.
    Active { cells_used: Vec<CellId> },
    /// Granted but later revoked.
    Revoked { revoked_by: CellId },
    /// No grant exists (or none visible at the given coordinates).
    Missing,
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Snapshot of namespace state, built by a single scan of the chain.
#[derive(Debug)]
pub struct NamespaceRegistry {
    namespaces: HashSet<String>,
    permissions: HashMap<(String, String), Permission>,
    grants: Vec<BridgeRecord>,
    revocations: Vec<BridgeRecord>,
}

impl NamespaceRegistry {
    /// Scan the chain and build the view.
    pub fn from_chain(chain: &Chain) -> Self {
        let mut namespaces = HashSet::new();
        let mut permissions: HashMap<(String, String), Permission> = HashMap::new();
        let mut grants = Vec::new();
        let mut revocations = Vec::new();

        for cell in chain.iter() {
            let fact = cell.fact();
            namespaces.insert(fact.namespace.clone());

            match fact.predicate.as_str() {
                PREDICATE_HAS_PERMISSION => {
                    // Later cells overwrite earlier grants for the same subject.
                    permissions.insert(
                        (fact.namespace.clone(), fact.subject.clone()),
                        Permission {
                            namespace: fact.namespace.clone(),
                            subject: fact.subject.clone(),
                            permission: fact.object.clone(),
                            granted_by: cell.cell_id,
                        },
                    );
                }
                PREDICATE_GRANTS_ACCESS | PREDICATE_REVOKE_BRIDGE => {
                    if let Some(source) = fact.subject.strip_prefix(BRIDGE_SUBJECT_TYPE) {
                        let record = BridgeRecord {
                            cell_id: cell.cell_id,
                            source: source.to_string(),
                            target: fact.object.clone(),
                            system_time: cell.header().system_time.clone(),
                            valid_from: fact.valid_from.clone(),
                            valid_to: fact.valid_to.clone(),
                        };
                        if fact.predicate == PREDICATE_GRANTS_ACCESS {
                            grants.push(record);
                        } else {
                            revocations.push(record);
                        }
                    }
                }
                _ => {}
            }
        }

        Self { namespaces, permissions, grants, revocations }
    }

    /// A namespace exists iff at least one cell uses it.
    pub fn namespace_exists(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &String> {
        self.namespaces.iter()
    }

    /// Current permission set on `subject` in `namespace`, latest grant wins.
    pub fn get_permission(&self, namespace: &str, subject: &str) -> Option<&Permission> {
        self.permissions.get(&(namespace.to_string(), subject.to_string()))
    }

    /// Bridge effectiveness at a bitemporal coordinate.
    ///
    /// A grant is visible when `valid_from ≤ at < valid_to` and its
    /// `system_time ≤ as_of`. A visible grant is nullified by any
    /// `revoke_bridge` cell for the same (source, target) pair recorded
    /// after it and no later than `as_of`.
    pub fn bridge_status(
        &self,
        source: &str,
        target: &str,
        at_valid_time: &str,
        as_of_system_time: &str,
    ) -> Result<BridgeStatus, DgError> {
        let at = parse_utc(at_valid_time)?;
        let as_of = parse_utc(as_of_system_time)?;

        let mut active: Vec<CellId> = Vec::new();
        let mut last_revocation: Option<CellId> = None;

        for grant in &self.grants {
            if grant.source != source || grant.target != target {
                continue;
            }
            if parse_utc(&grant.system_time)? > as_of {
                continue;
            }
            if parse_utc(&grant.valid_from)? > at {
                continue;
            }
            if let Some(valid_to) = &grant.valid_to {
                if parse_utc(valid_to)? <= at {
                    continue;
                }
            }

            let grant_time = parse_utc(&grant.system_time)?;
            let revoked = self
                .revocations
                .iter()
                .filter(|r| r.source == source && r.target == target)
                .filter_map(|r| parse_utc(&r.system_time).ok().map(|t| (t, r.cell_id)))
                .find(|(t, _)| *t > grant_time && *t <= as_of);

            match revoked {
                Some((_, revoked_by)) => last_revocation = Some(revoked_by),
                None => active.push(grant.cell_id),
            }
        }

        if !active.is_empty() {
            active.sort();
            return Ok(BridgeStatus::Active { cells_used: active });
        }
        if let Some(revoked_by) = last_revocation {
            return Ok(BridgeStatus::Revoked { revoked_by });
        }
        Ok(BridgeStatus::Missing)
    }

    /// Convenience wrapper: is any grant in force at the coordinates?
    pub fn is_bridge_effective(
        &self,
        source: &str,
        target: &str,
        at_valid_time: &str,
        as_of_system_time: &str,
    ) -> Result<bool, DgError> {
        Ok(matches!(
            self.bridge_status(source, target, at_valid_time, as_of_system_time)?,
            BridgeStatus::Active { .. }
        ))
    }
}
