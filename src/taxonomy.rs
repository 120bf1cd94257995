//! The taxonomy is external, authoritative state this crate only *consumes*
//! (spec.md §1, §6): the closed catalogue of asset kinds, relation kinds,
//! and admitted `(from_kind, label, subtype, to_kind)` tuples. The crate
//! talks to it through this one narrow trait.

use async_trait::async_trait;
use std::collections::HashSet;

/// Narrow taxonomy query consumed by [`crate::graph::GraphApi::link`].
#[async_trait]
pub trait Taxonomy: Send + Sync {
    /// Is an edge with this shape admitted by the taxonomy?
    ///
    /// `subtype` is `None` for relations with no subtype (`SimpleRelation`).
    async fn valid_relationship(
        &self,
        from_kind: &str,
        label: &str,
        subtype: Option<&str>,
        to_kind: &str,
    ) -> bool;
}

/// A fixed in-memory taxonomy, useful for tests and examples. Production
/// deployments supply their own [`Taxonomy`] implementation backed by
/// whatever the taxonomy's external model actually is.
#[derive(Debug, Default, Clone)]
pub struct StaticTaxonomy {
    admitted: HashSet<(String, String, Option<String>, String)>,
}

impl StaticTaxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one admitted `(from_kind, label, subtype, to_kind)` tuple.
    pub fn admit(
        mut self,
        from_kind: impl Into<String>,
        label: impl Into<String>,
        subtype: Option<&str>,
        to_kind: impl Into<String>,
    ) -> Self {
        self.admitted.insert((
            from_kind.into(),
            label.into(),
            subtype.map(str::to_string),
            to_kind.into(),
        ));
        self
    }
}

#[async_trait]
impl Taxonomy for StaticTaxonomy {
    async fn valid_relationship(
        &self,
        from_kind: &str,
        label: &str,
        subtype: Option<&str>,
        to_kind: &str,
    ) -> bool {
        self.admitted.contains(&(
            from_kind.to_string(),
            label.to_string(),
            subtype.map(str::to_string),
            to_kind.to_string(),
        ))
    }
}
