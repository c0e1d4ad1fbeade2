//! # Constraint Model
//!
//! The tree a request is parsed into. A [`Constraint`] restricts one
//! primitive position by guid, linkage endpoints, name/value string
//! predicates under a selected comparator, value type, liveness,
//! generation, and carries the page/sort/count machinery plus child
//! constraints linked through `i-am` / `my` relations.
//!
//! A constraint is either satisfiable or carries the `unsatisfiable`
//! mark; [`normalize`](Constraint::normalize) short-circuits provable
//! contradictions (empty include sets, linkage conflicts, inverted
//! count ranges) into that mark so the engines never scan for them.

pub mod matching;

use std::sync::Arc;

use crate::ident::{Datatype, Dateline, Guid};
use crate::store::Linkage;

/// String predicate operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `~=` glob
    Glob,
    /// Word match against the string index
    Match,
}

/// One predicate over name or value. `pattern: None` constrains the
/// field to be absent (`= null`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringCons {
    pub op: StringOp,
    pub pattern: Option<String>,
}

impl StringCons {
    pub fn eq(pattern: impl Into<String>) -> StringCons {
        StringCons {
            op: StringOp::Eq,
            pattern: Some(pattern.into()),
        }
    }

    pub fn is_null() -> StringCons {
        StringCons {
            op: StringOp::Eq,
            pattern: None,
        }
    }
}

/// Guid filter: include/exclude sets plus lineage matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuidFilter {
    /// `None` = unconstrained; `Some(empty)` = unsatisfiable.
    pub include: Option<Vec<Guid>>,
    pub exclude: Vec<Guid>,
    /// Match any generation of these lineages.
    pub lineage: Option<Vec<Guid>>,
}

impl GuidFilter {
    pub fn is_unconstrained(&self) -> bool {
        self.include.is_none() && self.exclude.is_empty() && self.lineage.is_none()
    }

    pub fn only(guid: Guid) -> GuidFilter {
        GuidFilter {
            include: Some(vec![guid]),
            ..GuidFilter::default()
        }
    }

    /// Provably empty after normalisation.
    pub fn is_empty_set(&self) -> bool {
        match (&self.include, &self.lineage) {
            (Some(inc), _) if inc.is_empty() => true,
            (_, Some(lin)) if lin.is_empty() => true,
            (Some(inc), _) => inc.iter().all(|g| self.exclude.contains(g)),
            _ => false,
        }
    }

    pub fn accepts(&self, guid: &Guid) -> bool {
        if self.exclude.contains(guid) {
            return false;
        }
        if let Some(include) = &self.include {
            if !include.contains(guid) {
                return false;
            }
        }
        if let Some(lineage) = &self.lineage {
            if !lineage.iter().any(|base| base.same_lineage(guid)) {
                return false;
            }
        }
        true
    }
}

/// Three-valued restriction on a boolean primitive attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriState {
    #[default]
    DontCare,
    True,
    False,
}

impl TriState {
    pub fn accepts(self, value: bool) -> bool {
        match self {
            TriState::DontCare => true,
            TriState::True => value,
            TriState::False => !value,
        }
    }
}

/// How many matches a constraint needs (and tolerates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRange {
    pub min: u64,
    pub max: Option<u64>,
}

impl Default for CountRange {
    fn default() -> Self {
        CountRange { min: 1, max: None }
    }
}

impl CountRange {
    pub fn optional() -> CountRange {
        CountRange { min: 0, max: None }
    }
}

/// Page window over the match stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub start: u64,
    pub size: u64,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            start: 0,
            size: 1024,
        }
    }
}

/// One sort key: a per-primitive pattern plus direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub pattern: Pattern,
    pub ascending: bool,
}

/// Sort specification. `root` points up the tree: 0 = this constraint,
/// k = the k-th ancestor whose iterator order may already satisfy the
/// sort.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub keys: Vec<SortKey>,
    pub root: usize,
}

/// Result pattern element: what to return for a match or a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    None,
    Guid,
    Name,
    Value,
    Datatype,
    Left,
    Right,
    Typeguid,
    Scope,
    Timestamp,
    Live,
    Archival,
    /// Total number of matches.
    Count,
    /// Resumption cursor, if one was stored.
    Cursor,
    /// The children's result lists.
    Contents,
    Literal(String),
    List(Vec<Pattern>),
    /// Per-set only: filled from some matching per-id frame.
    Sample(Box<Pattern>),
}

impl Pattern {
    /// Does any sample mark occur under this pattern?
    pub fn has_samples(&self) -> bool {
        match self {
            Pattern::Sample(_) => true,
            Pattern::List(items) => items.iter().any(Pattern::has_samples),
            _ => false,
        }
    }

    pub fn mentions_cursor(&self) -> bool {
        match self {
            Pattern::Cursor => true,
            Pattern::List(items) => items.iter().any(Pattern::mentions_cursor),
            Pattern::Sample(inner) => inner.mentions_cursor(),
            _ => false,
        }
    }
}

/// A result frame: the per-match pattern and the per-set pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPattern {
    pub per_id: Option<Pattern>,
    pub per_set: Option<Pattern>,
}

impl Default for ResultPattern {
    /// The default write/read result: `(guid, contents)` per match.
    fn default() -> Self {
        ResultPattern {
            per_id: Some(Pattern::List(vec![Pattern::Guid, Pattern::Contents])),
            per_set: None,
        }
    }
}

/// How a child constraint hangs off its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRel {
    /// This child's match *is* the parent's `L` endpoint.
    IAm(Linkage),
    /// The child's match points at the parent through its own `L`.
    My(Linkage),
}

/// Alternative branches evaluated against the same primitive; the
/// branch holds if any alternative's intrinsics match.
#[derive(Debug, Clone, Default)]
pub struct OrBranch {
    pub alternatives: Vec<Constraint>,
}

/// Per-linkage guid filters in `Linkage::ALL` order.
pub type LinkageFilters = [GuidFilter; 4];

/// One node of a constraint tree; see the module docs.
#[derive(Debug, Clone, Default)]
pub struct Constraint {
    pub link: Option<LinkRel>,
    pub guid: GuidFilter,
    pub linkage_guid: LinkageFilters,
    pub name: Vec<StringCons>,
    pub value: Vec<StringCons>,
    /// Comparator name; empty selects `default`.
    pub comparator: String,
    pub count: CountRange,
    pub page: Page,
    pub sort: Option<SortSpec>,
    /// Only the newest generation of each lineage.
    pub newest: Option<bool>,
    /// Only the oldest generation of each lineage.
    pub oldest: Option<bool>,
    pub live: TriState,
    pub archival: TriState,
    pub valuetype: Option<Datatype>,
    pub or: Vec<OrBranch>,
    pub result: Option<ResultPattern>,
    pub children: Vec<Constraint>,
    /// A previously returned cursor to resume from.
    pub cursor: Option<String>,
    /// Soft timeouts may freeze this constraint into a cursor.
    pub resumable: bool,
    pub dateline: Option<Dateline>,
    /// Write-side marks.
    pub anchor: bool,
    pub key: Vec<KeyColumn>,
    pub unique: Vec<KeyColumn>,
    /// Short-circuit: the constraint is provably unsatisfiable.
    pub unsatisfiable: bool,
}

/// Columns a write key or uniqueness declaration may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyColumn {
    Name,
    Value,
    Datatype,
    Typeguid,
    Left,
    Right,
    Scope,
}

impl Constraint {
    pub fn new() -> Constraint {
        Constraint {
            count: CountRange::default(),
            page: Page::default(),
            live: TriState::True,
            ..Constraint::default()
        }
    }

    /// Convenience: a `name = n, value = v` leaf.
    pub fn name_value(name: impl Into<String>, value: impl Into<String>) -> Constraint {
        let mut c = Constraint::new();
        c.name = vec![StringCons::eq(name)];
        c.value = vec![StringCons::eq(value)];
        c
    }

    pub fn linkage_filter(&self, which: Linkage) -> &GuidFilter {
        &self.linkage_guid[which.index()]
    }

    pub fn linkage_filter_mut(&mut self, which: Linkage) -> &mut GuidFilter {
        &mut self.linkage_guid[which.index()]
    }

    /// The result pattern in effect (defaulted if unset).
    pub fn result_pattern(&self) -> ResultPattern {
        self.result.clone().unwrap_or_default()
    }

    /// Mark unsatisfiable constraints throughout the tree. Returns the
    /// root's satisfiability.
    pub fn normalize(&mut self) -> bool {
        // Local contradictions.
        if self.guid.is_empty_set()
            || self.linkage_guid.iter().any(GuidFilter::is_empty_set)
        {
            self.unsatisfiable = true;
        }
        if let Some(max) = self.count.max {
            if max < self.count.min {
                self.unsatisfiable = true;
            }
        }
        // newest=true + oldest=true is satisfiable: a one-version
        // lineage is both.

        // Linkage conflicts: a child claiming `i-am(L)` against a
        // parent-side `L=...` pin, or two children claiming the same
        // endpoint.
        let mut claimed = [false; 4];
        for child in &self.children {
            if let Some(LinkRel::IAm(l)) = child.link {
                let parent_pinned = self.linkage_filter(l).include.is_some();
                if parent_pinned || claimed[l.index()] {
                    self.unsatisfiable = true;
                }
                claimed[l.index()] = true;
            }
        }

        let mut all_children_ok = true;
        for child in &mut self.children {
            if !child.normalize() && child.count.min > 0 {
                all_children_ok = false;
            }
        }
        for branch in &mut self.or {
            // A branch dies only when every alternative is dead.
            let any = branch
                .alternatives
                .iter_mut()
                .fold(false, |acc, alt| alt.normalize() || acc);
            if !any && !branch.alternatives.is_empty() {
                self.unsatisfiable = true;
            }
        }
        if !all_children_ok {
            self.unsatisfiable = true;
        }
        !self.unsatisfiable
    }

    /// Total number of nodes in this subtree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Constraint::size).sum::<usize>()
    }

    /// Wrap the tree's nodes for shared ownership by read contexts.
    pub fn into_shared(self) -> Arc<Constraint> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Guid;

    fn guid(n: u64) -> Guid {
        Guid::from_parts(1, n, n).expect("test guid")
    }

    #[test]
    fn test_empty_include_is_unsatisfiable() {
        let mut c = Constraint::new();
        c.guid.include = Some(vec![]);
        assert!(!c.normalize());
        assert!(c.unsatisfiable);
    }

    #[test]
    fn test_include_fully_excluded() {
        let mut c = Constraint::new();
        c.guid.include = Some(vec![guid(1)]);
        c.guid.exclude = vec![guid(1)];
        assert!(!c.normalize());
    }

    #[test]
    fn test_inverted_count_range() {
        let mut c = Constraint::new();
        c.count = CountRange {
            min: 5,
            max: Some(2),
        };
        assert!(!c.normalize());
    }

    #[test]
    fn test_iam_conflicts_with_parent_pin() {
        let mut parent = Constraint::new();
        parent.linkage_filter_mut(Linkage::Right).include = Some(vec![guid(1)]);
        let mut child = Constraint::new();
        child.link = Some(LinkRel::IAm(Linkage::Right));
        parent.children.push(child);
        assert!(!parent.normalize());
    }

    #[test]
    fn test_iam_sibling_conflict() {
        let mut parent = Constraint::new();
        for _ in 0..2 {
            let mut child = Constraint::new();
            child.link = Some(LinkRel::IAm(Linkage::Left));
            parent.children.push(child);
        }
        assert!(!parent.normalize());
    }

    #[test]
    fn test_required_dead_child_kills_parent() {
        let mut parent = Constraint::new();
        let mut child = Constraint::new();
        child.guid.include = Some(vec![]);
        child.count = CountRange::default(); // min 1
        parent.children.push(child);
        assert!(!parent.normalize());
    }

    #[test]
    fn test_optional_dead_child_is_tolerated() {
        let mut parent = Constraint::new();
        let mut child = Constraint::new();
        child.guid.include = Some(vec![]);
        child.count = CountRange::optional();
        parent.children.push(child);
        assert!(parent.normalize());
    }

    #[test]
    fn test_guid_filter_accepts() {
        let f = GuidFilter {
            include: Some(vec![guid(1), guid(2)]),
            exclude: vec![guid(2)],
            lineage: None,
        };
        assert!(f.accepts(&guid(1)));
        assert!(!f.accepts(&guid(2)));
        assert!(!f.accepts(&guid(3)));
    }

    #[test]
    fn test_lineage_filter() {
        let base = guid(7);
        let v2 = base.versioned(9).expect("versioned");
        let f = GuidFilter {
            include: None,
            exclude: vec![],
            lineage: Some(vec![base]),
        };
        assert!(f.accepts(&base));
        assert!(f.accepts(&v2));
        assert!(!f.accepts(&guid(8)));
    }

    #[test]
    fn test_default_result_pattern() {
        let c = Constraint::new();
        let rp = c.result_pattern();
        assert_eq!(
            rp.per_id,
            Some(Pattern::List(vec![Pattern::Guid, Pattern::Contents]))
        );
    }

    #[test]
    fn test_pattern_sample_detection() {
        let p = Pattern::List(vec![
            Pattern::Count,
            Pattern::Sample(Box::new(Pattern::Name)),
        ]);
        assert!(p.has_samples());
        assert!(!Pattern::Count.has_samples());
    }
}
