//! # Write Engine
//!
//! Atomically materialises a write-constraint tree as new primitives.
//! After validity checking, a write runs a four-phase pipeline under an
//! exclusive ticket:
//!
//! 1. **Anchor annotate**: for each `anchor`-marked node, search the
//!    store for an existing primitive that structurally matches it and
//!    remember its guid.
//! 2. **Key annotate**: bind `key`-marked nodes to their anchor find
//!    when the declared key columns agree; otherwise mark them for
//!    creation.
//! 3. **Pointed annotate**: propagate bound guids across non-keyed
//!    pointer subtrees, so clusters reached through matched nodes are
//!    treated as bound too.
//! 4. **Unique check**: synthesise a read from the tree's uniqueness
//!    declarations; any hit fails the write with `EXISTS`.
//!
//! Commit then records the rollback horizon (`primitive_n`), writes
//! new primitives parent-before-child, and installs linkages from
//! explicit guids or the freshly written parent. Any failure past the
//! horizon rolls the store back; a rollback failure writes an epitaph
//! and condemns the worker. The exclusive ticket is released only when
//! the pipeline stack is empty.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::constraint::{Constraint, CountRange, GuidFilter, KeyColumn, LinkRel, Pattern};
use crate::error::{GraphError, GraphResult};
use crate::ident::Guid;
use crate::read::{ReadEngine, Value};
use crate::store::{Linkage, Primitive, PrimitiveData, PrimitiveStore, Store};
use crate::ticket::TicketPrinter;

/// Node address inside the tree: child indexes from the root.
type NodePath = Vec<usize>;

/// Per-write annotation state.
#[derive(Default)]
struct WriteState {
    /// Anchor finds, phase 1.
    anchored: HashMap<NodePath, Guid>,
    /// Bound nodes (reuse this guid instead of writing), phases 2–3.
    bound: HashMap<NodePath, Guid>,
    /// Final guid of every node after commit.
    written: HashMap<NodePath, Guid>,
}

/// Write pipeline configuration.
#[derive(Debug, Clone)]
pub struct WriteConfig {
    /// Wall-clock ceiling on the commit phase.
    pub commit_limit: Duration,
    /// Where to leave last words if rollback fails.
    pub epitaph_path: Option<PathBuf>,
}

impl Default for WriteConfig {
    fn default() -> Self {
        WriteConfig {
            commit_limit: Duration::from_secs(30),
            epitaph_path: None,
        }
    }
}

/// The write engine; see the module docs.
pub struct WriteEngine {
    store: Store,
    tickets: TicketPrinter,
    config: WriteConfig,
}

impl WriteEngine {
    pub fn new(store: Store, tickets: TicketPrinter) -> WriteEngine {
        WriteEngine {
            store,
            tickets,
            config: WriteConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WriteConfig) -> WriteEngine {
        self.config = config;
        self
    }

    /// Run a write to completion. Returns the result tree pruned to
    /// the requested pattern (default `(guid, contents)`).
    pub fn execute(&self, mut con: Constraint) -> GraphResult<Value> {
        con.normalize();
        validate(&con, &self.store)?;

        let ticket = self.tickets.get_exclusive(None);
        let result = self.pipeline(&con);
        // The ticket outlives every phase, including rollback.
        self.tickets.delete(ticket);
        result
    }

    fn pipeline(&self, con: &Constraint) -> GraphResult<Value> {
        let reads = ReadEngine::new(self.store.clone(), TicketPrinter::new());
        let mut state = WriteState::default();

        self.anchor_annotate(con, &mut Vec::new(), None, &mut state, &reads)?;
        self.key_annotate(con, &mut Vec::new(), &mut state)?;
        self.pointed_annotate(con, &mut Vec::new(), None, &mut state)?;
        self.unique_check(con, &mut Vec::new(), &reads)?;

        // Commit, time-limited, with crash rollback.
        let horizon = self.store.primitive_n();
        let deadline = Instant::now() + self.config.commit_limit;
        let committed =
            self.commit_node(con, &mut Vec::new(), None, None, &mut state, deadline);
        match committed {
            Ok(()) => {
                // Ask for a checkpoint on the idle path.
                self.store.checkpoint_optional()?;
                self.prune_result(con, &mut Vec::new(), &state)
            }
            Err(e) => {
                tracing::warn!(error = %e, horizon, "write failed; rolling back");
                if let Err(rollback_err) = self.store.checkpoint_rollback(horizon) {
                    self.write_epitaph(&format!(
                        "rollback to horizon {horizon} failed: {rollback_err} (after: {e})"
                    ));
                    return Err(GraphError::NoRestart(format!(
                        "rollback failed: {rollback_err}"
                    )));
                }
                if !self.store.transactional() {
                    self.store.checkpoint_urgent()?;
                }
                Err(e)
            }
        }
    }

    /// Phase 1: find structural matches for anchor-marked nodes.
    fn anchor_annotate(
        &self,
        node: &Constraint,
        path: &mut NodePath,
        parent_guid: Option<Guid>,
        state: &mut WriteState,
        reads: &ReadEngine,
    ) -> GraphResult<()> {
        let mut own_find = None;
        if node.anchor {
            let query = structural_query(node, parent_guid);
            let deadline = Instant::now() + Duration::from_secs(10);
            let outcome = reads.execute(query, deadline)?;
            if let Some(row) = outcome.rows.first() {
                if let Some(guid) = first_guid(row) {
                    state.anchored.insert(path.clone(), guid);
                    own_find = Some(guid);
                }
            }
        }
        for (i, child) in node.children.iter().enumerate() {
            path.push(i);
            self.anchor_annotate(child, path, own_find, state, reads)?;
            path.pop();
        }
        Ok(())
    }

    /// Phase 2: bind key-marked nodes to their anchor find when the
    /// key columns agree.
    fn key_annotate(
        &self,
        node: &Constraint,
        path: &mut NodePath,
        state: &mut WriteState,
    ) -> GraphResult<()> {
        if !node.key.is_empty() {
            if let Some(found) = state.anchored.get(path).copied() {
                let p = self
                    .store
                    .id_from_guid(&found)
                    .and_then(|id| self.store.primitive_read(id).ok());
                if let Some(p) = p {
                    if key_columns_match(node, &p, &node.key) {
                        state.bound.insert(path.clone(), found);
                    }
                }
            }
            // No match: the node stays unbound and will be created.
        }
        for (i, child) in node.children.iter().enumerate() {
            path.push(i);
            self.key_annotate(child, path, state)?;
            path.pop();
        }
        Ok(())
    }

    /// Phase 3: a non-keyed pointer child of a bound node inherits
    /// binding if the store already holds its exact structure.
    fn pointed_annotate(
        &self,
        node: &Constraint,
        path: &mut NodePath,
        parent_bound: Option<Guid>,
        state: &mut WriteState,
    ) -> GraphResult<()> {
        let own_binding = state
            .bound
            .get(path)
            .copied()
            .or(state.anchored.get(path).copied().filter(|_| node.anchor));
        if !state.bound.contains_key(path) && node.key.is_empty() {
            if let (Some(parent), Some(LinkRel::My(which))) = (parent_bound, node.link) {
                if let Some(existing) = self.find_pointer_match(node, parent, which)? {
                    state.bound.insert(path.clone(), existing);
                }
            }
        }
        let own_binding = state.bound.get(path).copied().or(own_binding);
        for (i, child) in node.children.iter().enumerate() {
            path.push(i);
            self.pointed_annotate(child, path, own_binding, state)?;
            path.pop();
        }
        Ok(())
    }

    fn find_pointer_match(
        &self,
        node: &Constraint,
        parent: Guid,
        which: Linkage,
    ) -> GraphResult<Option<Guid>> {
        let ids = self
            .store
            .vip_candidates(which, &parent, None, crate::ident::Id::ZERO, crate::ident::Id::NONE);
        for id in ids {
            let p = self.store.primitive_read(id)?;
            if !p.live {
                continue;
            }
            if node_matches_primitive(node, &p) {
                return Ok(Some(p.guid));
            }
        }
        Ok(None)
    }

    /// Phase 4: uniqueness declarations become a read; any hit is
    /// EXISTS.
    fn unique_check(
        &self,
        node: &Constraint,
        path: &mut NodePath,
        reads: &ReadEngine,
    ) -> GraphResult<()> {
        if !node.unique.is_empty() {
            let query = unique_query(node);
            let deadline = Instant::now() + Duration::from_secs(10);
            let outcome = reads.execute(query, deadline)?;
            if outcome.count > 0 {
                return Err(GraphError::Exists(format!(
                    "unique constraint already matched {} primitive(s)",
                    outcome.count
                )));
            }
        }
        for (i, child) in node.children.iter().enumerate() {
            path.push(i);
            self.unique_check(child, path, reads)?;
            path.pop();
        }
        Ok(())
    }

    /// Phase 5: write primitives, parent before child. `i-am` children
    /// are written first (the parent points at them); `my` children
    /// after (they point at the parent).
    fn commit_node(
        &self,
        node: &Constraint,
        path: &mut NodePath,
        parent_guid: Option<Guid>,
        parent_link: Option<LinkRel>,
        state: &mut WriteState,
        deadline: Instant,
    ) -> GraphResult<()> {
        if Instant::now() >= deadline {
            return Err(GraphError::TooHard);
        }

        // Endpoint children first.
        let mut endpoint_guids: [Option<Guid>; 4] = [None; 4];
        for (i, child) in node.children.iter().enumerate() {
            if let Some(LinkRel::IAm(which)) = child.link {
                path.push(i);
                self.commit_node(child, path, None, child.link, state, deadline)?;
                endpoint_guids[which.index()] = state.written.get(path).copied();
                path.pop();
            }
        }

        let guid = if let Some(bound) = state.bound.get(path).copied() {
            // Bound: the primitive already exists; nothing to write.
            bound
        } else {
            self.write_primitive(node, parent_guid, parent_link, endpoint_guids)?
        };
        state.written.insert(path.clone(), guid);

        // Pointer children after, linked to this node.
        for (i, child) in node.children.iter().enumerate() {
            if matches!(child.link, Some(LinkRel::IAm(_))) {
                continue;
            }
            path.push(i);
            self.commit_node(child, path, Some(guid), child.link, state, deadline)?;
            path.pop();
        }
        Ok(())
    }

    fn write_primitive(
        &self,
        node: &Constraint,
        parent_guid: Option<Guid>,
        parent_link: Option<LinkRel>,
        endpoint_guids: [Option<Guid>; 4],
    ) -> GraphResult<Guid> {
        // Version target: a single included guid means "write the next
        // generation of this lineage".
        let guid = match node.guid.include.as_deref() {
            Some([target]) => self.store.guid_alloc(Some(target))?,
            _ => self.store.guid_alloc(None)?,
        };

        let mut linkages: [Option<Guid>; 4] = [None; 4];
        for which in Linkage::ALL {
            // Priority: freshly written endpoint child, then explicit
            // guid, then the parent we hang off.
            linkages[which.index()] = endpoint_guids[which.index()].or_else(|| {
                match node.linkage_filter(which).include.as_deref() {
                    Some([g]) => Some(*g),
                    _ => None,
                }
            });
        }
        if let (Some(parent), Some(LinkRel::My(which))) = (parent_guid, parent_link) {
            if linkages[which.index()].is_none() {
                linkages[which.index()] = Some(parent);
            }
        }

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let data = PrimitiveData {
            guid: Some(guid),
            linkages,
            name: single_string(&node.name),
            value: single_string(&node.value),
            datatype: node.valuetype.unwrap_or_else(|| {
                if single_string(&node.value).is_some() {
                    crate::ident::Datatype::String
                } else {
                    crate::ident::Datatype::Null
                }
            }),
            timestamp,
            live: true,
            archival: false,
        };
        self.store.primitive_alloc(data)?;
        Ok(guid)
    }

    /// Phase 6: reshape the committed tree to the requested result
    /// pattern.
    fn prune_result(
        &self,
        node: &Constraint,
        path: &mut NodePath,
        state: &WriteState,
    ) -> GraphResult<Value> {
        let guid = state.written.get(path).copied().ok_or_else(|| {
            GraphError::Internal("committed node without a written guid".into())
        })?;
        let mut contents = Vec::new();
        for (i, child) in node.children.iter().enumerate() {
            path.push(i);
            contents.push(self.prune_result(child, path, state)?);
            path.pop();
        }
        let pattern = node.result_pattern();
        let pattern = pattern
            .per_id
            .unwrap_or(Pattern::List(vec![Pattern::Guid, Pattern::Contents]));
        Ok(write_result_value(&pattern, guid, &contents))
    }

    fn write_epitaph(&self, text: &str) {
        tracing::error!(epitaph = text, "writing epitaph");
        if let Some(path) = &self.config.epitaph_path {
            let _ = std::fs::write(path, text);
        }
    }
}

/// Instantiate a write-result pattern (whitelisted subset).
fn write_result_value(pattern: &Pattern, guid: Guid, contents: &[Value]) -> Value {
    match pattern {
        Pattern::Guid => Value::Guid(guid),
        Pattern::Contents => Value::List(contents.to_vec()),
        Pattern::Literal(s) => Value::Str(s.clone()),
        Pattern::None => Value::Null,
        Pattern::List(items) => Value::List(
            items
                .iter()
                .map(|p| write_result_value(p, guid, contents))
                .collect(),
        ),
        // validate() rejected everything else.
        _ => Value::Null,
    }
}

/// Validity: the checks a write tree must pass before any phase runs.
pub fn validate(con: &Constraint, store: &Store) -> GraphResult<()> {
    validate_node(con, store)
}

fn validate_node(node: &Constraint, store: &Store) -> GraphResult<()> {
    if node.unsatisfiable {
        return Err(GraphError::Semantics(
            "write constraint is self-contradictory".into(),
        ));
    }
    if node.dateline.is_some() {
        return Err(GraphError::Semantics(
            "dateline constraints are forbidden on writes".into(),
        ));
    }
    if let Some(include) = &node.guid.include {
        if include.len() > 1 {
            return Err(GraphError::Semantics(
                "a write carries at most one guid".into(),
            ));
        }
        if let [target] = include.as_slice() {
            // The version target must exist and be the newest
            // generation of its lineage.
            match store.newest_generation(target) {
                None => {
                    return Err(GraphError::Semantics(format!(
                        "write target {target} does not exist"
                    )))
                }
                Some(newest) if newest != *target => {
                    return Err(GraphError::Outdated(target.to_string()))
                }
                Some(_) => {}
            }
        }
    }
    for (what, cons) in [("name", &node.name), ("value", &node.value)] {
        if cons.len() > 1 {
            return Err(GraphError::Semantics(format!(
                "write {what} must be single-valued"
            )));
        }
        if let Some(c) = cons.first() {
            if c.op != crate::constraint::StringOp::Eq {
                return Err(GraphError::Semantics(format!(
                    "write {what} only accepts ="
                )));
            }
        }
    }
    for which in Linkage::ALL {
        if let Some(include) = node.linkage_filter(which).include.as_deref() {
            if include.len() > 1 {
                return Err(GraphError::Semantics(format!(
                    "write {which} must be single-valued"
                )));
            }
            for g in include {
                if store.id_from_guid(g).is_none() && store.newest_generation(g).is_none() {
                    return Err(GraphError::Semantics(format!(
                        "endpoint {g} does not resolve"
                    )));
                }
            }
        }
    }
    if let Some(result) = &node.result {
        if let Some(per_id) = &result.per_id {
            validate_result_pattern(per_id)?;
        }
    }
    for child in &node.children {
        validate_node(child, store)?;
    }
    Ok(())
}

fn validate_result_pattern(pattern: &Pattern) -> GraphResult<()> {
    match pattern {
        Pattern::Guid | Pattern::Contents | Pattern::Literal(_) | Pattern::None => Ok(()),
        Pattern::List(items) => {
            for item in items {
                validate_result_pattern(item)?;
            }
            Ok(())
        }
        other => Err(GraphError::Semantics(format!(
            "write results allow guid, contents, literal, none and lists; got {other:?}"
        ))),
    }
}

/// Read query matching a node's structure, used by anchor annotation.
fn structural_query(node: &Constraint, parent_guid: Option<Guid>) -> Constraint {
    let mut q = Constraint::new();
    q.name = node.name.clone();
    q.value = node.value.clone();
    q.valuetype = node.valuetype;
    q.linkage_guid = node.linkage_guid.clone();
    if let (Some(parent), Some(LinkRel::My(which))) = (parent_guid, node.link) {
        *q.linkage_filter_mut(which) = GuidFilter::only(parent);
    }
    q.newest = Some(true);
    q.count = CountRange::optional();
    q.page.size = 1;
    q
}

/// Read query over a node's uniqueness columns.
fn unique_query(node: &Constraint) -> Constraint {
    let mut q = Constraint::new();
    for col in &node.unique {
        match col {
            KeyColumn::Name => q.name = node.name.clone(),
            KeyColumn::Value => q.value = node.value.clone(),
            KeyColumn::Datatype => q.valuetype = node.valuetype,
            KeyColumn::Typeguid => {
                q.linkage_guid[Linkage::Typeguid.index()] =
                    node.linkage_filter(Linkage::Typeguid).clone();
            }
            KeyColumn::Left => {
                q.linkage_guid[Linkage::Left.index()] =
                    node.linkage_filter(Linkage::Left).clone();
            }
            KeyColumn::Right => {
                q.linkage_guid[Linkage::Right.index()] =
                    node.linkage_filter(Linkage::Right).clone();
            }
            KeyColumn::Scope => {
                q.linkage_guid[Linkage::Scope.index()] =
                    node.linkage_filter(Linkage::Scope).clone();
            }
        }
    }
    q.newest = Some(true);
    q.count = CountRange::optional();
    q.page.size = 1;
    q
}

fn key_columns_match(node: &Constraint, p: &Primitive, columns: &[KeyColumn]) -> bool {
    columns.iter().all(|col| match col {
        KeyColumn::Name => equals_folded(single_string(&node.name), p.name.as_deref()),
        KeyColumn::Value => equals_folded(single_string(&node.value), p.value.as_deref()),
        KeyColumn::Datatype => node.valuetype.is_none_or(|vt| vt == p.datatype),
        KeyColumn::Typeguid => linkage_matches(node, p, Linkage::Typeguid),
        KeyColumn::Left => linkage_matches(node, p, Linkage::Left),
        KeyColumn::Right => linkage_matches(node, p, Linkage::Right),
        KeyColumn::Scope => linkage_matches(node, p, Linkage::Scope),
    })
}

/// Full structural agreement (pointed-annotation test).
fn node_matches_primitive(node: &Constraint, p: &Primitive) -> bool {
    equals_folded(single_string(&node.name), p.name.as_deref())
        && equals_folded(single_string(&node.value), p.value.as_deref())
        && node.valuetype.is_none_or(|vt| vt == p.datatype)
        && Linkage::ALL.into_iter().all(|which| {
            match node.linkage_filter(which).include.as_deref() {
                Some([g]) => p.linkage(which) == Some(*g),
                _ => true,
            }
        })
}

fn linkage_matches(node: &Constraint, p: &Primitive, which: Linkage) -> bool {
    match node.linkage_filter(which).include.as_deref() {
        Some([g]) => p.linkage(which) == Some(*g),
        _ => true,
    }
}

fn equals_folded(a: Option<String>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
        (Some(_), None) => false,
    }
}

fn single_string(cons: &[crate::constraint::StringCons]) -> Option<String> {
    cons.first().and_then(|c| c.pattern.clone())
}

/// First guid found in a result row (depth first).
fn first_guid(value: &Value) -> Option<Guid> {
    match value {
        Value::Guid(g) => Some(*g),
        Value::List(items) => items.iter().find_map(first_guid),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::StringCons;
    use crate::store::MemStore;
    use std::sync::Arc;

    fn engine() -> (WriteEngine, Store) {
        let store: Store = Arc::new(MemStore::new());
        (
            WriteEngine::new(store.clone(), TicketPrinter::new()),
            store,
        )
    }

    #[test]
    fn test_validate_rejects_dateline() {
        let (_, store) = engine();
        let mut con = Constraint::new();
        con.dateline = Some(crate::ident::Dateline::new());
        assert!(matches!(
            validate(&con, &store),
            Err(GraphError::Semantics(_))
        ));
    }

    #[test]
    fn test_validate_rejects_multivalued_name() {
        let (_, store) = engine();
        let mut con = Constraint::new();
        con.name = vec![StringCons::eq("a"), StringCons::eq("b")];
        assert!(validate(&con, &store).is_err());
    }

    #[test]
    fn test_validate_rejects_unresolved_endpoint() {
        let (_, store) = engine();
        let mut con = Constraint::new();
        let ghost = Guid::from_parts(9, 9, 9).unwrap();
        *con.linkage_filter_mut(Linkage::Right) = GuidFilter::only(ghost);
        assert!(validate(&con, &store).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_result_pattern() {
        let (_, store) = engine();
        let mut con = Constraint::new();
        con.result = Some(crate::constraint::ResultPattern {
            per_id: Some(Pattern::Name),
            per_set: None,
        });
        assert!(validate(&con, &store).is_err());
    }

    #[test]
    fn test_outdated_version_target() {
        let (engine, store) = engine();
        // Write v1, then version it to v2.
        let mut con = Constraint::name_value("a", "1");
        let v1 = first_guid(&engine.execute(con.clone()).unwrap()).unwrap();
        con.guid = GuidFilter::only(v1);
        let v2 = first_guid(&engine.execute(con.clone()).unwrap()).unwrap();
        assert!(v1.same_lineage(&v2));
        assert_ne!(store.newest_generation(&v1), Some(v1));

        // Targeting the stale generation is OUTDATED.
        let err = engine.execute(con).unwrap_err();
        assert!(matches!(err, GraphError::Outdated(_)));
    }

    #[test]
    fn test_simple_write_returns_guid_and_contents() {
        let (engine, store) = engine();
        let con = Constraint::name_value("color", "blue");
        let value = engine.execute(con).unwrap();
        let guid = first_guid(&value).unwrap();
        let id = store.id_from_guid(&guid).unwrap();
        let p = store.primitive_read(id).unwrap();
        assert_eq!(p.name.as_deref(), Some("color"));
        assert_eq!(p.value.as_deref(), Some("blue"));
        assert!(p.live);
    }

    #[test]
    fn test_my_child_links_to_parent() {
        let (engine, store) = engine();
        let mut con = Constraint::name_value("person", "ada");
        let mut child = Constraint::name_value("likes", "math");
        child.link = Some(LinkRel::My(Linkage::Left));
        con.children.push(child);

        let value = engine.execute(con).unwrap();
        let parent_guid = first_guid(&value).unwrap();
        let links = store.vip_candidates(
            Linkage::Left,
            &parent_guid,
            None,
            crate::ident::Id::ZERO,
            crate::ident::Id::NONE,
        );
        assert_eq!(links.len(), 1);
        let link = store.primitive_read(links[0]).unwrap();
        assert_eq!(link.name.as_deref(), Some("likes"));
    }

    #[test]
    fn test_iam_child_written_before_parent() {
        let (engine, store) = engine();
        let mut con = Constraint::name_value("edge", "e");
        let mut endpoint = Constraint::name_value("node", "n");
        endpoint.link = Some(LinkRel::IAm(Linkage::Right));
        con.children.push(endpoint);

        let value = engine.execute(con).unwrap();
        let parent_guid = first_guid(&value).unwrap();
        let parent = store
            .primitive_read(store.id_from_guid(&parent_guid).unwrap())
            .unwrap();
        let right = parent.linkage(Linkage::Right).unwrap();
        let node = store
            .primitive_read(store.id_from_guid(&right).unwrap())
            .unwrap();
        assert_eq!(node.name.as_deref(), Some("node"));
        // Endpoint has the lower id: written first.
        assert!(node.id < parent.id);
    }

    #[test]
    fn test_unique_write_twice_exists() {
        let (engine, _) = engine();
        let mut con = Constraint::name_value("tag", "unique-me");
        con.unique = vec![KeyColumn::Name, KeyColumn::Value];
        engine.execute(con.clone()).unwrap();
        let err = engine.execute(con).unwrap_err();
        assert!(matches!(err, GraphError::Exists(_)));
    }

    #[test]
    fn test_key_binds_to_anchor() {
        let (engine, store) = engine();
        let mut con = Constraint::name_value("city", "vienna");
        con.anchor = true;
        con.key = vec![KeyColumn::Name, KeyColumn::Value];
        let first = first_guid(&engine.execute(con.clone()).unwrap()).unwrap();
        let n_after_first = store.primitive_n();

        // The same keyed write binds instead of creating.
        let second = first_guid(&engine.execute(con).unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.primitive_n(), n_after_first);
    }

    #[test]
    fn test_result_prune_literal() {
        let (engine, _) = engine();
        let mut con = Constraint::name_value("a", "1");
        con.result = Some(crate::constraint::ResultPattern {
            per_id: Some(Pattern::List(vec![
                Pattern::Literal("ok".into()),
                Pattern::Guid,
            ])),
            per_set: None,
        });
        let value = engine.execute(con).unwrap();
        let items = value.as_list().unwrap();
        assert_eq!(items[0], Value::Str("ok".into()));
        assert!(matches!(items[1], Value::Guid(_)));
    }

    #[test]
    fn test_rollback_on_injected_fault() {
        let store = Arc::new(MemStore::new());
        let engine = WriteEngine::new(store.clone(), TicketPrinter::new());
        let store_dyn: Store = store.clone();

        // Three-node tree; fail after the second allocation.
        let mut con = Constraint::name_value("root", "r");
        for (n, v) in [("child1", "c1"), ("child2", "c2")] {
            let mut child = Constraint::name_value(n, v);
            child.link = Some(LinkRel::My(Linkage::Left));
            con.children.push(child);
        }
        let before = store_dyn.primitive_n();
        store.fail_after_allocs(2);
        let err = engine.execute(con).unwrap_err();
        assert!(matches!(err, GraphError::Internal(_)));
        assert_eq!(store_dyn.primitive_n(), before);
    }
}
