//! Resource dependency resolution.
//!
//! Every `Type<id>` in a document is a vertex; every `REF(..)` an edge from the
//! referencing resource to its target. Resolution rejects missing targets and
//! cycles, orders resources so targets come before the resources that point
//! at them, and decides which resources are built once per document and which
//! once per row.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{
    has_errors, DataReference, Diagnostic, DiagnosticCode, Document, Payload, ResourceKey, Span,
};

const SOURCE: &str = "graph";

/// Result of resolving a document's resource graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Creation order: every resource after the resources it references.
    pub order: Vec<ResourceKey>,
    /// Resources built once and shared by every row.
    pub shared: BTreeSet<ResourceKey>,
    /// Final classification of every resource, `No` or `Yes`.
    pub classes: BTreeMap<ResourceKey, DataReference>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    /// True when resolution aborted. `order` and `shared` are empty then.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    #[must_use]
    pub fn is_shared(&self, key: &ResourceKey) -> bool {
        self.shared.contains(key)
    }

    fn fatal(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Node {
    key: ResourceKey,
    tag: DataReference,
    span: Span,
    edges: Vec<usize>,
}

#[derive(Debug, Default)]
struct Graph {
    nodes: Vec<Node>,
    index: HashMap<ResourceKey, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DfsState {
    Unvisited,
    InStack,
    Done,
}

impl Graph {
    fn upsert(&mut self, key: ResourceKey, tag: DataReference, span: Span) -> usize {
        if let Some(&i) = self.index.get(&key) {
            let node = &mut self.nodes[i];
            node.tag = node.tag.max(tag);
            return i;
        }
        let i = self.nodes.len();
        self.index.insert(key.clone(), i);
        self.nodes.push(Node {
            key,
            tag,
            span,
            edges: Vec::new(),
        });
        i
    }

    /// First cycle found by depth-first search, as vertex indices with the
    /// starting vertex repeated at the end.
    fn find_cycle(&self) -> Option<Vec<usize>> {
        let mut state = vec![DfsState::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();
        (0..self.nodes.len()).find_map(|start| {
            if state[start] == DfsState::Unvisited {
                self.dfs(start, &mut state, &mut stack)
            } else {
                None
            }
        })
    }

    fn dfs(&self, node: usize, state: &mut [DfsState], stack: &mut Vec<usize>) -> Option<Vec<usize>> {
        state[node] = DfsState::InStack;
        stack.push(node);
        for &next in &self.nodes[node].edges {
            match state[next] {
                DfsState::InStack => {
                    let pos = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = stack[pos..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                DfsState::Unvisited => {
                    if let Some(cycle) = self.dfs(next, state, stack) {
                        return Some(cycle);
                    }
                }
                DfsState::Done => {}
            }
        }
        stack.pop();
        state[node] = DfsState::Done;
        None
    }

    /// Kahn's algorithm over referencer → referenced edges. Ties keep
    /// insertion order. Only called on acyclic graphs.
    fn topological_order(&self) -> Vec<usize> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for node in &self.nodes {
            for &to in &node.edges {
                in_degree[to] += 1;
            }
        }
        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(i) = queue.pop_front() {
            for &to in &self.nodes[i].edges {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    queue.push_back(to);
                }
            }
            sorted.push(i);
        }
        sorted
    }

    /// Whether any vertex reachable from `start` reads row data.
    fn reaches_row_data(&self, start: usize) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            if std::mem::replace(&mut seen[i], true) {
                continue;
            }
            for &next in &self.nodes[i].edges {
                if self.nodes[next].tag == DataReference::Yes {
                    return true;
                }
                stack.push(next);
            }
        }
        false
    }
}

/// Resolve creation order and shared/per-row classification for `doc`.
///
/// Runs once per document. A missing reference target or a cycle yields a
/// single fatal `CODE_GRAPH` diagnostic and an otherwise empty result.
#[must_use]
pub fn resolve_graph(doc: &Document) -> Resolution {
    let resources = doc.resources();
    let mut graph = Graph::default();
    for r in &resources {
        graph.upsert(r.key(), r.data_reference(), r.span);
    }

    for r in &resources {
        let from = graph.index[&r.key()];
        for target in r.references() {
            let Some(&to) = graph.index.get(&target) else {
                let message = format!(
                    "Resource {target} is referenced by {} but it is missing. Was it created in the rules?",
                    r.key()
                );
                return Resolution::fatal(
                    Diagnostic::error(message, doc.range(r.span), SOURCE)
                        .with_code(DiagnosticCode::Graph)
                        .with_payload(Payload::Identifier(target.to_string())),
                );
            };
            if !graph.nodes[from].edges.contains(&to) {
                graph.nodes[from].edges.push(to);
            }
        }
    }

    if let Some(cycle) = graph.find_cycle() {
        let names: Vec<String> = cycle.iter().map(|&i| graph.nodes[i].key.to_string()).collect();
        let first = &graph.nodes[cycle[0]];
        return Resolution::fatal(
            Diagnostic::error(
                format!("Found a cycle in resource references: {}.", names.join(" -> ")),
                doc.range(first.span),
                SOURCE,
            )
            .with_code(DiagnosticCode::Graph),
        );
    }

    let mut order = graph.topological_order();
    order.reverse();

    let mut resolution = Resolution::default();
    for &i in &order {
        let node = &graph.nodes[i];
        let class = match node.tag {
            // A reference-only tag implies at least one edge.
            DataReference::Resource if node.edges.is_empty() => {
                return Resolution::fatal(
                    Diagnostic::error(
                        format!("Resource {} only holds references but references nothing.", node.key),
                        doc.range(node.span),
                        SOURCE,
                    )
                    .with_code(DiagnosticCode::Graph),
                );
            }
            DataReference::Resource if graph.reaches_row_data(i) => DataReference::Yes,
            DataReference::Resource => DataReference::No,
            resolved => resolved,
        };
        if class == DataReference::No {
            resolution.shared.insert(node.key.clone());
        }
        resolution.classes.insert(node.key.clone(), class);
        resolution.order.push(node.key.clone());
    }

    tracing::debug!(
        resources = resolution.order.len(),
        shared = resolution.shared.len(),
        "resolved resource graph"
    );
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_strict;

    fn resolve(src: &str) -> Resolution {
        resolve_graph(&parse_strict(src).unwrap())
    }

    fn key(t: &str, id: &str) -> ResourceKey {
        ResourceKey::new(t, id)
    }

    fn position(r: &Resolution, k: &ResourceKey) -> usize {
        r.order.iter().position(|o| o == k).unwrap()
    }

    #[test]
    fn two_resource_cycle_is_fatal() {
        let r = resolve(
            "TRUE { Observation<a>: * hasMember = REF(Observation<b>) }
             TRUE { Observation<b>: * hasMember = REF(Observation<a>) }",
        );
        assert!(r.is_fatal());
        assert!(r.order.is_empty());
        assert!(r.shared.is_empty());
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].code, Some(DiagnosticCode::Graph));
        assert!(r.diagnostics[0]
            .message
            .contains("Observation<a> -> Observation<b> -> Observation<a>"));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let r = resolve("TRUE { Observation<a>: * hasMember = REF(Observation<a>) }");
        assert!(r.is_fatal());
    }

    #[test]
    fn missing_reference_is_fatal() {
        let r = resolve("TRUE { Condition<c>: * evidence = REF(Observation<o2>) }");
        assert!(r.is_fatal());
        assert!(r.order.is_empty());
        assert!(r.diagnostics[0].message.contains("Observation<o2>"));
        assert!(r.diagnostics[0].message.contains("missing"));
        assert_eq!(r.diagnostics[0].payload, Some(Payload::Identifier("Observation<o2>".into())));
    }

    #[test]
    fn classification() {
        let r = resolve(
            "TRUE { Patient<p>: * gender = CODE_LITERAL(male) }
             TRUE { Observation<o>: * code = CONCEPT(dx_1) }
             TRUE { ValueSet<vs>: * compose = REF(Observation<o>) }",
        );
        assert!(!r.is_fatal());
        assert!(r.is_shared(&key("Patient", "p")));
        assert_eq!(r.classes[&key("Observation", "o")], DataReference::Yes);
        assert_eq!(r.classes[&key("ValueSet", "vs")], DataReference::Yes);
        assert_eq!(r.shared.len(), 1);
    }

    #[test]
    fn reference_to_shared_only_is_shared() {
        let r = resolve(
            "TRUE { Organization<org>: * name = 'CSIRO' }
             TRUE { Practitioner<pr>: * organization = REF(Organization<org>) }",
        );
        assert!(r.is_shared(&key("Practitioner", "pr")));
    }

    #[test]
    fn transitive_reach_through_reference_only_resources() {
        let r = resolve(
            "TRUE { Patient<p>: * birthDate = VALUE(dob) }
             TRUE { Encounter<e>: * subject = REF(Patient<p>) }
             TRUE { Observation<o>: * encounter = REF(Encounter<e>) }",
        );
        assert!(r.shared.is_empty());
        assert_eq!(r.classes[&key("Observation", "o")], DataReference::Yes);
    }

    #[test]
    fn tags_merge_upwards_across_statements() {
        let r = resolve(
            "TRUE { Patient<p>: * gender = CODE_LITERAL(male) }
             NOTNULL(dob) { Patient<p>: * birthDate = VALUE(dob) }
             TRUE { Patient<p>: * active = TRUE }",
        );
        assert!(!r.is_shared(&key("Patient", "p")));
        assert_eq!(r.order.len(), 1);
    }

    #[test]
    fn referenced_resources_come_first() {
        let r = resolve(
            "TRUE { Observation<o>: * subject = REF(Patient<p>) * encounter = REF(Encounter<e>) }
             TRUE { Encounter<e>: * subject = REF(Patient<p>) }
             TRUE { Patient<p>: * birthDate = VALUE(dob) }",
        );
        let p = position(&r, &key("Patient", "p"));
        let e = position(&r, &key("Encounter", "e"));
        let o = position(&r, &key("Observation", "o"));
        assert!(p < e && e < o, "{:?}", r.order);
    }

    #[test]
    fn resolution_is_idempotent() {
        let doc = parse_strict(
            "TRUE { Observation<o>: * subject = REF(Patient<p>) }
             TRUE { Patient<p>: * gender = CODE_LITERAL(female) }
             TRUE { Condition<c>: * code = CONCEPT(dx) }",
        )
        .unwrap();
        assert_eq!(resolve_graph(&doc), resolve_graph(&doc));
    }

    #[test]
    fn else_branch_resources_are_vertices() {
        let r = resolve("NOTNULL(x) { Patient<a>: * active = TRUE } ELSE { Patient<b>: * active = FALSE }");
        assert_eq!(r.order.len(), 2);
        assert_eq!(r.shared.len(), 2);
    }
}
