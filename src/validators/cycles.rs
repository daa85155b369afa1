//! Circular dependency detection over the relative-import graph of the
//! project as it would look after the change set.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeSet, VecDeque};

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::core::plan::normalize_plan_path;
use crate::validators::imports::{relative_imports, FileUniverse};
use crate::validators::{Stage, Validator, ValidatorArtifact, ValidatorOutput};

pub type Graph = FxHashMap<String, Vec<String>>;

/// Edges from every known script file (changed content wins over existing).
pub fn import_graph(ctx: &ValidatorContext) -> Graph {
    let universe = FileUniverse::new(ctx);
    let mut sources: FxHashMap<String, &str> = FxHashMap::default();
    for (path, content) in &ctx.existing_files {
        sources.insert(normalize_plan_path(path), content.as_str());
    }
    for change in &ctx.changes {
        let path = normalize_plan_path(&change.path);
        if change.is_delete() {
            sources.remove(&path);
        } else {
            sources.insert(path, change.content.as_str());
        }
    }

    let mut graph = Graph::default();
    for (path, content) in sources {
        let mut targets: Vec<String> = relative_imports(&path, content)
            .into_iter()
            .filter_map(|i| universe.resolve(&path, &i.specifier))
            .collect();
        targets.sort();
        targets.dedup();
        graph.insert(path, targets);
    }
    graph
}

struct Tarjan<'g> {
    graph: &'g Graph,
    index: usize,
    indices: FxHashMap<&'g str, usize>,
    lowlink: FxHashMap<&'g str, usize>,
    stack: Vec<&'g str>,
    on_stack: FxHashSet<&'g str>,
    components: Vec<Vec<String>>,
}

impl<'g> Tarjan<'g> {
    fn visit(&mut self, node: &'g str) {
        self.indices.insert(node, self.index);
        self.lowlink.insert(node, self.index);
        self.index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let graph = self.graph;
        if let Some(targets) = graph.get(node) {
            for target in targets {
                let target = target.as_str();
                if !self.indices.contains_key(target) {
                    self.visit(target);
                    let low = self.lowlink[target].min(self.lowlink[node]);
                    self.lowlink.insert(node, low);
                } else if self.on_stack.contains(target) {
                    let low = self.indices[target].min(self.lowlink[node]);
                    self.lowlink.insert(node, low);
                }
            }
        }

        if self.lowlink[node] == self.indices[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member.to_string());
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

/// Strongly connected components that form a cycle (size > 1 or self-loop).
pub fn cyclic_components(graph: &Graph) -> Vec<BTreeSet<String>> {
    let mut tarjan = Tarjan {
        graph,
        index: 0,
        indices: FxHashMap::default(),
        lowlink: FxHashMap::default(),
        stack: Vec::new(),
        on_stack: FxHashSet::default(),
        components: Vec::new(),
    };
    let mut nodes: Vec<&str> = graph.keys().map(String::as_str).collect();
    nodes.sort();
    for node in nodes {
        if !tarjan.indices.contains_key(node) {
            tarjan.visit(node);
        }
    }
    tarjan
        .components
        .into_iter()
        .filter(|c| {
            c.len() > 1
                || graph
                    .get(&c[0])
                    .is_some_and(|targets| targets.contains(&c[0]))
        })
        .map(|c| c.into_iter().collect())
        .collect()
}

/// Shortest path `start → … → start` inside one component.
pub fn cycle_through(graph: &Graph, component: &BTreeSet<String>, start: &str) -> Vec<String> {
    let mut parent: FxHashMap<&str, &str> = FxHashMap::default();
    let mut queue = VecDeque::new();
    queue.push_back(start);
    while let Some(node) = queue.pop_front() {
        for target in graph.get(node).into_iter().flatten() {
            if !component.contains(target) {
                continue;
            }
            if target == start {
                let mut back = Vec::new();
                let mut cursor = node;
                while cursor != start {
                    back.push(cursor.to_string());
                    cursor = parent[cursor];
                }
                let mut path = vec![start.to_string()];
                path.extend(back.into_iter().rev());
                path.push(start.to_string());
                return path;
            }
            if !parent.contains_key(target.as_str()) {
                parent.insert(target.as_str(), node);
                queue.push_back(target.as_str());
            }
        }
    }
    Vec::new()
}

pub struct CircularDependency;

impl Validator for CircularDependency {
    fn id(&self) -> &'static str {
        "circular-dependency"
    }

    fn stage(&self) -> Stage {
        Stage::Integrity
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let graph = import_graph(ctx);
        let changed: BTreeSet<String> = ctx
            .live_changes()
            .map(|c| normalize_plan_path(&c.path))
            .collect();

        let mut issues = Vec::new();
        let mut cycles = Vec::new();
        for component in cyclic_components(&graph) {
            let Some(start) = component.iter().find(|p| changed.contains(*p)) else {
                continue;
            };
            let cycle = cycle_through(&graph, &component, start);
            if cycle.is_empty() {
                continue;
            }
            issues.push(
                ValidationIssue::warning(
                    start,
                    format!("Circular dependency: {}", cycle.join(" -> ")),
                )
                .with_code("CIRCULAR_DEPENDENCY")
                .with_suggestion("Move the shared code into a module both can import"),
            );
            cycles.push(cycle);
        }
        Ok(ValidatorOutput::with_artifact(
            issues,
            ValidatorArtifact::DependencyCycles { cycles },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::{ChangeOperation, FileChange};

    #[test]
    fn reports_cycle_through_changed_file() {
        let ctx = ValidatorContext::new(vec![FileChange::new(
            "src/a.ts",
            ChangeOperation::Update,
            "import { b } from './b';\nexport const a = 1;\n",
        )])
        .with_existing("src/b.ts", "import { c } from './c';\nexport const b = 2;\n")
        .with_existing("src/c.ts", "import { a } from './a';\nexport const c = 3;\n")
        .with_existing("src/a.ts", "export const a = 1;\n")
        .with_existing("src/d.ts", "import { a } from './a';\n");

        let out = CircularDependency.validate(&ctx).unwrap();
        assert_eq!(out.issues.len(), 1);
        assert_eq!(
            out.issues[0].message,
            "Circular dependency: src/a.ts -> src/b.ts -> src/c.ts -> src/a.ts"
        );
        match out.artifact {
            Some(ValidatorArtifact::DependencyCycles { cycles }) => assert_eq!(cycles.len(), 1),
            other => panic!("unexpected artifact {other:?}"),
        }
    }

    #[test]
    fn cycles_between_untouched_files_are_ignored() {
        let ctx = ValidatorContext::new(vec![FileChange::new("src/z.ts", ChangeOperation::Create, "export const z = 0;\n")])
            .with_existing("src/x.ts", "import './y';\n")
            .with_existing("src/y.ts", "import './x';\n");
        let graph = import_graph(&ctx);
        assert_eq!(cyclic_components(&graph).len(), 1);
        assert!(CircularDependency.validate(&ctx).unwrap().issues.is_empty());
    }

    #[test]
    fn self_import_is_a_cycle() {
        let mut graph = Graph::default();
        graph.insert("a.ts".to_string(), vec!["a.ts".to_string()]);
        let components = cyclic_components(&graph);
        assert_eq!(components.len(), 1);
        assert_eq!(cycle_through(&graph, &components[0], "a.ts"), vec!["a.ts", "a.ts"]);
    }
}
