use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};

use crate::api::JobTask;
use crate::error::{OperatorError, Result};

/// Directed graph over job names.
///
/// Adjacency is kept in insertion order so traversals are deterministic.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: IndexSet<String>,
    edges_to: IndexMap<String, Vec<String>>,
    edges_from: IndexMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str) {
        self.nodes.insert(name.to_string());
    }

    /// Registers `from -> to` and both endpoints.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.edges_to
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
        self.edges_from
            .entry(to.to_string())
            .or_default()
            .push(from.to_string());
        self.nodes.insert(from.to_string());
        self.nodes.insert(to.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct predecessors of `target`, in edge insertion order.
    pub fn parents(&self, target: &str) -> &[String] {
        self.edges_from.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_cyclic(&self) -> bool {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.nodes.len());
        self.nodes
            .iter()
            .any(|node| !marks.contains_key(node.as_str()) && self.visit(node, &mut marks))
    }

    /// DFS from `node`; true when a back edge to a node on the stack is found.
    fn visit<'a>(&'a self, node: &'a str, marks: &mut HashMap<&'a str, Mark>) -> bool {
        marks.insert(node, Mark::OnStack);

        for next in self.edges_to.get(node).into_iter().flatten() {
            match marks.get(next.as_str()) {
                Some(Mark::OnStack) => return true,
                Some(Mark::Done) => continue,
                None => {
                    if self.visit(next, marks) {
                        return true;
                    }
                }
            }
        }

        marks.insert(node, Mark::Done);
        false
    }

    /// All transitive predecessors of `target`, without duplicates.
    ///
    /// Each direct parent is followed by its own ancestors before the next
    /// parent is visited.
    pub fn get_pres(&self, target: &str) -> Vec<String> {
        let mut pres = Vec::new();
        let mut seen = HashSet::new();
        self.collect_pres(target, &mut pres, &mut seen);
        pres
    }

    fn collect_pres<'a>(
        &'a self,
        target: &str,
        pres: &mut Vec<String>,
        seen: &mut HashSet<&'a str>,
    ) {
        for parent in self.parents(target) {
            if seen.insert(parent.as_str()) {
                pres.push(parent.clone());
                self.collect_pres(parent, pres, seen);
            }
        }
    }
}

/// Builds the dependency graph of `tasks` from their `after` lists.
///
/// # Errors
///
/// Fails on a duplicated task name, an `after` entry that names no task, or
/// a cycle. No partial graph is returned.
pub fn job_graph(tasks: &[JobTask]) -> Result<Graph> {
    let mut graph = Graph::new();

    for task in tasks {
        if graph.contains(&task.name) {
            return Err(OperatorError::DuplicateJobName(task.name.clone()));
        }
        graph.add_node(&task.name);
    }

    for task in tasks {
        for after in &task.after {
            if !graph.contains(after) {
                return Err(OperatorError::UnknownJobReference {
                    job: task.name.clone(),
                    after: after.clone(),
                });
            }
            graph.add_edge(after, &task.name);
        }
    }

    if graph.is_cyclic() {
        return Err(OperatorError::CyclicJobGraph);
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, after: &[&str]) -> JobTask {
        JobTask {
            name: name.to_string(),
            after: after.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn diamond() -> Graph {
        let mut g = Graph::new();
        g.add_edge("A", "B");
        g.add_edge("A", "C");
        g.add_edge("B", "D");
        g.add_edge("C", "D");
        g
    }

    mod is_cyclic {
        use super::*;

        #[test]
        fn detects_two_node_cycle() {
            let mut g = Graph::new();
            g.add_edge("A", "B");
            g.add_edge("B", "A");

            assert!(g.is_cyclic());
        }

        #[test]
        fn detects_self_loop() {
            let mut g = Graph::new();
            g.add_edge("A", "A");

            assert!(g.is_cyclic());
        }

        #[test]
        fn diamond_is_acyclic() {
            assert!(!diamond().is_cyclic());
        }

        #[test]
        fn detects_cycle_reached_from_later_root() {
            let mut g = Graph::new();
            g.add_edge("X", "Y");
            g.add_edge("P", "Q");
            g.add_edge("Q", "R");
            g.add_edge("R", "P");

            assert!(g.is_cyclic());
        }
    }

    mod get_pres {
        use super::*;

        #[test]
        fn lists_parents_then_their_ancestors() {
            assert_eq!(diamond().get_pres("D"), vec!["B", "A", "C"]);
        }

        #[test]
        fn root_has_no_predecessors() {
            assert!(diamond().get_pres("A").is_empty());
        }

        #[test]
        fn unknown_node_has_no_predecessors() {
            assert!(diamond().get_pres("Z").is_empty());
        }

        #[test]
        fn terminates_on_cycles() {
            let mut g = Graph::new();
            g.add_edge("A", "B");
            g.add_edge("B", "A");

            assert_eq!(g.get_pres("A"), vec!["B", "A"]);
        }
    }

    mod job_graph {
        use super::*;

        #[test]
        fn builds_graph_from_after_lists() {
            let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["a", "b"])];

            let g = job_graph(&tasks).unwrap();

            assert_eq!(g.len(), 3);
            assert_eq!(g.get_pres("c"), vec!["a", "b"]);
        }

        #[test]
        fn reports_cycle() {
            let tasks = vec![task("a", &["b"]), task("b", &["a"])];

            let err = job_graph(&tasks).unwrap_err();

            assert_eq!(err.to_string(), "job graph is cyclic");
        }

        #[test]
        fn reports_unknown_reference() {
            let tasks = vec![task("a", &["ghost"])];

            let err = job_graph(&tasks).unwrap_err();

            assert!(matches!(
                err,
                OperatorError::UnknownJobReference { ref job, ref after } if job == "a" && after == "ghost"
            ));
        }

        #[test]
        fn reports_duplicate_name() {
            let tasks = vec![task("a", &[]), task("a", &[])];

            assert!(matches!(
                job_graph(&tasks),
                Err(OperatorError::DuplicateJobName(name)) if name == "a"
            ));
        }

        #[test]
        fn keeps_isolated_tasks() {
            let tasks = vec![task("lint", &[]), task("build", &[])];

            let g = job_graph(&tasks).unwrap();

            assert!(g.contains("lint"));
            assert!(g.contains("build"));
            assert!(!g.is_cyclic());
        }
    }
}
