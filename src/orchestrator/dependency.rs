//! Static requirement graph between views
//!
//! Built once from configuration. `requirements_of(V)` keeps the configured
//! order; `dependents_of(P)` is the inverse, in registration order.

use std::collections::{HashMap, HashSet, VecDeque};

/// Directed `view -> requirement` edges plus their inverse
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    requires: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `view` requires each of `requirements`, in order.
    ///
    /// Duplicate requirements are ignored.
    pub fn add_requirements<I, S>(&mut self, view: &str, requirements: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for requirement in requirements {
            let requirement = requirement.into();
            let reqs = self.requires.entry(view.to_string()).or_default();
            if reqs.contains(&requirement) {
                continue;
            }
            reqs.push(requirement.clone());
            self.dependents
                .entry(requirement)
                .or_default()
                .push(view.to_string());
        }
    }

    /// Requirements of `view`, in configured order
    pub fn requirements_of(&self, view: &str) -> &[String] {
        self.requires.get(view).map_or(&[], Vec::as_slice)
    }

    /// Views that directly require `view`
    pub fn dependents_of(&self, view: &str) -> &[String] {
        self.dependents.get(view).map_or(&[], Vec::as_slice)
    }

    /// Every view that requires `view` directly or through other views
    pub fn transitive_dependents(&self, view: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::from([view]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(current) {
                if dependent != view && seen.insert(dependent.as_str()) {
                    out.push(dependent.clone());
                    queue.push_back(dependent.as_str());
                }
            }
        }
        out
    }

    /// All `(view, requirements)` pairs, sorted by view name
    pub fn edges(&self) -> Vec<(&str, &[String])> {
        let mut edges: Vec<_> = self
            .requires
            .iter()
            .map(|(v, r)| (v.as_str(), r.as_slice()))
            .collect();
        edges.sort_by_key(|(v, _)| *v);
        edges
    }

    /// Find a requirement cycle, returned as the path that closes it
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut views: Vec<&str> = self.requires.keys().map(String::as_str).collect();
        views.sort_unstable();

        for root in views {
            if marks.contains_key(root) {
                continue;
            }

            // (view, index of the next requirement to visit)
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
            marks.insert(root, Mark::Visiting);

            while let Some((view, next)) = stack.last_mut() {
                let reqs = self.requirements_of(view);
                if *next >= reqs.len() {
                    marks.insert(*view, Mark::Done);
                    stack.pop();
                    continue;
                }
                let req = reqs[*next].as_str();
                *next += 1;

                match marks.get(req) {
                    Some(Mark::Visiting) => {
                        let start = stack.iter().position(|(v, _)| *v == req).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|(v, _)| v.to_string()).collect();
                        cycle.push(req.to_string());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(req, Mark::Visiting);
                        stack.push((req, 0));
                    }
                }
            }
        }
        None
    }
}
