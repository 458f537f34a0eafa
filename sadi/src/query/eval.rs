//! Backtracking evaluation of basic graph patterns.

use super::{PatternTerm, Projection, SelectQuery, TriplePattern};
use crate::graph::{Graph, Term};
use std::collections::BTreeMap;
use std::ops::ControlFlow;

/// Variable bindings for one result row.
pub type Solution = BTreeMap<String, Term>;

impl SelectQuery {
    /// Visit every solution of the WHERE pattern. Returning
    /// `ControlFlow::Break` from `visit` stops the search.
    pub fn for_each_solution<F>(&self, graph: &Graph, visit: F) -> ControlFlow<()>
    where
        F: FnMut(&Solution) -> ControlFlow<()>,
    {
        self.for_each_solution_from(graph, Solution::new(), visit)
    }

    /// Like [`for_each_solution`](Self::for_each_solution), starting from a
    /// set of pre-bound variables.
    pub fn for_each_solution_from<F>(
        &self,
        graph: &Graph,
        initial: Solution,
        mut visit: F,
    ) -> ControlFlow<()>
    where
        F: FnMut(&Solution) -> ControlFlow<()>,
    {
        let mut remaining: Vec<&TriplePattern> = self.pattern.iter().collect();
        let mut bindings = initial;
        solve(&mut remaining, graph, &mut bindings, &mut visit)
    }

    /// True if some solution binds `var` to `value`.
    pub fn has_solution_with(&self, graph: &Graph, var: &str, value: &Term) -> bool {
        let mut initial = Solution::new();
        initial.insert(var.to_string(), value.clone());
        self.for_each_solution_from(graph, initial, |_| ControlFlow::Break(()))
            .is_break()
    }

    /// Collect projected rows. Query blank nodes never appear in the output.
    pub fn execute(&self, graph: &Graph) -> Vec<Solution> {
        let mut rows: Vec<Solution> = Vec::new();
        let _ = self.for_each_solution(graph, |bindings| {
            let row: Solution = bindings
                .iter()
                .filter(|(name, _)| match &self.projection {
                    Projection::All => !name.starts_with("_:"),
                    Projection::Vars(vars) => vars.iter().any(|v| v == *name),
                })
                .map(|(name, term)| (name.clone(), term.clone()))
                .collect();
            if !self.distinct || !rows.contains(&row) {
                rows.push(row);
            }
            ControlFlow::Continue(())
        });
        rows
    }
}

fn solve<'q, F>(
    remaining: &mut Vec<&'q TriplePattern>,
    graph: &Graph,
    bindings: &mut Solution,
    visit: &mut F,
) -> ControlFlow<()>
where
    F: FnMut(&Solution) -> ControlFlow<()>,
{
    if remaining.is_empty() {
        return visit(bindings);
    }
    let next = most_selective(remaining, bindings);
    let pattern = remaining.swap_remove(next);
    let flow = match_pattern(pattern, remaining, graph, bindings, visit);
    remaining.push(pattern);
    flow
}

fn match_pattern<'q, F>(
    pattern: &'q TriplePattern,
    remaining: &mut Vec<&'q TriplePattern>,
    graph: &Graph,
    bindings: &mut Solution,
    visit: &mut F,
) -> ControlFlow<()>
where
    F: FnMut(&Solution) -> ControlFlow<()>,
{
    let subject = resolve(&pattern.subject, bindings);
    let predicate = resolve(&pattern.predicate, bindings);
    let object = resolve(&pattern.object, bindings);

    for triple in graph.matching(subject.as_ref(), predicate.as_ref(), object.as_ref()) {
        let mut fresh = Vec::new();
        let unified = bind(&pattern.subject, &triple.subject, bindings, &mut fresh)
            && bind(&pattern.predicate, &triple.predicate, bindings, &mut fresh)
            && bind(&pattern.object, &triple.object, bindings, &mut fresh);
        let flow = if unified {
            solve(remaining, graph, bindings, visit)
        } else {
            ControlFlow::Continue(())
        };
        for name in fresh {
            bindings.remove(&name);
        }
        if flow.is_break() {
            return flow;
        }
    }
    ControlFlow::Continue(())
}

fn resolve(term: &PatternTerm, bindings: &Solution) -> Option<Term> {
    match term {
        PatternTerm::Const(t) => Some(t.clone()),
        PatternTerm::Var(name) => bindings.get(name).cloned(),
    }
}

/// Unify one position. A variable repeated inside the same pattern
/// (`?x ?p ?x`) is checked against the binding made earlier in the triple.
fn bind(term: &PatternTerm, value: &Term, bindings: &mut Solution, fresh: &mut Vec<String>) -> bool {
    match term {
        PatternTerm::Const(t) => t == value,
        PatternTerm::Var(name) => match bindings.get(name) {
            Some(bound) => bound == value,
            None => {
                bindings.insert(name.clone(), value.clone());
                fresh.push(name.clone());
                true
            }
        },
    }
}

/// Prefer patterns whose subject is known (indexed), then those with more
/// bound positions.
fn most_selective(patterns: &[&TriplePattern], bindings: &Solution) -> usize {
    let score = |term: &PatternTerm, weight: u8| match term {
        PatternTerm::Const(_) => weight,
        PatternTerm::Var(name) if bindings.contains_key(name) => weight,
        PatternTerm::Var(_) => 0,
    };
    let mut best = 0;
    let mut best_score = 0;
    for (index, pattern) in patterns.iter().enumerate() {
        let total = score(&pattern.subject, 4) + score(&pattern.object, 2) + score(&pattern.predicate, 1);
        if total > best_score {
            best = index;
            best_score = total;
        }
    }
    best
}
