//! Wiring several pipes into one forest of forked pipes.

use crate::errors::ExtractError;
use crate::pipe::{clone_pipes, ForkRoute, Pipe};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

enum PlannedRoute<T> {
    Child(Arc<Pipe<T>>),
    Parent,
}

impl<T> PlannedRoute<T> {
    fn same_target(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Child(a), Self::Child(b)) => a.id() == b.id(),
            (Self::Parent, Self::Parent) => true,
            _ => false,
        }
    }
}

/// Fork routes to add to each parent, plus the roots feeding the forest.
///
/// Built from clones of the requested pipes, then materialized bottom-up
/// into fresh pipes so shared originals and clones are never mutated.
pub(crate) struct ForkPlan<T> {
    routes: HashMap<Uuid, Vec<PlannedRoute<T>>>,
    roots: Vec<Arc<Pipe<T>>>,
    copy_on_fork: bool,
}

impl<T> ForkPlan<T> {
    /// Plans forks for `pipes`, walked from the last pipe to the first.
    ///
    /// Every parent forks to each of its dependent children. When
    /// `yield_parents` is set and a parent is itself requested, it also
    /// finishes its items as its own output.
    pub fn build(pipes: &[Arc<Pipe<T>>], yield_parents: bool, copy_on_fork: bool) -> Result<Self, ExtractError> {
        let (cloned, _) = clone_pipes(pipes);
        let requested: HashSet<Uuid> = cloned.iter().map(|p| p.id()).collect();

        let mut plan = Self {
            routes: HashMap::new(),
            roots: Vec::new(),
            copy_on_fork,
        };
        for pipe in cloned.iter().rev() {
            let mut current = Arc::clone(pipe);
            while let Some(parent) = current.parent().cloned() {
                if current.steps().is_empty() {
                    return Err(ExtractError::create_pipe(
                        current.name(),
                        "dependent pipe has no stage to consume its parent's data",
                    ));
                }
                plan.add_route(parent.id(), PlannedRoute::Child(Arc::clone(&current)));
                if yield_parents && requested.contains(&parent.id()) {
                    plan.add_route(parent.id(), PlannedRoute::Parent);
                }
                current = parent;
            }
            if !plan.roots.iter().any(|root| root.id() == current.id()) {
                plan.roots.push(current);
            }
        }
        Ok(plan)
    }

    fn add_route(&mut self, parent: Uuid, route: PlannedRoute<T>) {
        let routes = self.routes.entry(parent).or_default();
        if !routes.iter().any(|r| r.same_target(&route)) {
            routes.push(route);
        }
    }

    /// Materializes the plan and returns the roots in registration order.
    pub fn into_roots(self) -> Vec<Arc<Pipe<T>>> {
        let mut memo = HashMap::new();
        self.roots
            .iter()
            .map(|root| self.materialize(root, &mut memo))
            .collect()
    }

    fn materialize(&self, pipe: &Arc<Pipe<T>>, memo: &mut HashMap<Uuid, Arc<Pipe<T>>>) -> Arc<Pipe<T>> {
        if let Some(done) = memo.get(&pipe.id()) {
            return Arc::clone(done);
        }
        // Items reach a materialized child through its parent's fork step.
        let mut fresh = Pipe::from_parts(pipe.name().to_string(), pipe.head.clone(), pipe.steps().to_vec(), None);
        for route in self.routes.get(&pipe.id()).into_iter().flatten() {
            let route = match route {
                PlannedRoute::Child(child) => ForkRoute::Pipe {
                    pipe: self.materialize(child, memo),
                    step: 0,
                },
                PlannedRoute::Parent => ForkRoute::Parent,
            };
            fresh.add_fork_route(route, self.copy_on_fork);
        }
        let fresh = Arc::new(fresh);
        memo.insert(pipe.id(), Arc::clone(&fresh));
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{Stage, Step};

    fn routes(pipe: &Pipe<i64>) -> Vec<String> {
        match pipe.steps().last() {
            Some(Step::Fork(fork)) => fork
                .routes()
                .iter()
                .map(|route| match route {
                    ForkRoute::Pipe { pipe, step } => format!("{}@{step}", pipe.name()),
                    ForkRoute::Parent => "self".to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_parent_forks_to_children_and_itself() {
        let users = Arc::new(Pipe::from_iter("users", vec![1_i64, 2]));
        let posts = Arc::new(Pipe::transformer("posts", Arc::clone(&users), Stage::map("posts", |x| x * 10)));
        let likes = Arc::new(Pipe::transformer("likes", Arc::clone(&users), Stage::map("likes", |x| x * 100)));

        let plan = ForkPlan::build(&[Arc::clone(&users), posts, likes], true, false).unwrap();
        let roots = plan.into_roots();

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name(), "users");
        assert_eq!(routes(&roots[0]), vec!["likes@0", "self", "posts@0"]);
        assert_eq!(users.len(), 0);
    }

    #[test]
    fn test_unrequested_parent_does_not_yield() {
        let users = Arc::new(Pipe::from_iter("users", vec![1_i64]));
        let posts = Arc::new(Pipe::transformer("posts", users, Stage::map("posts", |x| x)));

        let roots = ForkPlan::build(&[posts], true, false).unwrap().into_roots();
        assert_eq!(routes(&roots[0]), vec!["posts@0"]);
    }

    #[test]
    fn test_yield_parents_disabled() {
        let users = Arc::new(Pipe::from_iter("users", vec![1_i64]));
        let posts = Arc::new(Pipe::transformer("posts", Arc::clone(&users), Stage::map("posts", |x| x)));

        let roots = ForkPlan::build(&[users, posts], false, false).unwrap().into_roots();
        assert_eq!(routes(&roots[0]), vec!["posts@0"]);
    }

    #[test]
    fn test_roots_registered_once_in_reverse_order() {
        let a = Arc::new(Pipe::from_iter("a", vec![1_i64]));
        let b = Arc::new(Pipe::from_iter("b", vec![2_i64]));
        let child = Arc::new(Pipe::transformer("child", Arc::clone(&a), Stage::map("child", |x| x)));

        let roots = ForkPlan::build(&[Arc::clone(&a), b, child], true, false).unwrap().into_roots();
        let names: Vec<_> = roots.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_grandchildren_are_chained() {
        let root = Arc::new(Pipe::from_iter("root", vec![1_i64]));
        let mid = Arc::new(Pipe::transformer("mid", Arc::clone(&root), Stage::map("mid", |x| x)));
        let leaf = Arc::new(Pipe::transformer("leaf", Arc::clone(&mid), Stage::map("leaf", |x| x)));

        let roots = ForkPlan::build(&[leaf], true, false).unwrap().into_roots();
        assert_eq!(routes(&roots[0]), vec!["mid@0"]);
        let Some(Step::Fork(fork)) = roots[0].steps().last() else {
            panic!("expected a fork step");
        };
        let ForkRoute::Pipe { pipe: mid, .. } = &fork.routes()[0] else {
            panic!("expected a pipe route");
        };
        assert_eq!(routes(mid), vec!["leaf@0"]);
        assert_eq!(mid.step_names(), vec!["mid", "fork"]);
    }
}
