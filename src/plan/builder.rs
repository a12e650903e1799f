//! Accumulates named resources and their dependency edges.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::error::BuildError;

use super::graph::{Plan, PlanNode};
use super::resource::Resource;

/// Dependency edge option for [`PlanBuilder::add_resource`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependOn(Vec<String>);

impl DependOn {
    /// Depends on every named resource.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

/// Shorthand for [`DependOn::new`].
pub fn depend_on<I, S>(names: I) -> DependOn
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    DependOn::new(names)
}

/// A registered resource waiting for the plan to be finalized.
#[derive(Debug)]
struct Entry {
    name: String,
    resource: Arc<dyn Resource>,
    depends_on: Vec<String>,
}

/// Builder for a [`Plan`].
///
/// Registration never fails on its own; the first problem found
/// (duplicate name, unknown dependency, cycle) is returned by
/// [`PlanBuilder::plan`], so a malformed plan can never be executed.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    errors: Vec<BuildError>,
}

impl PlanBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `resource` under `name`.
    pub fn add_resource<R, O>(
        &mut self,
        name: impl Into<String>,
        resource: R,
        options: O,
    ) -> &mut Self
    where
        R: Resource + 'static,
        O: IntoIterator<Item = DependOn>,
    {
        self.add_shared(name, Arc::new(resource), options)
    }

    /// Registers an already shared resource under `name`.
    pub fn add_shared<O>(
        &mut self,
        name: impl Into<String>,
        resource: Arc<dyn Resource>,
        options: O,
    ) -> &mut Self
    where
        O: IntoIterator<Item = DependOn>,
    {
        let name = name.into();

        if self.index.contains_key(&name) {
            self.errors.push(BuildError::DuplicateResource { name });
            return self;
        }

        let mut depends_on: Vec<String> = Vec::new();
        for DependOn(names) in options {
            for dep in names {
                if !depends_on.contains(&dep) {
                    depends_on.push(dep);
                }
            }
        }

        debug!(resource = %name, kind = resource.kind(), ?depends_on, "adding resource");
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(Entry {
            name,
            resource,
            depends_on,
        });
        self
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates the graph and returns the plan in topological order.
    ///
    /// Ready resources are emitted in registration order, so the same
    /// builder calls always yield the same plan.
    ///
    /// # Errors
    ///
    /// Returns the first duplicate registration, then any dependency on an
    /// unregistered name, then a cycle.
    pub fn plan(self) -> Result<Plan, BuildError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        let count = self.entries.len();
        let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(count);
        for entry in &self.entries {
            let mut resolved = Vec::with_capacity(entry.depends_on.len());
            for dep in &entry.depends_on {
                let Some(&idx) = self.index.get(dep) else {
                    return Err(BuildError::UnknownDependency {
                        resource: entry.name.clone(),
                        dependency: dep.clone(),
                    });
                };
                resolved.push(idx);
            }
            dependencies.push(resolved);
        }

        let mut waiting: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (idx, deps) in dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(idx);
            }
        }

        let mut ready: BTreeSet<usize> = waiting
            .iter()
            .enumerate()
            .filter(|(_, w)| **w == 0)
            .map(|(idx, _)| idx)
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                waiting[dependent] -= 1;
                if waiting[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let resources = (0..count)
                .filter(|&idx| waiting[idx] > 0)
                .map(|idx| self.entries[idx].name.clone())
                .collect();
            return Err(BuildError::Cycle { resources });
        }

        let mut position = vec![0; count];
        for (pos, &idx) in order.iter().enumerate() {
            position[idx] = pos;
        }

        let mut slots: Vec<Option<Entry>> = self.entries.into_iter().map(Some).collect();
        let nodes = order
            .iter()
            .filter_map(|&idx| {
                slots[idx].take().map(|entry| {
                    let mut positions: Vec<usize> =
                        dependencies[idx].iter().map(|&dep| position[dep]).collect();
                    positions.sort_unstable();
                    PlanNode::new(entry.name, entry.resource, entry.depends_on, positions)
                })
            })
            .collect();

        Ok(Plan::from_nodes(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Run;

    fn names(plan: &Plan) -> Vec<&str> {
        plan.names()
    }

    #[test]
    fn test_topological_order_with_insertion_tie_break() {
        let mut b = PlanBuilder::new();
        b.add_resource("c", Run::new("echo c"), [depend_on(["a"])]);
        b.add_resource("a", Run::new("echo a"), []);
        b.add_resource("b", Run::new("echo b"), []);
        b.add_resource("d", Run::new("echo d"), [depend_on(["b", "c"])]);

        let plan = b.plan().expect("acyclic plan");
        assert_eq!(names(&plan), vec!["a", "c", "b", "d"]);
        assert_eq!(
            plan.dependencies("d").expect("d registered"),
            &[String::from("b"), String::from("c")]
        );
    }

    #[test]
    fn test_same_calls_same_plan() {
        let build = || {
            let mut b = PlanBuilder::new();
            b.add_resource("x", Run::new("echo x"), []);
            b.add_resource("y", Run::new("echo y"), []);
            b.add_resource("z", Run::new("echo z"), [depend_on(["y"]), depend_on(["x"])]);
            b.plan().expect("acyclic plan")
        };
        assert_eq!(names(&build()), names(&build()));
        assert_eq!(build().fingerprint(), build().fingerprint());
    }

    #[test]
    fn test_cycle_fails_at_build_time() {
        let mut b = PlanBuilder::new();
        b.add_resource("a", Run::new("echo a"), [depend_on(["b"])]);
        b.add_resource("b", Run::new("echo b"), [depend_on(["a"])]);

        let err = b.plan().expect_err("cycle must be rejected");
        assert_eq!(
            err,
            BuildError::Cycle {
                resources: vec![String::from("a"), String::from("b")]
            }
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut b = PlanBuilder::new();
        b.add_resource("a", Run::new("echo a"), [depend_on(["a"])]);
        assert!(matches!(b.plan(), Err(BuildError::Cycle { .. })));
    }

    #[test]
    fn test_unknown_dependency_fails() {
        let mut b = PlanBuilder::new();
        b.add_resource("a", Run::new("echo a"), [depend_on(["missing"])]);

        let err = b.plan().expect_err("unknown dependency must be rejected");
        assert_eq!(
            err,
            BuildError::UnknownDependency {
                resource: String::from("a"),
                dependency: String::from("missing"),
            }
        );
    }

    #[test]
    fn test_dependency_registered_later_resolves() {
        let mut b = PlanBuilder::new();
        b.add_resource("late-user", Run::new("echo use"), [depend_on(["late"])]);
        b.add_resource("late", Run::new("echo late"), []);
        let plan = b.plan().expect("late registration is fine");
        assert_eq!(names(&plan), vec!["late", "late-user"]);
    }

    #[test]
    fn test_duplicate_name_fails() {
        let mut b = PlanBuilder::new();
        b.add_resource("a", Run::new("echo 1"), []);
        b.add_resource("a", Run::new("echo 2"), []);
        assert_eq!(b.len(), 1);

        let err = b.plan().expect_err("duplicate must be rejected");
        assert_eq!(
            err,
            BuildError::DuplicateResource {
                name: String::from("a")
            }
        );
    }

    #[test]
    fn test_empty_builder_gives_empty_plan() {
        let b = PlanBuilder::new();
        assert!(b.is_empty());
        let plan = b.plan().expect("empty plan");
        assert!(plan.is_empty());
    }
}
