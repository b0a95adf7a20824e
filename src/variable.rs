use crate::int_vector::IntVector;
use crate::patch_data::{Centering, ScalarKind};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

/// A dense integer naming one (variable, context) pairing in the descriptor
/// registry. Components may copy descriptor ids freely.
pub type DescriptorId = usize;

/// A simulation quantity: its name, where it lives on the mesh, its scalar
/// kind, and how many values it carries per mesh location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub centering: Centering,
    pub kind: ScalarKind,
    pub depth: usize,
}

impl Variable {
    pub fn new(name: &str, centering: Centering, kind: ScalarKind, depth: usize) -> Self {
        assert!(depth > 0);
        Self {
            name: name.to_string(),
            centering,
            kind,
            depth,
        }
    }

    pub fn cell(name: &str, kind: ScalarKind, depth: usize) -> Self {
        Self::new(name, Centering::Cell, kind, depth)
    }

    pub fn node(name: &str, kind: ScalarKind, depth: usize) -> Self {
        Self::new(name, Centering::Node, kind, depth)
    }

    pub fn face(name: &str, kind: ScalarKind, depth: usize) -> Self {
        Self::new(name, Centering::Face, kind, depth)
    }

    pub fn side(name: &str, kind: ScalarKind, depth: usize) -> Self {
        Self::new(name, Centering::Side, kind, depth)
    }

    pub fn edge(name: &str, kind: ScalarKind, depth: usize) -> Self {
        Self::new(name, Centering::Edge, kind, depth)
    }
}

/// A named storage label (CURRENT, NEW, SCRATCH, OLD, ...) which together
/// with a variable selects one descriptor id. Contexts are interned by name
/// in the [`VariableDatabase`] and live as long as the database.
#[derive(Debug, PartialEq, Eq)]
pub struct VariableContext {
    pub name: String,
}

/// Everything the storage layer needs to allocate one patch-data entry.
#[derive(Clone, Debug)]
pub struct PatchDescriptor {
    pub variable: Arc<Variable>,
    pub context: Arc<VariableContext>,
    pub ghost: IntVector,
}

/// The registry pairing variables with contexts and issuing descriptor ids.
/// An explicit service object owned by the driver: registration takes the
/// write lock, lookups share the read lock and may run concurrently.
pub struct VariableDatabase {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    contexts: BTreeMap<String, Arc<VariableContext>>,
    variables: BTreeMap<String, Arc<Variable>>,
    descriptors: Vec<PatchDescriptor>,
    index: BTreeMap<(String, String), DescriptorId>,
}

// ============================================================================
impl VariableDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner::default()),
        })
    }

    /// The context with the given name, created on first request.
    pub fn get_context(&self, name: &str) -> Arc<VariableContext> {
        let mut inner = self.inner.write().unwrap();
        inner
            .contexts
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(VariableContext {
                    name: name.to_string(),
                })
            })
            .clone()
    }

    /// Intern a variable by name. Registering a different definition under
    /// an existing name is a programming error.
    pub fn add_variable(&self, variable: Variable) -> Arc<Variable> {
        let mut inner = self.inner.write().unwrap();
        if let Some(existing) = inner.variables.get(&variable.name) {
            assert! {
                **existing == variable,
                "variable {} redefined with different attributes",
                variable.name
            };
            return existing.clone();
        }
        let variable = Arc::new(variable);
        inner
            .variables
            .insert(variable.name.clone(), variable.clone());
        variable
    }

    /// Register a (variable, context) pairing with the given ghost width and
    /// return its descriptor id. Re-registering the same pairing returns the
    /// existing id; a ghost-width mismatch is a programming error.
    pub fn register_variable_and_context(
        &self,
        variable: &Arc<Variable>,
        context: &Arc<VariableContext>,
        ghost: &IntVector,
    ) -> DescriptorId {
        let mut inner = self.inner.write().unwrap();
        let key = (variable.name.clone(), context.name.clone());
        if let Some(&id) = inner.index.get(&key) {
            assert! {
                inner.descriptors[id].ghost == *ghost,
                "descriptor {}/{} re-registered with ghost width {} (was {})",
                variable.name,
                context.name,
                ghost,
                inner.descriptors[id].ghost
            };
            return id;
        }
        let id = inner.descriptors.len();
        inner.descriptors.push(PatchDescriptor {
            variable: variable.clone(),
            context: context.clone(),
            ghost: *ghost,
        });
        inner.index.insert(key, id);
        id
    }

    pub fn map_variable_and_context(
        &self,
        variable: &Variable,
        context: &VariableContext,
    ) -> Option<DescriptorId> {
        let inner = self.inner.read().unwrap();
        inner
            .index
            .get(&(variable.name.clone(), context.name.clone()))
            .copied()
    }

    pub fn descriptor(&self, id: DescriptorId) -> PatchDescriptor {
        self.inner.read().unwrap().descriptors[id].clone()
    }

    pub fn num_descriptors(&self) -> usize {
        self.inner.read().unwrap().descriptors.len()
    }

    /// The widest ghost width among the given descriptors; zero if none.
    pub fn max_ghost_width(&self, ids: &ComponentSelector, dim: usize) -> IntVector {
        let inner = self.inner.read().unwrap();
        let mut width = IntVector::zero(dim);
        for id in ids.iter() {
            width = width.max_with(&inner.descriptors[id].ghost);
        }
        width
    }
}

/// A set of descriptor ids selecting which patch-data entries an operation
/// touches (allocation, deallocation, time stamping).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComponentSelector {
    flags: BTreeSet<DescriptorId>,
}

// ============================================================================
impl ComponentSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_flag(&mut self, id: DescriptorId) {
        self.flags.insert(id);
    }

    pub fn clear_flag(&mut self, id: DescriptorId) {
        self.flags.remove(&id);
    }

    pub fn contains(&self, id: DescriptorId) -> bool {
        self.flags.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = DescriptorId> + '_ {
        self.flags.iter().copied()
    }

    pub fn or_with(&mut self, other: &ComponentSelector) {
        self.flags.extend(other.flags.iter().copied());
    }
}

impl FromIterator<DescriptorId> for ComponentSelector {
    fn from_iter<I: IntoIterator<Item = DescriptorId>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

/// The active (database, context) pair handed to user patch callbacks so
/// they can resolve their variables to descriptor ids without knowing which
/// storage context the framework is operating on.
#[derive(Clone)]
pub struct DataContext {
    pub db: Arc<VariableDatabase>,
    pub context: Arc<VariableContext>,
}

impl DataContext {
    pub fn new(db: Arc<VariableDatabase>, context: Arc<VariableContext>) -> Self {
        Self { db, context }
    }

    pub fn id(&self, variable: &Variable) -> DescriptorId {
        self.db
            .map_variable_and_context(variable, &self.context)
            .unwrap_or_else(|| {
                panic!(
                    "variable {} is not registered in context {}",
                    variable.name, self.context.name
                )
            })
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::{ComponentSelector, Variable, VariableDatabase};
    use crate::int_vector::IntVector;
    use crate::patch_data::ScalarKind;

    #[test]
    fn contexts_are_interned() {
        let db = VariableDatabase::new();
        let a = db.get_context("CURRENT");
        let b = db.get_context("CURRENT");
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn registration_is_idempotent() {
        let db = VariableDatabase::new();
        let var = db.add_variable(Variable::cell("density", ScalarKind::Double, 1));
        let current = db.get_context("CURRENT");
        let ghost = IntVector::zero(2);

        let id0 = db.register_variable_and_context(&var, &current, &ghost);
        let id1 = db.register_variable_and_context(&var, &current, &ghost);
        assert_eq!(id0, id1);
        assert_eq!(db.num_descriptors(), 1);

        let scratch = db.get_context("SCRATCH");
        let id2 = db.register_variable_and_context(&var, &scratch, &IntVector::uniform(2, 2));
        assert_ne!(id0, id2);
    }

    #[test]
    #[should_panic]
    fn ghost_width_mismatch_is_fatal() {
        let db = VariableDatabase::new();
        let var = db.add_variable(Variable::cell("density", ScalarKind::Double, 1));
        let current = db.get_context("CURRENT");
        db.register_variable_and_context(&var, &current, &IntVector::zero(2));
        db.register_variable_and_context(&var, &current, &IntVector::one(2));
    }

    #[test]
    fn selector_collects_ids() {
        let mut selector = ComponentSelector::new();
        selector.set_flag(3);
        selector.set_flag(1);
        selector.set_flag(3);
        let ids: Vec<_> = selector.iter().collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
