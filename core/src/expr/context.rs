use indexmap::IndexSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Variable slot allocation for one compiled unit.
///
/// The first reference to a name reserves the next free slot.
/// Clones share the same allocation, so nested parses (templates, closures)
/// see the same slots as the unit they belong to.
#[derive(Debug, Clone, Default)]
pub struct ParseContext(Arc<Mutex<IndexSet<String>>>);

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of the variable, allocating one if needed.
    pub fn slot(&self, name: &str) -> usize {
        let mut names = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match names.get_index_of(name) {
            Some(idx) => idx,
            None => names.insert_full(name.to_string()).0,
        }
    }

    /// Slot of the variable if already allocated.
    pub fn get(&self, name: &str) -> Option<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_index_of(name)
    }

    /// Number of allocated slots.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Variable names, indexed by slot.
    pub fn names(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Allocate a variable whose name is not used yet.
    /// e.g. `__out0`, `__out1`.
    pub fn unique(&self, prefix: &str) -> String {
        let mut names = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let name = (0..)
            .map(|idx| format!("{prefix}{idx}"))
            .find(|name| !names.contains(name))
            .unwrap_or_else(|| unreachable!("unbounded range"));
        names.insert(name.clone());
        name
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slots_are_dense() {
        let ctx = ParseContext::new();
        assert_eq!(ctx.slot("a"), 0);
        assert_eq!(ctx.slot("b"), 1);
        assert_eq!(ctx.slot("a"), 0);
        assert_eq!(ctx.get("b"), Some(1));
        assert_eq!(ctx.get("c"), None);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn clones_share_slots() {
        let ctx = ParseContext::new();
        let nested = ctx.clone();
        nested.slot("x");
        assert_eq!(ctx.slot("y"), 1);
        assert_eq!(ctx.names(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn unique_names() {
        let ctx = ParseContext::new();
        ctx.slot("__out0");
        let name = ctx.unique("__out");
        assert_eq!(name, "__out1");
        assert_eq!(ctx.get(&name), Some(1));
    }
}
