//! Post-read fixups.
//!
//! Some links are cheaper to rebuild than to store. A call-tree node's parent
//! pointer, for example, is always derivable from the children lists, and
//! writing it would pull every node into the reference graph twice. Such
//! fields are marked transient and restored by a [`PostRead`] fixup that runs
//! after the codec has finished reading the value and before it is returned.

use fxhash::FxHashSet;

use crate::{
    error::SerializationFault,
    shared::{Shared, WeakShared},
};

/// A pass over a freshly read value.
///
/// Installed with [`FieldCodec::with_fixup`](crate::FieldCodec::with_fixup)
/// for values read by value, and with
/// [`ReferenceTrackingCodec::with_fixup`](crate::ReferenceTrackingCodec::with_fixup)
/// for shared values. A tracked fixup runs once per top-level value, when the
/// outermost read of its type completes, so it sees the whole graph below it.
pub trait PostRead<V>: Send + Sync {
    /// Repairs `value` after it has been read.
    ///
    /// # Errors
    ///
    /// Returns a fault if the value is inconsistent.
    fn after_read(&self, value: &mut V) -> Result<(), SerializationFault>;
}

impl<V, F> PostRead<V> for F
where
    F: Fn(&mut V) -> Result<(), SerializationFault> + Send + Sync,
{
    fn after_read(&self, value: &mut V) -> Result<(), SerializationFault> {
        self(value)
    }
}

/// A node in a hierarchy whose parent pointers are not stored.
pub trait ParentLinked: Sized + Send + Sync + 'static {
    /// Returns handles to the node's direct children.
    fn children(&self) -> Vec<Shared<Self>>;

    /// Points the node at its parent.
    fn set_parent(&mut self, parent: WeakShared<Self>);
}

/// Rebuilds parent pointers by walking children depth-first from the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParentLinkReconstructor;

impl ParentLinkReconstructor {
    /// Creates the fixup.
    #[must_use]
    pub const fn new() -> Self { Self }

    /// Assigns every node below `root` its immediate parent.
    ///
    /// A node reachable from more than one parent keeps the last assignment
    /// and is descended into once; malformed cyclic input terminates.
    pub fn link<T: ParentLinked>(root: &Shared<T>) {
        let mut visited = FxHashSet::default();
        visited.insert(root.identity());

        let mut stack = vec![root.clone()];
        while let Some(parent) = stack.pop() {
            // the read guard must be released before a child is locked for
            // writing, since a cyclic child may be the parent itself
            let children = parent.read().children();

            for child in children {
                child.write().set_parent(parent.downgrade());
                if visited.insert(child.identity()) {
                    stack.push(child);
                }
            }
        }
    }
}

impl<T: ParentLinked> PostRead<Shared<T>> for ParentLinkReconstructor {
    fn after_read(
        &self,
        value: &mut Shared<T>,
    ) -> Result<(), SerializationFault> {
        Self::link(value);
        Ok(())
    }
}
