//! 注册表: 分配唯一标识符, 并按标签对登记的对象分类.
use indexmap::IndexMap;

use crate::net::ids::{ActorId, INITIAL_ACTOR_ID};
use crate::net::token::Label;

/// Objects that can be filed in a [`Registry`].
pub trait Labelled {
    fn label(&self) -> Label;
}

/// Id counter plus a directory `label -> [(id, object)]` kept in registration
/// order. The registry indexes the objects, it does not drive their lifecycle.
#[derive(Debug, Clone)]
pub struct Registry<T> {
    id_counter: ActorId,
    directory: IndexMap<Label, Vec<(ActorId, T)>>,
}

impl<T: Labelled> Registry<T> {
    pub fn new() -> Self {
        Self {
            id_counter: INITIAL_ACTOR_ID,
            directory: IndexMap::new(),
        }
    }

    fn new_id(&mut self) -> ActorId {
        self.id_counter = self.id_counter.next();
        self.id_counter
    }

    pub fn register(&mut self, obj: T) -> ActorId {
        self.register_with(obj, |_, _| {})
    }

    /// Registers `obj`; `post_register` runs once the id is known and may
    /// finalise the object before it is filed.
    pub fn register_with<F>(&mut self, mut obj: T, post_register: F) -> ActorId
    where
        F: FnOnce(ActorId, &mut T),
    {
        let id = self.new_id();
        post_register(id, &mut obj);
        self.directory
            .entry(obj.label())
            .or_default()
            .push((id, obj));
        id
    }

    /// Number of entries filed under `label`.
    pub fn entry_count(&self, label: Label) -> usize {
        self.directory.get(&label).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.directory.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First entry registered under `label`.
    pub fn first_entry(&self, label: Label) -> Option<(ActorId, &T)> {
        self.directory
            .get(&label)
            .and_then(|entries| entries.first())
            .map(|(id, obj)| (*id, obj))
    }

    pub fn entries_with(&self, label: Label, id: ActorId) -> Vec<&T> {
        self.directory
            .get(&label)
            .into_iter()
            .flatten()
            .filter(|(entry_id, _)| *entry_id == id)
            .map(|(_, obj)| obj)
            .collect()
    }

    /// Iterates the entries of one label, or of every label when `label` is
    /// `None`. Labels come in first-use order, entries in registration order.
    pub fn entries(&self, label: Option<Label>) -> impl Iterator<Item = (ActorId, &T)> {
        self.directory
            .iter()
            .filter(move |(key, _)| label.is_none_or(|wanted| **key == wanted))
            .flat_map(|(_, entries)| entries.iter().map(|(id, obj)| (*id, obj)))
    }

    pub fn get(&self, id: ActorId) -> Option<&T> {
        self.entries(None)
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, obj)| obj)
    }

    pub fn get_mut(&mut self, id: ActorId) -> Option<&mut T> {
        self.directory
            .values_mut()
            .flat_map(|entries| entries.iter_mut())
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, obj)| obj)
    }

    /// Consumes the registry, yielding entries in the order of [`Registry::entries`].
    pub fn into_entries(self) -> impl Iterator<Item = (ActorId, T)> {
        self.directory.into_values().flatten()
    }
}

impl<T: Labelled> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
