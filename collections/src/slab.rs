//! Typed-handle registries for entities that are created during configuration and live for the
//! whole run (nodes, ports, transport channels, jetties).
//!
//! Grounded on `collections::map::Index<N>`'s typed-index idiom (a back-reference that is a
//! plain integer handle, never an owning pointer — see §9's ownership-graph notes), but
//! generalized from a const-generic, compile-time-bounded index to the `slab` crate the
//! teacher already depends on, since the simulator's entity counts are only known at
//! configuration-load time.

use std::marker::PhantomData;

use slab::Slab as RawSlab;

/// A typed handle into a [`Registry<T>`]. Two handles into different registries with the same
/// raw index are not interchangeable — the phantom type parameter keeps them apart at compile
/// time the way `ValidIndex`'s const generic did in the teacher.
pub struct Handle<T> {
	idx: usize,
	_marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
	fn eq(&self, other: &Self) -> bool {
		self.idx == other.idx
	}
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.idx.hash(state)
	}
}

impl<T> std::fmt::Debug for Handle<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Handle({})", self.idx)
	}
}

impl<T> Handle<T> {
	pub fn raw(self) -> usize {
		self.idx
	}
}

#[derive(Default)]
pub struct Registry<T> {
	slab: RawSlab<T>,
}

impl<T> Registry<T> {
	pub fn new() -> Self {
		Self { slab: RawSlab::new() }
	}

	pub fn insert(&mut self, t: T) -> Handle<T> {
		let idx = self.slab.insert(t);
		Handle { idx, _marker: PhantomData }
	}

	pub fn remove(&mut self, h: Handle<T>) -> T {
		self.slab.remove(h.idx)
	}

	pub fn get(&self, h: Handle<T>) -> &T {
		&self.slab[h.idx]
	}

	pub fn get_mut(&mut self, h: Handle<T>) -> &mut T {
		&mut self.slab[h.idx]
	}

	/// Reconstructs a handle from a raw slab index, e.g. one carried across the wire as a peer's
	/// opaque token (see `sim::ldst`'s MAE `token` field). `None` if nothing lives at `idx`.
	pub fn handle_at(&self, idx: usize) -> Option<Handle<T>> {
		self.slab.get(idx).map(|_| Handle { idx, _marker: PhantomData })
	}

	pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
		self.slab.iter().map(|(idx, t)| (Handle { idx, _marker: PhantomData }, t))
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
		self.slab.iter_mut().map(|(idx, t)| (Handle { idx, _marker: PhantomData }, t))
	}

	pub fn len(&self) -> usize {
		self.slab.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slab.is_empty()
	}
}

impl<T> std::ops::Index<Handle<T>> for Registry<T> {
	type Output = T;

	fn index(&self, h: Handle<T>) -> &T {
		self.get(h)
	}
}

impl<T> std::ops::IndexMut<Handle<T>> for Registry<T> {
	fn index_mut(&mut self, h: Handle<T>) -> &mut T {
		self.get_mut(h)
	}
}
