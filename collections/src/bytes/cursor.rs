use core::mem::size_of;
use std::ops::{Deref, DerefMut};

use utils::bytes::{self, Cast};

/// A utility structure for serializing headers into a byte buffer.
///
/// Unlike the original's pointer-arithmetic pivot tracking, the shared
/// write position is a plain `&mut usize` — there is no raw-pointer diffing
/// here since packet buffers in this simulator are always owned, in-process
/// `Vec<u8>`s, never memory shared with an OS socket.
pub struct Cursor<'a> {
	slice: &'a mut [u8],
	pivot: &'a mut usize,
}

impl<'a> Cursor<'a> {
	/// Runs `f` over a cursor covering `vec`, then truncates `vec` to the number of bytes actually written.
	pub fn vec<X>(vec: &mut Vec<u8>, f: impl FnOnce(Cursor) -> X) -> X {
		let mut pivot = 0;
		let t = f(Cursor { slice: vec, pivot: &mut pivot });
		vec.truncate(pivot);
		t
	}

	/// The number of bytes written so far.
	#[inline]
	pub fn pivot(&self) -> usize {
		*self.pivot
	}

	/// Writes `t`'s raw bytes to the buffer, advancing the pivot.
	pub fn push<T: Cast + ?Sized>(self, t: &T) -> Self {
		let bytes = bytes::as_slice(t);

		let (l, r) = self.slice.split_at_mut(bytes.len());
		l.copy_from_slice(bytes);
		*self.pivot += bytes.len();

		Self { slice: r, pivot: self.pivot }
	}

	/// Reinterprets the next `size_of::<T>()` bytes as `&mut T`, advancing the pivot.
	#[inline]
	pub fn cast<T: Cast>(self) -> &'a mut T {
		let (l, _) = self.slice.split_at_mut(size_of::<T>());
		*self.pivot += size_of::<T>();
		bytes::cast_mut(l)
	}

	/// Splits off a `&mut T` header at the front, returning it with the remaining cursor.
	#[inline]
	pub fn split<T: Cast>(self) -> (&'a mut T, Self) {
		let (l, r) = self.slice.split_at_mut(size_of::<T>());
		*self.pivot += size_of::<T>();
		(bytes::cast_mut(l), Self { slice: r, pivot: self.pivot })
	}

	/// Limits the cursor to `len` bytes, without consuming it.
	#[inline]
	pub fn lim(&mut self, len: usize) -> Cursor {
		Cursor { slice: &mut self.slice[..len], pivot: self.pivot }
	}

	/// Pads with zeroes up to the next multiple of `n` bytes from the start of the buffer, advancing the pivot.
	#[inline]
	pub fn pad_to(&mut self, n: usize) {
		let pivot = self.pivot();
		let rem = (n - pivot % n) % n;

		self.slice[..rem].fill(0);
		*self.pivot += rem;
	}

	/// Returns a new cursor over the same underlying buffer, sharing the pivot.
	#[inline]
	pub fn fork(&mut self) -> Cursor {
		Cursor { slice: self.slice, pivot: self.pivot }
	}
}

impl<'a> Deref for Cursor<'a> {
	type Target = [u8];

	fn deref(&self) -> &Self::Target {
		self.slice
	}
}

impl<'a> DerefMut for Cursor<'a> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		self.slice
	}
}
