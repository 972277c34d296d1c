//! A `HashMap` keyed with `ahash`, grounded on `collections::map`'s use of `ahash::AHasher` for
//! fast, non-cryptographic hashing of identity keys (node ids, routing-table destinations, TP
//! numbers). The original's custom SWAR-ish hashbrown-raw table is dropped in favor of
//! `std::collections::HashMap` with the same hasher — this simulator's maps are sized in the
//! thousands, not the millions, so the extra control the raw table bought the networking stack
//! isn't load-bearing here.

use std::collections::HashMap as StdHashMap;
use std::hash::BuildHasherDefault;

use ahash::AHasher;

pub type HashMap<K, V> = StdHashMap<K, V, BuildHasherDefault<AHasher>>;
