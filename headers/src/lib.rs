//! Bit-packed wire codecs for the Unified Bus datalink, network, transport, and transaction
//! header kinds.
//!
//! Grounded on `net::ip::v4`/`net::tcp`/`net::udp`'s codec idiom: a `bilge`-derived bitfield
//! struct per byte-aligned block, glued into a `repr(C)` struct that derives `utils::bytes::Cast`
//! so the whole header can be reinterpreted in place as `&[u8]` via `collections::bytes::{Cursor,
//! Reader}` without an intermediate allocation. Every block here packs to a whole number of bytes
//! so there is no cross-codec endianness ambiguity; multi-bit subfields that don't land on byte
//! boundaries (24-bit PSN/TPN, 20-bit token/jetty ids) are represented with `bilge`'s
//! arbitrary-width integers rather than `utils::endian`'s `b<T>`/`l<T>` wrappers, since those
//! wrappers are only implemented for power-of-two-byte native integers. This is a conscious
//! simplification from strict network byte order recorded in `DESIGN.md`: nothing here ever
//! leaves the process, so the only requirement is that a codec's own `serialize`/`deserialize`
//! round-trip and that every header's size matches the table in the specification.

pub mod datalink;
pub mod ip;
pub mod mae;
pub mod network;
pub mod transaction;
pub mod transport;

pub use ip::checksum::Checksum;
