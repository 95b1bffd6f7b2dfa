//! Hash types used to address blocks, headers, accounts-tree nodes and
//! anything else this workspace content-addresses.
//!
//! The PLCS synchronizer never computes proof-of-work itself - that is a
//! base-chain concern out of its scope - so this crate only carries the
//! Blake2b content hash used for block/interlink/accounts-tree addressing.

use std::io;

use beserial::{Deserialize, Serialize};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use nimiq_macros::{add_hex_io_fns_typed_arr, create_typed_array};

create_typed_array!(Blake2bHash, u8, 32);
add_hex_io_fns_typed_arr!(Blake2bHash, 32);

impl Serialize for Blake2bHash {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(self.as_bytes())?;
        Ok(32)
    }

    fn serialized_size(&self) -> usize {
        32
    }
}

impl Deserialize for Blake2bHash {
    fn deserialize<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 32];
        reader.read_exact(&mut buf)?;
        Ok(Blake2bHash::from(buf))
    }
}

/// Anything that can be turned into the canonical byte representation used
/// as hash preimage. Distinct from `Serialize` so that types can hash a
/// different (typically simplified or truncated) view of themselves than
/// what they'd put on the wire.
pub trait SerializeContent {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize>;
}

pub trait Hash: SerializeContent {
    fn hash(&self) -> Blake2bHash {
        let mut state = Blake2bHasher::new();
        self.serialize_content(&mut state).expect("writing to a hasher cannot fail");
        state.finish()
    }
}

pub struct Blake2bHasher(Blake2bVar);

impl Blake2bHasher {
    pub fn new() -> Self {
        Blake2bHasher(Blake2bVar::new(32).expect("32 is a valid blake2b output size"))
    }

    pub fn finish(self) -> Blake2bHash {
        let mut out = [0u8; 32];
        self.0
            .finalize_variable(&mut out)
            .expect("32 is a valid blake2b output size");
        Blake2bHash::from(out)
    }

    pub fn digest(data: &[u8]) -> Blake2bHash {
        let mut hasher = Blake2bHasher::new();
        io::Write::write_all(&mut hasher, data).expect("writing to a hasher cannot fail");
        hasher.finish()
    }
}

impl Default for Blake2bHasher {
    fn default() -> Self {
        Blake2bHasher::new()
    }
}

impl io::Write for Blake2bHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// Hashing a byte slice hashes its raw bytes (no length prefix) - used when a
// type's content hash is defined over an already-length-delimited buffer.
impl SerializeContent for [u8] {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(self)?;
        Ok(self.len())
    }
}

impl Hash for [u8] {}

impl SerializeContent for Vec<u8> {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        self.as_slice().serialize_content(writer)
    }
}

impl Hash for Vec<u8> {}
