use std::io;

use beserial::{Deserialize, Serialize};
use nimiq_hash::{Blake2bHash, Hash, SerializeContent};
use nimiq_macros::{add_hex_io_fns_typed_arr, create_typed_array};

create_typed_array!(Address, u8, 20);
add_hex_io_fns_typed_arr!(Address, 20);

impl Serialize for Address {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(self.as_bytes())?;
        Ok(20)
    }

    fn serialized_size(&self) -> usize {
        20
    }
}

impl Deserialize for Address {
    fn deserialize<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 20];
        reader.read_exact(&mut buf)?;
        Ok(Address::from(buf))
    }
}

impl SerializeContent for Address {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(self.as_bytes())?;
        Ok(20)
    }
}

impl Hash for Address {}

impl From<Blake2bHash> for Address {
    fn from(hash: Blake2bHash) -> Self {
        let hash_arr: [u8; 32] = hash.into();
        Address::from(&hash_arr[0..Address::len()])
    }
}

#[test]
fn it_derives_an_address_from_a_hash() {
    use nimiq_hash::Blake2bHasher;

    let hash = Blake2bHasher::digest(b"miner");
    let addr = Address::from(hash);
    assert_eq!(addr.to_string().len(), 40);
}

#[test]
fn it_roundtrips_hex() {
    let addr = Address::from([1u8; 20]);
    let parsed: Address = addr.to_string().parse().unwrap();
    assert_eq!(addr, parsed);
}
