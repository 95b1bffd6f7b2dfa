//! Minimal big-endian binary codec. Every on-disk/on-wire struct in this
//! workspace implements `Serialize`/`Deserialize` by hand or via
//! `beserial_derive`, rather than going through `serde` - this crate
//! predates the decision to pull `serde` in and nothing here has needed to
//! change that since.

use std::io;
use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub use beserial_derive::{Deserialize, Serialize};

/// A type that knows how many bytes it would write and how to write them.
pub trait Serialize {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<usize>;
    fn serialized_size(&self) -> usize;
}

pub trait Deserialize: Sized {
    fn deserialize<R: Read>(reader: &mut R) -> io::Result<Self>;
}

macro_rules! impl_primitive {
    ($t: ty, $size: expr, $write: ident, $read: ident) => {
        impl Serialize for $t {
            fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
                writer.$write::<BigEndian>(*self)?;
                Ok($size)
            }

            fn serialized_size(&self) -> usize {
                $size
            }
        }

        impl Deserialize for $t {
            fn deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
                reader.$read::<BigEndian>()
            }
        }
    };
}

impl_primitive!(u16, 2, write_u16, read_u16);
impl_primitive!(u32, 4, write_u32, read_u32);
impl_primitive!(u64, 8, write_u64, read_u64);
impl_primitive!(i32, 4, write_i32, read_i32);
impl_primitive!(i64, 8, write_i64, read_i64);

impl Serialize for u8 {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_u8(*self)?;
        Ok(1)
    }

    fn serialized_size(&self) -> usize {
        1
    }
}

impl Deserialize for u8 {
    fn deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
        reader.read_u8()
    }
}

impl Serialize for bool {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        (*self as u8).serialize(writer)
    }

    fn serialized_size(&self) -> usize {
        1
    }
}

impl Deserialize for bool {
    fn deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(u8::deserialize(reader)? != 0)
    }
}

impl<T: Serialize> Serialize for Option<T> {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        match self {
            Some(v) => {
                let mut size = true.serialize(writer)?;
                size += v.serialize(writer)?;
                Ok(size)
            }
            None => false.serialize(writer),
        }
    }

    fn serialized_size(&self) -> usize {
        1 + self.as_ref().map_or(0, Serialize::serialized_size)
    }
}

impl<T: Deserialize> Deserialize for Option<T> {
    fn deserialize<R: Read>(reader: &mut R) -> io::Result<Self> {
        if bool::deserialize(reader)? {
            Ok(Some(T::deserialize(reader)?))
        } else {
            Ok(None)
        }
    }
}

/// Helper used by the derive macro for `#[beserial(len_type(..))]` fields:
/// serializes `len as L` followed by each element.
pub fn serialize_vec<W: Write, T: Serialize, L: Serialize + TryFromUsize>(
    vec: &[T],
    writer: &mut W,
) -> io::Result<usize> {
    let mut size = L::try_from_usize(vec.len()).serialize(writer)?;
    for item in vec {
        size += item.serialize(writer)?;
    }
    Ok(size)
}

pub fn serialized_vec_size<T: Serialize, L: IntoSizeOf>(vec: &[T]) -> usize {
    L::size_of() + vec.iter().map(Serialize::serialized_size).sum::<usize>()
}

pub fn deserialize_vec<R: Read, T: Deserialize, L: Deserialize + Into<u64>>(
    reader: &mut R,
) -> io::Result<Vec<T>> {
    let len: u64 = L::deserialize(reader)?.into();
    let mut vec = Vec::with_capacity(len as usize);
    for _ in 0..len {
        vec.push(T::deserialize(reader)?);
    }
    Ok(vec)
}

/// Bridges a `usize` length into whichever fixed-width integer type was
/// named in `#[beserial(len_type(..))]`.
pub trait TryFromUsize {
    fn try_from_usize(len: usize) -> Self;
}

impl TryFromUsize for u8 {
    fn try_from_usize(len: usize) -> Self {
        assert!(len <= u8::max_value() as usize, "length exceeds u8::MAX");
        len as u8
    }
}

impl TryFromUsize for u16 {
    fn try_from_usize(len: usize) -> Self {
        assert!(len <= u16::max_value() as usize, "length exceeds u16::MAX");
        len as u16
    }
}

impl TryFromUsize for u32 {
    fn try_from_usize(len: usize) -> Self {
        assert!(len <= u32::max_value() as usize, "length exceeds u32::MAX");
        len as u32
    }
}

pub trait IntoSizeOf {
    fn size_of() -> usize;
}

impl IntoSizeOf for u8 {
    fn size_of() -> usize {
        1
    }
}

impl IntoSizeOf for u16 {
    fn size_of() -> usize {
        2
    }
}

impl IntoSizeOf for u32 {
    fn size_of() -> usize {
        4
    }
}
