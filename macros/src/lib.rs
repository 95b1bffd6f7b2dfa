//! Small macros shared by the typed fixed-size-array newtypes
//! (`Blake2bHash`, `Address`, ...) used throughout the workspace.

#[macro_export]
macro_rules! create_typed_array {
    ($name: ident, $t: ty, $len: expr) => {
        #[repr(C)]
        #[derive(Clone, Copy, PartialEq, PartialOrd, Eq, Ord, Hash)]
        pub struct $name([$t; $len]);

        impl Default for $name {
            fn default() -> Self {
                $name([0 as $t; $len])
            }
        }

        impl<'a> From<&'a [$t]> for $name {
            fn from(slice: &'a [$t]) -> Self {
                assert_eq!(slice.len(), $len, "Tried to create instance with slice of wrong length");
                let mut a = [0 as $t; $len];
                a.clone_from_slice(&slice[0..$len]);
                $name(a)
            }
        }

        impl From<[$t; $len]> for $name {
            fn from(arr: [$t; $len]) -> Self {
                $name(arr)
            }
        }

        impl From<$name> for [$t; $len] {
            fn from(i: $name) -> [$t; $len] {
                i.0
            }
        }

        impl AsRef<[$t]> for $name {
            fn as_ref(&self) -> &[$t] {
                &self.0
            }
        }

        impl $name {
            pub const SIZE: usize = $len;

            pub fn len() -> usize {
                $len
            }

            pub fn as_bytes(&self) -> &[$t] {
                &self.0
            }
        }
    };
}

#[macro_export]
macro_rules! add_hex_io_fns_typed_arr {
    ($name: ident, $len: expr) => {
        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                f.write_str(&::hex::encode(self.as_bytes()))
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), ::hex::encode(self.as_bytes()))
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = ::hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let vec = ::hex::decode(s)?;
                if vec.len() == $len {
                    Ok($name::from(&vec[..]))
                } else {
                    Err(::hex::FromHexError::InvalidStringLength)
                }
            }
        }
    };
}
