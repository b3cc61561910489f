//! A tiny bitflags-style macro, kept local rather than pulling in the
//! `bitflags` crate for a handful of small flag sets; mirrors the manual
//! bit-trick style `cranelift-codegen::regalloc::register_set` already uses
//! for compact flag/mask types.

#[macro_export]
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(
                $(#[$fmeta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, Default, Hash, Debug)]
        pub struct $name($repr);

        impl $name {
            $(
                $(#[$fmeta])*
                pub const $flag: $name = $name($value);
            )*

            /// The empty flag set.
            pub const fn empty() -> Self {
                $name(0)
            }

            /// Does `self` contain every bit set in `other`?
            pub fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            /// Set the bits of `other` in `self`.
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Clear the bits of `other` in `self`.
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }
    };
}
