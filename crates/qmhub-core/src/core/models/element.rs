use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid or unsupported element symbol: '{0}'")]
pub struct ParseElementError(String);

macro_rules! elements {
    ($($symbol:ident = $z:literal),+ $(,)?) => {
        /// A chemical element, identified by its periodic-table symbol.
        ///
        /// `X` is a dummy element with atomic number zero. It fills freshly allocated
        /// atom slots and stands for virtual sites that carry charge but no electrons.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(u8)]
        pub enum Element {
            #[default]
            X = 0,
            $($symbol = $z),+
        }

        impl Element {
            /// Returns the atomic number (number of protons) of the element.
            pub fn atomic_number(&self) -> u32 {
                *self as u8 as u32
            }

            /// Returns the canonical symbol, e.g. `"Cl"`.
            pub fn symbol(&self) -> &'static str {
                match self {
                    Element::X => "X",
                    $(Element::$symbol => stringify!($symbol)),+
                }
            }
        }

        impl FromStr for Element {
            type Err = ParseElementError;

            /// Parses an element symbol case-insensitively (`"CL"`, `"cl"` and `"Cl"` all
            /// yield [`Element::Cl`]).
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                match trimmed.to_ascii_lowercase().as_str() {
                    "x" => Ok(Element::X),
                    $(lower if lower.eq_ignore_ascii_case(stringify!($symbol)) => Ok(Element::$symbol),)+
                    _ => Err(ParseElementError(s.to_string())),
                }
            }
        }
    };
}

elements! {
    H = 1, He = 2,
    Li = 3, Be = 4, B = 5, C = 6, N = 7, O = 8, F = 9, Ne = 10,
    Na = 11, Mg = 12, Al = 13, Si = 14, P = 15, S = 16, Cl = 17, Ar = 18,
    K = 19, Ca = 20, Sc = 21, Ti = 22, V = 23, Cr = 24, Mn = 25, Fe = 26, Co = 27,
    Ni = 28, Cu = 29, Zn = 30, Ga = 31, Ge = 32, As = 33, Se = 34, Br = 35, Kr = 36,
    Rb = 37, Sr = 38, Y = 39, Zr = 40, Nb = 41, Mo = 42, Tc = 43, Ru = 44, Rh = 45,
    Pd = 46, Ag = 47, Cd = 48, In = 49, Sn = 50, Sb = 51, Te = 52, I = 53, Xe = 54,
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
