//! Unit conversion and physical constants (2018 CODATA).
//!
//! Internal units are kcal/mol for energy and Angstrom for length. QM backends
//! usually report Hartree and Bohr; use the factors below to convert.

pub const AVOGADRO_CONSTANT: f64 = 6.022_140_76e23;
pub const HARTREE_IN_JOULE: f64 = 4.359_744_722_207_1e-18;
pub const EV_IN_JOULE: f64 = 1.602_176_634e-19;
pub const BOHR_IN_METER: f64 = 5.291_772_109_03e-11;

pub const KCAL_IN_JOULE: f64 = 4.184e3;
pub const ANGSTROM_IN_METER: f64 = 1e-10;

pub const HARTREE_IN_KCAL_PER_MOLE: f64 = HARTREE_IN_JOULE / KCAL_IN_JOULE * AVOGADRO_CONSTANT;
pub const BOHR_IN_ANGSTROM: f64 = BOHR_IN_METER / ANGSTROM_IN_METER;
/// One Hartree/Bohr expressed in kcal/(mol·Å).
pub const FORCE_AU_IN_IU: f64 = HARTREE_IN_KCAL_PER_MOLE / BOHR_IN_ANGSTROM;

pub const HARTREE_IN_EV: f64 = HARTREE_IN_JOULE / EV_IN_JOULE;

/// Coulomb constant in kcal·Å/(mol·e²).
pub const COULOMB_CONSTANT: f64 = HARTREE_IN_KCAL_PER_MOLE * BOHR_IN_ANGSTROM;
