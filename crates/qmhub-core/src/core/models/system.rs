use super::atoms::Atoms;
use super::element::Element;
use super::error::SystemError;
use nalgebra::{Matrix3, Point3, Vector3};
use serde::Deserialize;
use std::str::FromStr;

const MIN_CELL_VOLUME: f64 = 1e-8;

/// The region an atom belongs to in a QM/MM partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    /// Treated by the quantum-mechanical engine.
    Qm,
    /// Classical atom; its charge enters the QM calculation through embedding.
    #[default]
    Mm,
    /// Present in the system but ignored by the embedding (e.g. frozen or link-excluded atoms).
    Inactive,
}

impl FromStr for Region {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qm" => Ok(Region::Qm),
            "mm" => Ok(Region::Mm),
            "inactive" | "none" => Ok(Region::Inactive),
            _ => Err(()),
        }
    }
}

/// A periodic cell spanned by three lattice vectors.
///
/// The rows of the basis matrix are the lattice vectors `a`, `b` and `c`, so a
/// fractional coordinate `f` maps to the Cartesian point `Mᵀ f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBasis {
    basis: Matrix3<f64>,
    to_fractional: Matrix3<f64>,
}

impl CellBasis {
    /// Creates a cell from a matrix whose rows are the lattice vectors.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Configuration`] if the cell is degenerate. Left-handed
    /// bases are accepted.
    pub fn new(basis: Matrix3<f64>) -> Result<Self, SystemError> {
        let volume = basis.determinant().abs();
        if volume <= MIN_CELL_VOLUME {
            return Err(SystemError::Configuration(format!(
                "cell basis must span a positive volume, got {:.3e}",
                volume
            )));
        }
        let to_fractional = basis
            .transpose()
            .try_inverse()
            .ok_or_else(|| SystemError::Configuration("cell basis is singular".to_string()))?;
        Ok(Self {
            basis,
            to_fractional,
        })
    }

    /// Creates an orthorhombic cell with edge lengths `a`, `b` and `c`.
    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Result<Self, SystemError> {
        Self::new(Matrix3::from_diagonal(&Vector3::new(a, b, c)))
    }

    /// Creates a cubic cell with edge length `length`.
    pub fn cubic(length: f64) -> Result<Self, SystemError> {
        Self::orthorhombic(length, length, length)
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.basis
    }

    pub fn volume(&self) -> f64 {
        self.basis.determinant().abs()
    }

    #[inline]
    pub fn fractional(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.to_fractional * v
    }

    #[inline]
    pub fn cartesian(&self, f: &Vector3<f64>) -> Vector3<f64> {
        self.basis.transpose() * f
    }

    /// Reduces a displacement to its minimum image.
    ///
    /// Each fractional component ends up in `[-0.5, 0.5)`.
    pub fn minimum_image(&self, v: &Vector3<f64>) -> Vector3<f64> {
        let f = self.fractional(v).map(|x| x - (x + 0.5).floor());
        self.cartesian(&f)
    }
}

/// The full set of atoms of a simulation together with its QM/MM partition.
///
/// A `System` exclusively owns its [`Atoms`]. Every atom carries a [`Region`] tag;
/// QM atoms are the ones the QM engine sees, MM atoms contribute embedding charges
/// and inactive atoms are carried along untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct System {
    atoms: Atoms,
    regions: Vec<Region>,
    cell_basis: Option<CellBasis>,
    periodic: bool,
    qm_charge: i32,
    qm_multiplicity: u32,
}

impl System {
    /// Creates a system from atoms and their region tags.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::ShapeMismatch`] if `regions` and `atoms` differ in length.
    pub fn new(atoms: Atoms, regions: Vec<Region>) -> Result<Self, SystemError> {
        if regions.len() != atoms.len() {
            return Err(SystemError::ShapeMismatch {
                expected: atoms.len(),
                found: regions.len(),
            });
        }
        Ok(Self {
            atoms,
            regions,
            cell_basis: None,
            periodic: false,
            qm_charge: 0,
            qm_multiplicity: 1,
        })
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> Option<Region> {
        self.regions.get(index).copied()
    }

    pub fn cell_basis(&self) -> Option<&CellBasis> {
        self.cell_basis.as_ref()
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    pub fn qm_charge(&self) -> i32 {
        self.qm_charge
    }

    pub fn qm_multiplicity(&self) -> u32 {
        self.qm_multiplicity
    }

    /// Indices of atoms tagged [`Region::Qm`], in ascending order.
    pub fn qm_indices(&self) -> Vec<usize> {
        self.indices_in(Region::Qm)
    }

    /// Indices of atoms tagged [`Region::Mm`], in ascending order.
    pub fn mm_indices(&self) -> Vec<usize> {
        self.indices_in(Region::Mm)
    }

    pub fn qm_atoms(&self) -> Atoms {
        // Indices come from this system, so the selection cannot go out of range.
        Atoms::from_atoms(&self.atoms, &self.qm_indices()).unwrap_or_default()
    }

    pub fn mm_atoms(&self) -> Atoms {
        Atoms::from_atoms(&self.atoms, &self.mm_indices()).unwrap_or_default()
    }

    fn indices_in(&self, region: Region) -> Vec<usize> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == region)
            .map(|(i, _)| i)
            .collect()
    }

    /// Re-tags the atoms at `indices` as QM and sets the QM charge state.
    ///
    /// Atoms previously tagged QM but not listed become MM.
    pub fn select_qm(
        &mut self,
        indices: &[usize],
        charge: i32,
        multiplicity: u32,
    ) -> Result<(), SystemError> {
        let len = self.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(SystemError::IndexOutOfRange { index, len });
        }
        for region in self.regions.iter_mut() {
            if *region == Region::Qm {
                *region = Region::Mm;
            }
        }
        for &i in indices {
            self.regions[i] = Region::Qm;
        }
        self.qm_charge = charge;
        self.qm_multiplicity = multiplicity;
        Ok(())
    }

    /// Sets (or clears) the periodic cell. A cell turns periodicity on; clearing it
    /// turns periodicity off.
    pub fn set_cell_basis(&mut self, cell_basis: Option<CellBasis>) {
        self.periodic = cell_basis.is_some();
        self.cell_basis = cell_basis;
    }

    pub fn set_periodic(&mut self, periodic: bool) {
        self.periodic = periodic;
    }

    /// Replaces all positions, e.g. with the coordinates of the next MD step.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::ShapeMismatch`] if the number of positions differs from
    /// the number of atoms.
    pub fn set_positions(&mut self, positions: &[Point3<f64>]) -> Result<(), SystemError> {
        if positions.len() != self.len() {
            return Err(SystemError::ShapeMismatch {
                expected: self.len(),
                found: positions.len(),
            });
        }
        self.atoms.positions_mut().copy_from_slice(positions);
        Ok(())
    }

    /// The default wrapping center: the QM centroid, or the centroid of all atoms
    /// when there is no QM region.
    pub fn default_center(&self) -> Option<Point3<f64>> {
        let qm = self.qm_atoms();
        qm.centroid().or_else(|| self.atoms.centroid())
    }

    /// Wraps every position into the periodic image closest to `center`.
    ///
    /// Positions are shifted by `-center`, their fractional coordinates reduced into
    /// `[-0.5, 0.5)`, and shifted back. `center` defaults to [`System::default_center`].
    /// The system itself is left untouched; see [`System::wrap_positions_in_place`].
    /// For a non-periodic system the original positions are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Configuration`] if the system is periodic but has no
    /// cell basis.
    pub fn wrap_positions(
        &self,
        center: Option<Point3<f64>>,
    ) -> Result<Vec<Point3<f64>>, SystemError> {
        if !self.periodic {
            return Ok(self.atoms.positions().to_vec());
        }
        let cell = self.cell_basis.as_ref().ok_or_else(|| {
            SystemError::Configuration(
                "periodic wrapping requested but no cell basis is set".to_string(),
            )
        })?;
        let Some(center) = center.or_else(|| self.default_center()) else {
            return Ok(Vec::new());
        };

        Ok(self
            .atoms
            .positions()
            .iter()
            .map(|p| center + cell.minimum_image(&(p - center)))
            .collect())
    }

    /// Same as [`System::wrap_positions`], but writes the result back into the atoms.
    pub fn wrap_positions_in_place(
        &mut self,
        center: Option<Point3<f64>>,
    ) -> Result<(), SystemError> {
        let wrapped = self.wrap_positions(center)?;
        if !wrapped.is_empty() {
            self.atoms.positions_mut().copy_from_slice(&wrapped);
        }
        Ok(())
    }

    /// Minimum-image displacement for periodic systems; identity otherwise.
    pub fn minimum_image(&self, v: &Vector3<f64>) -> Vector3<f64> {
        match (self.periodic, &self.cell_basis) {
            (true, Some(cell)) => cell.minimum_image(v),
            _ => *v,
        }
    }
}

/// Incremental, validating constructor for [`System`].
#[derive(Debug, Default)]
pub struct SystemBuilder {
    atoms: Atoms,
    regions: Vec<Region>,
    cell_basis: Option<Matrix3<f64>>,
    periodic: Option<bool>,
    qm_charge: i32,
    qm_multiplicity: Option<u32>,
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn atom(
        mut self,
        position: Point3<f64>,
        charge: f64,
        element: Element,
        region: Region,
    ) -> Self {
        self.atoms.push(position, charge, element);
        self.regions.push(region);
        self
    }

    pub fn cell_basis(mut self, basis: Matrix3<f64>) -> Self {
        self.cell_basis = Some(basis);
        self
    }

    /// Overrides periodicity. Without this call a system is periodic exactly when a
    /// cell basis is given.
    pub fn periodic(mut self, periodic: bool) -> Self {
        self.periodic = Some(periodic);
        self
    }

    pub fn qm_charge(mut self, charge: i32, multiplicity: u32) -> Self {
        self.qm_charge = charge;
        self.qm_multiplicity = Some(multiplicity);
        self
    }

    pub fn build(self) -> Result<System, SystemError> {
        let cell_basis = self.cell_basis.map(CellBasis::new).transpose()?;
        let periodic = self.periodic.unwrap_or(cell_basis.is_some());

        let mut system = System::new(self.atoms, self.regions)?;
        system.cell_basis = cell_basis;
        system.periodic = periodic;
        system.qm_charge = self.qm_charge;
        system.qm_multiplicity = self.qm_multiplicity.unwrap_or(1);
        Ok(system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn points_approx_equal(a: &Point3<f64>, b: &Point3<f64>) -> bool {
        (a - b).norm() < TOLERANCE
    }

    fn cubic_system(length: f64, positions: &[Point3<f64>]) -> System {
        let mut builder = SystemBuilder::new().cell_basis(Matrix3::identity() * length);
        for (i, p) in positions.iter().enumerate() {
            let region = if i == 0 { Region::Qm } else { Region::Mm };
            builder = builder.atom(*p, 0.0, Element::C, region);
        }
        builder.build().unwrap()
    }

    #[test]
    fn non_periodic_wrap_is_identity() {
        let system = SystemBuilder::new()
            .atom(Point3::new(0.0, 0.0, 0.0), 0.0, Element::C, Region::Qm)
            .atom(Point3::new(100.0, -55.0, 3.0), 0.0, Element::C, Region::Mm)
            .build()
            .unwrap();

        let wrapped = system.wrap_positions(None).unwrap();
        assert_eq!(wrapped, system.atoms().positions());
    }

    #[test]
    fn periodic_wrap_maps_lattice_translations_onto_reference() {
        let length = 10.0;
        let reference = Point3::new(1.5, -2.0, 3.25);
        let mut positions = vec![Point3::origin(), reference];
        for k in [-3.0, -1.0, 1.0, 2.0, 7.0] {
            positions.push(reference + Vector3::new(k * length, -k * length, 2.0 * k * length));
        }
        let system = cubic_system(length, &positions);

        let wrapped = system.wrap_positions(Some(Point3::origin())).unwrap();
        for p in &wrapped[2..] {
            assert!(points_approx_equal(p, &wrapped[1]), "{p} vs {}", wrapped[1]);
        }
    }

    #[test]
    fn periodic_wrap_places_atoms_within_half_box_of_center() {
        let length = 8.0;
        let system = cubic_system(
            length,
            &[
                Point3::new(1.0, 1.0, 1.0),
                Point3::new(9.0, 1.0, 1.0),
                Point3::new(-6.5, 12.0, 4.9),
            ],
        );
        let center = system.default_center().unwrap();
        let wrapped = system.wrap_positions(None).unwrap();

        for p in &wrapped {
            let d = p - center;
            for c in d.iter() {
                assert!(*c >= -length / 2.0 - TOLERANCE && *c < length / 2.0 + TOLERANCE);
            }
        }
        assert!(points_approx_equal(&wrapped[1], &Point3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn wrap_does_not_mutate_atoms_unless_requested() {
        let mut system = cubic_system(5.0, &[Point3::origin(), Point3::new(12.0, 0.0, 0.0)]);
        let before = system.atoms().positions().to_vec();

        let wrapped = system.wrap_positions(None).unwrap();
        assert_eq!(system.atoms().positions(), before.as_slice());

        system.wrap_positions_in_place(None).unwrap();
        assert_eq!(system.atoms().positions(), wrapped.as_slice());
        assert!(points_approx_equal(
            &system.atoms().positions()[1],
            &Point3::new(2.0, 0.0, 0.0)
        ));
    }

    #[test]
    fn periodic_wrap_without_cell_is_a_configuration_error() {
        let system = SystemBuilder::new()
            .atom(Point3::origin(), 0.0, Element::C, Region::Qm)
            .periodic(true)
            .build()
            .unwrap();
        assert!(matches!(
            system.wrap_positions(None),
            Err(SystemError::Configuration(_))
        ));
    }

    #[test]
    fn triclinic_cell_minimum_image_stays_in_primary_cell() {
        let basis = Matrix3::new(10.0, 0.0, 0.0, 3.0, 9.0, 0.0, 1.0, 2.0, 8.0);
        let cell = CellBasis::new(basis).unwrap();
        let v = Vector3::new(23.0, -17.0, 11.0);
        let reduced = cell.minimum_image(&v);

        let f = cell.fractional(&reduced);
        for c in f.iter() {
            assert!(*c >= -0.5 - TOLERANCE && *c < 0.5 + TOLERANCE);
        }
        let shift = cell.fractional(&(v - reduced));
        for c in shift.iter() {
            assert!((c - c.round()).abs() < 1e-9);
        }
    }

    #[test]
    fn degenerate_cell_is_rejected() {
        let flat = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0);
        assert!(matches!(
            CellBasis::new(flat),
            Err(SystemError::Configuration(_))
        ));
        let result = SystemBuilder::new()
            .atom(Point3::origin(), 0.0, Element::C, Region::Qm)
            .cell_basis(flat)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn left_handed_cell_is_accepted() {
        let swapped = Matrix3::new(0.0, 10.0, 0.0, 10.0, 0.0, 0.0, 0.0, 0.0, 10.0);
        let cell = CellBasis::new(swapped).unwrap();
        assert!((cell.volume() - 1000.0).abs() < TOLERANCE);

        let image = cell.minimum_image(&Vector3::new(9.0, 0.0, 0.0));
        assert!((image - Vector3::new(-1.0, 0.0, 0.0)).norm() < TOLERANCE);
    }

    #[test]
    fn select_qm_retags_regions_and_validates_indices() {
        let mut system = cubic_system(
            10.0,
            &[Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)],
        );
        system.select_qm(&[1, 2], -1, 2).unwrap();

        assert_eq!(system.qm_indices(), vec![1, 2]);
        assert_eq!(system.mm_indices(), vec![0]);
        assert_eq!(system.qm_charge(), -1);
        assert_eq!(system.qm_multiplicity(), 2);
        assert_eq!(
            system.select_qm(&[5], 0, 1),
            Err(SystemError::IndexOutOfRange { index: 5, len: 3 })
        );
    }

    #[test]
    fn set_positions_checks_length() {
        let mut system = cubic_system(10.0, &[Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);
        assert!(matches!(
            system.set_positions(&[Point3::origin()]),
            Err(SystemError::ShapeMismatch {
                expected: 2,
                found: 1
            })
        ));
        system
            .set_positions(&[Point3::new(0.5, 0.0, 0.0), Point3::new(1.5, 0.0, 0.0)])
            .unwrap();
        assert_eq!(system.atoms().positions()[0], Point3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn region_from_str_accepts_known_tags() {
        assert_eq!(Region::from_str("QM"), Ok(Region::Qm));
        assert_eq!(Region::from_str("mm"), Ok(Region::Mm));
        assert_eq!(Region::from_str("inactive"), Ok(Region::Inactive));
        assert_eq!(Region::from_str("link"), Err(()));
    }
}
