use super::element::Element;
use super::error::SystemError;
use nalgebra::{Point3, Vector3};

/// A single atom record, copied out of an [`Atoms`] container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtomRecord {
    /// Cartesian position in Angstroms.
    pub position: Point3<f64>,
    /// Partial charge in elementary charge units.
    pub charge: f64,
    /// Chemical element of the atom.
    pub element: Element,
}

/// An ordered, index-aligned collection of atoms.
///
/// Positions, charges and elements are stored as three parallel vectors that always
/// have the same length. The index of an atom is its only durable identity; the
/// container only ever grows, so an index handed out once stays valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Atoms {
    positions: Vec<Point3<f64>>,
    charges: Vec<f64>,
    elements: Vec<Element>,
}

impl Atoms {
    /// Creates a container with `n_atoms` zeroed slots.
    ///
    /// Every slot sits at the origin with zero charge and the dummy element
    /// [`Element::X`].
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::InvalidArgument`] if `n_atoms` is negative.
    pub fn new(n_atoms: i64) -> Result<Self, SystemError> {
        let n = usize::try_from(n_atoms).map_err(|_| {
            SystemError::InvalidArgument(format!(
                "number of atoms must be non-negative, got {}",
                n_atoms
            ))
        })?;
        Ok(Self {
            positions: vec![Point3::origin(); n],
            charges: vec![0.0; n],
            elements: vec![Element::X; n],
        })
    }

    /// Creates an empty container with room for `capacity` atoms.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            charges: Vec::with_capacity(capacity),
            elements: Vec::with_capacity(capacity),
        }
    }

    /// Builds a new container holding copies of the atoms at `indices`.
    ///
    /// The result preserves the order of `indices`, so `from_atoms(&src, &[2, 0])`
    /// yields source atom 2 followed by source atom 0. Repeated indices are copied
    /// repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::IndexOutOfRange`] for the first index that is not
    /// smaller than `source.len()`.
    pub fn from_atoms(source: &Atoms, indices: &[usize]) -> Result<Self, SystemError> {
        let len = source.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(SystemError::IndexOutOfRange { index, len });
        }

        let mut atoms = Self::with_capacity(indices.len());
        for &i in indices {
            atoms.push(source.positions[i], source.charges[i], source.elements[i]);
        }
        Ok(atoms)
    }

    /// Appends one atom.
    #[inline]
    pub fn push(&mut self, position: Point3<f64>, charge: f64, element: Element) {
        self.positions.push(position);
        self.charges.push(charge);
        self.elements.push(element);
    }

    /// Appends copies of every atom in `other`, keeping their order.
    pub fn extend_from(&mut self, other: &Atoms) {
        self.positions.extend_from_slice(&other.positions);
        self.charges.extend_from_slice(&other.charges);
        self.elements.extend_from_slice(&other.elements);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    pub fn charges(&self) -> &[f64] {
        &self.charges
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Returns a copy of the atom at `index`, or `None` if out of range.
    pub fn get(&self, index: usize) -> Option<AtomRecord> {
        (index < self.len()).then(|| AtomRecord {
            position: self.positions[index],
            charge: self.charges[index],
            element: self.elements[index],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = AtomRecord> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Sum of all partial charges.
    pub fn total_charge(&self) -> f64 {
        self.charges.iter().sum()
    }

    /// Geometric center of the atoms, or `None` for an empty container.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.is_empty() {
            return None;
        }
        let sum: Vector3<f64> = self.positions.iter().map(|p| p.coords).sum();
        Some(Point3::from(sum / self.len() as f64))
    }

    /// Center weighted by absolute partial charge.
    ///
    /// Falls back to the geometric centroid when every charge is zero.
    pub fn charge_weighted_center(&self) -> Option<Point3<f64>> {
        let total_weight: f64 = self.charges.iter().map(|q| q.abs()).sum();
        if total_weight <= f64::EPSILON {
            return self.centroid();
        }
        let sum: Vector3<f64> = self
            .positions
            .iter()
            .zip(&self.charges)
            .map(|(p, q)| p.coords * q.abs())
            .sum();
        Some(Point3::from(sum / total_weight))
    }

    pub(crate) fn positions_mut(&mut self) -> &mut [Point3<f64>] {
        &mut self.positions
    }
}
