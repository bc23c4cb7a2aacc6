use super::backends::{EnergyBackend, Evaluation, EvaluationRequest};
use super::error::QmmmError;
use nalgebra::Vector3;
use std::fmt;
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

struct EngineTerm {
    label: String,
    scaling_factor: f64,
    backend: Box<dyn EnergyBackend>,
}

/// A weighted sum of energy backends over a fixed number of request atoms.
///
/// Composition with [`Engine::add_engine`] never nests: the terms of the added
/// engine are appended to this one with their factors multiplied, so an engine is
/// always a flat, ordered list of `(backend, scaling_factor)` pairs and
/// `(A + B) + C` and `A + (B + C)` evaluate the same terms in the same order.
pub struct Engine {
    n_atoms: usize,
    terms: Vec<EngineTerm>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("n_atoms", &self.n_atoms)
            .field(
                "terms",
                &self
                    .terms
                    .iter()
                    .map(|t| (t.label.as_str(), t.scaling_factor))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Engine {
    /// Wraps a single backend. `label` identifies the backend in error messages.
    pub fn new(
        label: impl Into<String>,
        n_atoms: usize,
        backend: impl EnergyBackend + 'static,
    ) -> Self {
        Self {
            n_atoms,
            terms: vec![EngineTerm {
                label: label.into(),
                scaling_factor: 1.0,
                backend: Box::new(backend),
            }],
        }
    }

    pub fn n_atoms(&self) -> usize {
        self.n_atoms
    }

    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    /// The flattened `(label, scaling_factor)` list, in evaluation order.
    pub fn terms(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.terms
            .iter()
            .map(|t| (t.label.as_str(), t.scaling_factor))
    }

    /// Multiplies every term by `factor`.
    pub fn scaled(mut self, factor: f64) -> Self {
        for term in &mut self.terms {
            term.scaling_factor *= factor;
        }
        self
    }

    /// Returns the composite `self + scaling_factor · other`.
    ///
    /// # Errors
    ///
    /// Returns [`QmmmError::ShapeMismatch`] if the two engines operate on different
    /// numbers of atoms, and [`QmmmError::InvalidArgument`] for a non-finite factor.
    pub fn add_engine(mut self, other: Engine, scaling_factor: f64) -> Result<Self, QmmmError> {
        if other.n_atoms != self.n_atoms {
            return Err(QmmmError::shape(
                "engine composition",
                self.n_atoms,
                other.n_atoms,
            ));
        }
        if !scaling_factor.is_finite() {
            return Err(QmmmError::InvalidArgument(format!(
                "scaling factor must be finite, got {}",
                scaling_factor
            )));
        }
        self.terms.extend(other.terms.into_iter().map(|mut term| {
            term.scaling_factor *= scaling_factor;
            term
        }));
        Ok(self)
    }

    /// Evaluates every term and returns their weighted sum.
    ///
    /// Terms are combined left to right in composition order. The first failing
    /// term aborts the evaluation and the terms after it are not started.
    ///
    /// # Errors
    ///
    /// - [`QmmmError::ShapeMismatch`] if the request or a term's output does not
    ///   match the engine size.
    /// - [`QmmmError::Engine`] naming the failing term.
    pub fn evaluate(&mut self, request: &EvaluationRequest<'_>) -> Result<Evaluation, QmmmError> {
        if request.atoms.len() != self.n_atoms {
            return Err(QmmmError::shape(
                "engine request",
                self.n_atoms,
                request.atoms.len(),
            ));
        }

        #[cfg(feature = "parallel")]
        let outputs = self
            .terms
            .par_iter_mut()
            .map(|term| evaluate_term(term, request))
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(not(feature = "parallel"))]
        let outputs = self
            .terms
            .iter_mut()
            .map(|term| evaluate_term(term, request))
            .collect::<Result<Vec<_>, _>>()?;

        let n_mm = request.n_mm();
        let mut total = Evaluation {
            energy: 0.0,
            gradient: vec![Vector3::zeros(); self.n_atoms],
            esp: Vec::new(),
        };

        for (term, output) in self.terms.iter().zip(outputs) {
            let s = term.scaling_factor;

            if output.gradient.len() != self.n_atoms {
                return Err(QmmmError::shape(
                    format!("gradient of '{}'", term.label),
                    self.n_atoms,
                    output.gradient.len(),
                ));
            }
            if !output.esp.is_empty() && output.esp.len() != n_mm {
                return Err(QmmmError::shape(
                    format!("ESP of '{}'", term.label),
                    n_mm,
                    output.esp.len(),
                ));
            }

            total.energy += s * output.energy;
            for (acc, g) in total.gradient.iter_mut().zip(&output.gradient) {
                *acc += g * s;
            }
            if !output.esp.is_empty() {
                if total.esp.is_empty() {
                    total.esp = vec![0.0; n_mm];
                }
                for (acc, v) in total.esp.iter_mut().zip(&output.esp) {
                    *acc += s * v;
                }
            }
            trace!(term = %term.label, energy = output.energy, factor = s, "Engine term evaluated.");
        }

        Ok(total)
    }
}

fn evaluate_term(
    term: &mut EngineTerm,
    request: &EvaluationRequest<'_>,
) -> Result<Evaluation, QmmmError> {
    term.backend
        .evaluate(request)
        .map_err(|source| QmmmError::Engine {
            name: term.label.clone(),
            source,
        })
}
