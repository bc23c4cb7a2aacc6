use crate::core::models::error::SystemError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// The functional form used to scale MM charges as they approach the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchingType {
    /// Full weight up to `swdist`, a C¹ polynomial switch in `r²` down to zero at
    /// `cutoff`.
    #[default]
    Switch,
    /// `(1 - (r/rc)²)²` over the whole range; ignores `swdist`.
    Shift,
    /// Long-range electrostatic correction form `1 - (2t³ - 3t² + 1)²` with
    /// `t = 1 - r/rc`; ignores `swdist`.
    Lrec,
}

impl FromStr for SwitchingType {
    type Err = SystemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "switch" => Ok(SwitchingType::Switch),
            "shift" => Ok(SwitchingType::Shift),
            "lrec" => Ok(SwitchingType::Lrec),
            other => Err(SystemError::Configuration(format!(
                "switching function '{}' is not supported",
                other
            ))),
        }
    }
}

impl fmt::Display for SwitchingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwitchingType::Switch => "switch",
            SwitchingType::Shift => "shift",
            SwitchingType::Lrec => "lrec",
        };
        f.write_str(name)
    }
}

/// A distance-dependent weight `w(d)` in `[0, 1]` together with its derivative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchingFunction {
    kind: SwitchingType,
    cutoff: f64,
    swdist: f64,
}

impl SwitchingFunction {
    /// # Errors
    ///
    /// Returns [`SystemError::Configuration`] if `cutoff` is not positive, if `swdist`
    /// is negative or if `swdist > cutoff`.
    pub fn new(kind: SwitchingType, cutoff: f64, swdist: f64) -> Result<Self, SystemError> {
        if !(cutoff > 0.0) || !cutoff.is_finite() {
            return Err(SystemError::Configuration(format!(
                "cutoff must be a positive finite distance, got {}",
                cutoff
            )));
        }
        if !(swdist >= 0.0) {
            return Err(SystemError::Configuration(format!(
                "swdist must be non-negative, got {}",
                swdist
            )));
        }
        if swdist > cutoff {
            return Err(SystemError::Configuration(format!(
                "swdist ({}) must not exceed cutoff ({})",
                swdist, cutoff
            )));
        }
        Ok(Self {
            kind,
            cutoff,
            swdist,
        })
    }

    pub fn kind(&self) -> SwitchingType {
        self.kind
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn swdist(&self) -> f64 {
        self.swdist
    }

    /// The weight at distance `d`. Zero at and beyond the cutoff.
    pub fn weight(&self, d: f64) -> f64 {
        if d >= self.cutoff {
            return 0.0;
        }
        let rc = self.cutoff;
        match self.kind {
            SwitchingType::Switch => {
                if d <= self.swdist {
                    return 1.0;
                }
                let (rc2, rs2, r2) = (rc * rc, self.swdist * self.swdist, d * d);
                (rc2 - r2).powi(2) * (rc2 + 2.0 * r2 - 3.0 * rs2) / (rc2 - rs2).powi(3)
            }
            SwitchingType::Shift => (1.0 - (d / rc).powi(2)).powi(2),
            SwitchingType::Lrec => {
                let t = 1.0 - d / rc;
                1.0 - (2.0 * t.powi(3) - 3.0 * t.powi(2) + 1.0).powi(2)
            }
        }
    }

    /// `dw/dd` at distance `d`.
    pub fn derivative(&self, d: f64) -> f64 {
        if d >= self.cutoff {
            return 0.0;
        }
        let rc = self.cutoff;
        match self.kind {
            SwitchingType::Switch => {
                if d <= self.swdist {
                    return 0.0;
                }
                let (rc2, rs2, r2) = (rc * rc, self.swdist * self.swdist, d * d);
                -12.0 * d * (r2 - rs2) * (rc2 - r2) / (rc2 - rs2).powi(3)
            }
            SwitchingType::Shift => -4.0 * d / (rc * rc) * (1.0 - (d / rc).powi(2)),
            SwitchingType::Lrec => {
                let t = 1.0 - d / rc;
                let g = 2.0 * t.powi(3) - 3.0 * t.powi(2) + 1.0;
                12.0 * t * (t - 1.0) * g / rc
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn switch(kind: SwitchingType) -> SwitchingFunction {
        SwitchingFunction::new(kind, 10.0, 7.5).unwrap()
    }

    fn numeric_derivative(f: &SwitchingFunction, d: f64) -> f64 {
        let h = 1e-6;
        (f.weight(d + h) - f.weight(d - h)) / (2.0 * h)
    }

    #[test]
    fn switch_is_one_at_swdist_and_zero_at_cutoff() {
        let f = switch(SwitchingType::Switch);
        assert!((f.weight(7.5) - 1.0).abs() < TOLERANCE);
        assert_eq!(f.weight(10.0), 0.0);
        assert_eq!(f.weight(3.0), 1.0);
        assert_eq!(f.weight(12.0), 0.0);
    }

    #[test]
    fn switch_is_monotonically_non_increasing_between_swdist_and_cutoff() {
        let f = switch(SwitchingType::Switch);
        let mut previous = f.weight(7.5);
        for i in 1..=250 {
            let d = 7.5 + 2.5 * i as f64 / 250.0;
            let w = f.weight(d);
            assert!(w <= previous + TOLERANCE, "w({d}) = {w} > {previous}");
            assert!((0.0..=1.0).contains(&w));
            previous = w;
        }
    }

    #[test]
    fn switch_has_continuous_first_derivative_at_both_ends() {
        let f = switch(SwitchingType::Switch);
        assert!(f.derivative(7.5).abs() < TOLERANCE);
        assert!(f.derivative(7.5 + 1e-9).abs() < 1e-6);
        assert!(f.derivative(10.0 - 1e-9).abs() < 1e-6);
    }

    #[test]
    fn analytic_derivatives_match_finite_differences() {
        for kind in [SwitchingType::Switch, SwitchingType::Shift, SwitchingType::Lrec] {
            let f = switch(kind);
            for d in [1.0, 5.0, 8.0, 8.9, 9.7] {
                let analytic = f.derivative(d);
                let numeric = numeric_derivative(&f, d);
                assert!(
                    (analytic - numeric).abs() < 1e-6,
                    "{kind} at {d}: {analytic} vs {numeric}"
                );
            }
        }
    }

    #[test]
    fn shift_and_lrec_vanish_at_cutoff() {
        for kind in [SwitchingType::Shift, SwitchingType::Lrec] {
            let f = switch(kind);
            assert!(f.weight(10.0 - 1e-9).abs() < 1e-6);
            assert_eq!(f.weight(10.0), 0.0);
        }
        assert!((switch(SwitchingType::Lrec).weight(0.0) - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn swdist_greater_than_cutoff_is_rejected() {
        let result = SwitchingFunction::new(SwitchingType::Switch, 8.0, 10.0);
        assert!(matches!(result, Err(SystemError::Configuration(_))));
    }

    #[test]
    fn non_positive_cutoff_is_rejected() {
        assert!(SwitchingFunction::new(SwitchingType::Switch, 0.0, 0.0).is_err());
        assert!(SwitchingFunction::new(SwitchingType::Switch, f64::NAN, 0.0).is_err());
    }

    #[test]
    fn equal_swdist_and_cutoff_degenerates_to_a_hard_cutoff() {
        let f = SwitchingFunction::new(SwitchingType::Switch, 8.0, 8.0).unwrap();
        assert_eq!(f.weight(7.99), 1.0);
        assert_eq!(f.weight(8.0), 0.0);
        assert_eq!(f.derivative(7.99), 0.0);
    }

    #[test]
    fn switching_type_parses_case_insensitively() {
        assert_eq!("SWITCH".parse::<SwitchingType>(), Ok(SwitchingType::Switch));
        assert_eq!("shift".parse::<SwitchingType>(), Ok(SwitchingType::Shift));
        assert_eq!("Lrec".parse::<SwitchingType>(), Ok(SwitchingType::Lrec));
        assert!("cosine".parse::<SwitchingType>().is_err());
    }
}
