//! Emission spectra.
//!
//! A spectrum is a list of (wavelength, power) lines. Bodies use it for
//! passive sensing and radiation damage; beams carry one so receivers can
//! fingerprint the emitter.

use std::f64::consts::PI;

use rand::Rng;

use crate::{
    codec::{CodecError, FieldMap, Value},
    math::almost_zero,
};

/// One emission line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumComponent {
    /// Metres. Green light is about `550e-9`.
    pub wavelength: f64,
    /// Watts.
    pub power: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Spectrum {
    pub components: Vec<SpectrumComponent>,
}

impl Spectrum {
    pub fn new(components: Vec<SpectrumComponent>) -> Self {
        Self { components }
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn total_power(&self) -> f64 {
        self.components.iter().map(|c| c.power).sum()
    }

    /// Square of the distance inside which radiated power density exceeds `cutoff` (W/m²).
    pub fn safe_distance_sq(&self, cutoff: f64) -> f64 {
        self.total_power() / (4.0 * PI * cutoff)
    }

    /// Copy with every line's power multiplied by `scale`.
    pub fn scaled(&self, scale: f64) -> Self {
        Self {
            components: self
                .components
                .iter()
                .map(|c| SpectrumComponent {
                    wavelength: c.wavelength,
                    power: c.power * scale,
                })
                .collect(),
        }
    }

    /// Jitters each line by up to `slush` of its power so no two received
    /// signatures are identical. Near-zero lines are lifted to a small random
    /// value rather than scaled, so they cannot be erased.
    pub fn perturb<R: Rng + ?Sized>(&mut self, rng: &mut R, slush: f64) {
        if slush <= 0.0 {
            return;
        }
        for c in &mut self.components {
            let factor = rng.gen_range(1.0 - slush..=1.0 + slush);
            if c.power.abs() < slush {
                c.power = (factor - 1.0 + slush) / 2.0;
            } else {
                c.power *= factor;
            }
        }
    }

    /// Adds `other` line by line; matching wavelengths sum their power.
    pub fn combine(&mut self, other: &Spectrum) {
        for inc in &other.components {
            match self
                .components
                .iter_mut()
                .find(|c| almost_zero(c.wavelength - inc.wavelength))
            {
                Some(c) => c.power += inc.power,
                None => self.components.push(*inc),
            }
        }
    }

    pub fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        for (i, c) in self.components.iter().enumerate() {
            let mut line = FieldMap::new();
            line.push(0, Value::Float(c.wavelength));
            line.push(1, Value::Float(c.power));
            map.push(i as u16, Value::Map(line));
        }
        map
    }

    pub fn from_fields(map: &FieldMap) -> Result<Self, CodecError> {
        let mut components = Vec::with_capacity(map.len());
        for (_, v) in map.iter() {
            let Value::Map(line) = v else {
                return Err(CodecError::malformed("spectrum line is not a map"));
            };
            let wavelength = line
                .float(0)?
                .ok_or_else(|| CodecError::malformed("spectrum line missing wavelength"))?;
            let power = line
                .float(1)?
                .ok_or_else(|| CodecError::malformed("spectrum line missing power"))?;
            components.push(SpectrumComponent { wavelength, power });
        }
        Ok(Self { components })
    }
}

impl From<Spectrum> for Value {
    fn from(s: Spectrum) -> Self {
        Value::Map(s.to_fields())
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn line(wavelength: f64, power: f64) -> SpectrumComponent {
        SpectrumComponent { wavelength, power }
    }

    #[test]
    fn combine_merges_matching_wavelengths() {
        let mut a = Spectrum::new(vec![line(500e-9, 10.0), line(600e-9, 1.0)]);
        a.combine(&Spectrum::new(vec![line(500e-9, 5.0), line(700e-9, 2.0)]));
        assert_eq!(a.components.len(), 3);
        assert_eq!(a.components[0].power, 15.0);
        assert_eq!(a.total_power(), 18.0);
    }

    #[test]
    fn perturb_stays_within_slush() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut s = Spectrum::new(vec![line(500e-9, 100.0), line(600e-9, 0.0)]);
        s.perturb(&mut rng, 0.01);
        assert!((s.components[0].power - 100.0).abs() <= 1.0 + 1e-9);
        assert!(s.components[1].power >= 0.0 && s.components[1].power <= 0.01 + 1e-12);
    }

    #[test]
    fn safe_distance_scales_with_power() {
        let s = Spectrum::new(vec![line(1e-6, 4.0 * PI)]);
        assert!((s.safe_distance_sq(1.0) - 1.0).abs() < 1e-12);
    }
}
