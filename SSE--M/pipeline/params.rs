use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the sixteen engine inputs, in the order the engine reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    /// Initial mass in solar units.
    Mass,
    /// Metallicity.
    Z,
    /// Maximum evolution time in Myr.
    Tphysf,
    /// Reimers mass-loss coefficient.
    Neta,
    /// Binary enhanced mass loss.
    Bwind,
    /// Helium star mass loss factor.
    Hewind,
    /// Supernova kick dispersion in km/s.
    Sigma,
    /// White dwarf IFMR flag.
    Ifflag,
    /// White dwarf cooling flag.
    Wdflag,
    /// Black hole kick flag.
    Bhflag,
    /// Neutron star / black hole mass prescription flag.
    Nsflag,
    /// Maximum neutron star mass.
    Mxns,
    /// Kick random number seed.
    Idum,
    /// Time-step fraction on the main sequence.
    Pts1,
    /// Time-step fraction on the giant branch.
    Pts2,
    /// Time-step fraction on the helium main sequence.
    Pts3,
}

/// Numeric type a field must coerce to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Double precision real.
    Real,
    /// 32-bit integer.
    Integer,
}

impl FieldKind {
    fn noun(self) -> &'static str {
        match self {
            Self::Real => "real number",
            Self::Integer => "integer",
        }
    }
}

impl Field {
    /// Every field in engine read order.
    pub const ALL: [Self; 16] = [
        Self::Mass,
        Self::Z,
        Self::Tphysf,
        Self::Neta,
        Self::Bwind,
        Self::Hewind,
        Self::Sigma,
        Self::Ifflag,
        Self::Wdflag,
        Self::Bhflag,
        Self::Nsflag,
        Self::Mxns,
        Self::Idum,
        Self::Pts1,
        Self::Pts2,
        Self::Pts3,
    ];

    /// Parameter name as users type it.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Mass => "mass",
            Self::Z => "z",
            Self::Tphysf => "tphysf",
            Self::Neta => "neta",
            Self::Bwind => "bwind",
            Self::Hewind => "hewind",
            Self::Sigma => "sigma",
            Self::Ifflag => "ifflag",
            Self::Wdflag => "wdflag",
            Self::Bhflag => "bhflag",
            Self::Nsflag => "nsflag",
            Self::Mxns => "mxns",
            Self::Idum => "idum",
            Self::Pts1 => "pts1",
            Self::Pts2 => "pts2",
            Self::Pts3 => "pts3",
        }
    }

    /// Looks a field up by name, ignoring ASCII case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Declared numeric type.
    #[must_use]
    pub fn kind(self) -> FieldKind {
        match self {
            Self::Ifflag | Self::Wdflag | Self::Bhflag | Self::Nsflag | Self::Idum => {
                FieldKind::Integer
            }
            _ => FieldKind::Real,
        }
    }

    /// Whether the field has no default.
    #[must_use]
    pub fn is_required(self) -> bool {
        matches!(self, Self::Mass | Self::Z | Self::Tphysf)
    }

    /// Help text for front ends.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Mass => "mass is in solar units.",
            Self::Z => "z is metallicity in the range 0.0001 -> 0.03 where 0.02 is Population I.",
            Self::Tphysf => "tphysf is the maximum evolution time in Myr.",
            Self::Neta => {
                "neta is the Reimers mass-loss coefficent (neta*4x10^-13; 0.5 normally)."
            }
            Self::Bwind => "bwind is the binary enhanced mass loss parameter (inactive for single).",
            Self::Hewind => "hewind is a helium star mass loss factor (1.0 normally).",
            Self::Sigma => {
                "sigma is the dispersion in the Maxwellian for the SN kick speed (190 km/s)."
            }
            Self::Ifflag => "ifflag > 0 uses WD IFMR of HPE, 1995, MNRAS, 272, 800 (0).",
            Self::Wdflag => "wdflag > 0 uses modified-Mestel cooling for WDs (0).",
            Self::Bhflag => "bhflag > 0 allows velocity kick at BH formation (0).",
            Self::Nsflag => {
                "nsflag > 0 takes NS/BH mass from Belczynski et al. 2002, ApJ, 572, 407 (1)."
            }
            Self::Mxns => "mxns is the maximum NS mass (1.8, nsflag=0; 3.0, nsflag=1).",
            Self::Idum => "idum is the random number seed used in the kick routine.",
            Self::Pts1 => "pts1 is the time-step fraction for MS evolution (0.05).",
            Self::Pts2 => "pts2 is the time-step fraction for GB, CHeB, AGB, HeGB evolution (0.01).",
            Self::Pts3 => "pts3 is the time-step fraction for HG, HeMS evolution (0.02).",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed field value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Real-valued field.
    Real(f64),
    /// Integer-valued field.
    Integer(i32),
}

/// Parameter coercion failures.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterError {
    /// Name does not match any field.
    #[error("unknown parameter `{0}`")]
    Unknown(String),
    /// A required field was not supplied.
    #[error("missing required parameter `{0}`")]
    Missing(String),
    /// A field was supplied twice.
    #[error("parameter `{0}` given more than once")]
    Duplicate(String),
    /// Text could not be coerced to the field's type.
    #[error("parameter `{field}` expects {expected}, got `{value}`")]
    NotNumeric {
        /// Field name.
        field: String,
        /// Expected numeric type.
        expected: String,
        /// Offending text.
        value: String,
    },
    /// NaN or infinity.
    #[error("parameter `{field}` must be finite, got {value}")]
    NonFinite {
        /// Field name.
        field: String,
        /// Offending value.
        value: f64,
    },
    /// Value of the wrong numeric type assigned to a field.
    #[error("parameter `{field}` expects {expected}")]
    WrongKind {
        /// Field name.
        field: String,
        /// Expected numeric type.
        expected: String,
    },
    /// Serialized input does not follow the engine layout.
    #[error("malformed engine input: {0}")]
    Layout(String),
}

/// Validated inputs of one single-star evolution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Initial mass in solar units.
    pub mass: f64,
    /// Metallicity, 0.0001 to 0.03.
    pub z: f64,
    /// Maximum evolution time in Myr.
    pub tphysf: f64,
    /// Reimers mass-loss coefficient.
    #[serde(default = "defaults::neta")]
    pub neta: f64,
    /// Binary enhanced mass loss parameter.
    #[serde(default)]
    pub bwind: f64,
    /// Helium star mass loss factor.
    #[serde(default = "defaults::hewind")]
    pub hewind: f64,
    /// Supernova kick dispersion in km/s.
    #[serde(default = "defaults::sigma")]
    pub sigma: f64,
    /// White dwarf IFMR flag.
    #[serde(default)]
    pub ifflag: i32,
    /// White dwarf cooling flag.
    #[serde(default = "defaults::wdflag")]
    pub wdflag: i32,
    /// Black hole kick flag.
    #[serde(default)]
    pub bhflag: i32,
    /// NS/BH mass prescription flag.
    #[serde(default = "defaults::nsflag")]
    pub nsflag: i32,
    /// Maximum neutron star mass.
    #[serde(default = "defaults::mxns")]
    pub mxns: f64,
    /// Kick random number seed.
    #[serde(default = "defaults::idum")]
    pub idum: i32,
    /// MS time-step fraction.
    #[serde(default = "defaults::pts1")]
    pub pts1: f64,
    /// Giant branch time-step fraction.
    #[serde(default = "defaults::pts2")]
    pub pts2: f64,
    /// HG / HeMS time-step fraction.
    #[serde(default = "defaults::pts3")]
    pub pts3: f64,
}

mod defaults {
    pub(super) const fn neta() -> f64 {
        0.5
    }
    pub(super) const fn hewind() -> f64 {
        0.5
    }
    pub(super) const fn sigma() -> f64 {
        190.0
    }
    pub(super) const fn wdflag() -> i32 {
        1
    }
    pub(super) const fn nsflag() -> i32 {
        1
    }
    pub(super) const fn mxns() -> f64 {
        3.0
    }
    pub(super) const fn idum() -> i32 {
        999
    }
    pub(super) const fn pts1() -> f64 {
        0.05
    }
    pub(super) const fn pts2() -> f64 {
        0.01
    }
    pub(super) const fn pts3() -> f64 {
        0.02
    }
}

impl ParameterSet {
    /// Creates a set with the three required inputs and defaults for the rest.
    #[must_use]
    pub fn new(mass: f64, z: f64, tphysf: f64) -> Self {
        Self {
            mass,
            z,
            tphysf,
            neta: defaults::neta(),
            bwind: 0.0,
            hewind: defaults::hewind(),
            sigma: defaults::sigma(),
            ifflag: 0,
            wdflag: defaults::wdflag(),
            bhflag: 0,
            nsflag: defaults::nsflag(),
            mxns: defaults::mxns(),
            idum: defaults::idum(),
            pts1: defaults::pts1(),
            pts2: defaults::pts2(),
            pts3: defaults::pts3(),
        }
    }

    /// Reads one field.
    #[must_use]
    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::Mass => FieldValue::Real(self.mass),
            Field::Z => FieldValue::Real(self.z),
            Field::Tphysf => FieldValue::Real(self.tphysf),
            Field::Neta => FieldValue::Real(self.neta),
            Field::Bwind => FieldValue::Real(self.bwind),
            Field::Hewind => FieldValue::Real(self.hewind),
            Field::Sigma => FieldValue::Real(self.sigma),
            Field::Ifflag => FieldValue::Integer(self.ifflag),
            Field::Wdflag => FieldValue::Integer(self.wdflag),
            Field::Bhflag => FieldValue::Integer(self.bhflag),
            Field::Nsflag => FieldValue::Integer(self.nsflag),
            Field::Mxns => FieldValue::Real(self.mxns),
            Field::Idum => FieldValue::Integer(self.idum),
            Field::Pts1 => FieldValue::Real(self.pts1),
            Field::Pts2 => FieldValue::Real(self.pts2),
            Field::Pts3 => FieldValue::Real(self.pts3),
        }
    }

    /// Writes one field; the value must match the field's declared kind.
    pub fn set(&mut self, field: Field, value: FieldValue) -> Result<(), ParameterError> {
        match (field.kind(), value) {
            (FieldKind::Real, FieldValue::Real(v)) => {
                let slot = match field {
                    Field::Mass => &mut self.mass,
                    Field::Z => &mut self.z,
                    Field::Tphysf => &mut self.tphysf,
                    Field::Neta => &mut self.neta,
                    Field::Bwind => &mut self.bwind,
                    Field::Hewind => &mut self.hewind,
                    Field::Sigma => &mut self.sigma,
                    Field::Mxns => &mut self.mxns,
                    Field::Pts1 => &mut self.pts1,
                    Field::Pts2 => &mut self.pts2,
                    _ => &mut self.pts3,
                };
                *slot = v;
            }
            (FieldKind::Integer, FieldValue::Integer(v)) => {
                let slot = match field {
                    Field::Ifflag => &mut self.ifflag,
                    Field::Wdflag => &mut self.wdflag,
                    Field::Bhflag => &mut self.bhflag,
                    Field::Nsflag => &mut self.nsflag,
                    _ => &mut self.idum,
                };
                *slot = v;
            }
            (kind, _) => {
                return Err(ParameterError::WrongKind {
                    field: field.name().into(),
                    expected: kind.noun().into(),
                })
            }
        }
        Ok(())
    }

    /// Builder-style form of [`Self::set`].
    pub fn with(mut self, field: Field, value: FieldValue) -> Result<Self, ParameterError> {
        self.set(field, value)?;
        Ok(self)
    }

    /// All fields in engine read order.
    #[must_use]
    pub fn fields(&self) -> IndexMap<Field, FieldValue> {
        Field::ALL
            .into_iter()
            .map(|field| (field, self.get(field)))
            .collect()
    }

    /// Checks that every real field is finite. Ranges are left to the engine.
    pub fn validate(&self) -> Result<(), ParameterError> {
        for (field, value) in self.fields() {
            if let FieldValue::Real(v) = value {
                if !v.is_finite() {
                    return Err(ParameterError::NonFinite {
                        field: field.name().into(),
                        value: v,
                    });
                }
            }
        }
        Ok(())
    }

    /// Builds a set from textual `(name, value)` pairs, as chat or CLI front ends deliver them.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ParameterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut given: IndexMap<Field, FieldValue> = IndexMap::new();
        for (name, text) in pairs {
            let name = name.as_ref();
            let field =
                Field::from_name(name).ok_or_else(|| ParameterError::Unknown(name.to_string()))?;
            let value = coerce(field, text.as_ref())?;
            if given.insert(field, value).is_some() {
                return Err(ParameterError::Duplicate(field.name().into()));
            }
        }
        let mut params = Self::new(0.0, 0.0, 0.0);
        for field in Field::ALL {
            match given.get(&field) {
                Some(value) => params.set(field, *value)?,
                None if field.is_required() => {
                    return Err(ParameterError::Missing(field.name().into()))
                }
                None => {}
            }
        }
        params.validate()?;
        Ok(params)
    }
}

/// Coerces text to the numeric type of `field`.
///
/// Integer fields also accept integral reals such as `1.0`.
pub fn coerce(field: Field, text: &str) -> Result<FieldValue, ParameterError> {
    let trimmed = text.trim();
    let not_numeric = || ParameterError::NotNumeric {
        field: field.name().into(),
        expected: field.kind().noun().into(),
        value: text.to_string(),
    };
    match field.kind() {
        FieldKind::Real => {
            let value: f64 = trimmed
                .replace(['d', 'D'], "e")
                .parse()
                .map_err(|_| not_numeric())?;
            if value.is_finite() {
                Ok(FieldValue::Real(value))
            } else {
                Err(ParameterError::NonFinite {
                    field: field.name().into(),
                    value,
                })
            }
        }
        FieldKind::Integer => {
            if let Ok(value) = trimmed.parse::<i32>() {
                return Ok(FieldValue::Integer(value));
            }
            let real: f64 = trimmed
                .replace(['d', 'D'], "e")
                .parse()
                .map_err(|_| not_numeric())?;
            if real.fract() == 0.0 && real >= f64::from(i32::MIN) && real <= f64::from(i32::MAX) {
                #[allow(clippy::cast_possible_truncation)]
                let value = real as i32;
                Ok(FieldValue::Integer(value))
            } else {
                Err(not_numeric())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_command_surface() {
        let params = ParameterSet::new(1.0, 0.02, 10_000.0);
        assert_eq!(params.neta, 0.5);
        assert_eq!(params.bwind, 0.0);
        assert_eq!(params.hewind, 0.5);
        assert_eq!(params.sigma, 190.0);
        assert_eq!(
            (params.ifflag, params.wdflag, params.bhflag, params.nsflag),
            (0, 1, 0, 1)
        );
        assert_eq!(params.mxns, 3.0);
        assert_eq!(params.idum, 999);
        assert_eq!((params.pts1, params.pts2, params.pts3), (0.05, 0.01, 0.02));
    }

    #[test]
    fn fortran_exponents_coerce_for_both_kinds() {
        assert_eq!(coerce(Field::Idum, "1d0"), Ok(FieldValue::Integer(1)));
        assert_eq!(coerce(Field::Idum, "-5D2"), Ok(FieldValue::Integer(-500)));
        assert_eq!(coerce(Field::Wdflag, "1.0e0"), Ok(FieldValue::Integer(1)));
        assert_eq!(coerce(Field::Mass, "1d0"), Ok(FieldValue::Real(1.0)));
        assert!(matches!(
            coerce(Field::Idum, "1.5d0"),
            Err(ParameterError::NotNumeric { .. })
        ));
        assert!(matches!(
            coerce(Field::Idum, "day"),
            Err(ParameterError::NotNumeric { .. })
        ));
    }

    #[test]
    fn builder_setters_check_kinds() {
        let params = ParameterSet::new(8.0, 0.02, 100.0)
            .with(Field::Sigma, FieldValue::Real(265.0))
            .and_then(|p| p.with(Field::Idum, FieldValue::Integer(-3)))
            .unwrap();
        assert_eq!((params.sigma, params.idum), (265.0, -3));
        assert!(matches!(
            params.with(Field::Bhflag, FieldValue::Real(1.0)),
            Err(ParameterError::WrongKind { .. })
        ));
    }

    #[test]
    fn serde_fills_secondary_defaults() {
        let params: ParameterSet =
            serde_json::from_str(r#"{"mass": 2.5, "z": 0.001, "tphysf": 500, "idum": 7}"#)
                .unwrap();
        let mut expected = ParameterSet::new(2.5, 0.001, 500.0);
        expected.idum = 7;
        assert_eq!(params, expected);
    }

    #[test]
    fn pairs_are_coerced_by_declared_type() {
        let params = ParameterSet::from_pairs([
            ("mass", "1.0"),
            ("Z", " 0.02 "),
            ("tphysf", "1d4"),
            ("wdflag", "0"),
            ("nsflag", "0.0"),
        ])
        .unwrap();
        assert_eq!(params.tphysf, 10_000.0);
        assert_eq!(params.wdflag, 0);
        assert_eq!(params.nsflag, 0);
        assert_eq!(params.sigma, 190.0);
    }

    #[test]
    fn pairs_reject_bad_input() {
        assert_eq!(
            ParameterSet::from_pairs([("mass", "1"), ("z", "0.02")]),
            Err(ParameterError::Missing("tphysf".into()))
        );
        assert!(matches!(
            ParameterSet::from_pairs([("mass", "heavy"), ("z", "0.02"), ("tphysf", "1")]),
            Err(ParameterError::NotNumeric { .. })
        ));
        assert!(matches!(
            ParameterSet::from_pairs([("mass", "1"), ("z", "0.02"), ("tphysf", "1"), ("idum", "2.5")]),
            Err(ParameterError::NotNumeric { .. })
        ));
        assert!(matches!(
            ParameterSet::from_pairs([("mass", "inf"), ("z", "0.02"), ("tphysf", "1")]),
            Err(ParameterError::NonFinite { .. })
        ));
        assert_eq!(
            ParameterSet::from_pairs([("mass", "1"), ("mass", "2")]),
            Err(ParameterError::Duplicate("mass".into()))
        );
        assert_eq!(
            ParameterSet::from_pairs([("spin", "1")]),
            Err(ParameterError::Unknown("spin".into()))
        );
    }

    #[test]
    fn out_of_range_values_pass_through() {
        let params =
            ParameterSet::from_pairs([("mass", "-5.0"), ("z", "0.5"), ("tphysf", "1")]).unwrap();
        assert_eq!(params.mass, -5.0);
        assert_eq!(params.z, 0.5);
    }

    #[test]
    fn set_rejects_mismatched_kinds() {
        let mut params = ParameterSet::new(1.0, 0.02, 1.0);
        assert!(params.set(Field::Idum, FieldValue::Real(1.0)).is_err());
        params.set(Field::Idum, FieldValue::Integer(-3)).unwrap();
        params.set(Field::Pts3, FieldValue::Real(0.5)).unwrap();
        assert_eq!(params.get(Field::Idum), FieldValue::Integer(-3));
        assert_eq!(params.pts3, 0.5);
    }

    #[test]
    fn fields_follow_engine_order() {
        let names: Vec<_> = ParameterSet::new(1.0, 0.02, 1.0)
            .fields()
            .keys()
            .map(|field| field.name())
            .collect();
        assert_eq!(names.first(), Some(&"mass"));
        assert_eq!(names.last(), Some(&"pts3"));
        assert_eq!(names.len(), 16);
    }
}
