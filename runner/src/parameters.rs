use serde::{
    de::{self, MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{collections::BTreeMap, fmt};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("At least one parameter has to be defined")]
    Empty,
    #[error("Parameter {0} is defined more than once")]
    Duplicate(String),
    #[error("Parameter {name} has invalid bounds [{lower}, {upper}]")]
    InvalidBounds { name: String, lower: f64, upper: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

impl Parameter {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Ordered, immutable mapping of parameter name -> (index, lower, upper)
///
/// The index of a parameter is its position in the definition order, solvers and archives only
/// ever see plain vectors indexed this way.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    parameters: Vec<Parameter>,
    indices: BTreeMap<String, usize>,
}

impl ParameterSpace {
    pub fn new<I, S>(bounds: I) -> Result<Self, ParameterError>
    where
        I: IntoIterator<Item = (S, [f64; 2])>,
        S: Into<String>,
    {
        let mut parameters = Vec::new();
        let mut indices = BTreeMap::new();

        for (name, [lower, upper]) in bounds {
            let name = name.into();

            if !(lower.is_finite() && upper.is_finite() && lower <= upper) {
                return Err(ParameterError::InvalidBounds { name, lower, upper });
            }

            if indices.insert(name.clone(), parameters.len()).is_some() {
                return Err(ParameterError::Duplicate(name));
            }

            parameters.push(Parameter { name, lower, upper });
        }

        if parameters.is_empty() {
            Err(ParameterError::Empty)
        } else {
            Ok(Self {
                parameters,
                indices,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .map(|parameter| parameter.name.as_str())
            .collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.index_of(name).map(|index| &self.parameters[index])
    }

    pub fn lower_bounds(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.lower).collect()
    }

    pub fn upper_bounds(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.upper).collect()
    }

    /// true if the point has the right dimension and lies within all bounds
    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.len()
            && self
                .parameters
                .iter()
                .zip(point)
                .all(|(parameter, value)| parameter.contains(*value))
    }

    /// true if both spaces use the same names in the same order
    pub fn same_layout(&self, other: &Self) -> bool {
        self.names() == other.names()
    }
}

impl Serialize for ParameterSpace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;

        for parameter in self.parameters.iter() {
            map.serialize_entry(&parameter.name, &[parameter.lower, parameter.upper])?;
        }

        map.end()
    }
}

struct ParameterSpaceVisitor;

impl<'de> Visitor<'de> for ParameterSpaceVisitor {
    type Value = ParameterSpace;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a mapping of parameter names to [lower, upper]")
    }

    fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Self::Value, M::Error> {
        // keep document order, it defines the parameter indices
        let mut bounds = Vec::with_capacity(access.size_hint().unwrap_or(0));

        while let Some((name, interval)) = access.next_entry::<String, [f64; 2]>()? {
            bounds.push((name, interval));
        }

        ParameterSpace::new(bounds).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ParameterSpace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ParameterSpaceVisitor)
    }
}
