use std::collections::HashMap;
use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Tolerance for the weight-sum invariant.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// The fixed parameter set, in frozen order. Weight vectors, raw/normalized
/// maps, and aggregation all index by this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Elo,
    SquadValue,
    Form,
    SquadDepth,
    KeyPlayerAvailability,
    Motivation,
    TacticalMatchup,
    OffensiveRating,
    DefensiveRating,
    H2hPerformance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherBetter,
    LowerBetter,
}

impl Parameter {
    pub const COUNT: usize = 10;

    pub const ALL: [Parameter; Parameter::COUNT] = [
        Parameter::Elo,
        Parameter::SquadValue,
        Parameter::Form,
        Parameter::SquadDepth,
        Parameter::KeyPlayerAvailability,
        Parameter::Motivation,
        Parameter::TacticalMatchup,
        Parameter::OffensiveRating,
        Parameter::DefensiveRating,
        Parameter::H2hPerformance,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable storage/config key.
    pub fn key(self) -> &'static str {
        match self {
            Parameter::Elo => "elo",
            Parameter::SquadValue => "squad_value",
            Parameter::Form => "form",
            Parameter::SquadDepth => "squad_depth",
            Parameter::KeyPlayerAvailability => "key_player_availability",
            Parameter::Motivation => "motivation",
            Parameter::TacticalMatchup => "tactical_matchup",
            Parameter::OffensiveRating => "offensive_rating",
            Parameter::DefensiveRating => "defensive_rating",
            Parameter::H2hPerformance => "h2h_performance",
        }
    }

    pub fn from_key(key: &str) -> Option<Parameter> {
        Parameter::ALL.into_iter().find(|p| p.key() == key)
    }

    pub fn default_weight(self) -> f64 {
        match self {
            Parameter::Elo => 0.18,
            Parameter::SquadValue => 0.15,
            Parameter::Form => 0.05,
            Parameter::SquadDepth => 0.02,
            Parameter::KeyPlayerAvailability => 0.10,
            Parameter::Motivation => 0.10,
            Parameter::TacticalMatchup => 0.10,
            Parameter::OffensiveRating => 0.10,
            Parameter::DefensiveRating => 0.10,
            Parameter::H2hPerformance => 0.10,
        }
    }

    /// All current parameters score higher-is-better; the normalizer still
    /// honors the direction so lower-is-better inputs invert cleanly.
    pub fn direction(self) -> Direction {
        Direction::HigherBetter
    }

    /// Admissible raw range. Values outside are rejected as invalid.
    pub fn admissible_range(self) -> (f64, f64) {
        match self {
            Parameter::Elo => (0.0, 4000.0),
            Parameter::SquadValue => (0.0, f64::MAX),
            Parameter::Form => (0.0, 20.0),
            Parameter::SquadDepth => (0.0, 10.0),
            Parameter::KeyPlayerAvailability => (0.0, 1.0),
            Parameter::Motivation => (0.0, 1.0),
            Parameter::TacticalMatchup => (0.0, 1.0),
            Parameter::OffensiveRating => (0.0, 20.0),
            Parameter::DefensiveRating => (0.0, 1.0),
            Parameter::H2hPerformance => (0.0, 100.0),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-parameter value map with the frozen order baked in. `None` means the
/// value has not been produced (or could not be), never a sentinel number.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamMap {
    values: [Option<f64>; Parameter::COUNT],
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, param: Parameter) -> Option<f64> {
        self.values[param.index()]
    }

    pub fn set(&mut self, param: Parameter, value: Option<f64>) {
        self.values[param.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Parameter, Option<f64>)> + '_ {
        Parameter::ALL.into_iter().map(|p| (p, self.get(p)))
    }

    pub fn present(&self) -> impl Iterator<Item = (Parameter, f64)> + '_ {
        self.iter().filter_map(|(p, v)| v.map(|v| (p, v)))
    }

    pub fn missing(&self) -> Vec<Parameter> {
        self.iter()
            .filter_map(|(p, v)| v.is_none().then_some(p))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.values.iter().all(|v| v.is_some())
    }
}

impl FromIterator<(Parameter, f64)> for ParamMap {
    fn from_iter<T: IntoIterator<Item = (Parameter, f64)>>(iter: T) -> Self {
        let mut map = ParamMap::new();
        for (param, value) in iter {
            map.set(param, Some(value));
        }
        map
    }
}

/// Active weight vector. Weights are fixed for the lifetime of a refresh
/// cycle; construction enforces the sum invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    weights: [f64; Parameter::COUNT],
}

impl Weights {
    pub fn standard() -> Self {
        let mut weights = [0.0; Parameter::COUNT];
        for param in Parameter::ALL {
            weights[param.index()] = param.default_weight();
        }
        Self { weights }
    }

    /// Build from explicit per-parameter weights. Unknown keys and a weight
    /// sum off by more than `WEIGHT_SUM_EPSILON` are configuration errors.
    pub fn from_map(map: &HashMap<String, f64>) -> Result<Self> {
        let mut weights = [0.0; Parameter::COUNT];
        for (key, weight) in map {
            let param = Parameter::from_key(key)
                .ok_or_else(|| anyhow!("unknown parameter in weights: {key}"))?;
            if *weight < 0.0 {
                return Err(anyhow!("negative weight for {key}: {weight}"));
            }
            weights[param.index()] = *weight;
        }
        let out = Self { weights };
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> Result<()> {
        let sum: f64 = self.weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(anyhow!("weights must sum to 1.0, got {sum}"));
        }
        Ok(())
    }

    pub fn get(&self, param: Parameter) -> f64 {
        self.weights[param.index()]
    }

    /// Parameters carrying positive weight, in frozen order.
    pub fn active(&self) -> impl Iterator<Item = (Parameter, f64)> + '_ {
        Parameter::ALL
            .into_iter()
            .filter_map(|p| (self.get(p) > 0.0).then(|| (p, self.get(p))))
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self::standard()
    }
}
