//! Declared parameter schemas and the tri-state parameter values that flow
//! from raw (form/CLI) input into an algorithm call.
//!
//! A parameter is always in exactly one of three states:
//! - `Unspecified`: left out of the call, the algorithm uses its own default;
//! - `ExplicitNull`: passed, but with an explicit "no value";
//! - `ExplicitValue(v)`: passed with a value of the declared kind.

use crate::error::{LabError, LabResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::num::IntErrorKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    Int {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Real {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Bool,
    Choice { options: Vec<String> },
}

impl ParamKind {
    pub fn label(&self) -> String {
        match self {
            ParamKind::Int { min, max } => format!("int{}", bounds_label(min, max)),
            ParamKind::Real { min, max } => format!("real{}", bounds_label(min, max)),
            ParamKind::Bool => "bool".into(),
            ParamKind::Choice { options } => format!("one of {}", options.join("|")),
        }
    }
}

fn bounds_label<N: fmt::Display>(min: &Option<N>, max: &Option<N>) -> String {
    match (min, max) {
        (None, None) => String::new(),
        (Some(lo), None) => format!(" >= {lo}"),
        (None, Some(hi)) => format!(" <= {hi}"),
        (Some(lo), Some(hi)) => format!(" in [{lo}, {hi}]"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(flatten)]
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl ParamDecl {
    pub fn int(name: &str, min: Option<i64>, max: Option<i64>) -> Self {
        Self::new(name, ParamKind::Int { min, max })
    }

    pub fn real(name: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self::new(name, ParamKind::Real { min, max })
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ParamKind::Bool)
    }

    pub fn choice(name: &str, options: &[&str]) -> Self {
        Self::new(
            name,
            ParamKind::Choice {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        )
    }

    fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            help: None,
        }
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    /// Parse one textual value into the declared kind.
    fn parse(&self, text: &str) -> LabResult<TypedValue> {
        let text = text.trim();
        let value = match &self.kind {
            ParamKind::Int { .. } => match text.parse::<i64>() {
                Ok(v) => TypedValue::Int(v),
                Err(e) => {
                    return Err(match e.kind() {
                        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                            LabError::out_of_range(&self.name, format!("`{text}` overflows i64"))
                        }
                        _ => LabError::invalid(&self.name, format!("`{text}` is not an integer")),
                    })
                }
            },
            ParamKind::Real { .. } => match text.parse::<f64>() {
                Ok(v) => TypedValue::Real(v),
                Err(_) => {
                    return Err(LabError::invalid(
                        &self.name,
                        format!("`{text}` is not a number"),
                    ))
                }
            },
            ParamKind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => TypedValue::Bool(true),
                "false" | "no" | "0" => TypedValue::Bool(false),
                _ => {
                    return Err(LabError::invalid(
                        &self.name,
                        format!("`{text}` is not a boolean"),
                    ))
                }
            },
            ParamKind::Choice { .. } => TypedValue::Choice(text.to_string()),
        };
        self.check(value)
    }

    /// Check an already-typed value against the declaration, widening ints
    /// to reals where the declaration asks for a real.
    fn check(&self, value: TypedValue) -> LabResult<TypedValue> {
        match (&self.kind, value) {
            (ParamKind::Int { min, max }, TypedValue::Int(v)) => {
                if min.is_some_and(|lo| v < lo) || max.is_some_and(|hi| v > hi) {
                    return Err(LabError::out_of_range(
                        &self.name,
                        format!("{v} is not{}", bounds_label(min, max)),
                    ));
                }
                Ok(TypedValue::Int(v))
            }
            (ParamKind::Real { min, max }, TypedValue::Real(v)) => {
                if !v.is_finite() {
                    return Err(LabError::out_of_range(&self.name, "value must be finite"));
                }
                if min.is_some_and(|lo| v < lo) || max.is_some_and(|hi| v > hi) {
                    return Err(LabError::out_of_range(
                        &self.name,
                        format!("{v} is not{}", bounds_label(min, max)),
                    ));
                }
                Ok(TypedValue::Real(v))
            }
            (ParamKind::Real { .. }, TypedValue::Int(v)) => self.check(TypedValue::Real(v as f64)),
            (ParamKind::Bool, TypedValue::Bool(b)) => Ok(TypedValue::Bool(b)),
            (ParamKind::Choice { options }, TypedValue::Choice(s)) => {
                if options.iter().any(|o| *o == s) {
                    Ok(TypedValue::Choice(s))
                } else {
                    Err(LabError::invalid(
                        &self.name,
                        format!("`{s}` is not one of {}", options.join(", ")),
                    ))
                }
            }
            (kind, other) => Err(LabError::invalid(
                &self.name,
                format!("expected {}, got `{other}`", kind.label()),
            )),
        }
    }

    /// Baseline textual value for a fresh editor.
    fn placeholder(&self) -> String {
        match &self.kind {
            ParamKind::Int { .. } => "0".into(),
            ParamKind::Real { .. } => "0.0".into(),
            ParamKind::Bool => "false".into(),
            ParamKind::Choice { options } => options.first().cloned().unwrap_or_default(),
        }
    }
}

/// Ordered parameter declarations of one algorithm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema {
    params: Vec<ParamDecl>,
}

impl ParameterSchema {
    pub fn new(params: Vec<ParamDecl>) -> LabResult<Self> {
        for (i, p) in params.iter().enumerate() {
            if params[..i].iter().any(|q| q.name == p.name) {
                return Err(LabError::DuplicateName {
                    kind: "parameter",
                    name: p.name.clone(),
                });
            }
            if let ParamKind::Choice { options } = &p.kind {
                if options.is_empty() {
                    return Err(LabError::invalid(&p.name, "choice declares no options"));
                }
            }
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &[ParamDecl] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Turn raw editor input into typed values. Parameters missing from
    /// `raw` are `Unspecified`; names the schema does not declare are rejected.
    pub fn coerce(&self, raw: &BTreeMap<String, RawParam>) -> LabResult<ParamValues> {
        self.reject_undeclared(raw.keys())?;
        let mut out = ParamValues::default();
        for decl in &self.params {
            match raw.get(&decl.name) {
                None | Some(RawParam::Unspecified) => {}
                Some(RawParam::Null) => out.set(&decl.name, ParamValue::ExplicitNull),
                Some(RawParam::Text(text)) => {
                    out.set(&decl.name, ParamValue::ExplicitValue(decl.parse(text)?))
                }
            }
        }
        Ok(out)
    }

    /// Re-check already typed values (session restore, reruns) and normalise them.
    pub fn validate(&self, values: &ParamValues) -> LabResult<ParamValues> {
        self.reject_undeclared(values.0.keys())?;
        let mut out = ParamValues::default();
        for decl in &self.params {
            match values.get(&decl.name) {
                ParamValue::Unspecified => {}
                ParamValue::ExplicitNull => out.set(&decl.name, ParamValue::ExplicitNull),
                ParamValue::ExplicitValue(v) => {
                    out.set(&decl.name, ParamValue::ExplicitValue(decl.check(v.clone())?))
                }
            }
        }
        Ok(out)
    }

    /// A baseline raw value for every declared parameter.
    pub fn render_defaults(&self) -> BTreeMap<String, RawParam> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), RawParam::Text(p.placeholder())))
            .collect()
    }

    fn reject_undeclared<'a>(&self, names: impl Iterator<Item = &'a String>) -> LabResult<()> {
        for name in names {
            if self.get(name).is_none() {
                return Err(LabError::invalid(name, "not declared by the algorithm"));
            }
        }
        Ok(())
    }
}

/// Raw editor state of one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawParam {
    Unspecified,
    Null,
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Choice(String),
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Bool(b) => write!(f, "{b}"),
            TypedValue::Int(i) => write!(f, "{i}"),
            TypedValue::Real(r) => write!(f, "{r}"),
            TypedValue::Choice(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Unspecified,
    ExplicitNull,
    ExplicitValue(TypedValue),
}

/// Concrete parameter values of one run.
///
/// `Unspecified` is represented by absence, so two maps describing the same
/// call always compare equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamValues(BTreeMap<String, Option<TypedValue>>);

impl ParamValues {
    pub fn get(&self, name: &str) -> ParamValue {
        match self.0.get(name) {
            None => ParamValue::Unspecified,
            Some(None) => ParamValue::ExplicitNull,
            Some(Some(v)) => ParamValue::ExplicitValue(v.clone()),
        }
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        match value {
            ParamValue::Unspecified => {
                self.0.remove(name);
            }
            ParamValue::ExplicitNull => {
                self.0.insert(name.to_string(), None);
            }
            ParamValue::ExplicitValue(v) => {
                self.0.insert(name.to_string(), Some(v));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The argument map handed to an algorithm body.
    pub fn call_args(&self) -> CallArgs {
        CallArgs(self.0.clone())
    }

    /// Back to editor state, e.g. to pre-fill a rerun.
    pub fn to_raw(&self) -> BTreeMap<String, RawParam> {
        self.0
            .iter()
            .map(|(k, v)| {
                let raw = match v {
                    None => RawParam::Null,
                    Some(v) => RawParam::Text(v.to_string()),
                };
                (k.clone(), raw)
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&TypedValue>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

impl fmt::Display for ParamValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(defaults)");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(k, v)| match v {
                None => format!("{k}=None"),
                Some(v) => format!("{k}={v}"),
            })
            .collect();
        f.write_str(&parts.join(", "))
    }
}

// On disk: unspecified parameters are absent, explicit nulls are `null`.
impl Serialize for ParamValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ParamValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // A plain `Option` would fold `null` into "absent"; keep the distinction.
        let map = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut out = BTreeMap::new();
        for (k, v) in map {
            let value = if v.is_null() {
                None
            } else {
                Some(TypedValue::deserialize(v).map_err(serde::de::Error::custom)?)
            };
            out.insert(k, value);
        }
        Ok(ParamValues(out))
    }
}

/// What an algorithm body receives: unspecified parameters are absent,
/// explicit nulls are present as `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs(BTreeMap<String, Option<TypedValue>>);

impl CallArgs {
    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Option<TypedValue>> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge arguments bound by a plugin descriptor; they win over user input.
    pub fn with_fixed(mut self, fixed: &BTreeMap<String, Option<TypedValue>>) -> Self {
        for (k, v) in fixed {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn int_or(&self, name: &str, default: i64) -> anyhow::Result<i64> {
        match self.0.get(name) {
            None => Ok(default),
            Some(Some(TypedValue::Int(v))) => Ok(*v),
            Some(None) => anyhow::bail!("`{name}` must not be None"),
            Some(Some(other)) => anyhow::bail!("`{name}` must be an integer, got `{other}`"),
        }
    }

    pub fn real_or(&self, name: &str, default: f64) -> anyhow::Result<f64> {
        match self.0.get(name) {
            None => Ok(default),
            Some(Some(TypedValue::Real(v))) => Ok(*v),
            Some(Some(TypedValue::Int(v))) => Ok(*v as f64),
            Some(None) => anyhow::bail!("`{name}` must not be None"),
            Some(Some(other)) => anyhow::bail!("`{name}` must be a number, got `{other}`"),
        }
    }

    pub fn choice_or<'a>(&'a self, name: &str, default: &'a str) -> anyhow::Result<&'a str> {
        match self.0.get(name) {
            None => Ok(default),
            Some(Some(TypedValue::Choice(v))) => Ok(v.as_str()),
            Some(None) => anyhow::bail!("`{name}` must not be None"),
            Some(Some(other)) => anyhow::bail!("`{name}` must be a string, got `{other}`"),
        }
    }
}
