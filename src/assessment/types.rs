use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// Every measurement a report can yield. Serialized with the camelCase keys
/// consumers of the results table expect (`stjDiameter`, `icd4mm`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    StjDiameter,
    AnnulusDiameter,
    AnnulusArea,
    AnnulusPerimeter,
    AnnulusPerimeterDerivedDiameter,
    LvotDiameter,
    AscAortaDiameter,
    RcaHeight,
    LcaHeight,
    SovHeight,
    SovLeftDiameter,
    SovRightDiameter,
    SovNonDiameter,
    AorticValveAnatomyType,
    CalciumScore,
    Icd4mm,
    Icd6mm,
    Icd8mm,
}

impl Field {
    /// Results-table key.
    pub fn key(&self) -> &'static str {
        match self {
            Self::StjDiameter => "stjDiameter",
            Self::AnnulusDiameter => "annulusDiameter",
            Self::AnnulusArea => "annulusArea",
            Self::AnnulusPerimeter => "annulusPerimeter",
            Self::AnnulusPerimeterDerivedDiameter => "annulusPerimeterDerivedDiameter",
            Self::LvotDiameter => "lvotDiameter",
            Self::AscAortaDiameter => "ascAortaDiameter",
            Self::RcaHeight => "rcaHeight",
            Self::LcaHeight => "lcaHeight",
            Self::SovHeight => "sovHeight",
            Self::SovLeftDiameter => "sovLeftDiameter",
            Self::SovRightDiameter => "sovRightDiameter",
            Self::SovNonDiameter => "sovNonDiameter",
            Self::AorticValveAnatomyType => "aorticValveAnatomyType",
            Self::CalciumScore => "calciumScore",
            Self::Icd4mm => "icd4mm",
            Self::Icd6mm => "icd6mm",
            Self::Icd8mm => "icd8mm",
        }
    }

    /// Label as printed in reports and review output.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::StjDiameter => "STJ Diameter",
            Self::AnnulusDiameter => "Annulus Diameter",
            Self::AnnulusArea => "Annulus Area",
            Self::AnnulusPerimeter => "Annulus Perimeter",
            Self::AnnulusPerimeterDerivedDiameter => "Annulus Perimeter Derived Diameter",
            Self::LvotDiameter => "LVOT Diameter",
            Self::AscAortaDiameter => "Asc Aorta Diameter",
            Self::RcaHeight => "RCA Height",
            Self::LcaHeight => "LCA Height",
            Self::SovHeight => "SOV Height",
            Self::SovLeftDiameter => "SOV Left Diameter",
            Self::SovRightDiameter => "SOV Right Diameter",
            Self::SovNonDiameter => "SOV Non Diameter",
            Self::AorticValveAnatomyType => "Aortic Valve Anatomy Type",
            Self::CalciumScore => "Calcium Score",
            Self::Icd4mm => "ICD @4mm",
            Self::Icd6mm => "ICD @6mm",
            Self::Icd8mm => "ICD @8mm",
        }
    }

    pub fn unit(&self) -> Option<Unit> {
        match self {
            Self::AorticValveAnatomyType => None,
            Self::AnnulusArea => Some(Unit::SquareMillimetre),
            Self::CalciumScore => Some(Unit::CubicMillimetre),
            _ => Some(Unit::Millimetre),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Millimetre,
    SquareMillimetre,
    CubicMillimetre,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Millimetre => "mm",
            Self::SquareMillimetre => "mm²",
            Self::CubicMillimetre => "mm³",
        }
    }
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// How a measurement was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementSource {
    /// Regex over the embedded page text.
    Text,
    /// Anchor, highlight, crop and OCR.
    Ocr,
}

/// One extracted value, kept exactly as read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub field: Field,
    pub raw: String,
    pub unit: Option<Unit>,
    pub source: MeasurementSource,
}

impl Measurement {
    pub fn new(field: Field, raw: impl Into<String>, source: MeasurementSource) -> Self {
        Self {
            field,
            raw: raw.into(),
            unit: field.unit(),
            source,
        }
    }

    /// Numeric value, if the raw text parses as one.
    pub fn numeric(&self) -> Option<f64> {
        parse_number(&self.raw)
    }
}

// ---------------------------------------------------------------------------
// MeasurementSet
// ---------------------------------------------------------------------------

/// The evaluator's input. Absent or unparseable values are `None`, never zero.
///
/// Deserializes the camelCase JSON produced by extraction or supplied by hand;
/// numbers may arrive as JSON numbers or numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeasurementSet {
    #[serde(deserialize_with = "lenient_number")]
    pub stj_diameter: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub annulus_diameter: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub lvot_diameter: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub asc_aorta_diameter: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub rca_height: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub lca_height: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub sov_height: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub sov_left_diameter: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub sov_right_diameter: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub sov_non_diameter: Option<f64>,
    pub aortic_valve_anatomy_type: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub calcium_score: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub icd4mm: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub icd6mm: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub icd8mm: Option<f64>,
}

impl MeasurementSet {
    /// Fold extracted measurements into an evaluator input. Later entries win.
    pub fn from_measurements(measurements: &[Measurement]) -> Self {
        let mut set = Self::default();
        for m in measurements {
            if m.field == Field::AorticValveAnatomyType {
                set.aortic_valve_anatomy_type = Some(m.raw.clone());
            } else if let Some(slot) = set.numeric_slot(m.field) {
                *slot = m.numeric();
            }
        }
        set
    }

    /// Parse a JSON object. Arrays and scalars are rejected rather than
    /// mapped onto fields by position.
    pub fn from_json(raw: &str) -> Result<Self, AssessmentError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| AssessmentError::MeasurementParse(e.to_string()))?;
        if !value.is_object() {
            return Err(AssessmentError::MeasurementParse(
                "expected a JSON object keyed by field".into(),
            ));
        }
        serde_json::from_value(value).map_err(|e| AssessmentError::MeasurementParse(e.to_string()))
    }

    pub fn numeric(&self, field: Field) -> Option<f64> {
        match field {
            Field::StjDiameter => self.stj_diameter,
            Field::AnnulusDiameter => self.annulus_diameter,
            Field::LvotDiameter => self.lvot_diameter,
            Field::AscAortaDiameter => self.asc_aorta_diameter,
            Field::RcaHeight => self.rca_height,
            Field::LcaHeight => self.lca_height,
            Field::SovHeight => self.sov_height,
            Field::SovLeftDiameter => self.sov_left_diameter,
            Field::SovRightDiameter => self.sov_right_diameter,
            Field::SovNonDiameter => self.sov_non_diameter,
            Field::CalciumScore => self.calcium_score,
            Field::Icd4mm => self.icd4mm,
            Field::Icd6mm => self.icd6mm,
            Field::Icd8mm => self.icd8mm,
            Field::AnnulusArea
            | Field::AnnulusPerimeter
            | Field::AnnulusPerimeterDerivedDiameter
            | Field::AorticValveAnatomyType => None,
        }
    }

    /// Value shown in the results table for a criterion.
    pub fn display_value(&self, field: Field) -> Option<serde_json::Value> {
        if field == Field::AorticValveAnatomyType {
            return self
                .aortic_valve_anatomy_type
                .clone()
                .map(serde_json::Value::String);
        }
        self.numeric(field)
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
    }

    fn numeric_slot(&mut self, field: Field) -> Option<&mut Option<f64>> {
        match field {
            Field::StjDiameter => Some(&mut self.stj_diameter),
            Field::AnnulusDiameter => Some(&mut self.annulus_diameter),
            Field::LvotDiameter => Some(&mut self.lvot_diameter),
            Field::AscAortaDiameter => Some(&mut self.asc_aorta_diameter),
            Field::RcaHeight => Some(&mut self.rca_height),
            Field::LcaHeight => Some(&mut self.lca_height),
            Field::SovHeight => Some(&mut self.sov_height),
            Field::SovLeftDiameter => Some(&mut self.sov_left_diameter),
            Field::SovRightDiameter => Some(&mut self.sov_right_diameter),
            Field::SovNonDiameter => Some(&mut self.sov_non_diameter),
            Field::CalciumScore => Some(&mut self.calcium_score),
            Field::Icd4mm => Some(&mut self.icd4mm),
            Field::Icd6mm => Some(&mut self.icd6mm),
            Field::Icd8mm => Some(&mut self.icd8mm),
            Field::AnnulusArea
            | Field::AnnulusPerimeter
            | Field::AnnulusPerimeterDerivedDiameter
            | Field::AorticValveAnatomyType => None,
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => parse_number(&s),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictStatus {
    #[serde(rename = "Favourable")]
    Favourable,
    #[serde(rename = "Attention Required")]
    AttentionRequired,
    #[serde(rename = "Not Eligible")]
    NotEligible,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Favourable => "Favourable",
            Self::AttentionRequired => "Attention Required",
            Self::NotEligible => "Not Eligible",
        }
    }
}

/// Outcome of one threshold rule.
///
/// At most one margin is set; `NotEligible` carries neither and no threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub favourable_pct: Option<f64>,
    pub attention_pct: Option<f64>,
    pub threshold: Option<String>,
}

impl Verdict {
    pub fn not_eligible() -> Self {
        Self {
            status: VerdictStatus::NotEligible,
            favourable_pct: None,
            attention_pct: None,
            threshold: None,
        }
    }

    pub fn favourable(margin: Option<f64>, threshold: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Favourable,
            favourable_pct: margin,
            attention_pct: None,
            threshold: Some(threshold.into()),
        }
    }

    pub fn attention(margin: Option<f64>, threshold: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::AttentionRequired,
            favourable_pct: None,
            attention_pct: margin,
            threshold: Some(threshold.into()),
        }
    }
}

/// One row of the results table, in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub criteria: Field,
    pub value: Option<serde_json::Value>,
    pub status: VerdictStatus,
    pub favourable_pct: Option<f64>,
    pub attention_pct: Option<f64>,
    pub threshold: Option<String>,
}

// ---------------------------------------------------------------------------
// Number formatting
// ---------------------------------------------------------------------------

/// Shortest round-trip decimal that always shows a fractional part
/// (`25.0`, `12.5`, `28.000000000000004`).
pub fn format_decimal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Round to two decimals the way Python's `round(x, 2)` does: the exact
/// binary value is rounded, and exact ties go to the even cent
/// (`28.125` -> `28.12`, `2.675` -> `2.67`).
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let bits = value.to_bits();
    let sign = if value.is_sign_negative() { -1.0 } else { 1.0 };
    let biased = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & 0x000f_ffff_ffff_ffff;
    let (mantissa, exponent) = if biased == 0 {
        (fraction << 1, -1075)
    } else {
        (fraction | 0x0010_0000_0000_0000, biased - 1075)
    };
    if exponent >= 0 {
        return value;
    }
    let shift = -exponent;
    if shift > 120 {
        return 0.0 * sign;
    }

    // value * 100 == num / den exactly
    let num = mantissa as i128 * 100;
    let den = 1i128 << shift;
    let (q, r) = (num / den, num % den);
    let cents = match (2 * r).cmp(&den) {
        std::cmp::Ordering::Less => q,
        std::cmp::Ordering::Greater => q + 1,
        std::cmp::Ordering::Equal => q + (q & 1),
    };
    sign * cents as f64 / 100.0
}

// ---------------------------------------------------------------------------
// AssessmentError
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum AssessmentError {
    #[error("Invalid measurement set: {0}")]
    MeasurementParse(String),
}
