//! Plain-text field extraction from the report's leading pages.
//!
//! One static table maps each field to its pattern and extraction strategy;
//! a single loop applies it. All patterns are case-insensitive.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use super::types::ReportDocument;
use super::ExtractionError;
use crate::assessment::{Field, Measurement, MeasurementSource};
use crate::pipeline_config::TEXT_FIELD_PAGES;

/// How a field's matches become a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStrategy {
    /// Capture group 1 of the first match.
    FirstCapture,
    /// Choose between the first two candidates, skipping a leading severity qualifier.
    AnatomyDisambiguation,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldPattern {
    pub field: Field,
    pub pattern: &'static str,
    pub strategy: FieldStrategy,
}

const fn first(field: Field, pattern: &'static str) -> FieldPattern {
    FieldPattern {
        field,
        pattern,
        strategy: FieldStrategy::FirstCapture,
    }
}

/// Text-extracted fields in extraction order. The calcium score is absent:
/// it is only ever read from the rendered calcification panel.
pub const FIELD_PATTERNS: [FieldPattern; 14] = [
    first(Field::StjDiameter, r"STJ\s*Ø:\s*([\d.]+)\s*mm"),
    first(Field::AnnulusDiameter, r"Area\s*Derived\s*Ø:\s*([\d.]+)\s*mm"),
    first(Field::AnnulusArea, r"Area:\s*([\d.]+)\s*mm²"),
    first(Field::AnnulusPerimeter, r"Perimeter:\s*([\d.]+)\s*mm"),
    first(
        Field::AnnulusPerimeterDerivedDiameter,
        r"Perimeter\s*Derived\s*Ø:\s*([\d.]+)\s*mm",
    ),
    first(Field::LvotDiameter, r"LVOT\s*Ø:\s*([\d.]+)\s*mm"),
    first(Field::AscAortaDiameter, r"Asc\.\s*Aorta\s*Ø:\s*([\d.]+)\s*mm"),
    first(Field::RcaHeight, r"RCA\s*Height\s*:\s*([\d.]+)\s*mm"),
    first(Field::LcaHeight, r"LCA\s*Height\s*:\s*([\d.]+)\s*mm"),
    first(Field::SovHeight, r"Sinus\s*of\s*Valsalva\s*Height\s*([\d.]+)\s*mm"),
    first(Field::SovLeftDiameter, r"Left\s*:\s*([\d.]+)\s*mm"),
    first(Field::SovRightDiameter, r"Right\s*:\s*([\d.]+)\s*mm"),
    first(Field::SovNonDiameter, r"Non\s*:\s*([\d.]+)\s*mm"),
    FieldPattern {
        field: Field::AorticValveAnatomyType,
        pattern: r"([A-Za-z0-9\s]+(?:\s+[A-Za-z0-9]+)*)\s+Aortic\s+Valve",
        strategy: FieldStrategy::AnatomyDisambiguation,
    },
];

/// Severity words that can precede the real anatomy description.
const SEVERITY_QUALIFIERS: [&str; 3] = ["Mild", "Moderate", "Severe"];

static COMPILED: LazyLock<Vec<(FieldPattern, Regex)>> = LazyLock::new(|| {
    FIELD_PATTERNS
        .iter()
        .map(|fp| (*fp, case_insensitive(fp.pattern)))
        .collect()
});

static LINE_BREAKS: LazyLock<Regex> = LazyLock::new(|| literal_regex(r"[\n\r\x0c]+"));
static RUNS_OF_SPACE: LazyLock<Regex> = LazyLock::new(|| literal_regex(r"\s{2,}"));
static AFTER_VALVE: LazyLock<Regex> = LazyLock::new(|| literal_regex(r"(Aortic\s+Valve).*"));
static VALVE_SPLIT: LazyLock<Regex> = LazyLock::new(|| case_insensitive(r"aortic valve"));

fn case_insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("Invalid field pattern")
}

fn literal_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Invalid cleanup pattern")
}

/// Compiled pattern for a text field, used to locate values on the page for review.
pub fn field_regex(field: Field) -> Option<&'static Regex> {
    COMPILED
        .iter()
        .find(|(fp, _)| fp.field == field)
        .map(|(_, re)| re)
}

/// Text of the leading pages, concatenated without separator.
pub fn leading_pages_text(doc: &dyn ReportDocument) -> Result<String, ExtractionError> {
    let mut text = String::new();
    for page in 0..doc.page_count().min(TEXT_FIELD_PAGES) {
        text.push_str(&doc.page_text(page)?);
    }
    Ok(text)
}

/// Run every table entry over `text`. Fields with no match are omitted.
pub fn extract_text_fields(text: &str) -> Vec<Measurement> {
    COMPILED
        .iter()
        .filter_map(|(fp, re)| {
            let raw = match fp.strategy {
                FieldStrategy::FirstCapture => first_capture(re, text),
                FieldStrategy::AnatomyDisambiguation => disambiguate_anatomy(re, text),
            }?;
            tracing::debug!(field = %fp.field, value = %raw, "Text field matched");
            Some(Measurement::new(fp.field, raw, MeasurementSource::Text))
        })
        .collect()
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// The second candidate wins unless it is only a severity word.
fn disambiguate_anatomy(re: &Regex, text: &str) -> Option<String> {
    let candidates: Vec<&str> = re
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .take(2)
        .collect();

    match candidates.as_slice() {
        [] => None,
        [only] => Some(clean_anatomy(only)),
        [first, second, ..] => {
            let second = clean_anatomy(second);
            if SEVERITY_QUALIFIERS.contains(&second.as_str()) {
                Some(clean_anatomy(first))
            } else {
                Some(second)
            }
        }
    }
}

/// Collapse whitespace and drop everything from "Aortic Valve" onward.
pub fn clean_anatomy(candidate: &str) -> String {
    let cleaned = LINE_BREAKS.replace_all(candidate, " ");
    let cleaned = RUNS_OF_SPACE.replace_all(&cleaned, " ");
    let cleaned = AFTER_VALVE.replace_all(&cleaned, "${1}");
    VALVE_SPLIT
        .split(&cleaned)
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}
