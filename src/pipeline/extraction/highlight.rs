//! Highlight annotations: the machine marker over an anchor, and the colour-coded
//! review copy showing where each text field was read.

use super::anchor::AnchorMatch;
use super::fields::field_regex;
use super::types::ReportDocument;
use super::ExtractionError;
use crate::assessment::{Field, Measurement, MeasurementSource};
use crate::pipeline_config::HIGHLIGHT_STROKE_RGBA;

/// Mark every anchor span on its page; returns the annotated PDF.
pub fn highlight_anchor(
    doc: &dyn ReportDocument,
    anchor: &AnchorMatch,
) -> Result<Vec<u8>, ExtractionError> {
    doc.highlight_spans(doc.bytes(), anchor.page, &anchor.literals, HIGHLIGHT_STROKE_RGBA)
}

/// Review colour per field. Fields without a colour are marked white.
pub fn review_colour(field: Field) -> [u8; 4] {
    let rgb = match field {
        Field::StjDiameter => [0xCE, 0xE9, 0xEF],
        Field::AnnulusDiameter => [0xC3, 0xC7, 0xE9],
        Field::LvotDiameter => [0xB6, 0xDB, 0xE7],
        Field::RcaHeight => [0xEE, 0xB9, 0xC4],
        Field::LcaHeight => [0xEC, 0xBD, 0xB5],
        Field::SovLeftDiameter => [0xD3, 0xE5, 0xC0],
        Field::SovRightDiameter => [0xB4, 0xE4, 0xC7],
        Field::SovNonDiameter => [0xC3, 0xF2, 0xDB],
        // light goldenrod
        Field::AscAortaDiameter => [240, 230, 140],
        Field::AorticValveAnatomyType => [0xF3, 0xF7, 0xEE],
        _ => [255, 255, 255],
    };
    [rgb[0], rgb[1], rgb[2], 255]
}

/// Text searched for on the page: diameters and heights carry their unit.
fn value_needle(m: &Measurement) -> String {
    let name = m.field.display_name();
    if name.contains("Diameter") || name.contains("Height") {
        format!("{} mm", m.raw)
    } else {
        m.raw.clone()
    }
}

/// Annotate, on every page, each field-pattern match that contains the extracted value.
///
/// Only text-extracted measurements are marked; OCR readings have no text span.
/// Field patterns match case-insensitively here too, so every span the value
/// could have been read from gets marked.
pub fn highlight_extracted_values(
    doc: &dyn ReportDocument,
    measurements: &[Measurement],
) -> Result<Vec<u8>, ExtractionError> {
    let mut pdf = doc.bytes().to_vec();
    let mut marked = 0usize;

    for page in 0..doc.page_count() {
        let text = doc.page_text(page)?;
        for m in measurements
            .iter()
            .filter(|m| m.source == MeasurementSource::Text && m.field != Field::CalciumScore)
        {
            let Some(re) = field_regex(m.field) else {
                continue;
            };
            let needle = value_needle(m);
            let spans: Vec<String> = re
                .find_iter(&text)
                .map(|found| found.as_str())
                .filter(|span| span.contains(&needle))
                .map(str::to_string)
                .collect();
            if spans.is_empty() {
                continue;
            }
            pdf = doc.highlight_spans(&pdf, page, &spans, review_colour(m.field))?;
            marked += spans.len();
        }
    }

    tracing::info!(spans = marked, "Review highlights applied");
    Ok(pdf)
}
