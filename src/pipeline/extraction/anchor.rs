//! Anchor search: the first page whose text matches any pattern.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use super::types::ReportDocument;
use super::ExtractionError;

/// Page holding the anchor and the exact text spans that matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnchorMatch {
    pub page: usize,
    /// Matched substrings, pattern order then text order. Never empty.
    pub literals: Vec<String>,
}

/// Compile anchor patterns case-insensitively.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ExtractionError> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| ExtractionError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Scan pages from `start` forward; the first page where any pattern matches wins.
pub fn locate_anchor(
    doc: &dyn ReportDocument,
    patterns: &[String],
    start: usize,
) -> Result<AnchorMatch, ExtractionError> {
    let compiled = compile_patterns(patterns)?;

    for page in start..doc.page_count() {
        let text = doc.page_text(page)?;
        let literals: Vec<String> = compiled
            .iter()
            .flat_map(|re| re.find_iter(&text).map(|m| m.as_str().to_string()))
            .filter(|s| !s.is_empty())
            .collect();

        if !literals.is_empty() {
            tracing::debug!(page, matches = literals.len(), "Anchor located");
            return Ok(AnchorMatch { page, literals });
        }
    }

    Err(ExtractionError::AnchorNotFound {
        patterns: patterns.to_vec(),
        start,
    })
}

#[cfg(test)]
mod tests {
    use super::super::pdfium::MockReportDocument;
    use super::*;

    fn pats(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn finds_first_matching_page_from_start() {
        let doc = MockReportDocument::from_texts(&[
            "cover ICD @4mm",
            "summary",
            "Table: icd @4mm 27 mm",
            "ICD @4mm again",
        ]);
        let found = locate_anchor(&doc, &pats(&["ICD @4mm"]), 1).unwrap();
        assert_eq!(found.page, 2);
        assert_eq!(found.literals, vec!["icd @4mm"]);
    }

    #[test]
    fn collects_literals_from_every_pattern() {
        let doc = MockReportDocument::from_texts(&[
            "",
            "ICD @ 6mm and Inter commisural distance @6mm",
        ]);
        let found = locate_anchor(
            &doc,
            &pats(&["ICD @6mm", "Inter commisural distance @6mm", "ICD @ 6mm"]),
            0,
        )
        .unwrap();
        assert_eq!(found.page, 1);
        assert_eq!(
            found.literals,
            vec!["Inter commisural distance @6mm", "ICD @ 6mm"]
        );
    }

    #[test]
    fn missing_anchor_reports_patterns() {
        let doc = MockReportDocument::from_texts(&["a", "b", "c"]);
        let err = locate_anchor(&doc, &pats(&["ICD @8mm"]), 1).unwrap_err();
        match err {
            ExtractionError::AnchorNotFound { patterns, start } => {
                assert_eq!(patterns, vec!["ICD @8mm"]);
                assert_eq!(start, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn start_past_end_is_not_found() {
        let doc = MockReportDocument::from_texts(&["ICD @4mm"]);
        assert!(matches!(
            locate_anchor(&doc, &pats(&["ICD @4mm"]), 5),
            Err(ExtractionError::AnchorNotFound { .. })
        ));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let doc = MockReportDocument::from_texts(&["x"]);
        let err = locate_anchor(&doc, &pats(&["(unclosed"]), 0).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidPattern { .. }));
    }
}
