use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::fetch::{fetch_document, DocumentSource, FetchPolicy};
use super::fields::{extract_text_fields, leading_pages_text};
use super::highlight::highlight_extracted_values;
use super::pdfium::PdfiumReport;
use super::scratch::{Artifact, ScratchContext};
use super::types::{OcrEngine, ReportDocument};
use super::visual::{VisualPipeline, VisualResult};
use super::ExtractionError;
use crate::assessment::{Field, Measurement, MeasurementSet, MeasurementSource};
use crate::config::Settings;
use crate::pipeline_config::{derive_options, IcdLevel, VisualTarget};

/// A field whose extraction was abandoned, and why.
#[derive(Debug, Clone, Serialize)]
pub struct FieldFailure {
    pub target: String,
    pub reason: String,
}

/// Everything one extraction request produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub request_id: Uuid,
    pub extracted_at: DateTime<Utc>,
    pub page_count: usize,
    pub measurements: Vec<Measurement>,
    pub visual_runs: Vec<VisualResult>,
    pub field_failures: Vec<FieldFailure>,
    /// Crop PNGs (bytes are not serialized).
    pub artifacts: Vec<Artifact>,
}

impl ExtractionReport {
    pub fn measurement(&self, field: Field) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.field == field)
    }

    /// Evaluator input built from the extracted values.
    pub fn measurement_set(&self) -> MeasurementSet {
        MeasurementSet::from_measurements(&self.measurements)
    }
}

/// ICD distances only matter for bicuspid valves.
pub fn needs_icd(anatomy: Option<&str>) -> bool {
    anatomy.is_some_and(|a| a.to_lowercase().contains("bicuspid"))
}

fn icd_field(level: IcdLevel) -> Field {
    match level {
        IcdLevel::Mm4 => Field::Icd4mm,
        IcdLevel::Mm6 => Field::Icd6mm,
        IcdLevel::Mm8 => Field::Icd8mm,
    }
}

/// Runs text extraction and the visual pipelines over a report.
///
/// Holds no per-request state; every call gets its own scratch context.
pub struct ReportExtractor {
    ocr_engine: Box<dyn OcrEngine + Send + Sync>,
    settings: Settings,
}

impl ReportExtractor {
    pub fn new(ocr_engine: Box<dyn OcrEngine + Send + Sync>, settings: Settings) -> Self {
        Self {
            ocr_engine,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Fetch and parse the PDF. Failures here are fatal to the request.
    pub fn load_document(&self, source: &DocumentSource) -> Result<PdfiumReport, ExtractionError> {
        let policy = FetchPolicy {
            timeout: Duration::from_secs(self.settings.fetch_timeout_secs),
            retries: self.settings.fetch_retries,
        };
        let bytes = fetch_document(source, policy)?;
        PdfiumReport::load(bytes)
    }

    pub fn extract(&self, source: &DocumentSource) -> Result<ExtractionReport, ExtractionError> {
        let doc = self.load_document(source)?;
        self.extract_document(&doc)
    }

    pub fn extract_document(
        &self,
        doc: &dyn ReportDocument,
    ) -> Result<ExtractionReport, ExtractionError> {
        let mut scratch = ScratchContext::new();
        let request_id = scratch.request_id();
        let _span = tracing::info_span!("extract_report", request_id = %request_id).entered();
        let started = std::time::Instant::now();

        tracing::info!(pages = doc.page_count(), "Starting report extraction");

        let text = leading_pages_text(doc)?;
        let mut measurements = extract_text_fields(&text);
        tracing::info!(fields = measurements.len(), "Text fields extracted");

        let pipeline = VisualPipeline::new(
            doc,
            &*self.ocr_engine,
            self.settings.render_dpi,
            self.settings.refine_crops,
        );
        let mut visual_runs = Vec::new();
        let mut field_failures = Vec::new();

        let mut targets = vec![VisualTarget::CalciumScore];
        let anatomy = measurements
            .iter()
            .find(|m| m.field == Field::AorticValveAnatomyType)
            .map(|m| m.raw.as_str());
        if needs_icd(anatomy) {
            targets.extend(IcdLevel::ALL.iter().map(|&l| VisualTarget::Icd(l)));
        } else {
            tracing::info!("Valve not reported bicuspid, skipping ICD measurements");
        }
        targets.push(VisualTarget::Calcification);

        for target in targets {
            match pipeline.run(target, &derive_options(target), &mut scratch) {
                Ok(result) => {
                    let field = match target {
                        VisualTarget::Icd(level) => Some(icd_field(level)),
                        VisualTarget::CalciumScore => Some(Field::CalciumScore),
                        VisualTarget::Calcification => None,
                    };
                    if let (Some(field), Some(reading)) = (field, result.reading.as_ref()) {
                        measurements.push(Measurement::new(
                            field,
                            reading.raw_value(),
                            MeasurementSource::Ocr,
                        ));
                    }
                    visual_runs.push(result);
                }
                Err(e) if e.is_field_local() => {
                    tracing::warn!(field = %target.slug(), error = %e, "Field extraction abandoned");
                    field_failures.push(FieldFailure {
                        target: target.slug(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            measurements = measurements.len(),
            failures = field_failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Report extraction complete"
        );

        Ok(ExtractionReport {
            request_id,
            extracted_at: Utc::now(),
            page_count: doc.page_count(),
            measurements,
            visual_runs,
            field_failures,
            artifacts: scratch.into_artifacts(),
        })
    }

    /// Colour-coded copy of the report marking where each text value was read.
    pub fn review_pdf(
        &self,
        doc: &dyn ReportDocument,
        report: &ExtractionReport,
    ) -> Result<Vec<u8>, ExtractionError> {
        highlight_extracted_values(doc, &report.measurements)
    }
}

#[cfg(test)]
mod tests {
    use super::super::ocr::MockOcrEngine;
    use super::super::pdfium::{MockPage, MockReportDocument};
    use super::super::types::BoundingBox;
    use super::*;
    use crate::assessment::{ConditionEvaluator, VerdictStatus};
    use image::{Rgb, RgbImage};

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    fn text_page(text: &str) -> MockPage {
        MockPage {
            text: text.into(),
            image: blank(50, 50),
            anchor_rect: None,
        }
    }

    fn anchored_page(text: &str) -> MockPage {
        MockPage {
            text: text.into(),
            image: blank(900, 1000),
            anchor_rect: Some(BoundingBox { x: 400, y: 50, width: 100, height: 20 }),
        }
    }

    const SUMMARY: &str = "Area Derived Ø: 25.0 mm\nSTJ Ø: 24.0 mm\nRCA Height: 11.0 mm\n";

    fn extractor(responses: &[&str]) -> ReportExtractor {
        ReportExtractor::new(Box::new(MockOcrEngine::new(responses)), Settings::default())
    }

    #[test]
    fn tricuspid_report_skips_icd() {
        let doc = MockReportDocument::new(vec![
            text_page(SUMMARY),
            text_page("Anatomy: Tricuspid Aortic Valve"),
            anchored_page("Aortic valve calcification"),
        ]);
        let report = extractor(&["Total: 450"]).extract_document(&doc).unwrap();

        assert_eq!(
            report.measurement(Field::AorticValveAnatomyType).map(|m| m.raw.as_str()),
            Some("Tricuspid")
        );
        assert_eq!(
            report.measurement(Field::CalciumScore).map(|m| m.raw.as_str()),
            Some("450")
        );
        assert!(report.measurement(Field::Icd4mm).is_none());
        assert!(report.field_failures.is_empty());
        let targets: Vec<String> = report.visual_runs.iter().map(|r| r.target.slug()).collect();
        assert_eq!(targets, vec!["calcium-score", "calcification"]);
        assert!(report.artifacts.iter().any(|a| a.name == "calcification-crop.png"));
    }

    #[test]
    fn bicuspid_report_runs_icd_levels() {
        let doc = MockReportDocument::new(vec![
            text_page(SUMMARY),
            MockPage {
                anchor_rect: Some(BoundingBox { x: 400, y: 50, width: 100, height: 20 }),
                image: blank(900, 1000),
                text: "Anatomy: Bicuspid Aortic Valve. ICD @4mm".into(),
            },
            anchored_page("Aortic valve calcification"),
        ]);
        // Calcium is read first, then ICD @4mm. The 6mm and 8mm anchors are absent.
        let report = extractor(&["Total: 1200", "2 7"])
            .extract_document(&doc)
            .unwrap();

        assert_eq!(report.measurement(Field::Icd4mm).map(|m| m.raw.as_str()), Some("27"));
        assert_eq!(
            report.measurement(Field::Icd4mm).map(|m| m.source),
            Some(MeasurementSource::Ocr)
        );
        assert_eq!(
            report.measurement(Field::AorticValveAnatomyType).map(|m| m.raw.as_str()),
            Some("Bicuspid")
        );
        assert!(report.measurement(Field::Icd6mm).is_none());
        let failed: Vec<&str> = report.field_failures.iter().map(|f| f.target.as_str()).collect();
        assert_eq!(failed, vec!["icd6mm", "icd8mm"]);
    }

    #[test]
    fn missing_anchors_degrade_fields_only() {
        let doc = MockReportDocument::from_texts(&[SUMMARY, "Anatomy: Bicuspid Aortic Valve"]);
        let report = extractor(&["27"]).extract_document(&doc).unwrap();

        assert!(report.measurement(Field::StjDiameter).is_some());
        assert_eq!(report.field_failures.len(), 5);
        assert!(report.visual_runs.is_empty());
        assert!(report.artifacts.is_empty());
    }

    #[test]
    fn report_feeds_evaluator() {
        let doc = MockReportDocument::new(vec![
            text_page(SUMMARY),
            text_page(""),
            anchored_page("Aortic valve calcification"),
        ]);
        let report = extractor(&["Total: 9500"]).extract_document(&doc).unwrap();
        let set = report.measurement_set();
        assert_eq!(set.calcium_score, Some(9500.0));

        let evaluator = ConditionEvaluator::new(&set);
        assert_eq!(
            evaluator.evaluate(Field::StjDiameter).status,
            VerdictStatus::AttentionRequired
        );
        assert_eq!(
            evaluator.evaluate(Field::CalciumScore).status,
            VerdictStatus::AttentionRequired
        );
    }

    /// Delegates to a mock but cannot reopen its annotated copies.
    struct UnreadableAnnotations(MockReportDocument);

    impl ReportDocument for UnreadableAnnotations {
        fn page_count(&self) -> usize {
            self.0.page_count()
        }

        fn page_text(&self, page: usize) -> Result<String, ExtractionError> {
            self.0.page_text(page)
        }

        fn highlight_spans(
            &self,
            _pdf_bytes: &[u8],
            _page: usize,
            _literals: &[String],
            _rgba: [u8; 4],
        ) -> Result<Vec<u8>, ExtractionError> {
            Err(ExtractionError::PdfParsing("Failed to load PDF: reparse".into()))
        }

        fn render_page(
            &self,
            pdf_bytes: &[u8],
            page: usize,
            dpi: u32,
        ) -> Result<RgbImage, ExtractionError> {
            self.0.render_page(pdf_bytes, page, dpi)
        }

        fn bytes(&self) -> &[u8] {
            self.0.bytes()
        }
    }

    #[test]
    fn annotation_failure_keeps_text_fields() {
        let doc = UnreadableAnnotations(MockReportDocument::new(vec![
            text_page(SUMMARY),
            text_page("Anatomy: Bicuspid Aortic Valve. ICD @4mm"),
            anchored_page("Aortic valve calcification"),
        ]));
        let report = extractor(&["Total: 450"]).extract_document(&doc).unwrap();

        assert_eq!(
            report.measurement(Field::StjDiameter).map(|m| m.raw.as_str()),
            Some("24.0")
        );
        assert_eq!(
            report.measurement(Field::AnnulusDiameter).map(|m| m.raw.as_str()),
            Some("25.0")
        );
        assert!(report.measurement(Field::CalciumScore).is_none());
        assert!(report.visual_runs.is_empty());
        let failed: Vec<&str> = report.field_failures.iter().map(|f| f.target.as_str()).collect();
        assert_eq!(
            failed,
            vec!["calcium-score", "icd4mm", "icd6mm", "icd8mm", "calcification"]
        );
        assert!(report.field_failures[0].reason.contains("reparse"));
    }

    #[test]
    fn each_request_gets_its_own_id() {
        let doc = MockReportDocument::from_texts(&[SUMMARY]);
        let extractor = extractor(&["27"]);
        let a = extractor.extract_document(&doc).unwrap();
        let b = extractor.extract_document(&doc).unwrap();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn review_pdf_marks_text_values() {
        let doc = MockReportDocument::from_texts(&[SUMMARY]);
        let extractor = extractor(&["27"]);
        let report = extractor.extract_document(&doc).unwrap();
        let pdf = extractor.review_pdf(&doc, &report).unwrap();
        assert!(String::from_utf8_lossy(&pdf).contains("MOCK-HIGHLIGHT:0:"));
    }

    #[test]
    fn bicuspid_detection_is_case_insensitive() {
        assert!(needs_icd(Some("BICUSPID type 1")));
        assert!(!needs_icd(Some("Tricuspid")));
        assert!(!needs_icd(None));
    }

    #[test]
    fn extractor_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReportExtractor>();
    }
}
