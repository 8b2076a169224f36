use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::types::{BoundingBox, OcrEngine, OcrPageResult, OcrWordResult};
use super::ExtractionError;
use crate::config::Settings;

/// Poll interval while waiting on the tesseract child process.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tesseract invoked as a subprocess with TSV output.
///
/// Each call gets its own temporary directory, so concurrent requests never
/// share input or output files. A call that outlives `timeout` is killed.
pub struct TesseractCli {
    executable: PathBuf,
    language: String,
    timeout: Duration,
}

impl TesseractCli {
    pub fn new(executable: PathBuf, language: &str, timeout: Duration) -> Self {
        Self {
            executable,
            language: language.to_string(),
            timeout,
        }
    }

    /// Executable from settings, else `tesseract` on PATH.
    pub fn from_settings(settings: &Settings) -> Self {
        let executable = settings
            .tesseract_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("tesseract"));
        Self::new(
            executable,
            &settings.ocr_language,
            Duration::from_secs(settings.ocr_timeout_secs),
        )
    }

    fn run(&self, png_bytes: &[u8]) -> Result<String, ExtractionError> {
        let workdir = tempfile::Builder::new()
            .prefix("valvescan-ocr-")
            .tempdir()
            .map_err(|e| ExtractionError::OcrInit(format!("Cannot create scratch dir: {e}")))?;
        let input = workdir.path().join("region.png");
        let output_base = workdir.path().join("region");
        std::fs::write(&input, png_bytes)?;

        let mut child = Command::new(&self.executable)
            .arg(&input)
            .arg(&output_base)
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg("6") // Assume single uniform block of text
            .arg("tsv")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ExtractionError::OcrInit(format!(
                    "Cannot start {}: {e}",
                    self.executable.display()
                ))
            })?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExtractionError::Timeout {
                    stage: "OCR",
                    secs: self.timeout.as_secs(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(ExtractionError::OcrProcessing(format!(
                "tesseract exited with {status}"
            )));
        }

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tesseract finished"
        );
        std::fs::read_to_string(output_base.with_extension("tsv")).map_err(|e| {
            ExtractionError::OcrProcessing(format!("Failed to read Tesseract output: {e}"))
        })
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, png_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        let tsv = self.run(png_bytes)?;
        Ok(OcrPageResult {
            words: parse_tsv(&tsv),
        })
    }
}

/// Mock OCR engine for unit testing without Tesseract.
///
/// Returns its responses in order, one per call; the last one repeats.
pub struct MockOcrEngine {
    responses: Vec<String>,
    calls: std::sync::Mutex<usize>,
}

impl MockOcrEngine {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: responses.iter().map(|s| s.to_string()).collect(),
            calls: std::sync::Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or_default()
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, _png_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        let index = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| ExtractionError::OcrProcessing("mock poisoned".into()))?;
            *calls += 1;
            *calls - 1
        };
        let text = self
            .responses
            .get(index)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default();

        Ok(OcrPageResult {
            words: text
                .split_whitespace()
                .map(|w| OcrWordResult {
                    text: w.to_string(),
                    confidence: 0.9,
                    bounding_box: None,
                })
                .collect(),
        })
    }
}

/// Parse Tesseract TSV output into word results, engine order preserved.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence is 0-100, scaled to 0.0-1.0.
fn parse_tsv(tsv: &str) -> Vec<OcrWordResult> {
    let mut results = Vec::new();

    for line in tsv.lines().skip(1) {
        // Skip header row
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        if fields[0].parse::<i32>().ok() != Some(5) {
            continue;
        }

        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        // Tesseract reports -1 for words without a confidence; newer builds use floats
        let confidence = fields[10]
            .parse::<f32>()
            .map(|c| if c < 0.0 { 0.0 } else { c / 100.0 })
            .unwrap_or(0.0);

        results.push(OcrWordResult {
            text: word.to_string(),
            confidence,
            bounding_box: parse_bounding_box(fields[6], fields[7], fields[8], fields[9]),
        });
    }

    results
}

/// Returns None if any field fails to parse.
fn parse_bounding_box(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    Some(BoundingBox {
        x: left.parse().ok()?,
        y: top.parse().ok()?,
        width: width.parse().ok()?,
        height: height.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
        1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
        4\t1\t1\t1\t1\t0\t12\t30\t200\t24\t-1\t\n\
        5\t1\t1\t1\t1\t1\t12\t30\t40\t24\t91.5\t27.\n\
        5\t1\t1\t1\t1\t2\t60\t30\t30\t24\t-1\t4\n\
        5\t1\t1\t1\t1\t3\t96\t30\t44\t24\t88\tmm\n\
        5\t1\t1\t1\t1\t4\t150\t30\t10\t24\t40\t \n";

    #[test]
    fn tsv_keeps_words_in_engine_order() {
        let words = parse_tsv(TSV);
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["27.", "4", "mm"]);
    }

    #[test]
    fn tsv_confidence_scaled_and_clamped() {
        let words = parse_tsv(TSV);
        assert!((words[0].confidence - 0.915).abs() < 1e-6);
        assert_eq!(words[1].confidence, 0.0);
        assert!((words[2].confidence - 0.88).abs() < 1e-6);
    }

    #[test]
    fn tsv_bounding_boxes_parsed() {
        let words = parse_tsv(TSV);
        assert_eq!(
            words[2].bounding_box,
            Some(BoundingBox { x: 96, y: 30, width: 44, height: 24 })
        );
    }

    #[test]
    fn malformed_tsv_yields_nothing() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("header\nnot\ttsv").is_empty());
    }

    #[test]
    fn mock_returns_responses_in_order() {
        let engine = MockOcrEngine::new(&["2 7", "Total: 120.5"]);
        assert_eq!(engine.recognize(b"png").unwrap().joined_text(), "2 7");
        assert_eq!(engine.recognize(b"png").unwrap().joined_text(), "Total: 120.5");
        assert_eq!(engine.recognize(b"png").unwrap().joined_text(), "Total: 120.5");
        assert_eq!(engine.call_count(), 3);
    }

    #[test]
    fn missing_executable_is_init_error() {
        let engine = TesseractCli::new(
            PathBuf::from("/nonexistent/valvescan-tesseract"),
            "eng",
            Duration::from_secs(1),
        );
        let err = engine.recognize(b"png").unwrap_err();
        assert!(matches!(err, ExtractionError::OcrInit(_)));
    }

    #[cfg(unix)]
    #[test]
    fn slow_engine_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-tesseract");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let engine = TesseractCli::new(script, "eng", Duration::from_millis(200));
        let err = engine.recognize(b"png").unwrap_err();
        assert!(matches!(err, ExtractionError::Timeout { stage: "OCR", .. }));
    }
}
