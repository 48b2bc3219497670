//! Local tesseract engine, driven through the `tesseract` CLI.
//!
//! Shelling out rather than linking libtesseract keeps the build free of C
//! dependencies and matches how tesseract is packaged on every distro. The
//! TSV output mode gives word-level confidence scores, which the hybrid
//! router needs to decide when a page must escalate.

use super::{OcrEngine, RecognitionResult};
use crate::error::{OcrError, PageError};
use async_trait::async_trait;
use image::DynamicImage;
use std::process::Command;
use tracing::debug;

pub struct TesseractEngine {
    language: String,
}

impl TesseractEngine {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    /// Verify the `tesseract` binary is on PATH before any page is rendered.
    pub fn check_available() -> Result<(), OcrError> {
        match Command::new("tesseract").arg("--version").output() {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OcrError::EngineUnavailable {
                    engine: "tesseract".to_string(),
                    hint: "tesseract not found (install tesseract-ocr and the hin/san language packs)"
                        .to_string(),
                })
            }
            Err(e) => Err(OcrError::EngineUnavailable {
                engine: "tesseract".to_string(),
                hint: format!("failed to run tesseract: {e}"),
            }),
        }
    }

    fn run_tesseract(&self, page: u32, image_path: &std::path::Path) -> Result<(String, f32), PageError> {
        let recognition_failed = |detail: String| PageError::RecognitionFailed {
            page,
            attempts: 1,
            detail,
        };

        // TSV output carries per-word confidence alongside the text.
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .arg("tsv")
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    recognition_failed(
                        "tesseract not found (install tesseract-ocr)".to_string(),
                    )
                } else {
                    recognition_failed(format!("failed to spawn tesseract: {e}"))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(recognition_failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(
        &self,
        page: u32,
        image: &DynamicImage,
    ) -> Result<RecognitionResult, PageError> {
        let start = std::time::Instant::now();
        let language = self.language.clone();
        let image = image.clone();
        // Image encode and the tesseract process are both blocking.
        let (text, confidence) = tokio::task::spawn_blocking(move || {
            let engine = TesseractEngine { language };
            let dir = tempfile::tempdir().map_err(|e| PageError::RecognitionFailed {
                page,
                attempts: 1,
                detail: format!("failed to create temp dir: {e}"),
            })?;
            let image_path = dir.path().join(format!("page_{page:04}.png"));
            image
                .save_with_format(&image_path, image::ImageFormat::Png)
                .map_err(|e| PageError::RecognitionFailed {
                    page,
                    attempts: 1,
                    detail: format!("failed to write page image: {e}"),
                })?;
            engine.run_tesseract(page, &image_path)
        })
        .await
        .map_err(|e| PageError::RecognitionFailed {
            page,
            attempts: 1,
            detail: format!("tesseract task panicked: {e}"),
        })??;

        debug!(page, confidence, chars = text.len(), "tesseract recognised page");
        let mut result = RecognitionResult::new(text, confidence, self.name());
        result.duration = start.elapsed();
        Ok(result)
    }
}

/// Parse tesseract TSV output into (text, mean word confidence in [0, 1]).
///
/// TSV rows: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Level 5 rows are words; conf is
/// 0-100, with -1 for non-word rows.
fn parse_tsv(tsv: &str) -> (String, f32) {
    let mut text = String::new();
    let mut conf_sum = 0.0f32;
    let mut conf_count = 0u32;
    let mut word_count = 0u32;
    let mut last_line = (0u32, 0u32, 0u32);

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        let level = fields[0].parse::<u32>().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let word = fields[11];
        if word.trim().is_empty() {
            continue;
        }

        let line_key = (
            fields[2].parse().unwrap_or(0),
            fields[3].parse().unwrap_or(0),
            fields[4].parse().unwrap_or(0),
        );
        if word_count > 0 {
            if line_key != last_line {
                text.push('\n');
            } else {
                text.push(' ');
            }
        }
        last_line = line_key;
        text.push_str(word);
        word_count += 1;

        if let Ok(conf) = fields[10].parse::<f32>() {
            if conf >= 0.0 {
                conf_sum += conf;
                conf_count += 1;
            }
        }
    }

    let confidence = if conf_count > 0 {
        (conf_sum / conf_count as f32 / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (text, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn word_row(block: u32, par: u32, line: u32, conf: f32, word: &str) -> String {
        format!("5\t1\t{block}\t{par}\t{line}\t1\t0\t0\t10\t10\t{conf}\t{word}")
    }

    #[test]
    fn tsv_words_join_with_spaces_within_a_line() {
        let tsv = format!(
            "{HEADER}\n{}\n{}",
            word_row(1, 1, 1, 90.0, "ॐ"),
            word_row(1, 1, 1, 80.0, "नमः")
        );
        let (text, confidence) = parse_tsv(&tsv);
        assert_eq!(text, "ॐ नमः");
        assert!((confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn tsv_line_breaks_follow_line_numbers() {
        let tsv = format!(
            "{HEADER}\n{}\n{}",
            word_row(1, 1, 1, 90.0, "प्रथम"),
            word_row(1, 1, 2, 90.0, "द्वितीय")
        );
        let (text, _) = parse_tsv(&tsv);
        assert_eq!(text, "प्रथम\nद्वितीय");
    }

    #[test]
    fn tsv_skips_structural_rows_and_negative_conf() {
        let tsv = format!(
            "{HEADER}\n1\t1\t1\t0\t0\t0\t0\t0\t100\t100\t-1\t\n{}",
            word_row(1, 1, 1, 50.0, "शब्द")
        );
        let (text, confidence) = parse_tsv(&tsv);
        assert_eq!(text, "शब्द");
        assert!((confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_tsv_scores_zero_confidence() {
        let (text, confidence) = parse_tsv(HEADER);
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }
}
