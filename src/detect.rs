//! Mantra detection: decides which pages carry text whose accuracy is
//! non-negotiable and therefore must be escalated to the accurate engine.
//!
//! Liturgical formulas (bīja syllables, numbered ślokas, ritual section
//! headers) tolerate near-zero OCR error — a single wrong syllable changes
//! the mantra. Pages matching these patterns are routed to the costly
//! engine regardless of the local engine's confidence; everything else is
//! kept cheap. The detector is a pure function of the input text: no state,
//! no I/O, fully deterministic.

use once_cell::sync::Lazy;
use regex::Regex;

/// Which escalation the router should apply for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationTier {
    /// No mantra signal; keep the primary result.
    None,
    /// Mantra patterns present; verify with the accurate engine.
    Verify,
    /// Dense mantra content; verification is mandatory.
    HighPriority,
}

/// Outcome of scanning one page's text.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// True when the page is flagged for verification.
    pub flagged: bool,
    /// Aggregate confidence that this page carries mantra content, in [0, 1].
    pub score: f32,
    /// Human-readable summary of what matched, for logs and stats.
    pub matched_patterns: Vec<String>,
    /// Count of bīja matches plus numbered verses.
    pub mantra_count: usize,
    pub tier: EscalationTier,
}

impl DetectionResult {
    fn empty() -> Self {
        Self {
            flagged: false,
            score: 0.0,
            matched_patterns: Vec::new(),
            mantra_count: 0,
            tier: EscalationTier::None,
        }
    }
}

// Bīja mantras (seed syllables). Highest-weight category: these are the
// tokens where a one-character OCR error is catastrophic.
const BIJA_MANTRAS: &[&str] = &[
    "ॐ", "ओं", // Om
    "ह्रीं", "हृीं", // Hrim
    "श्रीं", "श्री", // Shrim
    "क्लीं", "क्ली", // Klim
    "ऐं", // Aim
    "हुं", "हूं", // Hum
    "फट्", "फट", // Phat
    "स्वाहा", // Swaha
    "नमः", "नम:", // Namah
    "वौषट्", // Vaushat
    "वषट्", // Vashat
    "हं", "हाँ", // Ham
    "क्षं", // Ksham
    "ठः", // Thah
    "क्रों", "क्रौं", // Kraum
    "ग्लौं", // Glaum
    "द्रां", "द्रीं", "द्रूं", // Dram, Drim, Drum
    "ब्लूं", // Blum
    "स्त्रीं", // Strim
];

// Verse-end markers (double daṇḍa and its ASCII renderings).
const VERSE_MARKERS: &[&str] = &["॥", "।।", "||"];

// Ritual/section keywords that frame mantra passages.
const SECTION_KEYWORDS: &[&str] = &[
    "मन्त्र", "मंत्र", // Mantra
    "यन्त्र", "यंत्र", // Yantra
    "तन्त्र", "तंत्र", // Tantra
    "विनियोग", // Viniyoga
    "ऋषि", // Rishi
    "छन्द", "छंद", // Chanda
    "देवता", // Devata
    "बीज", // Bija
    "शक्ति", // Shakti
    "कीलक", // Kilaka
    "न्यास", // Nyasa
    "ध्यान", // Dhyana
    "कवच", // Kavacha
    "स्तोत्र", // Stotra
    "सूक्त", // Sukta
    "जप", // Japa
    "पुरश्चरण", // Purascharana
    "अनुष्ठान", // Anushthana
    "साधना", // Sadhana
    "दीक्षा", // Diksha
    "होम", "हवन", // Homa/Havana
    "आहुति", // Ahuti
    "प्राणप्रतिष्ठा", // Prana pratishtha
];

// Deity names, often embedded in mantras.
const DEITY_NAMES: &[&str] = &[
    "शिव", "महादेव", "रुद्र",
    "विष्णु", "नारायण", "हरि",
    "ब्रह्मा",
    "गणेश", "गणपति", "विनायक",
    "दुर्गा", "काली", "चण्डी", "चामुण्डा",
    "लक्ष्मी", "सरस्वती",
    "हनुमान", "मारुति",
    "सूर्य", "चन्द्र",
    "भैरव", "भैरवी",
    "त्रिपुरसुन्दरी", "ललिता", "राजराजेश्वरी",
    "तारा", "बगलामुखी", "धूमावती",
    "मातङ्गी", "कमला",
];

// Yantra/diagram geometry vocabulary.
const YANTRA_TERMS: &[&str] = &[
    "यन्त्र", "यंत्र",
    "मण्डल", "मंडल",
    "चक्र",
    "त्रिकोण", // triangle
    "षट्कोण", // hexagon
    "अष्टदल", // eight petals
    "बिन्दु", "बिंदु", // point
    "भूपुर", // frame
    "कमल", "पद्म", // lotus
    "श्रीचक्र", "श्रीयन्त्र",
];

// Numbered verse endings: ॥१॥, ॥12॥, ||3||.
static VERSE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"॥\s*\d+\s*॥|॥\s*[०-९]+\s*॥|\|\|\s*\d+\s*\|\|").expect("verse regex"));

// Per-category confidence weights.
const W_BIJA: f32 = 0.9;
const W_VERSE_MARKER: f32 = 0.7;
const W_NUMBERED_VERSE: f32 = 0.8;
const W_DEITY: f32 = 0.6;
const W_YANTRA: f32 = 0.75;

/// Mantra/escalation detector.
///
/// `strict` mode flags a page on any single bīja or numbered-verse match;
/// lenient mode requires corroborating signals. Strict is the default —
/// for sacred texts a false escalation costs cents, a missed one costs the
/// text's integrity.
#[derive(Debug, Clone, Copy)]
pub struct MantraDetector {
    strict: bool,
}

impl Default for MantraDetector {
    fn default() -> Self {
        Self { strict: true }
    }
}

impl MantraDetector {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Scan `text` for mantra patterns. Pure and deterministic.
    pub fn detect(&self, text: &str) -> DetectionResult {
        if text.is_empty() {
            return DetectionResult::empty();
        }

        let mut matched = Vec::new();
        let mut category_weights: Vec<f32> = Vec::new();

        // Bīja syllables: count every occurrence, not just distinct tokens.
        let mut bija_count = 0usize;
        for bija in BIJA_MANTRAS {
            let count = text.matches(bija).count();
            if count > 0 {
                bija_count += count;
                matched.push(format!("bija:{bija}x{count}"));
            }
        }
        if bija_count > 0 {
            category_weights.push(W_BIJA);
        }

        let verse_marker_count: usize = VERSE_MARKERS.iter().map(|m| text.matches(m).count()).sum();
        if verse_marker_count > 0 {
            matched.push(format!("verse_markers:{verse_marker_count}"));
            category_weights.push(W_VERSE_MARKER);
        }

        let numbered_verses = VERSE_NUMBER_RE.find_iter(text).count();
        if numbered_verses > 0 {
            matched.push(format!("numbered_verses:{numbered_verses}"));
            category_weights.push(W_NUMBERED_VERSE);
        }

        // Section keywords: distinct keywords present, weight grows with count.
        let mut section_count = 0usize;
        for keyword in SECTION_KEYWORDS {
            if text.contains(keyword) {
                section_count += 1;
                if matched.len() < 10 {
                    matched.push(format!("section:{keyword}"));
                }
            }
        }
        if section_count > 0 {
            category_weights.push((0.5 + section_count as f32 * 0.1).min(0.85));
        }

        let deity_count = DEITY_NAMES.iter().filter(|d| text.contains(*d)).count();
        if deity_count > 0 {
            matched.push(format!("deities:{deity_count}"));
            category_weights.push(W_DEITY);
        }

        let yantra_count = YANTRA_TERMS.iter().filter(|t| text.contains(*t)).count();
        if yantra_count > 0 {
            matched.push(format!("yantra_terms:{yantra_count}"));
            category_weights.push(W_YANTRA);
        }

        // Overall score: strongest single category, boosted 5% per extra
        // matched category (at most 5 extras), capped at 1.0.
        let score = category_weights
            .iter()
            .cloned()
            .fold(0.0f32, f32::max);
        let extra = category_weights.len().saturating_sub(1).min(5);
        let score = (score * (1.0 + extra as f32 * 0.05)).min(1.0);

        let flagged = if self.strict {
            bija_count > 0 || numbered_verses > 0 || section_count >= 2
        } else {
            bija_count >= 2 || (numbered_verses > 0 && section_count > 0) || score > 0.8
        };

        let tier = if bija_count >= 3 || (bija_count > 0 && section_count >= 2) {
            EscalationTier::HighPriority
        } else if flagged {
            EscalationTier::Verify
        } else {
            EscalationTier::None
        };

        DetectionResult {
            flagged,
            score,
            matched_patterns: matched,
            mantra_count: bija_count + numbered_verses,
            tier,
        }
    }

    /// Quick boolean form of [`detect`](Self::detect).
    pub fn needs_verification(&self, text: &str) -> bool {
        !matches!(self.detect(text).tier, EscalationTier::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_scores_zero() {
        let result = MantraDetector::default().detect("");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.tier, EscalationTier::None);
        assert!(!result.flagged);
        assert!(result.matched_patterns.is_empty());
    }

    #[test]
    fn plain_prose_is_not_flagged() {
        let result = MantraDetector::default().detect("यह एक साधारण अनुच्छेद है।");
        assert_eq!(result.tier, EscalationTier::None);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn detection_is_deterministic() {
        let text = "ॐ नमः शिवाय ॥१॥ मन्त्र साधना";
        let detector = MantraDetector::default();
        assert_eq!(detector.detect(text), detector.detect(text));
    }

    #[test]
    fn three_distinct_bijas_are_high_priority() {
        let result = MantraDetector::default().detect("ॐ ह्रीं क्लीं");
        assert_eq!(result.tier, EscalationTier::HighPriority);
        assert!(result.flagged);
        assert!(result.mantra_count >= 3);
    }

    #[test]
    fn single_bija_with_two_sections_is_high_priority() {
        let result = MantraDetector::default().detect("विनियोग कीलक स्वाहा");
        assert_eq!(result.tier, EscalationTier::HighPriority);
    }

    #[test]
    fn strict_mode_flags_single_numbered_verse() {
        let result = MantraDetector::new(true).detect("कस्यचित् पद्यम् ॥१॥");
        assert!(result.flagged);
        assert_eq!(result.tier, EscalationTier::Verify);
    }

    #[test]
    fn lenient_mode_needs_corroboration() {
        let lenient = MantraDetector::new(false);
        // A bare verse marker alone is not enough...
        let alone = lenient.detect("कस्यचित् पद्यम् ॥");
        assert!(!alone.flagged);
        // ...but a numbered verse plus a section keyword is.
        let corroborated = lenient.detect("मन्त्र पाठ ॥१॥");
        assert!(corroborated.flagged);
    }

    #[test]
    fn score_is_capped_at_one() {
        let result = MantraDetector::default()
            .detect("ॐ स्वाहा ॥१॥ ॥ मन्त्र देवता शिव यन्त्र चक्र विनियोग");
        assert!(result.score <= 1.0);
        assert!(result.score > 0.9);
    }

    #[test]
    fn score_grows_with_extra_categories() {
        let detector = MantraDetector::default();
        let bija_only = detector.detect("ॐ");
        let bija_and_verse = detector.detect("ॐ ॥");
        assert!(bija_and_verse.score > bija_only.score);
    }

    #[test]
    fn deity_names_alone_do_not_flag_in_strict_mode() {
        let result = MantraDetector::default().detect("शिव और विष्णु की कथा");
        assert!(!result.flagged);
        assert!(result.score > 0.0);
    }
}
