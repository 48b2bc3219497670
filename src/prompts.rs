//! OCR prompts tuned for Hindi/Sanskrit liturgical manuscripts.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — tightening a preservation rule requires
//!    editing exactly one place.
//!
//! 2. **Testability** — unit tests can import and inspect prompts directly
//!    without calling a real VLM.
//!
//! Callers can override the default via [`crate::config::OcrConfig::prompt`];
//! the constants here are used only when no override is provided.

/// Default OCR prompt sent to the VLM alongside each page image.
///
/// Used when `OcrConfig::prompt` is `None`.
pub const OCR_PROMPT: &str = r#"You are an expert OCR system for Sanskrit and Hindi manuscripts.

Extract ALL text from this scanned page following these rules:

OUTPUT FORMAT:
- Output ONLY the extracted Devanagari text
- No explanations, no "Here is the text:", no metadata
- Start directly with the first word of the text

PRESERVATION RULES:
1. VERSE NUMBERING: Keep exact format (॥१॥, ॥२॥, ||1||, etc.)
2. SECTION MARKERS: Preserve chapter headers, section titles
3. LINE BREAKS: Maintain verse line structure
4. PUNCTUATION: Keep all daṇḍa (।) and double daṇḍa (॥)
5. SPECIAL CHARACTERS: Preserve anusvāra (ं), visarga (ः), chandrabindu (ँ)

HANDLING UNCLEAR TEXT:
- Make best effort based on context
- Never leave gaps or [illegible] markers
- Use surrounding words to infer unclear portions

TEXT TYPE: Tantric/spiritual manuscript with mantras and technical terminology.
Accuracy of mantras is critical - preserve exact spelling."#;

/// Shorter prompt for fast, low-stakes passes.
pub const OCR_PROMPT_FAST: &str = r#"Extract all Devanagari text from this page exactly as written.
Keep verse numbers (॥१॥), punctuation (।॥), and line breaks.
Output only the text, nothing else."#;

/// Phrases the VLM emits when it refuses or fails instead of transcribing.
/// A response containing any of these is treated as a failed attempt, not
/// as page text.
pub const REFUSAL_PATTERNS: &[&str] = &[
    "I cannot",
    "I can't",
    "I'm unable",
    "I am unable",
    "no text",
    "cannot extract",
    "cannot read",
    "unable to extract",
    "unable to read",
    "no readable text",
    "image appears to be",
    "I don't see",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_demands_text_only_output() {
        assert!(OCR_PROMPT.contains("Output ONLY the extracted Devanagari text"));
        assert!(!OCR_PROMPT.is_empty());
    }

    #[test]
    fn prompt_covers_verse_preservation() {
        assert!(OCR_PROMPT.contains("॥१॥"));
        assert!(OCR_PROMPT.contains("daṇḍa"));
    }

    #[test]
    fn refusal_patterns_are_nonempty() {
        assert!(!REFUSAL_PATTERNS.is_empty());
        assert!(REFUSAL_PATTERNS.iter().all(|p| !p.is_empty()));
    }
}
