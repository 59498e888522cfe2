//! Terminal output normalizer
//!
//! Turns the text captured from an interactive shell into clean,
//! line-oriented output: carriage returns, quotes, escaped newlines and ANSI
//! control sequences are removed, and each line is trimmed.

use std::sync::LazyLock;

use regex::Regex;

/// ANSI patterns, applied in order: general CSI / Fe sequences, device
/// status reports (`ESC[row;colR`) and simple cursor reports (`ESC[6n`)
static ANSI_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid CSI pattern"),
        Regex::new(r"\x1B\[[0-9]*;[0-9]*[A-Za-z]").expect("valid status report pattern"),
        Regex::new(r"\x1B\[[0-9]*[A-Za-z]").expect("valid cursor report pattern"),
    ]
});

/// Leftovers of byte-string debug representations
const BYTE_LITERAL_ARTIFACTS: [&str; 3] = ["'b", "b'", "'b'"];

/// Strip ANSI escape sequences and surrounding whitespace from one line.
///
/// Removing a sequence can join the pieces of an outer one, so the patterns
/// are reapplied until the line stops changing.
pub fn escape_ansi(line: &str) -> String {
    let mut cleaned = line.to_string();
    loop {
        let next = ANSI_PATTERNS.iter().fold(cleaned.clone(), |text, pattern| {
            pattern.replace_all(&text, "").into_owned()
        });
        if next == cleaned {
            return cleaned.trim().to_string();
        }
        cleaned = next;
    }
}

/// Output normalization pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    scrub_byte_literals: bool,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also remove `'b`, `b'` and `'b'` artifacts.
    ///
    /// Only useful for text that went through a byte-string repr somewhere
    /// upstream; it mangles ordinary text such as `Bob's`.
    pub fn with_byte_literal_scrubbing(mut self) -> Self {
        self.scrub_byte_literals = true;
        self
    }

    /// One pass of the pipeline
    pub fn normalize_once(&self, raw: &str) -> String {
        let mut text = raw.replace('\r', "").replace('"', "").replace("\\n", "\n");

        if self.scrub_byte_literals {
            for artifact in BYTE_LITERAL_ARTIFACTS {
                text = text.replace(artifact, "");
            }
        }

        text.split('\n')
            .map(|line| escape_ansi(&line.replace("\\r", "")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Apply the pipeline until the text stops changing.
    ///
    /// Every pass either leaves the text untouched or makes it shorter, so
    /// this terminates and `normalize(normalize(x)) == normalize(x)`. Nested
    /// escape sequences are resolved inside a single pass; later passes only
    /// pick up escaped newlines that stripping uncovered.
    pub fn normalize(&self, raw: &str) -> String {
        let mut current = self.normalize_once(raw);
        loop {
            let next = self.normalize_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }
}

/// Normalize captured shell output with the default pipeline
pub fn parse(raw: &str) -> String {
    Normalizer::new().normalize(raw)
}
