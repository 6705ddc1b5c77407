//! Line-ending detection and restoration
//!
//! Analysis and merging run on LF-normalized text; output is converted back
//! to whatever the baseline used.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    Lf,
    CrLf,
    Cr,
}

impl LineEnding {
    /// Detect the dominant style, CRLF winning over bare CR
    pub fn detect(content: &str) -> Self {
        if content.contains("\r\n") {
            LineEnding::CrLf
        } else if content.contains('\r') {
            LineEnding::Cr
        } else {
            LineEnding::Lf
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::Cr => "\r",
        }
    }
}

/// Convert any mix of CRLF/CR/LF to LF
pub fn normalize(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Render LF-normalized text with the given line ending
pub fn restore(content: &str, ending: LineEnding) -> String {
    let normalized = normalize(content);
    match ending {
        LineEnding::Lf => normalized,
        other => normalized.replace('\n', other.as_str()),
    }
}

/// Render `content` in the baseline's line-ending style
pub fn match_baseline(content: &str, baseline: &str) -> String {
    restore(content, LineEnding::detect(baseline))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(LineEnding::detect("a\nb\n"), LineEnding::Lf);
        assert_eq!(LineEnding::detect("a\r\nb\r\n"), LineEnding::CrLf);
        assert_eq!(LineEnding::detect("a\rb\r"), LineEnding::Cr);
        assert_eq!(LineEnding::detect(""), LineEnding::Lf);
    }

    #[test]
    fn test_normalize_mixed() {
        assert_eq!(normalize("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn test_crlf_baseline_forces_crlf_for_every_input_style() {
        let baseline = "import os\r\n\r\ndef main():\r\n    pass\r\n";
        for merged in [
            "import os\nimport json\n\ndef main():\n    pass\n",
            "import os\r\nimport json\r\n\r\ndef main():\r\n    pass\r\n",
            "import os\rimport json\r\rdef main():\r    pass\r",
        ] {
            let output = match_baseline(merged, baseline);
            assert_eq!(
                output,
                "import os\r\nimport json\r\n\r\ndef main():\r\n    pass\r\n"
            );
            assert!(!output.replace("\r\n", "").contains('\n'));
            assert!(!output.replace("\r\n", "").contains('\r'));
        }
    }

    #[test]
    fn test_cr_baseline() {
        assert_eq!(match_baseline("a\nb\n", "x\ry\r"), "a\rb\r");
    }
}
