//! Purpose: Detect PEP 723 inline script metadata blocks in script text.
//! Exports: `includes_inline_metadata`.
//! Role: Boolean oracle used by the manifest locator; never parses TOML content.
//! Invariants: Uses the reference PEP 723 pattern: `# /// <type>` opener,
//! Invariants: one or more `#` / `# ...` lines, then `# ///`.
//! Invariants: Only `\n` ends a line; a trailing `\r` breaks a marker line.
use std::sync::LazyLock;

use regex::Regex;

static INLINE_METADATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^# /// (?P<type>[a-zA-Z0-9-]+)$\s(?P<content>(^#( .*)?$\s)+)^# ///$")
        .expect("inline metadata pattern compiles")
});

pub fn includes_inline_metadata(text: &str) -> bool {
    INLINE_METADATA.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::{INLINE_METADATA, includes_inline_metadata};

    const SCRIPT: &str = "# /// script\n# requires-python = \">=3.12\"\n# dependencies = []\n# ///\n\nimport sys\n";

    fn block_types(text: &str) -> Vec<&str> {
        INLINE_METADATA
            .captures_iter(text)
            .filter_map(|caps| caps.name("type").map(|m| m.as_str()))
            .collect()
    }

    #[test]
    fn detects_script_block() {
        assert!(includes_inline_metadata(SCRIPT));
        assert_eq!(block_types(SCRIPT), vec!["script"]);
    }

    #[test]
    fn detects_block_after_code_and_without_trailing_newline() {
        let text = "import os\n# /// script\n#\n# ///";
        assert!(includes_inline_metadata(text));
    }

    #[test]
    fn requires_a_body_line_and_a_closer() {
        assert!(!includes_inline_metadata("# /// script\n# ///\n"));
        assert!(!includes_inline_metadata("# /// script\n# dependencies = []\n"));
        assert!(!includes_inline_metadata(""));
    }

    #[test]
    fn rejects_malformed_markers() {
        assert!(!includes_inline_metadata("# ///script\n# a\n# ///\n"));
        assert!(!includes_inline_metadata("# /// bad_type\n# a\n# ///\n"));
        assert!(!includes_inline_metadata("# /// script\r\n# a\r\n# ///\r\n"));
        assert!(!includes_inline_metadata("# /// script\n#a = 1\n# ///\n"));
        assert!(!includes_inline_metadata("# /// script\n# a\nx = 1\n# ///\n"));
    }

    #[test]
    fn greedy_body_closes_at_last_marker() {
        let text = "# /// script\n# a\n# ///\n# b\n# ///\nprint()\n# /// tool\n# c\n# ///";
        assert_eq!(block_types(text), vec!["script", "tool"]);
        let content = INLINE_METADATA
            .captures(text)
            .and_then(|caps| caps.name("content").map(|m| m.as_str()))
            .expect("content");
        assert_eq!(content, "# a\n# ///\n# b\n");
    }
}
