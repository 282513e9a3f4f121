//! Post-processing: deterministic cleanup of exported Markdown.
//!
//! ## Why is post-processing necessary?
//!
//! Paragraph text comes from OCR and LLM structuring and carries the usual
//! artefacts of both: Windows line endings, typographic ligatures copied out
//! of the PDF text layer, zero-width characters, soft hyphens and words
//! hyphenated across a line break. Cleaning them here keeps the structuring
//! prompt focused on *what* to extract and keeps the rules testable.
//!
//! Every rule is a pure `&str → String` function, so the export stays
//! byte-identical for an unchanged document.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so later rules only see `\n`; invisible
//! characters go before de-hyphenation so a soft hyphen never hides a break;
//! heading spacing runs after blank-line collapsing so it has the last word.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to assembled Markdown.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Expand typographic ligatures (ﬁ → fi, …)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Re-join words hyphenated across a line break
/// 5. Trim trailing whitespace per line
/// 6. Collapse runs of blank lines to a single blank line
/// 7. Ensure heading lines have a blank line before them
/// 8. Ensure the file ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = expand_ligatures(&s);
    let s = remove_invisible_chars(&s);
    let s = join_hyphenated_breaks(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Expand ligatures ─────────────────────────────────────────────────

const LIGATURES: [(char, &str); 7] = [
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{FB05}', "st"),
    ('\u{FB06}', "st"),
];

fn expand_ligatures(input: &str) -> String {
    if !input.chars().any(|c| ('\u{FB00}'..='\u{FB06}').contains(&c)) {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match LIGATURES.iter().find(|(l, _)| *l == c) {
            Some((_, expanded)) => out.push_str(expanded),
            None => out.push(c),
        }
    }
    out
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Re-join hyphenated line breaks ───────────────────────────────────
//
// Only a lowercase letter on both sides counts, so "state-\nof-the-art" is
// joined but a list dash or "Smith-\nJones" is left alone.

static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{Ll})-\n(\p{Ll})").unwrap());

fn join_hyphenated_breaks(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "$1$2").to_string()
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 7: Normalise heading spacing ────────────────────────────────────────

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    for (i, line) in input.lines().enumerate() {
        if is_heading(line) && i > 0 {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 8: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_expand_ligatures() {
        assert_eq!(expand_ligatures("e\u{FB03}cient \u{FB01}eld"), "efficient field");
        assert_eq!(expand_ligatures("plain"), "plain");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_join_hyphenated_breaks() {
        assert_eq!(join_hyphenated_breaks("trans-\nformer"), "transformer");
        assert_eq!(join_hyphenated_breaks("Smith-\nJones"), "Smith-\nJones");
        assert_eq!(join_hyphenated_breaks("- item\n- item"), "- item\n- item");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_heading_spacing() {
        let result = normalise_heading_spacing("some text\n## Heading\nmore text");
        assert!(result.contains("some text\n\n## Heading\n"));
        // `#hashtag` and `$$` lines are not headings.
        let untouched = normalise_heading_spacing("a\n#tag\nb");
        assert_eq!(untouched, "a\n#tag\nb\n");
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn test_clean_markdown_full_pipeline() {
        let input = "# Title\r\n\r\nSome e\u{FB00}ect   \n\n\n\n## Section\nmodel-\nling";
        let result = clean_markdown(input);
        assert_eq!(result, "# Title\n\nSome effect\n\n## Section\nmodelling\n");
    }
}
