//! Speech sanitization of model output.
//!
//! Turns markdown-flavoured assistant text into something a speech engine
//! reads naturally. The passes run in a fixed order:
//!
//! 1. URLs become a `link provided` marker (a run of URLs becomes one marker)
//! 2. HTML tags and fenced code blocks are removed
//! 3. Markdown emphasis, inline code, headers, quotes and list markers are
//!    stripped, keeping the inner text
//! 4. `[text](url)` and `![alt](url)` become their text
//! 5. Common abbreviations are expanded, then bare uppercase acronyms are
//!    spelled out (`ICU` → `I C U`) unless they are pronounced as words
//! 6. Whitespace and repeated link markers are collapsed
//!
//! Apply once per sentence. The passes are not designed to run over their
//! own output.

use regex::{Captures, Regex};
use std::sync::LazyLock;

const LINK_MARKER: &str = "link provided";

/// Acronyms read as words rather than letter by letter.
const WORD_ACRONYMS: &[&str] = &[
    "AIDS", "CABG", "COVID", "ELISA", "GERD", "LASER", "NASA", "NOAEL", "RAST", "SOAP", "TURP",
    "UNESCO",
];

/// Abbreviation expansions, longest first so `a.k.a.` wins over shorter keys.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("a.k.a.", "also known as"),
    ("e.g.", "for example"),
    ("i.e.", "that is"),
    ("I.e.", "That is"),
    ("etc.", "and so on"),
    ("Dr.", "Doctor"),
    ("Mr.", "Mister"),
    ("vs.", "versus"),
];

const URL: &str = r#"https?://[^\s<>()\[\]"'`]+"#;

// Patterns are compile-time constants.
#[allow(clippy::expect_used)]
fn pattern(src: &str) -> Regex {
    Regex::new(src).expect("static sanitizer pattern")
}

static URL_RUN: LazyLock<Regex> = LazyLock::new(|| pattern(&format!(r"{URL}(?:\s+{URL})+")));
static SINGLE_URL: LazyLock<Regex> = LazyLock::new(|| pattern(URL));
static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?s)```.*?```"));
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| pattern(r"<[^>]*>"));
static HEADER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]*#{1,6}[ \t]+"));
static BLOCKQUOTE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]*>[ \t]?"));
static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?m)^[ \t]*(?:-{3,}|\*{3,}|_{3,})[ \t]*$"));
static BULLET: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]*[-*+][ \t]+"));
static NUMBERED: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]*\d+[.)][ \t]+"));
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| pattern(r"`([^`]*)`"));
static BOLD_ASTERISK: LazyLock<Regex> = LazyLock::new(|| pattern(r"\*\*([^*]+)\*\*"));
static BOLD_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| pattern(r"__([^_]+)__"));
static STRIKETHROUGH: LazyLock<Regex> = LazyLock::new(|| pattern(r"~~([^~]+)~~"));
static ITALIC_ASTERISK: LazyLock<Regex> = LazyLock::new(|| pattern(r"\*([^*\n]+)\*"));
static ITALIC_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b_([^_\n]+)_\b"));
static ESCAPED: LazyLock<Regex> = LazyLock::new(|| pattern(r"\\([\\`*_{}\[\]()#+\-.!])"));
static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| pattern(r"!?\[([^\]]*)\]\([^)]*\)"));
static ACRONYM: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b[A-Z]{2,6}\b"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| pattern(r"\s+"));
static REPEATED_MARKER: LazyLock<Regex> =
    LazyLock::new(|| pattern(&format!(r"{LINK_MARKER}(?:\s+{LINK_MARKER})+")));

/// Normalize assistant text for speech synthesis.
pub fn sanitize(text: &str) -> String {
    let text = replace_urls(text);
    let text = strip_html(&text);
    let text = strip_markdown(&text);
    let text = MARKDOWN_LINK.replace_all(&text, "$1");
    let text = expand_abbreviations(&text);
    let text = spell_acronyms(&text);
    collapse(&text)
}

/// Replace URL runs, then single URLs, with the link marker. Sentence
/// punctuation glued to the end of a URL is kept outside the marker.
fn replace_urls(text: &str) -> String {
    let to_marker = |caps: &Captures<'_>| {
        let matched = &caps[0];
        let url = matched.trim_end_matches(['.', ',', ';', ':', '!', '?']);
        format!(" {LINK_MARKER}{}", &matched[url.len()..])
    };
    let text = URL_RUN.replace_all(text, to_marker);
    SINGLE_URL.replace_all(&text, to_marker).into_owned()
}

fn strip_html(text: &str) -> String {
    let text = CODE_BLOCK.replace_all(text, " ");
    HTML_TAG.replace_all(&text, "").into_owned()
}

fn strip_markdown(text: &str) -> String {
    let text = protect_escapes(text);
    let text = HEADER.replace_all(&text, "");
    let text = BLOCKQUOTE.replace_all(&text, "");
    let text = HORIZONTAL_RULE.replace_all(&text, "");
    let text = BULLET.replace_all(&text, "");
    let text = NUMBERED.replace_all(&text, "");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = BOLD_ASTERISK.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORE.replace_all(&text, "$1");
    let text = STRIKETHROUGH.replace_all(&text, "$1");
    let text = ITALIC_ASTERISK.replace_all(&text, "$1");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "$1");
    restore_escapes(&text)
}

/// Escaped ASCII punctuation is parked in the private-use area while the
/// emphasis patterns run, so `\*` never opens or closes emphasis.
const ESCAPE_BASE: u32 = 0xE000;

fn protect_escapes(text: &str) -> String {
    ESCAPED
        .replace_all(text, |caps: &Captures<'_>| {
            caps[1]
                .chars()
                .filter_map(|c| char::from_u32(ESCAPE_BASE + c as u32))
                .collect::<String>()
        })
        .into_owned()
}

fn restore_escapes(text: &str) -> String {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if (ESCAPE_BASE..ESCAPE_BASE + 0x80).contains(&code) {
                char::from_u32(code - ESCAPE_BASE).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

fn expand_abbreviations(text: &str) -> String {
    ABBREVIATIONS
        .iter()
        .fold(text.to_owned(), |acc, (from, to)| acc.replace(from, to))
}

fn spell_acronyms(text: &str) -> String {
    ACRONYM
        .replace_all(text, |caps: &Captures<'_>| {
            let word = &caps[0];
            if WORD_ACRONYMS.contains(&word) {
                word.to_owned()
            } else {
                let letters: Vec<String> = word.chars().map(String::from).collect();
                letters.join(" ")
            }
        })
        .into_owned()
}

fn collapse(text: &str) -> String {
    let text = WHITESPACE.replace_all(text, " ");
    let text = REPEATED_MARKER.replace_all(&text, LINK_MARKER);
    text.trim().to_owned()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn mixed_sentence_is_speakable() {
        let out = sanitize("Dr. ICU patient https://x.com/y **bold**");
        assert!(out.contains("link provided"), "{out}");
        assert!(out.contains("I C U"), "{out}");
        assert!(out.contains("bold"), "{out}");
        assert!(!out.contains('*'), "{out}");
        assert!(!out.contains("https"), "{out}");
        assert_eq!(out, "Doctor I C U patient link provided bold");
    }

    #[test]
    fn consecutive_urls_collapse_to_one_marker() {
        let out = sanitize("Sources: https://a.org/1 https://b.org/2\nhttps://c.org/3 end");
        assert_eq!(out, "Sources: link provided end");
    }

    #[test]
    fn trailing_punctuation_survives_url_replacement() {
        assert_eq!(sanitize("See https://example.com."), "See link provided.");
    }

    #[test]
    fn markdown_links_and_images_keep_their_text() {
        assert_eq!(
            sanitize("Read [the guideline](https://nice.org.uk/g1) and ![a chart](http://x/c.png)"),
            "Read the guideline and a chart"
        );
    }

    #[test]
    fn html_tags_are_removed() {
        assert_eq!(sanitize("<p>Hello <b>there</b></p>"), "Hello there");
    }

    #[test]
    fn markdown_markers_are_stripped() {
        let text = "# Title\n> quoted\n- item one\n2. item two\n~~old~~ _new_ `code` __strong__";
        assert_eq!(sanitize(text), "Title quoted item one item two old new code strong");
    }

    #[test]
    fn snake_case_identifiers_are_untouched() {
        assert_eq!(sanitize("use snake_case_name here"), "use snake_case_name here");
    }

    #[test]
    fn fenced_code_blocks_are_dropped() {
        assert_eq!(sanitize("Before ```rust\nfn main() {}\n``` after"), "Before after");
    }

    #[test]
    fn word_acronyms_are_left_alone() {
        assert_eq!(sanitize("NASA and COVID vs WHO"), "NASA and COVID vs W H O");
    }

    #[test]
    fn long_uppercase_words_are_not_spelled() {
        assert_eq!(sanitize("ABCDEFG is long"), "ABCDEFG is long");
    }

    #[test]
    fn abbreviations_expand() {
        assert_eq!(
            sanitize("Ask Mr. Jones, e.g. today, a.k.a. now"),
            "Ask Mister Jones, for example today, also known as now"
        );
    }

    #[test]
    fn escaped_characters_are_unescaped() {
        assert_eq!(sanitize(r"costs \*nothing\*"), "costs *nothing*");
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(sanitize("  a \n\n  b\t c  "), "a b c");
    }

    #[test]
    fn spelled_letters_are_not_respelled() {
        let once = sanitize("The ICU.");
        assert_eq!(once, "The I C U.");
        assert_eq!(sanitize(&once), once);
    }
}
