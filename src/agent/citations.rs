//! Reference lists from tool output.
//!
//! Search tools return JSON arrays of results. Web results look like
//! `{title, href}`; literature results like
//! `{pmid, title, authors, journal, doi, abstract}`. Both become a markdown
//! reference list appended to the displayed response.

use crate::agent::{AgentMessage, Role};
use crate::error::{Result, SpeechError};
use serde::Deserialize;
use tracing::warn;

/// One cited source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub pmid: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub journal: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default, rename = "abstract")]
    pub summary: Option<String>,
}

impl Citation {
    /// Link for the source: `href`, else a DOI or PubMed URL.
    pub fn url(&self) -> Option<String> {
        if let Some(ref href) = self.href {
            return Some(href.clone());
        }
        if let Some(ref doi) = self.doi {
            return Some(format!("https://doi.org/{doi}"));
        }
        self.pmid
            .as_ref()
            .map(|pmid| format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"))
    }

    fn key(&self) -> Option<String> {
        self.url().or_else(|| self.title.clone())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Parse one tool message's content as a list of citations.
///
/// # Errors
///
/// Returns [`SpeechError::MalformedEvent`] if the content is not a JSON
/// array of objects.
pub fn parse_tool_output(content: &str) -> Result<Vec<Citation>> {
    let citations: Vec<Citation> = serde_json::from_str(content)
        .map_err(|e| SpeechError::MalformedEvent(format!("tool output is not a result list: {e}")))?;
    Ok(citations
        .into_iter()
        .filter(|c| c.title.is_some() || c.url().is_some())
        .collect())
}

/// Collect citations from every tool message, in order, without duplicates.
///
/// Tool messages that are not result lists are logged and skipped.
pub fn extract_citations(messages: &[AgentMessage]) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for message in messages.iter().filter(|m| m.role == Role::Tool) {
        match parse_tool_output(&message.content) {
            Ok(citations) => {
                for citation in citations {
                    if citation.key().is_some_and(|k| seen.insert(k)) {
                        out.push(citation);
                    }
                }
            }
            Err(e) => warn!(
                tool = message.tool_name.as_deref().unwrap_or("<unnamed>"),
                "skipping tool output: {e}"
            ),
        }
    }
    out
}

/// Render citations as a numbered markdown list under a heading.
/// Returns an empty string when there is nothing to cite.
pub fn format_references(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let mut out = String::from("**References**\n");
    for (i, c) in citations.iter().enumerate() {
        let title = c.title.as_deref().unwrap_or("Untitled");
        let mut line = match c.url() {
            Some(url) => format!("{}. [{title}]({url})", i + 1),
            None => format!("{}. {title}", i + 1),
        };
        if let Some(authors) = c.authors.as_ref().filter(|a| !a.is_empty()) {
            let shown = if authors.len() > 3 {
                format!("{} et al.", authors[..3].join(", "))
            } else {
                authors.join(", ")
            };
            line.push_str(&format!(" {shown}."));
        }
        if let Some(ref journal) = c.journal {
            line.push_str(&format!(" *{journal}*."));
        }
        if let Some(ref pmid) = c.pmid {
            line.push_str(&format!(" PMID {pmid}."));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}
