use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::ResourceError;

const DELIMITER: &str = "---";

/// Split a markdown document into its YAML header and body.
///
/// The header sits between a first line of `---` and the next line that is exactly `---`.
/// A document without both delimiters has no header.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let text = content.strip_prefix('\u{feff}').unwrap_or(content);
    let text = text.trim_start_matches(['\r', '\n']);
    let first_line_end = text.find('\n').unwrap_or(text.len());
    if text[..first_line_end].trim_end() != DELIMITER {
        return None;
    }

    let header_start = (first_line_end + 1).min(text.len());
    let mut offset = header_start;
    for line in text[header_start..].split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            let header = &text[header_start..offset];
            let body = text[offset + line.len()..].trim_start_matches(['\r', '\n']);
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Parse the YAML header of a markdown document into `T`.
///
/// Returns `(None, content)` when there is no header.
pub fn parse_frontmatter<T: DeserializeOwned>(
    content: &str,
) -> Result<(Option<T>, &str), ResourceError> {
    let Some((header, body)) = split_frontmatter(content) else {
        return Ok((None, content));
    };
    if header.trim().is_empty() {
        return Ok((None, body));
    }
    Ok((Some(serde_yaml::from_str(header)?), body))
}

/// Like [`parse_frontmatter`], but a malformed header is logged and treated as absent.
pub fn parse_frontmatter_lenient<'a, T: DeserializeOwned>(
    content: &'a str,
    source: &Path,
) -> (Option<T>, &'a str) {
    match parse_frontmatter(content) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("Ignoring frontmatter in {}: {e}", source.display());
            (None, content)
        }
    }
}
