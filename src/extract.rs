//! Turns whatever the user sent into plain study text.

use std::time::Duration;

use log::{debug, info, warn};
use scraper::{ElementRef, Html, Selector};

use crate::error::{QuizError, Result};

/// Fewest characters worth generating questions from.
pub const MIN_SOURCE_CHARS: usize = 50;
/// Lines this short are menus, bylines and buttons rather than article text.
const MIN_LINE_CHARS: usize = 20;
const CONTENT_SELECTORS: [&str; 6] = [
    "article",
    "main",
    ".content",
    ".post-content",
    ".article-body",
    "#content",
];
const SKIPPED_ELEMENTS: [&str; 6] = ["script", "style", "nav", "footer", "header", "aside"];

#[derive(Debug, Clone)]
pub enum Source {
    Paste(String),
    File { name: String, bytes: Vec<u8> },
    Url(String),
}

impl Source {
    /// A message that is a single http(s) link is fetched, anything else is pasted text.
    pub fn from_message(text: &str) -> Self {
        let trimmed = text.trim();
        if looks_like_url(trimmed) {
            Source::Url(trimmed.to_string())
        } else {
            Source::Paste(text.to_string())
        }
    }
}

pub async fn extract_text(source: Source) -> Result<String> {
    let raw = match source {
        Source::Paste(text) => text,
        Source::File { name, bytes } => read_file(&name, bytes).await?,
        Source::Url(url) => fetch_article(&url).await?,
    };

    let text = clean_text(&raw);
    if text.chars().count() < MIN_SOURCE_CHARS {
        return Err(QuizError::UnreadableSource(format!(
            "found only {} characters of text, need at least {MIN_SOURCE_CHARS}",
            text.chars().count()
        )));
    }
    info!("Extracted {} characters of study text", text.len());
    Ok(text)
}

async fn read_file(name: &str, bytes: Vec<u8>) -> Result<String> {
    let lower = name.to_lowercase();
    debug!("Reading uploaded file {name} ({} bytes)", bytes.len());
    if lower.ends_with(".txt") || lower.ends_with(".md") {
        return String::from_utf8(bytes)
            .map_err(|_| QuizError::UnreadableSource(format!("{name} is not UTF-8 text")));
    }
    if lower.ends_with(".pdf") {
        return read_pdf(name, bytes).await;
    }
    Err(QuizError::UnreadableSource(format!(
        "unsupported file type: {name}"
    )))
}

/// PDF parsing is CPU bound and can panic on broken files, so it runs on the
/// blocking pool and both failure kinds surface as unreadable sources.
async fn read_pdf(name: &str, bytes: Vec<u8>) -> Result<String> {
    let unreadable = |why: String| QuizError::UnreadableSource(format!("{name}: {why}"));

    let parsed = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|err| {
            warn!("PDF parser crashed on {name}: {err}");
            unreadable("the PDF could not be parsed".to_string())
        })?;
    let text = parsed.map_err(|err| {
        debug!("PDF parse error in {name}: {err}");
        unreadable("the PDF could not be parsed".to_string())
    })?;
    if text.trim().is_empty() {
        return Err(unreadable(
            "the PDF has no extractable text, scanned pages are not supported".to_string(),
        ));
    }
    Ok(text)
}

async fn fetch_article(url: &str) -> Result<String> {
    info!("Fetching article from {url}");
    let unreadable = |msg: String| QuizError::UnreadableSource(msg);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(concat!("adaptive-quiz-bot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| unreadable(format!("could not build HTTP client: {e}")))?;

    let response = http.get(url).send().await.map_err(|e| {
        warn!("Request to {url} failed: {e}");
        if e.is_timeout() {
            unreadable("the website took too long to respond".to_string())
        } else {
            unreadable("could not connect to the website".to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(unreadable(match status.as_u16() {
            404 => "page not found (404)".to_string(),
            403 => "the website does not allow fetching this page (403)".to_string(),
            code => format!("the website answered with HTTP {code}"),
        }));
    }

    let html = response
        .text()
        .await
        .map_err(|e| unreadable(format!("could not read the page: {e}")))?;
    html_to_text(&html).ok_or_else(|| unreadable("no readable content on this page".to_string()))
}

/// Pulls article text out of a page, preferring the usual content containers
/// over the whole body.
pub fn html_to_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let container = CONTENT_SELECTORS
        .iter()
        .filter_map(|css| Selector::parse(css).ok())
        .find_map(|selector| document.select(&selector).next())
        .or_else(|| {
            let body = Selector::parse("body").ok()?;
            document.select(&body).next()
        })?;

    let text = visible_text(container);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() > MIN_LINE_CHARS)
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n\n"))
}

fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map_or(false, |el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        let piece = text.trim();
        if !piece.is_empty() {
            out.push_str(piece);
            out.push('\n');
        }
    }
    out
}

pub fn looks_like_url(text: &str) -> bool {
    (text.starts_with("http://") || text.starts_with("https://"))
        && !text.contains(char::is_whitespace)
        && url::Url::parse(text).is_ok()
}

/// Collapses whitespace runs and drops NUL bytes.
pub fn clean_text(text: &str) -> String {
    text.replace('\0', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The first `max_chars` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"
        <html><head><style>body { color: red; }</style></head>
        <body>
          <nav>Home | About | A very long navigation line that should vanish</nav>
          <article>
            <h1>Short</h1>
            <p>The mitochondria is the powerhouse of the cell and makes ATP.</p>
            <script>var tracking = "this script text must not appear anywhere";</script>
            <p>Ribosomes assemble proteins from amino acids in every cell.</p>
          </article>
          <footer>Copyright notice that is long enough to pass the filter</footer>
        </body></html>"#;

    #[test]
    fn article_text_skips_chrome_and_scripts() {
        let text = html_to_text(ARTICLE).unwrap();
        assert!(text.contains("powerhouse of the cell"));
        assert!(text.contains("Ribosomes assemble proteins"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("navigation"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("Short"));
    }

    #[test]
    fn falls_back_to_body() {
        let html = "<html><body><div>Plain body text that is comfortably longer than twenty characters.</div></body></html>";
        assert!(html_to_text(html).unwrap().starts_with("Plain body text"));
        assert_eq!(html_to_text("<html><body><p>tiny</p></body></html>"), None);
    }

    #[test]
    fn message_classification() {
        assert!(matches!(
            Source::from_message(" https://example.com/notes "),
            Source::Url(url) if url == "https://example.com/notes"
        ));
        assert!(matches!(
            Source::from_message("see https://example.com for more"),
            Source::Paste(_)
        ));
    }

    #[test]
    fn cleaning_and_truncation() {
        assert_eq!(clean_text("  a\t\tb\n\nc\0d "), "a b cd");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn unsupported_and_short_sources_are_unreadable() {
        let docx = Source::File {
            name: "notes.docx".to_string(),
            bytes: b"PK\x03\x04".to_vec(),
        };
        assert!(matches!(extract_text(docx).await, Err(QuizError::UnreadableSource(_))));

        let short = Source::Paste("too short".to_string());
        assert!(matches!(extract_text(short).await, Err(QuizError::UnreadableSource(_))));

        let txt = Source::File {
            name: "notes.txt".to_string(),
            bytes: "Photosynthesis converts light energy into chemical energy stored in glucose."
                .as_bytes()
                .to_vec(),
        };
        assert!(extract_text(txt).await.unwrap().starts_with("Photosynthesis"));
    }

    #[tokio::test]
    async fn broken_pdf_is_unreadable_not_a_crash() {
        for bytes in [&b"%PDF-1.7"[..], &b"%PDF-1.4\n1 0 obj << /Type /Catalog >>\n%%EOF"[..], &b""[..]] {
            let pdf = Source::File {
                name: "Lecture.PDF".to_string(),
                bytes: bytes.to_vec(),
            };
            let err = extract_text(pdf).await.unwrap_err();
            assert!(
                matches!(&err, QuizError::UnreadableSource(msg) if msg.starts_with("Lecture.PDF")),
                "{err}"
            );
        }
    }
}
