use std::panic::{self, AssertUnwindSafe};

/// Maximum number of characters of document text handed to the model.
pub const MAX_CONTEXT_CHARS: usize = 2000;

/// Supplies per-page text for an uploaded document.
///
/// Extraction is lossy by contract: a page that cannot be read comes back
/// empty and a document that cannot be parsed yields no pages. Nothing here
/// signals an error.
pub trait TextSource: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Vec<String>;
}

/// PDF text extraction backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextSource;

impl TextSource for PdfTextSource {
    fn extract(&self, bytes: &[u8]) -> Vec<String> {
        // pdf-extract panics on some malformed inputs instead of returning an error.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        }));

        match result {
            Ok(Ok(pages)) => {
                tracing::debug!("Extracted {} pages from PDF", pages.len());
                pages
            }
            Ok(Err(e)) => {
                tracing::warn!("PDF text extraction failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("PDF text extraction panicked; treating document as empty");
                Vec::new()
            }
        }
    }
}

/// The slice of document text used as prompt context.
///
/// Built once per upload from the extracted pages: empty pages are dropped,
/// the rest concatenated in order and cut to [`MAX_CONTEXT_CHARS`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentContext {
    text: String,
    pages: usize,
}

impl DocumentContext {
    pub fn from_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut full = String::new();
        let mut used = 0;
        for page in pages {
            let page = page.as_ref();
            if page.is_empty() {
                continue;
            }
            full.push_str(page);
            used += 1;
        }

        let text = truncate_chars(&full, MAX_CONTEXT_CHARS).to_string();
        Self { text, pages: used }
    }

    /// Extracts and builds the context in one step.
    pub fn load(source: &dyn TextSource, bytes: &[u8]) -> Self {
        let context = Self::from_pages(source.extract(bytes));
        tracing::info!(
            "Document context ready: {} pages, {} chars",
            context.pages,
            context.char_count()
        );
        context
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Number of non-empty pages that contributed text.
    pub fn page_count(&self) -> usize {
        self.pages
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Cuts `s` to at most `max` characters without splitting a code point.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPages(Vec<&'static str>);

    impl TextSource for FixedPages {
        fn extract(&self, _bytes: &[u8]) -> Vec<String> {
            self.0.iter().map(|p| p.to_string()).collect()
        }
    }

    #[test]
    fn short_document_is_kept_whole() {
        let context = DocumentContext::from_pages(["Paris is the capital of France."]);
        assert_eq!(context.as_str(), "Paris is the capital of France.");
        assert_eq!(context.page_count(), 1);
    }

    #[test]
    fn pages_are_concatenated_without_separator() {
        let context = DocumentContext::from_pages(["abc", "def"]);
        assert_eq!(context.as_str(), "abcdef");
    }

    #[test]
    fn empty_pages_are_dropped() {
        let context = DocumentContext::from_pages(["one", "", "two", ""]);
        assert_eq!(context.as_str(), "onetwo");
        assert_eq!(context.page_count(), 2);
    }

    #[test]
    fn long_document_is_truncated_to_limit() {
        let page = "x".repeat(1500);
        let context = DocumentContext::from_pages([page.as_str(), page.as_str(), page.as_str()]);
        assert_eq!(context.char_count(), MAX_CONTEXT_CHARS);
        assert_eq!(context.page_count(), 3);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let page = "é".repeat(MAX_CONTEXT_CHARS + 10);
        let context = DocumentContext::from_pages([page]);
        assert_eq!(context.char_count(), MAX_CONTEXT_CHARS);
        assert_eq!(context.as_str().len(), MAX_CONTEXT_CHARS * 2);
    }

    #[test]
    fn document_without_text_gives_empty_context() {
        let context = DocumentContext::load(&FixedPages(vec!["", ""]), b"%PDF-1.4");
        assert!(context.is_empty());
        assert_eq!(context.page_count(), 0);
    }

    #[test]
    fn pdf_source_tolerates_garbage_bytes() {
        let pages = PdfTextSource.extract(b"definitely not a pdf");
        assert!(pages.iter().all(|p| p.trim().is_empty()));
    }
}
