//! Token-bounded, overlapping chunks with page provenance.
//!
//! Pages are joined into one text and cut into units at sentence ends and at
//! legal section headings, then units are packed greedily into chunks. Each
//! chunk after the first re-includes the trailing units of its predecessor,
//! up to the configured overlap budget, so a fact that straddles a chunk
//! boundary appears whole in at least one chunk.
//!
//! Every chunk is a contiguous byte span of the joined text. Concatenating
//! the chunks with each one's overlap prefix removed reconstructs the joined
//! text exactly, with no characters lost or duplicated.
//!
//! Token counts are the standard 4-characters-per-token estimate. It is
//! deliberately conservative for English legal prose; the chunk budget only
//! needs to keep prompts under the context window, not count precisely.

use crate::config::AnalysisConfig;
use crate::pipeline::source::PageText;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Estimate the token count of a text: one token per 4 bytes, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// A contiguous segment of the document text, bounded in estimated tokens.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based position in document order.
    pub index: usize,
    pub text: String,
    /// Estimated token count of `text`, overlap included.
    pub token_count: usize,
    /// 1-based page numbers this chunk's span touches, ascending.
    pub pages: Vec<usize>,
    /// Byte length of the prefix of `text` repeated from the previous
    /// chunk's tail. Zero for the first chunk.
    pub overlap_len: usize,
}

// Sentence ends: terminal punctuation, optional closing quotes/brackets,
// whitespace. The following-uppercase check lives in code since the regex
// engine has no lookaround.
static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]["')\]]*\s+"#).expect("sentence regex"));

// Legal section headings that should start a fresh unit even mid-sentence
// density: numbered/lettered outline items and the stock headings of
// personal-injury filings.
static SECTION_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:\d+\.[ \t]+|[A-Z]\.[ \t]+|WHEREAS\b|NOW,?[ \t]+THEREFORE\b|COUNT[ \t]+[IVXLC]+\b|PRAYER[ \t]+FOR[ \t]+RELIEF\b|PARTIES\b|JURISDICTION[ \t]+AND[ \t]+VENUE\b|FACTUAL[ \t]+ALLEGATIONS\b|CAUSES?[ \t]+OF[ \t]+ACTION\b)",
    )
    .expect("section heading regex")
});

/// Splits page text into overlapping, token-bounded chunks.
pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        let max_tokens = max_tokens.max(1);
        Self {
            max_tokens,
            // Config validation enforces this already; clamp defensively so
            // the unit budget below stays positive.
            overlap_tokens: overlap_tokens.min(max_tokens - 1),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.max_chunk_tokens, config.overlap_tokens)
    }

    /// Chunk the given pages. Deterministic: identical input produces
    /// identical chunks.
    pub fn chunk_pages(&self, pages: &[PageText]) -> Vec<Chunk> {
        // Join pages with a newline, remembering each page's byte span so
        // chunks can report provenance.
        let mut full = String::new();
        let mut page_spans: Vec<(usize, usize, usize)> = Vec::with_capacity(pages.len());
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                full.push('\n');
            }
            let start = full.len();
            full.push_str(&page.text);
            page_spans.push((start, full.len(), page.page_number));
        }

        if full.trim().is_empty() {
            return vec![];
        }

        // A unit must leave room for the overlap window in a fresh chunk.
        let unit_budget = self.max_tokens - self.overlap_tokens;
        let units = self.units(&full, unit_budget);
        let chunks = self.pack(&full, &units, &page_spans);
        debug!(
            "chunked {} pages / {} tokens into {} chunks",
            pages.len(),
            estimate_tokens(&full),
            chunks.len()
        );
        chunks
    }

    /// Cut the text into contiguous byte ranges at sentence and section
    /// boundaries, hard-splitting any range above `unit_budget` tokens.
    fn units(&self, text: &str, unit_budget: usize) -> Vec<(usize, usize)> {
        let mut offsets = Vec::new();
        for m in SENTENCE_END.find_iter(text) {
            // Only treat it as a sentence end when a new sentence follows.
            let follows_upper = text[m.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_uppercase());
            if follows_upper {
                offsets.push(m.end());
            }
        }
        for m in SECTION_HEADING.find_iter(text) {
            offsets.push(m.start());
        }
        offsets.sort_unstable();
        offsets.dedup();
        offsets.retain(|&o| o > 0 && o < text.len());

        // A natural unit stays whole up to the unit budget; an oversized
        // range (no usable boundaries) is cut into overlap-sized pieces so
        // the overlap rule still applies across the forced splits.
        let max_unit_bytes = unit_budget * 4;
        let piece_bytes = if self.overlap_tokens > 0 {
            self.overlap_tokens.min(unit_budget) * 4
        } else {
            max_unit_bytes
        };
        let mut units = Vec::with_capacity(offsets.len() + 1);
        let mut start = 0;
        for boundary in offsets.into_iter().chain(std::iter::once(text.len())) {
            push_split(text, start, boundary, max_unit_bytes, piece_bytes, &mut units);
            start = boundary;
        }
        units
    }

    /// Greedily pack consecutive units into chunks, carrying the overlap
    /// window forward at each chunk break.
    fn pack(
        &self,
        full: &str,
        units: &[(usize, usize)],
        page_spans: &[(usize, usize, usize)],
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut chunk_start = units[0].0;
        let mut overlap_len = 0usize;
        // Index of the first unit owned by the current chunk (not overlap).
        let mut first_owned = 0usize;
        let mut end = chunk_start;
        let mut has_owned = false;

        for (j, &(unit_start, unit_end)) in units.iter().enumerate() {
            let prospective = estimate_tokens(&full[chunk_start..unit_end]);
            if has_owned && prospective > self.max_tokens {
                let close_end = end;
                chunks.push(self.make_chunk(
                    chunks.len(),
                    full,
                    chunk_start,
                    close_end,
                    overlap_len,
                    page_spans,
                ));

                // Walk back over the closed chunk's own units to build the
                // overlap window for the next chunk.
                let mut k = j;
                while k > first_owned
                    && estimate_tokens(&full[units[k - 1].0..close_end]) <= self.overlap_tokens
                {
                    k -= 1;
                }
                chunk_start = units[k].0;
                overlap_len = unit_start - chunk_start;
                first_owned = j;
                has_owned = false;
            }
            end = unit_end;
            has_owned = true;
        }

        chunks.push(self.make_chunk(
            chunks.len(),
            full,
            chunk_start,
            end,
            overlap_len,
            page_spans,
        ));
        chunks
    }

    fn make_chunk(
        &self,
        index: usize,
        full: &str,
        start: usize,
        end: usize,
        overlap_len: usize,
        page_spans: &[(usize, usize, usize)],
    ) -> Chunk {
        let text = full[start..end].to_string();
        let pages = page_spans
            .iter()
            .filter(|&&(ps, pe, _)| ps < end && pe > start)
            .map(|&(_, _, n)| n)
            .collect();
        Chunk {
            index,
            token_count: estimate_tokens(&text),
            text,
            pages,
            overlap_len,
        }
    }
}

/// Append `[start, end)` to `out`; a range over `max_bytes` is hard-split
/// at char boundaries into pieces of at most `piece_bytes`.
fn push_split(
    text: &str,
    start: usize,
    end: usize,
    max_bytes: usize,
    piece_bytes: usize,
    out: &mut Vec<(usize, usize)>,
) {
    if start >= end {
        return;
    }
    if end - start <= max_bytes {
        out.push((start, end));
        return;
    }
    let mut s = start;
    while end - s > piece_bytes {
        let mut cut = s + piece_bytes;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push((s, cut));
        s = cut;
    }
    out.push((s, end));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: usize, text: &str) -> PageText {
        PageText::new(n, text)
    }

    fn legal_prose(target_bytes: usize) -> String {
        let sentence = "The plaintiff filed the claim within the statutory period. ";
        let mut s = String::new();
        while s.len() < target_bytes {
            s.push_str(sentence);
        }
        s
    }

    #[test]
    fn short_document_is_one_chunk() {
        let chunker = Chunker::new(4000, 400);
        let chunks = chunker.chunk_pages(&[page(1, "A short filing. Nothing more to say.")]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].overlap_len, 0);
        assert_eq!(chunks[0].pages, vec![1]);
    }

    #[test]
    fn empty_pages_produce_no_chunks() {
        let chunker = Chunker::new(4000, 400);
        assert!(chunker.chunk_pages(&[]).is_empty());
        assert!(chunker
            .chunk_pages(&[page(1, "   \n  "), page(2, "")])
            .is_empty());
    }

    #[test]
    fn ten_thousand_tokens_make_three_chunks() {
        // 40,000 bytes ≈ 10,000 tokens; max 4000, overlap 400 packs as
        // ~4000 + ~3600 new + remainder.
        let text = legal_prose(40_000);
        let chunker = Chunker::new(4000, 400);
        let chunks = chunker.chunk_pages(&[page(1, &text)]);

        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.token_count <= 4000, "chunk {} too big", c.index);
        }
        // The second chunk begins with the first chunk's tail.
        assert!(chunks[1].overlap_len > 0);
        let overlap = &chunks[1].text[..chunks[1].overlap_len];
        assert!(chunks[0].text.ends_with(overlap));
        // Overlap stays within budget.
        assert!(estimate_tokens(overlap) <= 400);
    }

    #[test]
    fn chunks_cover_the_text_exactly() {
        let pages: Vec<PageText> = (1..=4).map(|n| page(n, &legal_prose(9_000))).collect();
        let joined = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let chunker = Chunker::new(2000, 200);
        let chunks = chunker.chunk_pages(&pages);
        assert!(chunks.len() > 1);

        let mut rebuilt = chunks[0].text.clone();
        for c in &chunks[1..] {
            rebuilt.push_str(&c.text[c.overlap_len..]);
        }
        assert_eq!(rebuilt, joined);
    }

    #[test]
    fn oversized_unbroken_text_is_hard_split() {
        // No sentence boundaries at all; must split mid-text.
        let blob = "x".repeat(30_000);
        let chunker = Chunker::new(4000, 400);
        let chunks = chunker.chunk_pages(&[page(1, &blob)]);

        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.token_count <= 4000);
        }
        // Mid-text splits still carry overlap into the next chunk.
        assert!(chunks[1].overlap_len > 0);
        let mut rebuilt = chunks[0].text.clone();
        for c in &chunks[1..] {
            rebuilt.push_str(&c.text[c.overlap_len..]);
        }
        assert_eq!(rebuilt, blob);
    }

    #[test]
    fn hard_split_respects_char_boundaries() {
        let blob = "é".repeat(10_000);
        let chunker = Chunker::new(1000, 100);
        // Would panic on a non-boundary slice if the split were byte-naive.
        let chunks = chunker.chunk_pages(&[page(1, &blob)]);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn pages_report_the_spanned_range() {
        let pages: Vec<PageText> = (1..=3).map(|n| page(n, &legal_prose(6_000))).collect();
        let chunker = Chunker::new(2000, 200);
        let chunks = chunker.chunk_pages(&pages);

        // Every page must be claimed by at least one chunk, in order.
        let mut seen = std::collections::BTreeSet::new();
        for c in &chunks {
            assert!(!c.pages.is_empty());
            assert!(c.pages.windows(2).all(|w| w[0] < w[1]));
            seen.extend(c.pages.iter().copied());
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn section_headings_start_new_units() {
        let text = "Introductory recitals about the parties\nPRAYER FOR RELIEF\nWherefore plaintiff prays for judgment";
        let chunker = Chunker::new(4000, 400);
        let units = chunker.units(text, 3600);
        let heading_at = text.find("PRAYER").unwrap();
        assert!(
            units.iter().any(|&(s, _)| s == heading_at),
            "expected a unit starting at the section heading, got {units:?}"
        );
    }

    #[test]
    fn sentence_boundary_requires_following_uppercase() {
        // "v. Acme" must not split: lowercase follows the period.
        let text = "Doe v. acme Corp was filed. Then discovery began.";
        let chunker = Chunker::new(4000, 400);
        let units = chunker.units(text, 3600);
        let bad = text.find("acme").unwrap();
        assert!(!units.iter().any(|&(s, _)| s == bad));
        let good = text.find("Then").unwrap();
        assert!(units.iter().any(|&(s, _)| s == good));
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
