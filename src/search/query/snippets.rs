//! Snippet extraction: picks the passage of `body_markdown` with the most
//! distinct matched terms (not just the most total occurrences), and
//! wraps each match in `«…»`.
//!
//! Unlike Tantivy's built-in `SnippetGenerator`, which scores fragments by
//! raw term frequency, this scores by term *diversity* first: a fragment
//! containing three different query terms once each outranks one
//! containing a single term three times.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use tantivy::query::Query;
use tantivy::schema::Value;
use tantivy::tokenizer::TextAnalyzer;
use tantivy::{Score, Searcher, TantivyDocument, Term};

use crate::search::schema::SearchSchema;

const MAX_SNIPPET_CHARS: usize = 240;
const DIVERSITY_WEIGHT: f32 = 10.0;
const FREQUENCY_WEIGHT: f32 = 1.0;

struct Fragment {
    start: usize,
    stop: usize,
    unique_terms: HashSet<String>,
    matches: Vec<Range<usize>>,
    diversity_score: f32,
    frequency_score: f32,
}

impl Fragment {
    fn new(start: usize) -> Self {
        Self {
            start,
            stop: start,
            unique_terms: HashSet::new(),
            matches: Vec::new(),
            diversity_score: 0.0,
            frequency_score: 0.0,
        }
    }

    fn add_match(&mut self, term: &str, term_score: f32, from: usize, to: usize) {
        self.stop = to;
        if self.unique_terms.insert(term.to_string()) {
            self.diversity_score += DIVERSITY_WEIGHT * term_score;
        }
        self.frequency_score += FREQUENCY_WEIGHT * term_score;
        self.matches.push(from..to);
    }

    fn total_score(&self) -> f32 {
        self.diversity_score + self.frequency_score
    }
}

pub(crate) struct SnippetBuilder {
    terms: BTreeMap<String, Score>,
    tokenizer: Option<TextAnalyzer>,
}

impl SnippetBuilder {
    pub(crate) fn create(searcher: &Searcher, query: &dyn Query, schema: &SearchSchema) -> Self {
        let mut term_set: std::collections::BTreeSet<&Term> = std::collections::BTreeSet::new();
        query.query_terms(&mut |term, _| {
            if term.field() == schema.title || term.field() == schema.body_markdown {
                term_set.insert(term);
            }
        });

        let mut terms = BTreeMap::new();
        for term in term_set {
            if let Some(term_str) = term.value().as_str() {
                let doc_freq = searcher.doc_freq(term).unwrap_or(0);
                if doc_freq > 0 {
                    let score = 1.0 / (1.0 + doc_freq as Score);
                    terms.insert(term_str.to_lowercase(), score);
                }
            }
        }

        let tokenizer = searcher.index().tokenizer_for_field(schema.body_markdown).ok();
        Self { terms, tokenizer }
    }

    /// Produces a snippet for `doc`, falling back to a plain truncation of
    /// `body_markdown` if no query term can be located in it.
    pub(crate) fn build(&self, doc: &TantivyDocument, schema: &SearchSchema) -> String {
        let content = doc.get_first(schema.body_markdown).and_then(|v| v.as_str()).unwrap_or("");
        if content.is_empty() {
            return String::new();
        }

        if !self.terms.is_empty()
            && let Some(snippet) = self.best_fragment(content)
        {
            return snippet;
        }

        truncate(content, MAX_SNIPPET_CHARS)
    }

    fn best_fragment(&self, text: &str) -> Option<String> {
        let tokenizer = self.tokenizer.as_ref()?;
        let mut tokenizer = tokenizer.clone();
        let mut stream = tokenizer.token_stream(text);

        let mut fragment = Fragment::new(0);
        let mut fragments = Vec::new();

        while let Some(token) = stream.next() {
            if token.offset_to - fragment.start > MAX_SNIPPET_CHARS {
                if !fragment.unique_terms.is_empty() {
                    fragments.push(fragment);
                }
                fragment = Fragment::new(token.offset_from);
            }
            fragment.stop = token.offset_to;

            let lower = token.text.to_lowercase();
            if let Some(&score) = self.terms.get(&lower) {
                fragment.add_match(&lower, score, token.offset_from, token.offset_to);
            }
        }
        if !fragment.unique_terms.is_empty() {
            fragments.push(fragment);
        }

        let best = fragments
            .iter()
            .max_by(|a, b| a.total_score().partial_cmp(&b.total_score()).unwrap_or(std::cmp::Ordering::Equal))?;

        Some(highlight(&text[best.start..best.stop], best.start, &best.matches))
    }
}

fn highlight(fragment: &str, fragment_start: usize, matches: &[Range<usize>]) -> String {
    let mut ranges: Vec<Range<usize>> =
        matches.iter().map(|r| r.start.saturating_sub(fragment_start)..r.end.saturating_sub(fragment_start)).collect();
    ranges.sort_by_key(|r| (r.start, r.end));
    let merged = merge_ranges(&ranges);

    let mut out = String::with_capacity(fragment.len() + merged.len() * 4);
    let mut pos = 0;
    for range in merged {
        let start = range.start.min(fragment.len());
        let end = range.end.min(fragment.len());
        if start > pos {
            out.push_str(&fragment[pos..start]);
        }
        if end > start {
            out.push('«');
            out.push_str(&fragment[start..end]);
            out.push('»');
        }
        pos = end;
    }
    if pos < fragment.len() {
        out.push_str(&fragment[pos..]);
    }
    truncate(&out, MAX_SNIPPET_CHARS)
}

fn merge_ranges(ranges: &[Range<usize>]) -> Vec<Range<usize>> {
    let mut result: Vec<Range<usize>> = Vec::new();
    for range in ranges {
        if let Some(last) = result.last_mut()
            && last.end >= range.start
        {
            last.end = last.end.max(range.end);
            continue;
        }
        result.push(range.clone());
    }
    result
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
