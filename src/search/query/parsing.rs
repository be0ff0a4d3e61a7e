//! Query grammar: natural-language bag-of-terms with implicit per-term
//! prefix matching, quoted phrases, uppercase `AND`/`OR`/`NOT` boolean
//! operators, and trailing-`*` wildcards. Combined with a structured
//! [`crate::search::SearchFilter`] that narrows by notebook, section, and
//! modification time.

use std::ops::Bound;

use tantivy::query::{BooleanQuery, BoostQuery, Occur, PhraseQuery, Query, RangeQuery, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{Term, TantivyError};

use crate::search::schema::SearchSchema;
use crate::search::types::SearchFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone)]
enum Token {
    Term(String),
    Phrase(String),
    Op(Op),
}

/// Splits a query string into terms, quoted phrases, and the literal
/// `AND`/`OR`/`NOT` operator tokens.
fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut phrase = String::new();
            for ch in chars.by_ref() {
                if ch == '"' {
                    break;
                }
                phrase.push(ch);
            }
            if !phrase.trim().is_empty() {
                tokens.push(Token::Phrase(phrase));
            }
            continue;
        }
        let mut word = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_whitespace() || ch == '"' {
                break;
            }
            word.push(ch);
            chars.next();
        }
        match word.as_str() {
            "AND" => tokens.push(Token::Op(Op::And)),
            "OR" => tokens.push(Token::Op(Op::Or)),
            "NOT" => tokens.push(Token::Op(Op::Not)),
            _ if !word.is_empty() => tokens.push(Token::Term(word)),
            _ => {}
        }
    }

    tokens
}

/// One term/phrase clause, with the boolean occurrence it participates in.
struct Clause {
    occur: Occur,
    query: Box<dyn Query>,
}

fn field_clause(schema: &SearchSchema, title_weight: f32, body_weight: f32, term: &str) -> Box<dyn Query> {
    let (prefix, pattern) = match term.strip_suffix('*') {
        Some(stripped) if !stripped.is_empty() => (true, stripped.to_lowercase()),
        _ => (term.chars().count() >= 3, term.to_lowercase()),
    };

    let mut subqueries: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    for (field, weight) in [(schema.title, title_weight), (schema.body_markdown, body_weight)] {
        let inner: Box<dyn Query> = if prefix {
            let regex = format!("{}.*", regex_escape(&pattern));
            match tantivy::query::RegexQuery::from_pattern(&regex, field) {
                Ok(q) => Box::new(q),
                Err(_) => Box::new(TermQuery::new(
                    Term::from_field_text(field, &pattern),
                    IndexRecordOption::WithFreqsAndPositions,
                )),
            }
        } else {
            Box::new(TermQuery::new(
                Term::from_field_text(field, &pattern),
                IndexRecordOption::WithFreqsAndPositions,
            ))
        };
        subqueries.push((Occur::Should, Box::new(BoostQuery::new(inner, weight))));
    }
    Box::new(BooleanQuery::new(subqueries))
}

fn phrase_clause(schema: &SearchSchema, title_weight: f32, body_weight: f32, phrase: &str) -> Box<dyn Query> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let mut subqueries: Vec<(Occur, Box<dyn Query>)> = Vec::new();

    for (field, weight) in [(schema.title, title_weight), (schema.body_markdown, body_weight)] {
        let terms: Vec<Term> = words.iter().map(|w| Term::from_field_text(field, &w.to_lowercase())).collect();
        let inner: Box<dyn Query> = match terms.len() {
            0 => continue,
            1 => Box::new(TermQuery::new(terms.into_iter().next().unwrap(), IndexRecordOption::WithFreqsAndPositions)),
            _ => Box::new(PhraseQuery::new(terms)),
        };
        subqueries.push((Occur::Should, Box::new(BoostQuery::new(inner, weight))));
    }
    Box::new(BooleanQuery::new(subqueries))
}

/// Builds the boolean clause tree for the free-text portion of a query.
/// Adjacent clauses default to `Must` (implicit AND); an `OR` between two
/// clauses turns both into `Should`; a `NOT` turns the following clause
/// into `MustNot`.
fn build_text_query(
    schema: &SearchSchema,
    title_weight: f32,
    body_weight: f32,
    text: &str,
) -> Option<Box<dyn Query>> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return None;
    }

    let mut clauses: Vec<Clause> = Vec::new();
    let mut pending_or = false;
    let mut pending_not = false;

    for token in tokens {
        match token {
            Token::Op(Op::And) => {}
            Token::Op(Op::Or) => pending_or = true,
            Token::Op(Op::Not) => pending_not = true,
            Token::Term(term) => {
                let query = field_clause(schema, title_weight, body_weight, &term);
                push_clause(&mut clauses, query, &mut pending_or, &mut pending_not);
            }
            Token::Phrase(phrase) => {
                let query = phrase_clause(schema, title_weight, body_weight, &phrase);
                push_clause(&mut clauses, query, &mut pending_or, &mut pending_not);
            }
        }
    }

    if clauses.is_empty() {
        return None;
    }

    Some(Box::new(BooleanQuery::new(
        clauses.into_iter().map(|c| (c.occur, c.query)).collect(),
    )))
}

fn push_clause(clauses: &mut Vec<Clause>, query: Box<dyn Query>, pending_or: &mut bool, pending_not: &mut bool) {
    let occur = if *pending_not {
        Occur::MustNot
    } else if *pending_or {
        if let Some(last) = clauses.last_mut() {
            last.occur = Occur::Should;
        }
        Occur::Should
    } else {
        Occur::Must
    };
    clauses.push(Clause { occur, query });
    *pending_or = false;
    *pending_not = false;
}

fn filter_query(schema: &SearchSchema, filter: &SearchFilter) -> Option<Box<dyn Query>> {
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

    if let Some(ids) = &filter.notebook_ids {
        let subs: Vec<(Occur, Box<dyn Query>)> = ids
            .iter()
            .map(|id| {
                let term = Term::from_field_text(schema.notebook_id, id);
                (Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>)
            })
            .collect();
        if !subs.is_empty() {
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(subs))));
        }
    }

    if let Some(ids) = &filter.section_ids {
        let subs: Vec<(Occur, Box<dyn Query>)> = ids
            .iter()
            .map(|id| {
                let term = Term::from_field_text(schema.section_id, id);
                (Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>)
            })
            .collect();
        if !subs.is_empty() {
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(subs))));
        }
    }

    if filter.modified_after.is_some() || filter.modified_before.is_some() {
        let lower = match filter.modified_after {
            Some(dt) => Bound::Excluded(Term::from_field_date(schema.modified_at, to_tantivy_date(dt))),
            None => Bound::Unbounded,
        };
        let upper = match filter.modified_before {
            Some(dt) => Bound::Excluded(Term::from_field_date(schema.modified_at, to_tantivy_date(dt))),
            None => Bound::Unbounded,
        };
        clauses.push((Occur::Must, Box::new(RangeQuery::new(lower, upper))));
    }

    if clauses.is_empty() {
        None
    } else {
        Some(Box::new(BooleanQuery::new(clauses)))
    }
}

fn to_tantivy_date(dt: chrono::DateTime<chrono::Utc>) -> tantivy::DateTime {
    tantivy::DateTime::from_timestamp_secs(dt.timestamp())
}

fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Builds the final query combining free text and the structured filter.
/// `None` text with a non-empty filter matches everything the filter
/// allows; `None` text and an empty filter is rejected by the caller
/// before reaching here.
pub(crate) fn build_query(
    schema: &SearchSchema,
    title_weight: f32,
    body_weight: f32,
    text: &str,
    filter: &SearchFilter,
) -> Result<Box<dyn Query>, TantivyError> {
    let text_query = build_text_query(schema, title_weight, body_weight, text);
    let filter_query = filter_query(schema, filter);

    match (text_query, filter_query) {
        (Some(t), Some(f)) => Ok(Box::new(BooleanQuery::new(vec![(Occur::Must, t), (Occur::Must, f)]))),
        (Some(t), None) => Ok(t),
        (None, Some(f)) => Ok(f),
        (None, None) => Ok(Box::new(BooleanQuery::new(Vec::new()))),
    }
}
