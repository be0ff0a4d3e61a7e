//! Query parsing and snippet extraction for [`crate::search::SearchIndex`].

mod parsing;
mod snippets;

pub(crate) use parsing::build_query;
pub(crate) use snippets::SnippetBuilder;
