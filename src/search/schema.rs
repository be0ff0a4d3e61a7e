//! Tantivy schema for the page index: `title` and `body_markdown` are
//! searched and scored, `notebook_id`/`section_id`/`modified_at` are
//! indexed for filtering only, and `page_id` is the stored, exact-match
//! key `upsert`/`delete` key off of.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use tantivy::{
    schema::{
        DateOptions, Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, INDEXED, STORED,
    },
    tokenizer::{AlphaNumOnlyFilter, Language, LowerCaser, SimpleTokenizer, Stemmer, TextAnalyzer, TokenizerManager},
};

/// Exact-match tokenizer used for id-like fields (`page_id`, `notebook_id`,
/// `section_id`): lowercases but does not split on anything tantivy's
/// default tokenizers would treat as a word boundary.
const EXACT_MATCH_TOKENIZER: &str = "exact_match";
/// Natural-language tokenizer used for `title`/`body_markdown`: lowercases,
/// strips punctuation, and stems.
const CONTENT_SEARCH_TOKENIZER: &str = "content_search";

#[allow(dead_code)]
pub const SCHEMA_VERSION: u32 = 1;
#[allow(dead_code)]
pub const EXPECTED_FIELD_COUNT: usize = 6;

#[derive(Debug, Clone)]
pub struct SearchSchema {
    pub schema: Schema,
    pub page_id: Field,
    pub title: Field,
    pub body_markdown: Field,
    pub notebook_id: Field,
    pub section_id: Field,
    pub modified_at: Field,
}

pub struct SearchSchemaBuilder {
    enable_stemming: bool,
    custom_tokenizers: HashMap<String, TextAnalyzer>,
    field_overrides: HashMap<String, TextOptions>,
    validation_enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Field '{field}' configuration error: {details}")]
    FieldConfiguration { field: String, details: String },

    #[error("Tokenizer '{name}' registration failed: {reason}")]
    TokenizerRegistration { name: String, reason: String },

    #[error("Schema validation failed: {reason}")]
    Validation { reason: String },

    #[error("Field '{field}' not found in schema")]
    FieldNotFound { field: String },

    #[error("Incompatible field type for '{field}': expected {expected}, found {found}")]
    IncompatibleFieldType {
        field: String,
        expected: String,
        found: String,
    },

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for SchemaError {
    fn from(error: anyhow::Error) -> Self {
        SchemaError::Other(error.to_string())
    }
}

impl SearchSchema {
    #[inline]
    pub async fn create_async() -> Result<Self> {
        Self::builder().build().await
    }

    #[inline]
    #[must_use]
    pub fn builder() -> SearchSchemaBuilder {
        SearchSchemaBuilder::new()
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        self.validate_required_fields()?;
        self.validate_field_types()?;
        self.validate_indexing_options()?;
        Ok(())
    }

    fn validate_required_fields(&self) -> Result<(), SchemaError> {
        const REQUIRED_FIELDS: &[&str] =
            &["page_id", "title", "body_markdown", "notebook_id", "section_id", "modified_at"];

        let existing_fields: HashSet<&str> =
            self.schema.fields().map(|(_, entry)| entry.name()).collect();

        for &field_name in REQUIRED_FIELDS {
            if !existing_fields.contains(field_name) {
                return Err(SchemaError::FieldNotFound { field: field_name.to_string() });
            }
        }
        Ok(())
    }

    fn validate_field_types(&self) -> Result<(), SchemaError> {
        use tantivy::schema::FieldType;

        let expectations = [
            ("page_id", "Text"),
            ("title", "Text"),
            ("body_markdown", "Text"),
            ("notebook_id", "Text"),
            ("section_id", "Text"),
            ("modified_at", "Date"),
        ];

        for (field_name, expected_type) in &expectations {
            if let Ok(field) = self.schema.get_field(field_name) {
                let entry = self.schema.get_field_entry(field);
                let actual_type = match entry.field_type() {
                    FieldType::Str(_) => "Text",
                    FieldType::Date(_) => "Date",
                    FieldType::U64(_) => "U64",
                    FieldType::I64(_) => "I64",
                    FieldType::F64(_) => "F64",
                    FieldType::Bool(_) => "Bool",
                    FieldType::Bytes(_) => "Bytes",
                    FieldType::JsonObject(_) => "JsonObject",
                    FieldType::Facet(_) => "Facet",
                    FieldType::IpAddr(_) => "IpAddr",
                };
                if actual_type != *expected_type {
                    return Err(SchemaError::IncompatibleFieldType {
                        field: (*field_name).to_string(),
                        expected: (*expected_type).to_string(),
                        found: actual_type.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_indexing_options(&self) -> Result<(), SchemaError> {
        use tantivy::schema::FieldType;

        for field_name in ["page_id", "title", "body_markdown"] {
            if let Ok(field) = self.schema.get_field(field_name) {
                let entry = self.schema.get_field_entry(field);
                if let FieldType::Str(text_options) = entry.field_type()
                    && !text_options.is_stored()
                {
                    return Err(SchemaError::FieldConfiguration {
                        field: field_name.to_string(),
                        details: "Text field must be stored for retrieval".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<Field> {
        self.schema.get_field(name).ok()
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.schema.fields().map(|(_, entry)| entry.name()).collect()
    }
}

impl SearchSchemaBuilder {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            enable_stemming: true,
            custom_tokenizers: HashMap::new(),
            field_overrides: HashMap::new(),
            validation_enabled: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_stemming(mut self, enabled: bool) -> Self {
        self.enable_stemming = enabled;
        self
    }

    #[must_use]
    pub fn with_custom_tokenizer(mut self, name: String, tokenizer: TextAnalyzer) -> Self {
        self.custom_tokenizers.insert(name, tokenizer);
        self
    }

    #[must_use]
    pub fn with_field_override(mut self, field_name: String, options: TextOptions) -> Self {
        self.field_overrides.insert(field_name, options);
        self
    }

    #[inline]
    #[must_use]
    pub fn without_validation(mut self) -> Self {
        self.validation_enabled = false;
        self
    }

    pub async fn register_tokenizers(&self, tokenizer_manager: &TokenizerManager) -> Result<()> {
        let manager = tokenizer_manager.clone();

        let exact_tokenizer = TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).build();
        manager.register(EXACT_MATCH_TOKENIZER, exact_tokenizer);

        let mut content_builder =
            TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).filter(AlphaNumOnlyFilter);
        let content_tokenizer = if self.enable_stemming {
            content_builder.filter(Stemmer::new(Language::English)).build()
        } else {
            content_builder.build()
        };
        manager.register(CONTENT_SEARCH_TOKENIZER, content_tokenizer);

        for (name, tokenizer) in &self.custom_tokenizers {
            manager.register(name, tokenizer.clone());
        }

        Ok(())
    }

    pub async fn build(self) -> Result<SearchSchema> {
        let mut schema_builder = Schema::builder();

        let page_id_options = self.field_overrides.get("page_id").cloned().unwrap_or_else(|| {
            TextOptions::default().set_stored().set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(EXACT_MATCH_TOKENIZER)
                    .set_index_option(IndexRecordOption::Basic),
            )
        });
        let page_id = schema_builder.add_text_field("page_id", page_id_options);

        let title_options = self.field_overrides.get("title").cloned().unwrap_or_else(|| {
            TextOptions::default().set_stored().set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(CONTENT_SEARCH_TOKENIZER)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
        });
        let title = schema_builder.add_text_field("title", title_options);

        let body_options = self.field_overrides.get("body_markdown").cloned().unwrap_or_else(|| {
            TextOptions::default().set_stored().set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(CONTENT_SEARCH_TOKENIZER)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
        });
        let body_markdown = schema_builder.add_text_field("body_markdown", body_options);

        let notebook_id_options = TextOptions::default().set_stored().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(EXACT_MATCH_TOKENIZER)
                .set_index_option(IndexRecordOption::Basic),
        );
        let notebook_id = schema_builder.add_text_field("notebook_id", notebook_id_options);

        let section_id_options = TextOptions::default().set_stored().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(EXACT_MATCH_TOKENIZER)
                .set_index_option(IndexRecordOption::Basic),
        );
        let section_id = schema_builder.add_text_field("section_id", section_id_options);

        let modified_at = schema_builder.add_date_field(
            "modified_at",
            DateOptions::default() | STORED | INDEXED,
        );

        let schema = schema_builder.build();

        let search_schema =
            SearchSchema { schema, page_id, title, body_markdown, notebook_id, section_id, modified_at };

        if self.validation_enabled {
            search_schema.validate().map_err(|e| anyhow::anyhow!("Schema validation failed: {e}"))?;
        }

        Ok(search_schema)
    }
}

impl Default for SearchSchemaBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Default for SearchSchema {
    fn default() -> Self {
        panic!("SearchSchema::default() is not supported. Use SearchSchema::builder().build().await instead.");
    }
}
