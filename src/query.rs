use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::TextModel;
use crate::parser::{ImageRecord, TableRecord};
use crate::pipeline::Stores;
use crate::storage::{SearchHit, StoredChunk};
use crate::utils::FailureKind;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_INSPECT_LIMIT: usize = 1000;
pub const NO_RESULTS_ANSWER: &str =
    "I couldn't find any relevant information in the documents to answer your question.";
const CONTEXT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
    pub sources: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

/// 单个文档的表格、图片与原始 PDF
#[derive(Debug, Clone, Serialize)]
pub struct DocumentArtifacts {
    pub doc_id: String,
    pub tables: Vec<TableRecord>,
    pub images: Vec<ImageRecord>,
    pub pdf_path: Option<String>,
}

/// Read side over the stores: retrieval, answering and browsing.
pub struct QueryService {
    stores: Stores,
    text_model: Arc<dyn TextModel>,
}

impl QueryService {
    pub fn new(stores: Stores, text_model: Arc<dyn TextModel>) -> Self {
        Self { stores, text_model }
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.stores.semantic.search(query, k).await
    }

    pub async fn ask(&self, query: &str, k: usize) -> Result<Answer> {
        let hits = self.search(query, k).await?;
        if hits.is_empty() {
            info!("No context found for '{}'", query);
            return Ok(Answer {
                query: query.to_string(),
                answer: NO_RESULTS_ANSWER.to_string(),
                sources: hits,
                failure: None,
            });
        }

        let context = hits
            .iter()
            .map(|hit| hit.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        info!("Answering '{}' from {} chunks", query, hits.len());

        let result = self.text_model.answer(query, &context).await;
        if let Some(failure) = &result.failure {
            warn!("answer generation degraded: {}", failure.message);
        }
        let failure = result.kind();

        Ok(Answer {
            query: query.to_string(),
            answer: result.value,
            sources: hits,
            failure,
        })
    }

    pub fn show(&self, doc_id: &str) -> Result<DocumentArtifacts> {
        let metadata = &self.stores.metadata;
        let pdf_path = metadata.paths().pdf_path(doc_id);

        Ok(DocumentArtifacts {
            doc_id: doc_id.to_string(),
            tables: metadata.load_tables(doc_id)?,
            images: metadata.load_images(doc_id)?,
            pdf_path: pdf_path.exists().then(|| pdf_path.display().to_string()),
        })
    }

    /// Stored chunks grouped by document.
    pub async fn inspect(&self, limit: usize) -> Result<BTreeMap<String, Vec<StoredChunk>>> {
        let mut grouped: BTreeMap<String, Vec<StoredChunk>> = BTreeMap::new();
        for chunk in self.stores.semantic.list_all(limit).await? {
            grouped.entry(chunk.doc_id.clone()).or_default().push(chunk);
        }
        Ok(grouped)
    }
}
