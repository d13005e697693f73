use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::llm::{TextModel, VisionModel};
use crate::parser::StructuralUnit;

pub const LLM_SUMMARY_PREFIX: &str = "LLM Summary: ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryCounts {
    pub summarized: usize,
    pub failed: usize,
}

/// 表格摘要与图片描述
pub struct ContentSummarizer {
    text_model: Arc<dyn TextModel>,
    vision_model: Arc<dyn VisionModel>,
    min_chars: usize,
}

impl ContentSummarizer {
    pub fn new(text_model: Arc<dyn TextModel>, vision_model: Arc<dyn VisionModel>, min_chars: usize) -> Self {
        Self {
            text_model,
            vision_model,
            min_chars,
        }
    }

    /// Replaces the search text of large tables with a model summary.
    /// Failed tables keep their heuristic summary.
    pub async fn summarize_tables(&self, units: &mut [StructuralUnit]) -> SummaryCounts {
        let mut counts = SummaryCounts::default();

        for unit in units.iter_mut().filter(|u| u.is_table()) {
            let Some(full) = unit.full_content.as_deref() else {
                continue;
            };
            if full.chars().count() <= self.min_chars {
                debug!("table on page {} too small to summarize", unit.page);
                continue;
            }

            let result = self.text_model.summarize(full).await;
            match result.into_ok() {
                Some(summary) if !summary.trim().is_empty() => {
                    unit.text = format!("{}{}", LLM_SUMMARY_PREFIX, summary.trim());
                    counts.summarized += 1;
                }
                _ => {
                    warn!("table summary failed on page {}; keeping heuristic summary", unit.page);
                    counts.failed += 1;
                }
            }
        }

        if counts.summarized > 0 {
            info!("Summarized {} tables", counts.summarized);
        }
        counts
    }

    pub async fn caption_figure(&self, image_path: &Path, page: u32) -> String {
        let result = self.vision_model.caption(image_path).await;
        if let Some(failure) = &result.failure {
            warn!("caption failed for {}: {}", image_path.display(), failure.message);
        }
        match result.into_ok() {
            Some(caption) if !caption.trim().is_empty() => caption.trim().to_string(),
            _ => fallback_caption(page),
        }
    }
}

pub fn fallback_caption(page: u32) -> String {
    format!("Image extracted from page {}", page)
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::llm::Transcription;
    use crate::utils::{AdapterResult, FailureKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Text and vision model with scripted behavior for tests.
    #[derive(Default)]
    pub struct FakeModel {
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl FakeModel {
        pub fn working() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn outcome(&self, value: String) -> AdapterResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                AdapterResult::degraded(String::new(), FailureKind::CallFailed, "scripted failure")
            } else {
                AdapterResult::ok(value)
            }
        }
    }

    #[async_trait]
    impl TextModel for FakeModel {
        async fn summarize(&self, text: &str) -> AdapterResult<String> {
            self.outcome(format!("Summary of {} chars.", text.len()))
        }

        async fn answer(&self, query: &str, context: &str) -> AdapterResult<String> {
            self.outcome(format!("{} => {}", query, context))
        }
    }

    #[async_trait]
    impl VisionModel for FakeModel {
        async fn transcribe(&self, image_path: &Path) -> AdapterResult<Transcription> {
            let name = image_path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string();
            let result = self.outcome(format!("Transcribed {}", name));
            let ok = result.is_ok();
            AdapterResult {
                value: Transcription {
                    text: if ok { result.value } else { "ERR: VISION FAILED scripted".to_string() },
                    confidence: if ok { 1.0 } else { 0.0 },
                    source: crate::llm::SOURCE_VISION.to_string(),
                },
                failure: result.failure,
            }
        }

        async fn caption(&self, _image_path: &Path) -> AdapterResult<String> {
            self.outcome("A bar chart of revenue.".to_string())
        }
    }
}
