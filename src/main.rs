mod chunker;
mod citation;
mod config;
mod llm;
mod parser;
mod pipeline;
mod query;
mod storage;
mod summarizer;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use citation::CitationService;
use config::{AppConfig, CONFIG_FILE};
use llm::LlmClient;
use parser::{ImageAnalyzer, LopdfTextExtractor, PdfiumLayoutParser, PdfiumRasterizer};
use pipeline::{Capabilities, ExtractionMode, IngestReport, Pipeline, Stores};
use query::{QueryService, DEFAULT_INSPECT_LIMIT, DEFAULT_TOP_K};
use storage::{DataPaths, Database, MetadataStore, SqliteSemanticStore};
use utils::logger;

#[derive(Parser)]
#[command(name = "docsight")]
#[command(about = "PDF ingestion, retrieval and citation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 初始化配置、数据目录和数据库
    Init,
    /// 导入一个 PDF
    Ingest {
        file: PathBuf,
        /// structured (alias ocr) or vision (alias gemini)
        #[arg(short, long, default_value = "structured")]
        mode: ExtractionMode,
    },
    /// Answer a question from the stored documents
    Ask {
        query: String,
        #[arg(short, long, default_value_t = DEFAULT_TOP_K)]
        limit: usize,
    },
    /// Search without answer synthesis
    Search {
        query: String,
        #[arg(short, long, default_value_t = DEFAULT_TOP_K)]
        limit: usize,
    },
    /// Tables, images and PDF of one document
    Show { doc_id: String },
    /// 列出已存储的 chunks
    Inspect {
        #[arg(short, long, default_value_t = DEFAULT_INSPECT_LIMIT)]
        limit: usize,
    },
    /// Delete one document and its artifacts
    Delete { doc_id: String },
    /// 清空所有数据
    Reset,
    /// Render a citation crop as PNG
    Cite {
        doc_id: String,
        page: u32,
        /// x0,y0,x1,y1 in page points
        bbox: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Stores and capabilities, built once per invocation.
struct App {
    pipeline: Pipeline,
    query: QueryService,
    citation: CitationService,
}

impl App {
    async fn build(config: &AppConfig) -> Result<Self> {
        let db = Database::open(&config.storage.database_path, config.storage.max_connections).await?;
        let stores = Stores {
            semantic: Arc::new(SqliteSemanticStore::new(&db).await?),
            metadata: Arc::new(MetadataStore::new(DataPaths::new(&config.paths.data_dir))?),
        };

        let llm = Arc::new(LlmClient::new(config.llm.clone())?);
        if !llm.is_configured() {
            warn!("llm.api_key is empty; model calls will return placeholders");
        }

        let lib_dir = config.render.pdfium_lib_dir.as_str();
        let rasterizer = Arc::new(PdfiumRasterizer::new(lib_dir));
        let capabilities = Capabilities {
            rasterizer: rasterizer.clone(),
            structural_parser: Some(Box::new(PdfiumLayoutParser::new(lib_dir))),
            text_source: Box::new(LopdfTextExtractor),
            figures: Box::new(ImageAnalyzer::new(config.extraction.min_figure_px)),
            text_model: llm.clone(),
            vision_model: llm.clone(),
        };

        Ok(Self {
            pipeline: Pipeline::new(capabilities, stores.clone(), config)?,
            query: QueryService::new(stores.clone(), llm),
            citation: CitationService::new(rasterizer, stores.metadata.paths().clone(), &config.render),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logger();
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        return init_command().await;
    }

    let config = AppConfig::load().context("failed to load configuration")?;
    let app = App::build(&config).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Ingest { file, mode } => {
            ingest_command(&app, file, mode).await?;
        }
        Commands::Ask { query, limit } => {
            print_json(&app.query.ask(&query, limit).await?)?;
        }
        Commands::Search { query, limit } => {
            print_json(&app.query.search(&query, limit).await?)?;
        }
        Commands::Show { doc_id } => {
            print_json(&app.query.show(&doc_id)?)?;
        }
        Commands::Inspect { limit } => {
            print_json(&app.query.inspect(limit).await?)?;
        }
        Commands::Delete { doc_id } => {
            delete_command(&app, &doc_id).await?;
        }
        Commands::Reset => {
            app.pipeline.reset().await?;
            print_json(&serde_json::json!({ "status": "success" }))?;
        }
        Commands::Cite {
            doc_id,
            page,
            bbox,
            output,
        } => {
            cite_command(&app, &doc_id, page, &bbox, output)?;
        }
    }

    Ok(())
}

async fn init_command() -> Result<()> {
    info!("Initializing docsight...");

    let app_config = AppConfig::default();
    if let Some(dir) = std::path::Path::new(CONFIG_FILE).parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    app_config.save(CONFIG_FILE)?;
    info!("Wrote default configuration: {}", CONFIG_FILE);

    let paths = DataPaths::new(&app_config.paths.data_dir);
    paths.ensure()?;

    let db = Database::open(&app_config.storage.database_path, app_config.storage.max_connections).await?;
    db.init_schema().await?;
    info!("Database initialized: {}", app_config.storage.database_path.display());

    info!("Next: set llm.api_key in {} (or DOCSIGHT__LLM__API_KEY), then run 'docsight ingest <file>'", CONFIG_FILE);
    Ok(())
}

async fn ingest_command(app: &App, file: PathBuf, mode: ExtractionMode) -> Result<()> {
    let report = app.pipeline.ingest(&file, mode).await;
    print_json(&report)?;
    if let IngestReport::Error { .. } = report {
        std::process::exit(1);
    }
    Ok(())
}

async fn delete_command(app: &App, doc_id: &str) -> Result<()> {
    let removed = app.pipeline.delete(doc_id).await?;
    print_json(&serde_json::json!({
        "status": "success",
        "doc_id": doc_id,
        "chunks_removed": removed,
    }))
}

fn cite_command(app: &App, doc_id: &str, page: u32, bbox: &str, output: Option<PathBuf>) -> Result<()> {
    match app.citation.crop(doc_id, page, bbox) {
        Ok(png) => {
            let path = output.unwrap_or_else(|| PathBuf::from(format!("{}_p{}_cite.png", doc_id, page)));
            std::fs::write(&path, &png).with_context(|| format!("failed to write {}", path.display()))?;
            print_json(&serde_json::json!({
                "status": "success",
                "path": path.display().to_string(),
                "bytes": png.len(),
            }))
        }
        Err(e) => {
            print_json(&serde_json::json!({
                "status": "error",
                "code": e.status(),
                "message": e.to_string(),
            }))?;
            std::process::exit(1);
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
