//! semvec CLI - embed text from the command line.

use clap::Parser;
use semvec_embed::{BgeLocal, EmbedConfig, Embedder, HuggingFace};

/// Embed texts with a local BGE model or the HuggingFace Inference API.
///
/// By default texts are sent to the hosted inference endpoint using the
/// HUGGINGFACE_API_KEY environment variable; --local runs the model
/// on-device instead (model files resolved via MODEL_DIR).
#[derive(Parser)]
#[command(name = "semvec")]
#[command(about = "Text embedding for retrieval")]
#[command(version)]
struct Cli {
    /// Texts to embed
    #[arg(required = true)]
    texts: Vec<String>,

    /// Run the model on-device instead of calling the inference API
    #[arg(long)]
    local: bool,

    /// Model identifier
    #[arg(short, long)]
    model: Option<String>,

    /// Expected embedding dimension, validated at startup
    #[arg(short, long)]
    dimension: Option<usize>,

    /// Compute device for --local (cpu, cuda or metal)
    #[arg(long, default_value = "cpu")]
    device: String,

    /// API key (default: HUGGINGFACE_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Endpoint URL override
    #[arg(long)]
    api_url: Option<String>,

    /// Output full vectors as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .init();
    }

    let mut cfg = EmbedConfig::default().with_device(&cli.device);
    if let Some(ref model) = cli.model {
        cfg = cfg.with_model(model);
    }
    if let Some(dim) = cli.dimension {
        cfg = cfg.with_dimension(dim);
    }
    if let Some(ref key) = cli.api_key {
        cfg = cfg.with_api_key(key);
    }
    if let Some(ref url) = cli.api_url {
        cfg = cfg.with_base_url(url);
    }

    let embedder: Box<dyn Embedder> = if cli.local {
        Box::new(BgeLocal::load(cfg)?)
    } else {
        Box::new(HuggingFace::connect(cfg).await?)
    };

    let texts: Vec<&str> = cli.texts.iter().map(String::as_str).collect();
    let vectors = embedder.embed_batch(&texts).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&vectors)?);
    } else {
        println!("{} ({} dims)", embedder.id(), embedder.dimension());
        for (text, vector) in cli.texts.iter().zip(&vectors) {
            let head: Vec<String> = vector.iter().take(6).map(|v| format!("{v:.4}")).collect();
            println!("  {text}: [{}, ...]", head.join(", "));
        }
    }

    Ok(())
}
