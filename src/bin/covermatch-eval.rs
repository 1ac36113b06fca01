//! Score a warm embedding cache: build the query/reference distance matrix
//! and print mAP, hit rate and rank-1.

use std::path::PathBuf;

use covermatch::config::EvalConfig;
use covermatch::eval::{EvalPaths, evaluate};
use covermatch::features::NpyFeatureStore;
use covermatch::logging;
use covermatch::metrics::StandardRanking;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone)]
struct CliOptions {
    config_path: PathBuf,
    query: PathBuf,
    reference: Option<PathBuf>,
    query_in_ref: Option<PathBuf>,
    embed_dir: PathBuf,
    dist_name: Option<PathBuf>,
    model_tag: Option<String>,
    top_k: Option<usize>,
    workers: Option<usize>,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    let mut config = EvalConfig::load(&options.config_path).map_err(|err| err.to_string())?;
    if let Some(top_k) = options.top_k {
        config.top_k = top_k;
    }
    if options.workers.is_some() {
        config.workers = options.workers;
    }

    let reference = options.reference.unwrap_or_else(|| options.query.clone());
    let mut paths = EvalPaths::new(&options.query, reference, &options.embed_dir);
    paths.query_in_ref = options.query_in_ref;
    paths.dist_name = options.dist_name;
    paths.model_tag = options.model_tag;

    let features = NpyFeatureStore::new();
    let outcome =
        evaluate(&config, None, &features, &StandardRanking, &paths).map_err(|err| err.to_string())?;
    let (rows, cols) = outcome.matrix.shape();
    println!("queries: {rows}  references: {cols}");
    println!("mAP: {:.5}", outcome.metrics.mean_ap);
    println!("hit rate: {:.5}", outcome.metrics.hit_rate);
    println!("rank-1: {:.5}", outcome.metrics.rank1);
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut config_path: Option<PathBuf> = None;
    let mut query: Option<PathBuf> = None;
    let mut reference: Option<PathBuf> = None;
    let mut query_in_ref: Option<PathBuf> = None;
    let mut embed_dir: Option<PathBuf> = None;
    let mut dist_name: Option<PathBuf> = None;
    let mut model_tag: Option<String> = None;
    let mut top_k: Option<usize> = None;
    let mut workers: Option<usize> = None;

    let mut idx = 0usize;
    while idx < args.len() {
        let flag = args[idx].as_str();
        if matches!(flag, "-h" | "--help") {
            return Err(help_text());
        }
        idx += 1;
        let value = args
            .get(idx)
            .ok_or_else(|| format!("{flag} requires a value"))?;
        match flag {
            "--config" => config_path = Some(PathBuf::from(value)),
            "--query" => query = Some(PathBuf::from(value)),
            "--ref" => reference = Some(PathBuf::from(value)),
            "--query-in-ref" => query_in_ref = Some(PathBuf::from(value)),
            "--embed-dir" => embed_dir = Some(PathBuf::from(value)),
            "--dist" => dist_name = Some(PathBuf::from(value)),
            "--model-tag" => model_tag = Some(value.to_string()),
            "--top-k" => {
                top_k = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("Invalid --top-k value: {value}"))?,
                );
            }
            "--workers" => {
                let parsed = value
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid --workers value: {value}"))?;
                if parsed == 0 {
                    return Err("--workers must be at least 1".to_string());
                }
                workers = Some(parsed);
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    Ok(CliOptions {
        config_path: config_path.ok_or_else(|| "--config is required".to_string())?,
        query: query.ok_or_else(|| "--query is required".to_string())?,
        reference,
        query_in_ref,
        embed_dir: embed_dir.ok_or_else(|| "--embed-dir is required".to_string())?,
        dist_name,
        model_tag,
        top_k,
        workers,
    })
}

fn help_text() -> String {
    [
        "covermatch-eval",
        "",
        "Usage:",
        "  covermatch-eval --config <eval.toml> --query <query.txt> --embed-dir <dir> [options]",
        "",
        "Options:",
        "  --ref <ref.txt>           Reference manifest (default: the query manifest).",
        "  --query-in-ref <file>     Exclusion pairs under `query_in_ref`.",
        "  --dist <path>             Save the matrix to <path>.npy and labels next to it.",
        "  --model-tag <tag>         Cache subdirectory for one model's embeddings.",
        "  --top-k <n>               Rank cutoff (default: from config, 10000).",
        "  --workers <n>             Distance worker threads (default: all cores).",
    ]
    .join("\n")
}
