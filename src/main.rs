use clap::Parser;
use docspan::{
    cli::{self, Cli, Command, ConfigAction},
    config_db::{self, ConfigDb, SearchDefaults},
    corpus::{Corpus, SearchStats},
    corpus_db::{self, CorpusDb},
    data_dir::DataDir,
    document::DocumentFilter,
    embedding::HashingEmbedder,
    error,
    highlight::{self, HighlightOptions, PageLayout},
    ingestion,
    mcp,
    providers::MatchPolicy,
    search::{self, SearchContext, SearchMode, SearchRequest},
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSPAN_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let defaults = config_db.search_defaults()?;

    match cli.command {
        Command::Ingest(args) => {
            cmd_ingest(&data_dir, &defaults, &args)?;
        }
        Command::Search(args) => {
            cmd_search(&data_dir, &defaults, args)?;
        }
        Command::Similar(args) => {
            cmd_similar(&data_dir, &defaults, &args)?;
        }
        Command::Get(args) => {
            cmd_get(&data_dir, &defaults, &args)?;
        }
        Command::Stats(args) => {
            cmd_stats(&data_dir, &defaults, &args)?;
        }
        Command::Highlight(args) => {
            cmd_highlight(&args)?;
        }
        Command::Config { action } => match action {
            ConfigAction::Show { json } => {
                config_show(&config_db, &data_dir, &defaults, json)?;
            }
            ConfigAction::Set { key, value } => {
                config_db.set_setting(&key, &value)?;
                println!("Set {key} = {value}");
            }
            ConfigAction::Clear { key } => {
                if !config_db.remove_setting(&key)? {
                    return Err(error::Error::NotFound {
                        kind: "setting",
                        name: key,
                    });
                }
                println!("Cleared {key}");
            }
        },
        Command::Mcp(args) => {
            mcp::run_mcp(data_dir, defaults, args.corpus)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Open a corpus that must already exist.
fn open_existing(
    data_dir: &DataDir,
    name: &str,
) -> error::Result<(SearchContext, Option<CorpusDb>)> {
    let (ctx, db) = corpus_db::open_context(data_dir, name)?;
    if ctx.corpus().is_err() {
        return Err(error::Error::NotFound {
            kind: "corpus",
            name: name.to_string(),
        });
    }
    Ok((ctx, db))
}

fn persist_stats(db: Option<&CorpusDb>, ctx: &SearchContext) {
    if let Some(db) = db
        && let Err(e) = db.save_stats(ctx.search_stats())
    {
        tracing::warn!(error = %e, "failed to persist search stats");
    }
}

fn cmd_ingest(
    data_dir: &DataDir,
    defaults: &SearchDefaults,
    args: &cli::IngestArgs,
) -> error::Result<()> {
    let name = args.corpus.as_deref().unwrap_or(&defaults.corpus);
    let db = CorpusDb::open(&data_dir.corpus_db(name)?)?;

    let (mut corpus, stats) = match db.load()? {
        Some((corpus, stats)) => {
            if corpus.dimension() != args.dimension
                || corpus.kind() != args.index
            {
                tracing::info!(
                    dimension = corpus.dimension(),
                    index = %corpus.kind(),
                    "appending to existing corpus; keeping its index shape"
                );
            }
            (corpus, stats)
        }
        None => {
            tracing::info!(
                corpus = name,
                dimension = args.dimension,
                index = %args.index,
                "creating corpus"
            );
            (
                Corpus::new(args.dimension, args.index)?,
                SearchStats::default(),
            )
        }
    };

    let passages = ingestion::read_passages(&args.path)?;
    let embedder = HashingEmbedder::new(corpus.dimension())?;
    let ids = ingestion::ingest_passages(&mut corpus, &embedder, passages)?;
    db.save(&corpus, &stats)?;

    eprintln!(
        "Ingested {} passage(s) into '{name}' (ids {}..{}, {} total)",
        ids.end - ids.start,
        ids.start,
        ids.end,
        corpus.len()
    );
    Ok(())
}

fn cmd_search(
    data_dir: &DataDir,
    defaults: &SearchDefaults,
    args: cli::SearchArgs,
) -> error::Result<()> {
    let name = args.corpus.as_deref().unwrap_or(&defaults.corpus);
    let (mut ctx, db) = open_existing(data_dir, name)?;

    let mut request =
        SearchRequest::with_defaults(args.query.clone(), defaults);
    request.mode = args.mode;
    request.max_results = args.count;
    if !args.keywords.is_empty() {
        request.keywords = Some(args.keywords.clone());
    }
    if let Some(weight) = args.vector_weight {
        request.vector_weight = weight;
    }
    if let Some(granularity) = args.granularity {
        request.granularity = granularity;
    }
    if let Some(radius) = args.radius {
        request.radius = radius;
    }
    request.filter = match args.filter.as_deref() {
        Some(filter) => DocumentFilter::parse_optional(filter)?,
        None => None,
    };
    request.min_similarity = args.min_similarity;
    if args.match_all {
        request.match_policy = MatchPolicy::All;
    }

    let response = search::execute_search(&mut ctx, &request)?;
    if request.mode != SearchMode::Keyword {
        persist_stats(db.as_ref(), &ctx);
    }

    if args.json {
        search::format_json(&response)?;
    } else {
        search::format_human(&response);
    }
    Ok(())
}

fn cmd_similar(
    data_dir: &DataDir,
    defaults: &SearchDefaults,
    args: &cli::SimilarArgs,
) -> error::Result<()> {
    let name = args.corpus.as_deref().unwrap_or(&defaults.corpus);
    let (mut ctx, db) = open_existing(data_dir, name)?;

    let matches = ctx.similar_documents(args.vector_id, args.count)?;
    persist_stats(db.as_ref(), &ctx);

    if args.json {
        println!("{}", serde_json::to_string(&matches)?);
    } else if matches.is_empty() {
        println!("No similar passages.");
    } else {
        for (i, m) in matches.iter().enumerate() {
            println!("{:>3}. [{:.3}] #{}", i + 1, m.similarity, m.vector_id);
            println!("     {}", docspan::text_util::fallback_excerpt(&m.text));
        }
    }
    Ok(())
}

fn cmd_get(
    data_dir: &DataDir,
    defaults: &SearchDefaults,
    args: &cli::GetArgs,
) -> error::Result<()> {
    let name = args.corpus.as_deref().unwrap_or(&defaults.corpus);
    let (ctx, _) = open_existing(data_dir, name)?;
    let document = ctx.get_document(args.vector_id)?;

    if args.json {
        println!("{}", serde_json::to_string(document)?);
    } else {
        let summary = search::metadata_summary(&document.metadata);
        if !summary.is_empty() {
            println!("# {summary}");
        }
        println!("{}", document.text);
    }
    Ok(())
}

fn cmd_stats(
    data_dir: &DataDir,
    defaults: &SearchDefaults,
    args: &cli::StatsArgs,
) -> error::Result<()> {
    let name = args.corpus.as_deref().unwrap_or(&defaults.corpus);
    let (ctx, _) = open_existing(data_dir, name)?;
    let stats = ctx.stats()?;

    if args.json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!("Corpus: {name}");
        println!("Documents: {}", stats.total_documents);
        println!("Dimension: {}", stats.dimension);
        println!("Index: {}", stats.index_kind);
        println!("Searches: {}", stats.total_searches);
        match stats.last_search {
            Some(at) => println!("Last search: {}", at.to_rfc3339()),
            None => println!("Last search: never"),
        }
    }
    Ok(())
}

fn cmd_highlight(args: &cli::HighlightArgs) -> error::Result<()> {
    let raw = std::fs::read_to_string(&args.page).map_err(|e| {
        let path = args.page.display();
        error::Error::Config(format!("cannot read {path}: {e}"))
    })?;
    let page: PageLayout = serde_json::from_str(&raw)?;

    let options = HighlightOptions {
        tolerance: args.tolerance,
        dpi: args.dpi,
        crop_padding: args.crop,
    };
    options.validate()?;
    let report = highlight::highlight_page(&page, &args.keywords, options);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn config_show(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    defaults: &SearchDefaults,
    json: bool,
) -> error::Result<()> {
    let stored = config_db.list_settings()?;
    let corpora = data_dir.list_corpora()?;

    if json {
        let stored: serde_json::Map<String, serde_json::Value> = stored
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        let value = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "corpora": corpora,
            "defaults": {
                (config_db::DEFAULT_CORPUS_KEY): defaults.corpus,
                (config_db::VECTOR_WEIGHT_KEY): defaults.vector_weight,
                (config_db::GRANULARITY_KEY): defaults.granularity,
                (config_db::RADIUS_KEY): defaults.radius,
            },
            "stored": stored,
        });
        println!("{value}");
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Corpora: {}", corpora.join(", "));
        println!("{}: {}", config_db::DEFAULT_CORPUS_KEY, defaults.corpus);
        println!(
            "{}: {}",
            config_db::VECTOR_WEIGHT_KEY,
            defaults.vector_weight
        );
        println!("{}: {}", config_db::GRANULARITY_KEY, defaults.granularity);
        println!("{}: {}", config_db::RADIUS_KEY, defaults.radius);
        if !stored.is_empty() {
            println!("Stored settings:");
            for (key, value) in &stored {
                println!("  {key} = {value}");
            }
        }
    }
    Ok(())
}
