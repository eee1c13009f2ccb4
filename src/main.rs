use std::{path::PathBuf, process::ExitCode};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use nodesel::{
    config::EngineConfig,
    rule::RuleSet,
    schema::Schema,
    selector::{MatchOption, Selector},
    snapshot::{NodeId, SnapshotTree},
    transform::{CachedTransform, DirectTransform, Transform},
    SelectorError,
};
use serde_json::json;
use slog::{o, Drain, Level, Logger};

/// Query UI tree snapshots with node selectors
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// log debug records to stderr
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and type check a selector
    Check { selector: String },
    /// Print a selector in canonical form
    Fmt { selector: String },
    /// Run a selector against a JSON tree snapshot
    Query {
        /// snapshot file
        #[clap(short, long)]
        tree: PathBuf,
        selector: String,
        /// print every match instead of the first
        #[clap(long)]
        all: bool,
        #[clap(long)]
        quick_find: bool,
        #[clap(long)]
        fast_query: bool,
        /// walk the host tree without memoizing it
        #[clap(long)]
        no_cache: bool,
    },
    /// Compile a rule configuration and report each rule's state
    Rules {
        #[clap(short, long)]
        config: PathBuf,
    },
}

fn logger(verbose: bool) -> Logger {
    let level = if verbose { Level::Debug } else { Level::Warning };
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain.filter_level(level).fuse(), o!())
}

fn compile(source: &str) -> Result<Selector, SelectorError> {
    let selector = Selector::parse(source)?;
    selector.check_type(&Schema::standard())?;
    Ok(selector)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let logger = logger(args.verbose);

    match run(args.command, &logger) {
        Ok(code) => code,
        Err(e) => {
            match e.downcast::<SelectorError>() {
                Ok(e) => eprintln!("{:?}", miette::Report::new(e)),
                Err(e) => eprintln!("error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, logger: &Logger) -> anyhow::Result<ExitCode> {
    match command {
        Command::Check { selector } => {
            let selector = compile(&selector)?;
            println!("{}", selector);
        }
        Command::Fmt { selector } => {
            println!("{}", Selector::parse(&selector)?);
        }
        Command::Query {
            tree,
            selector,
            all,
            quick_find,
            fast_query,
            no_cache,
        } => {
            let selector = compile(&selector)?;
            let tree = SnapshotTree::from_path(&tree)
                .with_context(|| format!("loading {}", tree.display()))?;
            let option = MatchOption {
                quick_find,
                fast_query,
            };
            let found = if no_cache {
                query(&selector, &DirectTransform::new(&tree, logger.clone()), option, all)
            } else {
                query(&selector, &CachedTransform::new(&tree, logger.clone()), option, all)
            };
            if found.is_empty() {
                return Ok(ExitCode::from(1));
            }
            for id in found {
                let node = tree.node(id);
                println!(
                    "{}",
                    json!({
                        "index": id.0,
                        "id": node.and_then(|n| n.id.clone()),
                        "text": node.and_then(|n| n.text.clone()),
                    })
                );
            }
        }
        Command::Rules { config } => {
            let config = EngineConfig::from_path(&config)?;
            let now = tokio::time::Instant::now();
            let rules = RuleSet::compile(&config, &Schema::standard(), now, logger);
            for rejected in rules.rejected() {
                println!("{}: rejected", rejected.key);
                eprintln!("{:?}", miette::Report::new(rejected.error.clone()));
            }
            for rule in rules.rules() {
                println!(
                    "{}: {:?} (cache: {}, slow: {})",
                    rule.key(),
                    rule.status(now),
                    rule.use_cache(),
                    rule.selector().is_slow(MatchOption {
                        quick_find: rule.config().quick_find,
                        fast_query: rule.config().fast_query,
                    }),
                );
                if let Some(e) = rule.check_error() {
                    eprintln!("{:?}", miette::Report::new(e.clone()));
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn query<T: Transform<Node = NodeId>>(
    selector: &Selector,
    t: &T,
    option: MatchOption,
    all: bool,
) -> Vec<NodeId> {
    let Some(root) = t.root() else {
        return Vec::new();
    };
    if all {
        selector.query_all(&root, t, option)
    } else {
        selector.query(&root, t, option).into_iter().collect()
    }
}
