use clap::Parser;
use knowledge_catalog::{
    DataDir,
    Error,
    KnowledgeBase,
    Result,
    atom::Atom,
    catalog::CatalogEntry,
    encoding::Encoding,
    knowledge::{LinkInput, ListQuery, Outcome, SourceInput, SummaryOutcome, UpsertRequest},
    mcp,
    search::{self, Filters, SearchQuery},
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, FilterArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("KNOWLEDGE_LOG") {
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_path.as_deref())?;
    tracing::debug!(root = %data_dir.root().display(), "using storage root");
    let kb = KnowledgeBase::open(data_dir);

    match cli.command {
        Command::Search(args) => {
            let query = SearchQuery {
                tokens: search::tokenize(&args.query),
                filters: parse_filters(&args.filters)?,
                limit: args.count,
                include_content: args.content,
            };
            let results = kb.search(&query)?;
            if args.json {
                print_json(&results)?;
            } else {
                search::format_human(&results);
            }
        }
        Command::Upsert(args) => {
            let json = args.json;
            let atom = kb.upsert(upsert_request(args)?)?;
            if json {
                print_json(&atom)?;
            } else {
                println!("Saved {}: {}", atom.id, atom.title);
            }
        }
        Command::Get(args) => {
            let atom = kb.get(&args.id)?.ok_or_else(|| Error::NotFound {
                kind: "atom",
                name: args.id.clone(),
            })?;
            if args.json {
                print_json(&atom)?;
            } else {
                print_atom(&atom)?;
            }
        }
        Command::List(args) => {
            let query = ListQuery {
                filters: parse_filters(&args.filters)?,
                limit: args.count,
            };
            let entries = kb.list(&query)?;
            if args.json {
                print_json(&entries)?;
            } else {
                print_entries(&entries);
            }
        }
        Command::Delete(args) => {
            print_outcome(&kb.deprecate(&args.id)?, args.json)?;
        }
        Command::Purge(args) => {
            print_outcome(&kb.purge(&args.id)?, args.json)?;
        }
        Command::ListIds(args) => {
            let ids = kb.list_ids()?;
            if args.json {
                print_json(&ids)?;
            } else {
                for id in &ids.ids {
                    println!("{id}");
                }
            }
        }
        Command::Export => {
            let report = kb.export_all()?;
            print_json(&report.result)?;
            if !report.failures.is_empty() {
                eprintln!("Skipped {} atom(s) that failed to load.", report.failures.len());
            }
        }
        Command::Rebuild(args) => {
            let report = kb.rebuild()?;
            if args.json {
                print_json(&report)?;
            } else {
                println!("{}", report.result.message);
                for failure in &report.failures {
                    eprintln!("  skipped {}: {}", failure.id, failure.error);
                }
            }
        }
        Command::Migrate(args) => {
            let report = kb.migrate()?;
            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "Migrated {} atom(s); index rebuilt with {} atoms",
                    report.result.migrated, report.result.count
                );
                for failure in &report.failures {
                    eprintln!("  skipped {}: {}", failure.id, failure.error);
                }
            }
        }
        Command::Summary(args) => {
            let outcome = kb.get_summary(&args.group_by)?;
            if args.json {
                print_json(&outcome)?;
            } else {
                match outcome {
                    SummaryOutcome::Summary(summary) => {
                        println!("{} atom(s) by {}", summary.total_atoms, summary.group_by);
                        for (key, group) in &summary.groups {
                            println!("\n{key} ({})", group.count);
                            for item in &group.items {
                                println!("  {}  {}", item.id, item.title);
                            }
                        }
                    }
                    SummaryOutcome::Invalid { error } => {
                        return Err(Error::Validation(error));
                    }
                }
            }
        }
        Command::NextId => {
            println!("{}", kb.next_id()?);
        }
        Command::Mcp => {
            mcp::run_mcp(kb)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn parse_filters(args: &FilterArgs) -> Result<Filters> {
    Filters::parse(
        &args.types,
        &args.tags,
        args.status.as_deref(),
        args.language.as_deref(),
    )
}

fn upsert_request(args: cli::UpsertArgs) -> Result<UpsertRequest> {
    let sources = args
        .sources
        .iter()
        .map(|raw| {
            let (kind, reference) = cli::split_pair("source", raw).map_err(Error::Validation)?;
            Ok(SourceInput {
                kind: kind.to_string(),
                reference: reference.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let links = args
        .links
        .iter()
        .map(|raw| {
            let (rel, id) = cli::split_pair("link", raw).map_err(Error::Validation)?;
            Ok(LinkInput {
                rel: rel.to_string(),
                id: id.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    // Empty repeatable flags mean "keep what is stored" on update.
    let non_empty = |values: Vec<String>| (!values.is_empty()).then_some(values);

    Ok(UpsertRequest {
        id: args.id,
        title: args.title,
        kind: args.kind,
        status: args.status,
        confidence: args.confidence,
        summary: args.summary,
        details: args.details,
        pitfalls: non_empty(args.pitfalls),
        language: args.language,
        tags: non_empty(args.tags),
        sources: (!sources.is_empty()).then_some(sources),
        links: (!links.is_empty()).then_some(links),
    })
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| Error::Encode {
        what: "output".to_string(),
        message: e.to_string(),
    })?;
    println!("{text}");
    Ok(())
}

fn print_atom(atom: &Atom) -> Result<()> {
    print!("{}", Encoding::Canonical.encode(atom, &atom.id)?);
    Ok(())
}

fn print_entries(entries: &[CatalogEntry]) {
    if entries.is_empty() {
        println!("No atoms found.");
        return;
    }
    for entry in entries {
        println!(
            "{}\t{}\t{}\t{}",
            entry.id, entry.kind, entry.status, entry.title
        );
    }
}

fn print_outcome(outcome: &Outcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    match (&outcome.message, &outcome.error) {
        (Some(message), _) => println!("{message}"),
        (None, Some(error)) => eprintln!("{error}"),
        (None, None) => {}
    }
    Ok(())
}
