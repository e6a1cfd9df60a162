use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use miette::{Context, IntoDiagnostic};

use popcanon_opt::{PipelineOptions, canonicalize_graph};
use popcanon_trace::Trace;

/// popcanon: canonicalize traced tensor programs for the popart target
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input trace (JSON)
    input: PathBuf,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Emit::Dump)]
    emit: Emit,

    /// Fail if any operator is left without a lowering
    #[arg(long)]
    warnings_as_errors: bool,

    /// Largest tensor rank the target accepts
    #[arg(long)]
    max_rank: Option<usize>,

    /// Keep nodes whose outputs are never used
    #[arg(long)]
    no_prune: bool,

    /// Log the graph after every pass (needs -v)
    #[arg(long)]
    dump_after_each_pass: bool,

    /// Dump the traced graph to stderr before canonicalization
    #[arg(long)]
    emit_input: bool,

    /// Canonicalize without producing output
    #[arg(long)]
    dry_run: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// Human-readable graph dump
    Dump,
    /// Trace JSON, loadable again
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: &Cli) -> miette::Result<()> {
    // 1. Read and parse the trace.
    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;
    let Trace {
        mut graph,
        input_tensors,
        parameter_tensors,
    } = popcanon_trace::parse(&source)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("trace parse failed")?;

    if cli.emit_input {
        eprintln!("{}", popcanon_ir::dump_graph(&graph));
    }

    // 2. Canonicalize.
    let options = PipelineOptions {
        warnings_as_errors: cli.warnings_as_errors,
        max_rank: cli.max_rank,
        prune_dead_nodes: !cli.no_prune,
        dump_after_each_pass: cli.dump_after_each_pass,
    };
    log::info!("canonicalizing {} node(s)", graph.node_count());
    let diagnostics =
        canonicalize_graph(&mut graph, &input_tensors, &parameter_tensors, &options)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("canonicalization failed")?;

    // 3. Print diagnostics.
    for diag in &diagnostics {
        eprintln!("{diag}");
    }

    if cli.dry_run {
        return Ok(());
    }

    // 4. Write output.
    let text = match cli.emit {
        Emit::Dump => popcanon_ir::dump_graph(&graph),
        Emit::Json => {
            let trace = Trace {
                graph,
                input_tensors,
                parameter_tensors,
            };
            popcanon_trace::to_json(&trace)
                .map_err(|e| miette::miette!("{e}"))
                .wrap_err("failed to serialize trace")?
        }
    };
    match &cli.output {
        Some(path) => std::fs::write(path, text)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}
