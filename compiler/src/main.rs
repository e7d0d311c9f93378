use clap::Parser;
use std::path::PathBuf;

use valign::pass::PassId;
use valign::pipeline::{compute_provenance, run_pipeline, CompilationState};
use valign::program_query::{analysis_options, unknown_settings};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    /// Human-readable per-access alignment report
    Report,
    /// Alignment report as JSON, with provenance
    Json,
    /// The program after name resolution and renaming
    Ir,
}

#[derive(Parser, Debug)]
#[command(
    name = "valign",
    version,
    about = "Proves alignment of vector loads and stores in .va loop nests"
)]
struct Cli {
    /// Input .va source file
    source: PathBuf,

    /// Required vector alignment in bytes (overrides `set alignment`)
    #[arg(long)]
    alignment: Option<i64>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Report)]
    emit: EmitStage,

    /// Log analysis decisions and pass timing
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::debug!("valign: source = {}", cli.source.display());
    log::debug!("valign: emit   = {:?}", cli.emit);

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("valign: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let parse_result = valign::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            eprintln!("valign: parse error: {}", err);
        }
        std::process::exit(1);
    }
    let Some(program) = parse_result.program else {
        eprintln!("valign: parse failed with no output");
        std::process::exit(1);
    };

    for set in unknown_settings(&program) {
        log::warn!("ignoring unknown setting '{}'", set.name.name);
    }

    // ── Run passes ──
    let options = analysis_options(&program, cli.alignment);
    log::debug!("valign: required alignment = {}", options.required_alignment);

    let mut state = CompilationState::new(program, options);
    state.provenance = Some(compute_provenance(&source));

    let terminal = match cli.emit {
        EmitStage::Ir => PassId::Uniquify,
        EmitStage::Report | EmitStage::Json => PassId::Align,
    };
    let result = run_pipeline(&mut state, terminal, |_, diags| {
        for diag in diags {
            eprintln!("valign: {}", diag);
        }
    });
    if let Err(err) = result {
        log::debug!("valign: {}", err);
        std::process::exit(1);
    }

    // ── Emit ──
    match cli.emit {
        EmitStage::Ir => {
            if let Some(program) = &state.uniquified {
                print!("{}", program);
            }
        }
        EmitStage::Report => {
            if let Some(report) = &state.report {
                print!("{}", report);
            }
        }
        EmitStage::Json => match state.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("valign: error: {}", e);
                std::process::exit(1);
            }
        },
    }
}
