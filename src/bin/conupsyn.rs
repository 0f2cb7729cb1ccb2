use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, ValueEnum};

use conupsyn::cusp::Cusp;
use conupsyn::model::UpdateSynthesisModel;
use conupsyn::pipeline::{synthesize, Options, Outcome};
use conupsyn::policy::{generate_policy, generate_policy_without_reachability, network_topology};
use conupsyn::search::SearchStrategy;
use conupsyn::subpaths::{format_subpaths, waypoint_subpaths};
use conupsyn::verifier::VerifyPn;

const GRAPHICS_OUT: &str = "graphics_out";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, ValueEnum)]
enum Verbosity {
    None,
    Minimal,
    Low,
    High,
}

impl Verbosity {
    fn level_filter(self) -> simplelog::LevelFilter {
        match self {
            Verbosity::None => simplelog::LevelFilter::Off,
            Verbosity::Minimal => simplelog::LevelFilter::Warn,
            Verbosity::Low => simplelog::LevelFilter::Info,
            Verbosity::High => simplelog::LevelFilter::Debug,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, about = "Synthesize consistent network update schedules")]
struct Cli {
    /// Path to the verifypn-games engine.
    #[arg(value_name = "ENGINE")]
    engine: PathBuf,

    /// The test case to run on.
    #[arg(value_name = "TEST_CASE")]
    test_case: PathBuf,

    /// Draw graphs for the policy automaton and the network.
    #[arg(short = 'g', long)]
    draw_graphs: bool,

    /// Verbosity of print output.
    #[arg(short = 'V', long, value_enum, default_value = "low")]
    verbosity: Verbosity,

    /// Only calculate waypoint sub-paths and write them to FILE.
    #[arg(short = 'f', long, value_name = "FILE")]
    only_subpaths: Option<PathBuf>,

    /// Output debugging files with the given prefix.
    #[arg(short = 'd', long, value_name = "PREFIX")]
    debug_prefix: Option<PathBuf>,

    /// Disable topological decomposition.
    #[arg(short = 'T', long)]
    no_decomposition: bool,

    /// Disable the first/last equivalence classes.
    #[arg(short = 'E', long)]
    no_initial_final_classes: bool,

    /// Disable chain equivalence classes.
    #[arg(short = 'C', long)]
    no_chain_classes: bool,

    /// Disable topological-order reduction of the policy automaton.
    #[arg(short = 'R', long)]
    no_automaton_reduction: bool,

    /// Maximum number of switches updated in one batch (0 for unlimited).
    #[arg(short = 'm', long, value_name = "INT", default_value = "0")]
    switches_in_batch: usize,

    /// Buffer all output and print it once at the end.
    #[arg(short = 'O', long)]
    print_once: bool,

    /// Echo the engine command line and its raw output.
    #[arg(short = 'P', long)]
    echo_verifier: bool,

    /// Use bisection instead of sequential search over batch bounds.
    #[arg(long)]
    bisection: bool,
}

/// Collects user-facing output, printing immediately unless asked to hold it.
struct Printer {
    quiet: bool,
    hold: bool,
    buffer: String,
}

impl Printer {
    fn line(&mut self, text: impl AsRef<str>) {
        if self.quiet {
            return;
        }
        if self.hold {
            self.buffer.push_str(text.as_ref());
            self.buffer.push('\n');
        } else {
            println!("{}", text.as_ref());
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            print!("{}", self.buffer);
            self.buffer.clear();
        }
    }
}

fn draw_graphs(usm: &UpdateSynthesisModel, reduction: bool) -> color_eyre::Result<()> {
    let dir = Path::new(GRAPHICS_OUT);
    fs::create_dir_all(dir)?;
    let topology = network_topology(usm);
    let policy = generate_policy(usm, reduction.then_some(&topology));
    fs::write(dir.join("dfa.dot"), policy.to_dot()?)?;
    fs::write(dir.join("network.dot"), usm.to_dot()?)?;
    Ok(())
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Cli::parse();

    simplelog::TermLogger::init(
        args.verbosity.level_filter(),
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let mut out = Printer {
        quiet: args.verbosity == Verbosity::None,
        hold: args.print_once,
        buffer: String::new(),
    };

    let time_total = Instant::now();
    let usm = UpdateSynthesisModel::from_path(&args.test_case)?;

    if args.draw_graphs {
        draw_graphs(&usm, !args.no_automaton_reduction)?;
    }

    if let Some(path) = &args.only_subpaths {
        let topology = network_topology(&usm);
        let reduction = (!args.no_automaton_reduction).then_some(&topology);
        let policy = generate_policy_without_reachability(&usm, reduction);
        let cusp = Cusp::from_model(&usm, generate_policy(&usm, reduction));
        let paths = waypoint_subpaths(&policy, &cusp);
        fs::write(path, format_subpaths(&paths))?;
        out.line(format!(
            "Subpaths generated in {:.3} seconds!",
            time_total.elapsed().as_secs_f64()
        ));
        out.flush();
        return Ok(());
    }

    let mut options = Options::default()
        .with_decomposition(!args.no_decomposition)
        .with_initial_final_classes(!args.no_initial_final_classes)
        .with_chain_classes(!args.no_chain_classes)
        .with_automaton_reduction(!args.no_automaton_reduction)
        .with_max_switches_per_batch(args.switches_in_batch)
        .with_search(if args.bisection {
            SearchStrategy::Bisection
        } else {
            SearchStrategy::Sequential
        });
    if let Some(prefix) = &args.debug_prefix {
        options = options.with_debug_prefix(prefix);
    }

    out.line(format!("Problem file: {}", args.test_case.display()));
    let mut engine = VerifyPn::new(&args.engine).with_echo(args.echo_verifier);
    match synthesize(&usm, &options, &mut engine)? {
        Outcome::Solved { batches } => {
            out.line(format!("Minimum batches required: {}", batches.len()));
            if args.verbosity >= Verbosity::Low {
                out.line(format!("{:?}", batches));
            }
        }
        Outcome::Unsolvable => out.line("Problem is unsolvable!"),
    }

    out.line(format!(
        "Total program runtime: {:.3} seconds",
        time_total.elapsed().as_secs_f64()
    ));
    out.flush();

    Ok(())
}
