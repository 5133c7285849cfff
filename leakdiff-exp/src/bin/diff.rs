use std::process::ExitCode;

use clap::Parser;

use leakdiff::*;
use leakdiff_exp::catalog::Experiment;
use leakdiff_exp::cli::{ self, ComparisonArg, SimArgs };

/// Compare the cache state left behind by the two input classes of an
/// experiment.
///
/// Each class is first checked for reproducibility: a baseline trial is
/// compared against `--repeats` more trials. If either class disagrees with
/// itself, the result is INCONCLUSIVE and the classes are not compared.
#[derive(Parser)]
#[command(verbatim_doc_comment)]
pub struct Args {
    /// The experiment to run
    #[arg(long, value_enum)]
    experiment: Experiment,

    /// Where trials run
    #[arg(long, value_enum, default_value_t = Platform::Sim)]
    platform: Platform,

    /// Number of repeated trials when checking each class for noise
    #[arg(long)]
    repeats: Option<usize>,

    /// Number of training iterations (default: chosen by the experiment)
    #[arg(long)]
    train_iters: Option<usize>,

    /// Sets that take part in the comparison
    #[arg(long, value_enum, default_value_t = RangePreset::Full)]
    range: RangePreset,

    /// How the baselines of both classes are compared (default: chosen by
    /// the measurement mode)
    #[arg(long, value_enum)]
    comparison: Option<ComparisonArg>,

    /// How a trial is measured
    #[arg(long, value_enum, default_value_t = MeasureMode::PrimeProbe)]
    mode: MeasureMode,

    /// Stopwatch threshold in cycles (default: chosen by the platform)
    #[arg(long)]
    threshold: Option<u64>,

    /// Print the baseline of both classes
    #[arg(long)]
    print_grid: bool,

    #[command(flatten)]
    sim: SimArgs,
}

impl Args {
    fn config(&self) -> HarnessConfig {
        let mut cfg = HarnessConfig::for_platform(self.platform)
            .mode(self.mode)
            .range_preset(self.range)
            .train_iters(self.train_iters
                .unwrap_or(self.experiment.train_iters()));
        if let Some(repeats) = self.repeats {
            cfg = cfg.repeats(repeats);
        }
        if let Some(threshold) = self.threshold {
            cfg = cfg.time_threshold(threshold);
        }
        match self.comparison {
            Some(arg) => cfg.comparison(arg.comparison(cfg.time_threshold)),
            None => cfg,
        }
    }
}

fn run<C: Channel>(args: &Args, mut harness: LeakHarness<C>)
    -> Result<Verdict>
{
    let cfg = *harness.config();
    let (a, b) = args.experiment.inputs();
    println!("[*] Experiment '{}': class {} (input={:#x}) vs class {} (input={:#x})",
        args.experiment.name(), ClassId::A, a, ClassId::B, b);
    println!("[*] {:?}, {:?}, {} training iterations, {} repeats",
        cfg.platform, cfg.mode, cfg.train_iters, cfg.repeats);
    tracing::debug!("{:?}", cfg);
    args.experiment.register(&mut harness)?;

    if args.print_grid {
        for class in [ClassId::A, ClassId::B] {
            let obs = harness.observe(class)?;
            println!("[*] Class {}:", class);
            println!("{}", obs);
        }
    }

    harness.verdict()
}

fn main() -> ExitCode {
    cli::init_tracing();
    let args = Args::parse();
    let cfg = args.config();

    let res = match args.platform {
        Platform::Sim => cfg.emit(args.sim.channel(cfg.geometry))
            .and_then(|h| run(&args, h)),
        Platform::Host => cfg.emit_host()
            .and_then(|h| run(&args, h)),
    };

    match res {
        Ok(verdict @ Verdict::Inconclusive { .. }) => {
            println!("{}", verdict);
            ExitCode::SUCCESS
        },
        Ok(verdict) => {
            println!("RESULT: {}", verdict);
            ExitCode::SUCCESS
        },
        Err(e) => cli::fail(e),
    }
}
