use std::process::ExitCode;

use clap::Parser;

use leakdiff::*;
use leakdiff_exp::catalog::Experiment;
use leakdiff_exp::cli::{ self, SimArgs };

/// Print the cache state left behind by a single input class.
#[derive(Parser)]
pub struct Args {
    /// The experiment to run
    #[arg(long, value_enum)]
    experiment: Experiment,

    /// The class to observe
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    class: u8,

    /// Where trials run
    #[arg(long, value_enum, default_value_t = Platform::Sim)]
    platform: Platform,

    /// Number of repeated trials when checking for noise
    #[arg(long)]
    repeats: Option<usize>,

    /// Number of training iterations (default: chosen by the experiment)
    #[arg(long)]
    train_iters: Option<usize>,

    #[command(flatten)]
    sim: SimArgs,
}

fn run<C: Channel>(args: &Args, mut harness: LeakHarness<C>)
    -> Result<Observation>
{
    args.experiment.register(&mut harness)?;
    harness.observe(ClassId(args.class))
}

fn main() -> ExitCode {
    cli::init_tracing();
    let args = Args::parse();
    let mut cfg = HarnessConfig::for_platform(args.platform)
        .train_iters(args.train_iters
            .unwrap_or(args.experiment.train_iters()));
    if let Some(repeats) = args.repeats {
        cfg = cfg.repeats(repeats);
    }

    let res = match args.platform {
        Platform::Sim => cfg.emit(args.sim.channel(cfg.geometry))
            .and_then(|h| run(&args, h)),
        Platform::Host => cfg.emit_host()
            .and_then(|h| run(&args, h)),
    };

    match res {
        Ok(obs) => {
            println!("[*] Experiment '{}', class {}:",
                args.experiment.name(), obs.class);
            println!("{}", obs);
            ExitCode::SUCCESS
        },
        Err(e) => cli::fail(e),
    }
}
