use std::process::ExitCode;

use clap::Parser;
use itertools::Itertools;
use rand::prelude::*;

use leakdiff::*;
use leakdiff::host::*;
use leakdiff::stats::*;
use leakdiff_exp::cli;
use leakdiff_exp::gf2::{ self, Image, IMAGE };

/// Flush+Reload the cache lines around the GF(2) squaring table while
/// squaring an input.
///
/// The table is located from a reference symbol and validated by its
/// checksum before anything is measured. Each line in the window is then
/// flushed, the input is squared, and the line is reloaded and timed.
/// Lines outside the table that hit as often as the table itself were
/// brought in by the prefetcher.
#[derive(Parser)]
#[command(verbatim_doc_comment)]
pub struct Args {
    /// Where trials run
    #[arg(long, value_enum, default_value_t = Platform::Sim)]
    platform: Platform,

    /// The polynomial to square (hexadecimal)
    #[arg(long, default_value = "0x0123456789abcdef", value_parser = cli::parse_hex)]
    input: u64,

    /// Number of times each line is measured
    #[arg(long, default_value_t = 50)]
    repetitions: usize,

    /// Reload threshold in cycles (default: chosen by the platform)
    #[arg(long)]
    threshold: Option<u64>,

    /// Only measure a single line of the window (by index)
    #[arg(long)]
    line: Option<usize>,

    /// Minimum hit ratio for a line to count as prefetched
    #[arg(long, default_value_t = 0.5)]
    min_ratio: f64,

    /// Core to pin to on the host
    #[arg(long, default_value_t = 0)]
    core: usize,

    /// Seed for the line order
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

/// Reload threshold for the simulated channel, between a hit and a miss.
const SIM_THRESHOLD: u64 = 20;

fn run<C: Channel>(args: &Args, channel: &mut C, threshold: u64)
    -> Result<()>
{
    let table = unsafe { Image::locator().locate(IMAGE.anchor_addr())? };
    println!("[*] Located table at {:016x} ({} bytes)", table.addr, table.len);

    let window = ReloadWindow::with_defaults(&table, CacheGeometry::HOST_L1D.line());
    let fr = FlushReload::new(window, threshold);
    tracing::debug!("reload window: {} lines, table at {:?}",
        fr.window.len(), fr.window.table_range());
    let input = args.input;
    let mut victim = |ch: &mut C| { gf2::sqr_traced(ch, &table, input); };

    if let Some(idx) = args.line {
        let res = fr.measure(channel, idx, &mut victim)?;
        println!("[*] line {:2} ({:016x}): {:?}", idx, fr.window.addr(idx)?, res);
        return Ok(());
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let profile = fr.profile(channel, args.repetitions, &mut rng, victim)?;
    for (idx, (ratio, timing)) in profile.hit_ratios.iter()
        .zip(profile.timings.iter()).enumerate()
    {
        let marker = if profile.table.contains(&idx) { "T" } else { " " };
        println!("[*] line {:2} {} hit ratio {:.2} min={:?} mode={:?}",
            idx, marker, ratio, timing.get_min(), timing.get_mode());
    }
    println!("[*] Hit ratios: {}", profile.hit_ratios.iter()
        .map(|r| format!("{:.2}", r)).join(" "));
    println!("[*] Prefetch reach: {}", profile.prefetch_reach(args.min_ratio));
    Ok(())
}

fn main() -> ExitCode {
    cli::init_tracing();
    let args = Args::parse();

    let res = match args.platform {
        Platform::Sim => {
            let mut sim = SimChannel::new(CacheGeometry::HOST_L1D);
            run(&args, &mut sim, args.threshold.unwrap_or(SIM_THRESHOLD))
        },
        Platform::Host => {
            let line = CacheGeometry::HOST_L1D.line();
            LeakEnv::pin_to_core(args.core)
                .and_then(|_| PerfChannel::new(line))
                .and_then(|mut channel| {
                    let (base, len) = IMAGE.span();
                    channel.register_region(base, len);
                    let threshold = args.threshold
                        .unwrap_or(FlushReload::HOST_THRESHOLD);
                    run(&args, &mut channel, threshold)
                })
        },
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => cli::fail(e),
    }
}
