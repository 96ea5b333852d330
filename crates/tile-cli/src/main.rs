use std::process::ExitCode;
use std::time::Instant;

use clap::{Args as ClapArgs, Parser, Subcommand};
use half::f16;
use serde::Serialize;
use tile_conformance::{Tolerance, allclose, gen_data, gen_uniform, max_abs_diff, reference};
use tile_core::{ExecMode, FlatBuffer, LaunchConfig, Launcher, Result, Shape};
use tile_kernels::{
    MatmulBlocks, matmul, matmul_naive, softmax_backward, softmax_forward, vector_add,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tilegrid")]
#[command(about = "Run the tiled kernels against their unblocked references")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Run grid cells on the calling thread.
    #[arg(long, global = true, conflicts_with = "threads")]
    serial: bool,

    /// Worker count for a dedicated pool.
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Smallest accepted matmul tile extent.
    #[arg(long, global = true)]
    min_tile: Option<usize>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Elementwise vector add.
    Add(AddArgs),
    /// Row softmax forward and backward.
    Softmax(SoftmaxArgs),
    /// Blocked and naive matmul.
    Matmul(MatmulArgs),
    /// Every check with default sizes.
    All,
}

#[derive(ClapArgs)]
struct AddArgs {
    #[arg(long, default_value_t = 1000)]
    n: usize,
    #[arg(long, default_value_t = 1024)]
    block: usize,
}

#[derive(ClapArgs)]
struct SoftmaxArgs {
    #[arg(long, default_value_t = 128)]
    rows: usize,
    #[arg(long, default_value_t = 1000)]
    cols: usize,
    /// Defaults to the next power of two of `cols`.
    #[arg(long)]
    block: Option<usize>,
}

#[derive(ClapArgs)]
struct MatmulArgs {
    #[arg(short, long, default_value_t = 32)]
    m: usize,
    #[arg(short, long, default_value_t = 64)]
    k: usize,
    #[arg(short, long, default_value_t = 32)]
    n: usize,
    #[arg(long, default_value_t = 16)]
    block_m: usize,
    #[arg(long, default_value_t = 16)]
    block_n: usize,
    #[arg(long, default_value_t = 32)]
    block_k: usize,
}

impl Default for AddArgs {
    fn default() -> Self {
        Self { n: 1000, block: 1024 }
    }
}

impl Default for SoftmaxArgs {
    fn default() -> Self {
        Self {
            rows: 128,
            cols: 1000,
            block: None,
        }
    }
}

impl Default for MatmulArgs {
    fn default() -> Self {
        Self {
            m: 32,
            k: 64,
            n: 32,
            block_m: 16,
            block_n: 16,
            block_k: 32,
        }
    }
}

/// Outcome of comparing one kernel against its reference.
#[derive(Debug, Serialize)]
struct CheckReport {
    kernel: &'static str,
    shape: Vec<usize>,
    max_abs_diff: f32,
    tolerance: Tolerance,
    passed: bool,
    elapsed_us: u64,
}

impl CheckReport {
    fn compare(
        kernel: &'static str,
        shape: &[usize],
        actual: &[f32],
        expected: &[f32],
        tolerance: Tolerance,
        start: Instant,
    ) -> Self {
        let elapsed_us = start.elapsed().as_micros() as u64;
        Self {
            kernel,
            shape: shape.to_vec(),
            max_abs_diff: max_abs_diff(actual, expected),
            tolerance,
            passed: allclose(actual, expected, tolerance),
            elapsed_us,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(reports) => {
            print_reports(&reports, args.json);
            if reports.iter().all(|r| r.passed) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!(error = %e, "check aborted");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn launcher(args: &Args) -> Result<Launcher> {
    let mut config = LaunchConfig::from_env();
    if args.serial {
        config.exec = ExecMode::Serial;
    }
    if let Some(n) = args.threads {
        config.exec = ExecMode::Parallel;
        config.threads = Some(n);
    }
    if let Some(floor) = args.min_tile {
        config.min_tile = floor;
    }
    Launcher::new(config)
}

fn run(args: &Args) -> Result<Vec<CheckReport>> {
    let launcher = launcher(args)?;
    info!(config = ?launcher.config(), "Running checks");
    match &args.cmd {
        Cmd::Add(a) => check_add(&launcher, a),
        Cmd::Softmax(s) => check_softmax(&launcher, s),
        Cmd::Matmul(m) => check_matmul(&launcher, m),
        Cmd::All => {
            let mut reports = check_add(&launcher, &AddArgs::default())?;
            reports.extend(check_softmax(&launcher, &SoftmaxArgs::default())?);
            reports.extend(check_matmul(&launcher, &MatmulArgs::default())?);
            Ok(reports)
        }
    }
}

fn check_add(launcher: &Launcher, args: &AddArgs) -> Result<Vec<CheckReport>> {
    let a = gen_data(args.n, 1);
    let b = gen_data(args.n, 2);
    let x = FlatBuffer::from_vec(a.clone(), Shape::vector(args.n))?;
    let y = FlatBuffer::from_vec(b.clone(), Shape::vector(args.n))?;

    let start = Instant::now();
    let out = vector_add(launcher, &x, &y, args.block)?;
    Ok(vec![CheckReport::compare(
        "vector_add",
        &[args.n],
        out.as_slice(),
        &reference::add(&a, &b)?,
        Tolerance::F32,
        start,
    )])
}

fn check_softmax(launcher: &Launcher, args: &SoftmaxArgs) -> Result<Vec<CheckReport>> {
    let shape = [args.rows, args.cols];
    let data = gen_data(args.rows * args.cols, 3);
    let upstream = gen_data(args.rows * args.cols, 4);
    let x = FlatBuffer::from_vec(data.clone(), Shape::new(&shape))?;
    let dy = FlatBuffer::from_vec(upstream.clone(), Shape::new(&shape))?;
    let expected_y = reference::softmax(&data, args.cols)?;
    let expected_dx = reference::softmax_vjp(&upstream, &expected_y, args.cols)?;

    let start = Instant::now();
    let y = softmax_forward(launcher, &x, args.block)?;
    let forward = CheckReport::compare(
        "softmax_forward",
        &shape,
        y.as_slice(),
        &expected_y,
        Tolerance::F32,
        start,
    );

    let start = Instant::now();
    let dx = softmax_backward(launcher, &x, &dy, args.block)?;
    let backward = CheckReport::compare(
        "softmax_backward",
        &shape,
        dx.as_slice(),
        &expected_dx,
        Tolerance::new(1e-6, 1e-4),
        start,
    );
    Ok(vec![forward, backward])
}

fn check_matmul(launcher: &Launcher, args: &MatmulArgs) -> Result<Vec<CheckReport>> {
    let (m, k, n) = (args.m, args.k, args.n);
    let shape = [m, k, n];
    let a = gen_uniform(m * k, 5);
    let b = gen_uniform(k * n, 6);
    let x = FlatBuffer::from_vec(a.clone(), Shape::matrix(m, k))?;
    let y = FlatBuffer::from_vec(b.clone(), Shape::matrix(k, n))?;
    let expected = reference::matmul(&a, &b, m, k, n)?;
    let blocks = MatmulBlocks::new(args.block_m, args.block_n, args.block_k);
    let tol = Tolerance::new(1e-4, 1e-4);

    let start = Instant::now();
    let tiled: FlatBuffer<f32> = matmul(launcher, &x, &y, blocks)?;
    let tiled = CheckReport::compare("matmul", &shape, tiled.as_slice(), &expected, tol, start);

    let start = Instant::now();
    let half_out: FlatBuffer<f16> = matmul(launcher, &x, &y, blocks)?;
    let half_out = CheckReport::compare(
        "matmul_f16_out",
        &shape,
        &half_out.to_vec_f32(),
        &expected,
        Tolerance::HALF,
        start,
    );

    let start = Instant::now();
    let naive = matmul_naive(launcher, &x, &y)?;
    let naive = CheckReport::compare("matmul_naive", &shape, naive.as_slice(), &expected, tol, start);

    Ok(vec![tiled, half_out, naive])
}

fn print_reports(reports: &[CheckReport], json: bool) {
    if json {
        match serde_json::to_string_pretty(reports) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error: failed to serialize reports: {e}"),
        }
        return;
    }
    for r in reports {
        println!(
            "{:<18} shape={:<16} max_abs_diff={:.3e} atol={:.0e} rtol={:.0e} {:>4} ({} us)",
            r.kernel,
            format!("{:?}", r.shape),
            r.max_abs_diff,
            r.tolerance.atol,
            r.tolerance.rtol,
            if r.passed { "ok" } else { "FAIL" },
            r.elapsed_us
        );
    }
    let failed = reports.iter().filter(|r| !r.passed).count();
    if failed == 0 {
        println!("\nAll {} checks passed.", reports.len());
    } else {
        println!("\n{failed} of {} checks failed.", reports.len());
    }
}
