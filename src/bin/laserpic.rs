//! Command-line front-end (§6 A5): loads a JSON parameter deck, runs the
//! simulation for the configured number of timesteps across an in-process
//! SPMD process group, and writes a CSV diagnostic stream.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use log::error;

use laserpic::config::Parameters;
use laserpic::driver::{Driver, DriverConfig};
use laserpic::kernels::{BorisPusher, CsvDiagnosticWriter, LinearDepositor, LinearInterpolator, NoAntenna, NullQed, YeeFdtdSolver};
use laserpic::load_balance::CostModel;
use laserpic::moving_window::NoInjection;
use laserpic::transport::LocalWorld;
use laserpic::SimulationError;

#[derive(Parser, Debug)]
#[command(name = "laserpic", version, about = "Relativistic electromagnetic particle-in-cell engine")]
struct Cli {
    /// Path to the JSON parameter deck.
    deck: PathBuf,

    /// Number of simulated processes to run in this one OS process.
    #[arg(long, default_value_t = 1)]
    ranks: usize,

    /// Directory to write periodic checkpoints into, if the deck schedules any.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// File to append CSV diagnostics to (stdout if omitted).
    #[arg(long)]
    diagnostics_out: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let deck_bytes = std::fs::read(&cli.deck).with_context(|| format!("reading deck {}", cli.deck.display()))?;
    let params: Parameters = serde_json::from_slice(&deck_bytes).context("parsing parameter deck")?;
    params.validate().context("validating parameter deck")?;

    let world = LocalWorld::new_world(cli.ranks);
    let mut handles = Vec::with_capacity(cli.ranks);

    for local in world {
        let params = params.clone();
        let checkpoint_dir = cli.checkpoint_dir.clone();
        let diagnostics_out = cli.diagnostics_out.clone();
        let rank = local.rank().0;

        handles.push(thread::spawn(move || -> Result<(), SimulationError> {
            let transport: Arc<dyn laserpic::transport::Transport> = Arc::new(local);
            let mut driver = Driver::new(params, transport)?;

            let interpolator = LinearInterpolator;
            let pusher = BorisPusher;
            let depositor = LinearDepositor;
            let solver = YeeFdtdSolver;
            let antenna = NoAntenna;
            let _qed = NullQed;
            let injection = NoInjection;

            let sink: Box<dyn std::io::Write + Send> = match &diagnostics_out {
                Some(path) => {
                    let mut path = path.clone();
                    if rank > 0 {
                        path.set_extension(format!("rank{rank}.csv"));
                    }
                    Box::new(File::create(path).map_err(SimulationError::Io)?)
                }
                None => Box::new(std::io::stdout()),
            };
            let mut writer = CsvDiagnosticWriter::new(sink);

            let mut config = DriverConfig {
                interpolator: &interpolator,
                pusher: &pusher,
                depositor: &depositor,
                solver: &solver,
                antenna: &antenna,
                injection: &injection,
                diagnostics: &mut writer,
                checkpoint_dir,
                cost_model: CostModel { alpha: 1.0, beta: 0.01 },
            };

            driver.run(&mut config)
        }));
    }

    for handle in handles {
        handle.join().expect("rank thread panicked")?;
    }
    Ok(())
}
