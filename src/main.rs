use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use rcpsp_search::algo::{Exhaustive, FlattenRelax, FlattenRelaxConfig, Hybrid, HybridConfig};
use rcpsp_search::core::{ResourceMode, Solver, Time};
use rcpsp_search::data::{self, GeneratorConfig};
use rcpsp_search::run_reader;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;
use std::num::NonZero;
use std::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Algorithm {
    /// Iterative flattening and relaxation.
    Ifir,
    /// Complete branch and bound.
    Exhaustive,
    /// Heuristic followed by branch and bound.
    Hybrid,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum Mode {
    /// Resource queries answered by the propagation engine.
    Engine,
    /// Resource profiles computed locally.
    #[default]
    Local,
}

impl From<Mode> for ResourceMode {
    fn from(value: Mode) -> Self {
        match value {
            Mode::Engine => Self::Engine,
            Mode::Local => Self::Local,
        }
    }
}

/// Solver options shared by `run` and `bench`.
#[derive(Debug, clap::Args)]
struct SolveOptions {
    /// Time limit in milliseconds.
    #[clap(short, long, default_value = "10000")]
    timeout: u64,
    /// Where resource violations are computed.
    #[clap(short, long, value_enum, default_value_t)]
    mode: Mode,
    /// Seed of the heuristic. Random if not given.
    #[clap(short, long)]
    seed: Option<u64>,
    /// Iterations without improvement before the heuristic gives up.
    #[clap(long, default_value = "100")]
    max_stable: usize,
    /// Share of the timeout given to the heuristic by the hybrid solver.
    #[clap(long, default_value = "0.1")]
    heuristic_share: f64,
}

impl SolveOptions {
    fn solver(&self, algorithm: Algorithm) -> Box<dyn Solver> {
        let flatten_relax = FlattenRelaxConfig {
            max_stable: self.max_stable,
            seed: self.seed,
            ..FlattenRelaxConfig::default()
        };
        match algorithm {
            Algorithm::Ifir => Box::new(FlattenRelax::new(flatten_relax)),
            Algorithm::Exhaustive => Box::new(Exhaustive::new()),
            Algorithm::Hybrid => Box::new(Hybrid::new(HybridConfig {
                heuristic_share: self.heuristic_share,
                flatten_relax,
            })),
        }
    }

    const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

/// Application solving the resource-constrained project scheduling problem.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Log search progress.
    #[clap(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Application,
}

#[derive(Debug, Subcommand)]
enum Application {
    /// Solve the instance read from stdin.
    Run {
        algorithm: Algorithm,
        /// Stop once the makespan reaches this value. Defaults to the bound of the instance.
        #[clap(short, long)]
        bound: Option<Time>,
        #[command(flatten)]
        options: SolveOptions,
    },
    /// Run solvers on every instance of a directory.
    Bench {
        /// The input directory.
        input: String,
        /// Exclude algorithms.
        #[clap(short, long, value_delimiter = ',')]
        exclude: Vec<Algorithm>,
        #[command(flatten)]
        options: SolveOptions,
    },
    /// Generate random instances.
    Gen {
        /// The number of activities.
        activities: NonZero<usize>,
        /// The number of resources.
        resources: NonZero<usize>,
        /// The maximum duration of an activity.
        #[clap(short = 'd', long, default_value = "10")]
        max_duration: Time,
        /// The maximum capacity of a resource.
        #[clap(short = 'c', long, default_value = "3")]
        max_capacity: i64,
        /// Chance that an activity uses a given resource.
        #[clap(long, default_value = "0.5")]
        demand_ratio: f64,
        /// Chance of a finish-to-start constraint between two activities.
        #[clap(long, default_value = "0.1")]
        precedence_ratio: f64,
        /// Horizon as a multiple of the total duration.
        #[clap(long, default_value = "1.0")]
        horizon_ratio: f64,
        /// Seed of the generator. Random if not given.
        #[clap(short, long)]
        seed: Option<u64>,
        /// Number of instances to generate.
        #[clap(short, long, default_value = "1")]
        amount: NonZero<u64>,
        /// Path to output the generated instances. If the directory does not exist, it will be created.
        #[clap(short, long, default_value = "output")]
        output: String,
    },
}

fn configure_logging(verbose: bool) {
    let level_filter = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .format(move |buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .filter_level(level_filter)
        .parse_default_env()
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    configure_logging(cli.verbose);

    match cli.command {
        Application::Run {
            algorithm,
            bound,
            options,
        } => {
            let mut solver = options.solver(algorithm);
            run_reader(
                solver.as_mut(),
                &mut std::io::stdin().lock(),
                options.timeout(),
                bound,
                options.mode.into(),
            )
        }
        Application::Bench {
            input,
            exclude,
            options,
        } => {
            let algorithms = Algorithm::value_variants().iter().copied();
            for algorithm in algorithms.filter(|algorithm| !exclude.contains(algorithm)) {
                let mut solver = options.solver(algorithm);
                let mode = options.mode.into();
                let report = data::run(&input, solver.as_mut(), options.timeout(), mode)?;
                println!("{report}");
            }
            Ok(())
        }
        Application::Gen {
            activities,
            resources,
            max_duration,
            max_capacity,
            demand_ratio,
            precedence_ratio,
            horizon_ratio,
            seed,
            amount,
            output,
        } => {
            let config = GeneratorConfig {
                activities: activities.get(),
                resources: resources.get(),
                max_duration,
                max_capacity,
                demand_ratio,
                precedence_ratio,
                horizon_ratio,
            };
            let mut rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

            let output = std::path::Path::new(&output);
            if !output.try_exists()? {
                std::fs::create_dir_all(output)?;
            }

            for i in 0..amount.get() {
                let instance = data::generate(&config, &mut rng);
                let filename = format!("{}_{}_{i}.json", config.activities, config.resources);
                std::fs::File::create(output.join(filename))?
                    .write_all(data::to_string(&instance)?.as_bytes())?;
            }
            Ok(())
        }
    }
}
