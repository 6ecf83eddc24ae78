use anyhow::{Context, Result};
use clap::{crate_name, crate_version, Arg, Command};
use env_logger::Builder;
use log::{info, LevelFilter};
use scfmix::defaults::CONFIG_FILE_NAME;
use scfmix::io::{read_input, write_footer, write_header, Configuration};
use scfmix::scf::{LinearModel, ScfResult, ScfRoutine};
use scfmix::utils::Timer;
use scfmix::{Mix, Mixer, SelfComm};
use std::io::Write;

fn main() -> Result<()> {
    // Input.
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about("linear and Broyden mixing for self-consistent fixed-point iterations")
        .arg(
            Arg::new("config")
                .help("Sets the configuration file to use")
                .default_value(CONFIG_FILE_NAME)
                .index(1),
        )
        .get_matches();
    let config_file: &str = matches.value_of("config").unwrap_or(CONFIG_FILE_NAME);
    let config: Configuration = read_input(config_file)?;

    // Multithreading.
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelization.number_of_cores)
        .build_global()
        .context("Could not initialize the thread pool")?;

    // Logging.
    // The log level is set.
    let log_level: LevelFilter = match config.verbose {
        2 => LevelFilter::Trace,
        1 => LevelFilter::Debug,
        0 => LevelFilter::Info,
        -1 => LevelFilter::Warn,
        -2 => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    // and the logger is build.
    Builder::new()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .filter(None, log_level)
        .init();

    // The program header is written to the command line.
    write_header();
    // and the total wall-time timer is started.
    let timer: Timer = Timer::start();

    // Computations.
    // ................................................................
    let mut model: LinearModel<f64> = LinearModel::from_config(&config.model);
    let mut mixer: Mixer<f64, SelfComm> =
        config.mixer.build_mixer(0, model.dimension(), SelfComm)?;
    info!("{: <25} {}", "mixer type:", mixer.mixer_type());
    let result: ScfResult = mixer
        .run_scf(&mut model, &config.scf, config.mixer.rss_min)
        .context("The self-consistent iteration failed")?;
    if let Some(reference) = model.fixed_point() {
        let x = mixer.output_vector()?;
        let error: f64 = x
            .iter()
            .zip(reference.iter())
            .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()));
        info!(
            "{: <25} {:.6e} after {} iterations",
            "max. error:", error, result.iterations
        );
    }
    // ................................................................

    write_footer(timer);
    Ok(())
}
