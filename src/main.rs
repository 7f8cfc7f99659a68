use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use proxy_harvest::{
    config::{HarvestConfig, SourceConfig, SourceFormat},
    harvest,
    proxy::{
        checker::check_direct, sink, CheckerConfig, FileSource, GeoLocator, GeoResolver,
        HttpGeoLocator, PoolBuilder, ProxyChecker, ProxyType, RunnerConfig, StaticSource,
        ValidationRunner,
    },
    HarvestError,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

/// Fatal error such as a failed write or bad configuration
const EXIT_FAILURE: u8 = 1;

/// Every configured source failed
const EXIT_SOURCES_FAILED: u8 = 2;

/// The run finished but accepted nothing
const EXIT_NO_RESULTS: u8 = 3;

/// Fetch candidate proxies, validate them and keep the working ones
#[derive(Parser)]
#[command(name = "proxy-harvest", version)]
#[command(about = "Fetch candidate proxies, validate them and keep the working ones")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, validate and save working proxies (default)
    Harvest(HarvestArgs),
    /// Re-validate proxies from a file and save the working ones
    Check {
        /// Input file containing proxies
        input: PathBuf,
        #[command(flatten)]
        validation: ValidationArgs,
        /// Output file for working proxies (defaults to the configured output)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write the file even when no proxy works
        #[arg(long)]
        allow_empty: bool,
    },
    /// Fetch candidate lists without validating them
    Fetch {
        #[command(flatten)]
        sources: SourceArgs,
        /// Drop candidates whose source claims another country
        #[arg(long)]
        country: Option<String>,
        /// Output file for candidates (printed when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Append one proxy to the output file
    Add {
        /// Proxy entry, e.g. 1.2.3.4:8080
        entry: String,
        /// File to append to (defaults to the configured output)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the origin IP and country of the direct connection
    Whoami,
}

#[derive(Args, Default)]
struct HarvestArgs {
    #[command(flatten)]
    validation: ValidationArgs,
    #[command(flatten)]
    sources: SourceArgs,
    /// Output file for accepted proxies
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Treat zero accepted proxies as success and write an empty file
    #[arg(long)]
    allow_empty: bool,
    /// Validate at most this many candidates
    #[arg(long)]
    max_candidates: Option<usize>,
    /// Write a JSON report of every validation result
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Default)]
struct ValidationArgs {
    /// Stop after this many proxies are accepted (0 = check everything)
    #[arg(short, long)]
    max_proxies: Option<usize>,
    /// Number of concurrent validations
    #[arg(short = 'n', long)]
    workers: Option<usize>,
    /// Accept only proxies whose origin is in this country (ISO code)
    #[arg(long)]
    country: Option<String>,
    /// Connectivity check timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// URL that echoes the caller's IP
    #[arg(long)]
    check_url: Option<String>,
    /// MaxMind database for offline geolocation
    #[arg(long)]
    mmdb: Option<PathBuf>,
}

#[derive(Args)]
struct SourceArgs {
    /// Proxy list URL; replaces the configured sources (repeatable)
    #[arg(short = 'u', long = "source-url")]
    source_urls: Vec<String>,
    /// Local proxy list file (repeatable)
    #[arg(short = 'f', long = "source-file")]
    source_files: Vec<PathBuf>,
    /// Proxy given directly, e.g. 1.2.3.4:8080 (repeatable)
    #[arg(short = 'p', long = "proxy")]
    proxies: Vec<String>,
    /// Scheme assumed for entries without one (http, https, socks4, socks5)
    #[arg(short = 't', long, default_value = "http")]
    proxy_type: String,
}

impl ValidationArgs {
    fn apply(&self, config: &mut HarvestConfig) {
        if let Some(max) = self.max_proxies {
            config.max_proxies = max;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.country.is_some() {
            config.country = self.country.clone();
        }
        if let Some(timeout) = self.timeout {
            config.check_timeout_secs = timeout;
        }
        if let Some(url) = &self.check_url {
            config.check_url = url.clone();
        }
        if self.mmdb.is_some() {
            config.mmdb_path = self.mmdb.clone();
        }
    }
}

impl Default for SourceArgs {
    fn default() -> Self {
        Self {
            source_urls: Vec::new(),
            source_files: Vec::new(),
            proxies: Vec::new(),
            proxy_type: ProxyType::Http.to_string(),
        }
    }
}

impl SourceArgs {
    /// Pool builder for the configured sources plus any given here.
    ///
    /// URLs given on the command line replace the configured list; files and
    /// direct proxies are added to it unless URLs were given.
    fn pool_builder(&self, config: &mut HarvestConfig) -> Result<PoolBuilder> {
        let proxy_type = parse_proxy_type(&self.proxy_type)?;

        let explicit = !self.source_urls.is_empty()
            || !self.source_files.is_empty()
            || !self.proxies.is_empty();
        if explicit {
            config.sources = self
                .source_urls
                .iter()
                .enumerate()
                .map(|(i, url)| {
                    SourceConfig::new(&format!("cli-{}", i + 1), url, SourceFormat::Auto, proxy_type)
                })
                .collect();
        }

        let mut builder = PoolBuilder::from_config(config)?;
        for path in &self.source_files {
            builder = builder.with_source(FileSource::new(path.clone(), proxy_type));
        }
        if !self.proxies.is_empty() {
            builder = builder.with_source(StaticSource::new("command line", self.proxies.clone(), proxy_type));
        }
        Ok(builder)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(failure_code(&e))
        }
    }
}

/// Exit status for a run that ended in `error`
fn failure_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<HarvestError>() {
        Some(HarvestError::AllSourcesFailed { .. }) | Some(HarvestError::NoSources) => EXIT_SOURCES_FAILED,
        _ => EXIT_FAILURE,
    }
}

/// Exit status for a run that accepted no proxy
fn empty_result_code(allow_empty: bool) -> u8 {
    if allow_empty {
        0
    } else {
        EXIT_NO_RESULTS
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = HarvestConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command.unwrap_or_else(|| Commands::Harvest(HarvestArgs::default())) {
        Commands::Harvest(args) => {
            args.validation.apply(&mut config);
            if let Some(output) = args.output {
                config.output = output;
            }
            if args.max_candidates.is_some() {
                config.max_candidates = args.max_candidates;
            }
            let builder = args.sources.pool_builder(&mut config)?;

            let outcome = harvest(&config, builder, args.allow_empty, args.report).await?;

            println!(
                "Checked {} of {} candidates: {} accepted",
                outcome.report.checked(),
                outcome.build.candidates.len(),
                outcome.report.pool.len()
            );
            print_accepted(&outcome.report);

            if outcome.is_empty() {
                println!("No working proxies found");
                return Ok(ExitCode::from(empty_result_code(args.allow_empty)));
            }
            if let Some(path) = &outcome.written {
                println!("Saved {} proxies to {:?}", outcome.report.pool.len(), path);
            }
        }
        Commands::Check {
            input,
            validation,
            output,
            allow_empty,
        } => {
            validation.apply(&mut config);
            let candidates = sink::read_pool(&input)?.into_vec();
            println!("Loaded {} proxies from {:?}", candidates.len(), input);

            let checker = ProxyChecker::with_config(CheckerConfig::from_harvest(&config))?;
            let runner = ValidationRunner::new(
                checker,
                RunnerConfig::new()
                    .with_workers(config.workers)
                    .with_target(validation.max_proxies.unwrap_or(0)),
            );
            let report = runner.run(candidates).await;
            println!("Results: {} good, {} bad", report.pool.len(), report.rejected());
            print_accepted(&report);

            if report.pool.is_empty() && !allow_empty {
                println!("No working proxies found");
                return Ok(ExitCode::from(empty_result_code(allow_empty)));
            }
            let path = output.unwrap_or(config.output);
            sink::write_pool(&report.pool, &path)?;
            println!("Saved {} proxies to {:?}", report.pool.len(), path);
        }
        Commands::Fetch {
            sources,
            country,
            output,
        } => {
            if country.is_some() {
                config.country = country;
            }
            let build = sources.pool_builder(&mut config)?.build().await?;
            for source in &build.sources {
                match &source.error {
                    None => println!("Found {} proxies from {}", source.parsed, source.source),
                    Some(error) => eprintln!("Error fetching {}: {}", source.source, error),
                }
            }
            println!("\nTotal unique proxies: {}", build.candidates.len());

            match output {
                Some(path) => {
                    let pool = build.candidates.into_iter().collect();
                    sink::write_pool(&pool, &path)?;
                    println!("Saved proxies to {:?}", path);
                }
                None => {
                    for candidate in &build.candidates {
                        println!("{}", candidate.to_entry());
                    }
                }
            }
        }
        Commands::Add { entry, output } => {
            let path = output.unwrap_or(config.output);
            if sink::append_entry(&path, &entry)? {
                println!("Added proxy: {}", entry.trim());
            } else {
                println!("Already listed: {}", entry.trim());
            }
        }
        Commands::Whoami => {
            let geo = match &config.mmdb_path {
                Some(path) => GeoResolver::Mmdb(GeoLocator::from_path(path)?),
                None => GeoResolver::Http(HttpGeoLocator::new(config.geo_url.clone(), config.geo_timeout())?),
            };
            let (origin, location) = check_direct(&config.check_url, Some(&geo), config.check_timeout()).await?;
            println!("Your IP: {}", origin);
            match location {
                Some(location) => println!("Location: {}", location),
                None => println!("Location: unknown"),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_accepted(report: &proxy_harvest::RunReport) {
    if report.pool.is_empty() {
        return;
    }
    println!("\nWorking proxies:");
    for result in report.results.iter().filter(|r| r.is_accepted()) {
        println!(
            "  {} ({}ms, origin {}, country {})",
            result.candidate.to_entry(),
            result.elapsed_ms(),
            result.observed_origin_ip.as_deref().unwrap_or("?"),
            result.resolved_country.as_deref().unwrap_or("unknown")
        );
    }
}

fn parse_proxy_type(s: &str) -> Result<ProxyType> {
    ProxyType::from_scheme(s)
        .ok_or_else(|| anyhow!("Invalid proxy type: {}. Use: http, https, socks4, socks5", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_source_failures_exit_with_sources_failed() {
        let err = anyhow::Error::from(HarvestError::AllSourcesFailed { attempted: 3 });
        assert_eq!(failure_code(&err), EXIT_SOURCES_FAILED);

        let err = anyhow::Error::from(HarvestError::NoSources).context("building candidate pool");
        assert_eq!(failure_code(&err), EXIT_SOURCES_FAILED);
    }

    #[test]
    fn test_other_errors_exit_with_failure() {
        let err = anyhow::Error::from(HarvestError::InvalidEntry("nope".to_string()));
        assert_eq!(failure_code(&err), EXIT_FAILURE);
        assert_eq!(failure_code(&anyhow!("disk full")), EXIT_FAILURE);
    }

    #[test]
    fn test_empty_result_code() {
        assert_eq!(empty_result_code(false), EXIT_NO_RESULTS);
        assert_eq!(empty_result_code(true), 0);
    }
}
