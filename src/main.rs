use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::time::Duration;
use trial_datastore::{
    example_data::ExampleDataGenerator,
    http::{BlockingHttp, DirectoryReports, HttpGet},
    output::OutputManager,
    ApiOutcome, DatastoreConfig, Datastore, ReferenceData,
};

const RESOURCES: [&str; 3] = ["subjects", "imaging", "blood"];

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = build_cli().get_matches();

    let output_dir = PathBuf::from(
        matches
            .get_one::<String>("output")
            .map(String::as_str)
            .unwrap_or("./datastore_output"),
    );

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => load_config(Path::new(path))?,
        None => DatastoreConfig::default(),
    };
    let mut offline_dir = matches.get_one::<String>("offline-dir").map(PathBuf::from);

    // Generate example reports if requested, and serve them locally
    if matches.get_flag("generate-example") {
        let n_subjects: usize = matches
            .get_one::<String>("subjects")
            .map(String::as_str)
            .unwrap_or("20")
            .parse()
            .context("Invalid number of subjects")?;
        let example_dir = output_dir.join("example_reports");
        config = ExampleDataGenerator::generate_reports(&example_dir, n_subjects)?;
        println!("Generated example reports: {}", example_dir.display());
        offline_dir = Some(example_dir);
    }

    apply_overrides(&mut config, &matches)?;

    let http: Box<dyn HttpGet> = match &offline_dir {
        Some(dir) => {
            println!("Serving reports from {}", dir.display());
            Box::new(DirectoryReports::new(&config.api_root, dir))
        }
        None => Box::new(BlockingHttp::new(Duration::from_secs(config.timeout_secs))?),
    };

    let resources: Vec<&str> = match matches.get_one::<String>("resource").map(String::as_str) {
        Some("all") | None => RESOURCES.to_vec(),
        Some(resource) => vec![resource],
    };

    run(&config, http.as_ref(), &resources, &output_dir)
}

fn build_cli() -> Command {
    Command::new("Trial Datastore")
        .version("0.1")
        .about("Fetch and clean clinical trial reports for the dashboard")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file"),
        )
        .arg(
            Arg::new("api-root")
                .long("api-root")
                .value_name("URL")
                .help("Base URL of the reporting API"),
        )
        .arg(
            Arg::new("assets")
                .long("assets")
                .value_name("DIR")
                .help("Directory holding the display terms and screening site files"),
        )
        .arg(
            Arg::new("display-terms")
                .long("display-terms")
                .value_name("FILE")
                .help("Display terms file name inside the assets directory"),
        )
        .arg(
            Arg::new("screening-sites")
                .long("screening-sites")
                .value_name("FILE")
                .help("Screening site ranges file name inside the assets directory"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .help("HTTP request timeout"),
        )
        .arg(
            Arg::new("resource")
                .short('r')
                .long("resource")
                .value_name("RESOURCE")
                .help("Report to refresh: subjects, imaging, blood or all")
                .value_parser(["subjects", "imaging", "blood", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory for cleaned datasets")
                .default_value("./datastore_output"),
        )
        .arg(
            Arg::new("offline-dir")
                .long("offline-dir")
                .value_name("DIR")
                .help("Read reports from a local directory laid out like the API"),
        )
        .arg(
            Arg::new("generate-example")
                .long("generate-example")
                .help("Generate synthetic example reports and process them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("subjects")
                .short('n')
                .long("subjects")
                .value_name("NUMBER")
                .help("Number of subjects for the example reports")
                .default_value("20"),
        )
}

fn load_config(path: &Path) -> anyhow::Result<DatastoreConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Parsing config {}", path.display()))
}

fn apply_overrides(config: &mut DatastoreConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    if let Some(api_root) = matches.get_one::<String>("api-root") {
        config.api_root = api_root.clone();
    }
    if let Some(assets) = matches.get_one::<String>("assets") {
        config.assets_path = PathBuf::from(assets);
    }
    if let Some(file) = matches.get_one::<String>("display-terms") {
        config.display_terms_file = file.clone();
    }
    if let Some(file) = matches.get_one::<String>("screening-sites") {
        config.screening_sites_file = file.clone();
    }
    if let Some(timeout) = matches.get_one::<String>("timeout") {
        config.timeout_secs = timeout.parse().context("Invalid timeout")?;
    }
    Ok(())
}

fn run(
    config: &DatastoreConfig,
    http: &dyn HttpGet,
    resources: &[&str],
    output_dir: &Path,
) -> anyhow::Result<()> {
    println!("Refreshing reports from {}", config.api_root);
    let datastore = Datastore::new(config, http);

    let mut outcomes: Vec<(&str, ApiOutcome)> = Vec::new();
    for &resource in resources {
        let outcome = match resource {
            "subjects" => {
                let reference = ReferenceData::load(config).with_context(|| {
                    format!("Loading reference data from {}", config.assets_path.display())
                })?;
                datastore.refresh_subjects(&reference)
            }
            "imaging" => datastore.get_api_imaging(),
            "blood" => datastore.get_api_blood(),
            other => bail!("Unknown resource: {}", other),
        };
        OutputManager::save_outcome(resource, &outcome, output_dir)?;
        outcomes.push((resource, outcome));
    }

    println!("\n=== REFRESH SUMMARY ===");
    for (resource, outcome) in &outcomes {
        println!("  {}", OutputManager::summarize(resource, outcome));
    }
    println!("\nResults saved to {}", output_dir.display());

    let failed = outcomes.iter().filter(|(_, o)| !o.is_success()).count();
    if failed > 0 {
        bail!("{} of {} reports failed", failed, outcomes.len());
    }
    Ok(())
}
