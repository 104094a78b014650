use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dicom_sorter_core::{
    app_paths, evaluate, flatten, load_config, load_config_from, move_folder, reorganize,
    save_config, DicomFileSource, MetadataSource, NamingRule, Preset, ReorganizeConfig,
    ReorganizeReport,
};
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dicom-sorter")]
#[command(about = "Sorts DICOM files into rule-derived folders and renames them from their tags")]
struct Cli {
    /// Verbosity level. Max: 2.
    #[arg(short, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Flatten, classify and rename everything under ROOT.
    Run(RunArgs),
    /// Only collapse ROOT into a single flat folder.
    Flatten { root: PathBuf },
    /// Merge SOURCE into DEST without overwriting files.
    Merge { source: PathBuf, dest: PathBuf },
    /// Print the tags of one file and optionally a rendered rule.
    Inspect(InspectArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    root: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    preset: Option<Preset>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Args)]
struct InspectArgs {
    file: PathBuf,
    #[arg(long)]
    rule: Option<String>,
    #[arg(long, default_value_t = false)]
    lower: bool,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    /// Write the default configuration file.
    Init,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_logging(cli.verbose);

    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Flatten { root } => cmd_flatten(root),
        Commands::Merge { source, dest } => cmd_merge(source, dest),
        Commands::Inspect(args) => cmd_inspect(args),
        Commands::Config(config) => match config.action {
            ConfigAction::Show => cmd_config_show(),
            ConfigAction::Init => cmd_config_init(),
        },
    }
}

/// "LEVEL<TAB>message" lines on stderr. Info by default, `-v` debug, `-vv` trace.
fn configure_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{style}{}{style:#}\t{}",
                record.level(),
                record.args()
            )
        })
        .init();
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(preset) = args.preset {
        preset.apply(&mut config);
    }

    let report = reorganize(&DicomFileSource, &args.root, &config)
        .with_context(|| format!("reorganizing {} failed", args.root.display()))?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report(&report),
    }
    Ok(())
}

fn cmd_flatten(root: PathBuf) -> Result<()> {
    let stats = flatten(&DicomFileSource, &root)
        .with_context(|| format!("flattening {} failed", root.display()))?;
    println!(
        "relocated={} unchanged={} deleted={} removed_dirs={} skipped={} kept_dirs={}",
        stats.relocated,
        stats.unchanged,
        stats.deleted,
        stats.removed_dirs,
        stats.skipped,
        stats.kept_dirs
    );
    Ok(())
}

fn cmd_merge(source: PathBuf, dest: PathBuf) -> Result<()> {
    move_folder(&source, &dest).with_context(|| {
        format!("merging {} into {} failed", source.display(), dest.display())
    })?;
    println!("{} -> {}", source.display(), dest.display());
    Ok(())
}

fn cmd_inspect(args: InspectArgs) -> Result<()> {
    let source = DicomFileSource;
    if !source.is_image_file(&args.file) {
        anyhow::bail!("not a DICOM file: {}", args.file.display());
    }
    let tags = source.read_tags(&args.file)?;
    println!("{}", serde_json::to_string_pretty(&tags)?);

    if let Some(rule) = args.rule {
        let rule = NamingRule::parse(&rule);
        let rendered = evaluate(&tags, &rule, !args.lower)?;
        println!("{rule} => {rendered}");
    }
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let paths = app_paths()?;
    println!("config file: {}", paths.config_path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = save_config(&ReorganizeConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn print_report(report: &ReorganizeReport) {
    println!("root: {}", report.root.display());
    println!(
        "flatten: relocated={} deleted={} removed_dirs={} skipped={}",
        report.flatten.relocated,
        report.flatten.deleted,
        report.flatten.removed_dirs,
        report.flatten.skipped
    );
    for (index, level) in report.levels.iter().enumerate() {
        if level.skipped_level {
            println!("level {}: (no rule)", index + 1);
            continue;
        }
        println!(
            "level {} [{}]: classified={} folders={} skipped={}",
            index + 1,
            level.rule,
            level.classified,
            level.folders_created,
            level.skipped
        );
    }
    println!(
        "rename: renamed={} unchanged={} skipped={}",
        report.rename.renamed, report.rename.unchanged, report.rename.skipped
    );
    println!(
        "took {}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
}
