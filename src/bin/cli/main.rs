//! Command-line driver: rewrites the XML entries of one zip archive.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use xml_batch_edit::{
    transform_with_options, CancelToken, CsvAuditLog, Error, Mode, Preset, ProcessStats, Rule,
    TransformOptions,
};

/// Exit code constants
const SUCCESS: i32 = 0;
/// Run-level failure, or invalid rules
const FAILURE: i32 = 1;
/// Ctrl+C (128 + SIGINT)
const USER_INTERRUPT: i32 = 130;

/// Apply text-replacement rules to the XML files inside a zip archive
#[derive(Parser)]
#[command(name = "xml-batch-edit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input zip archive
    input: PathBuf,

    /// Output archive [default: <INPUT without .zip>_fixed.zip]
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Load rules from a preset file (repeatable, applied in order)
    #[arg(long, value_name = "FILE")]
    preset: Vec<PathBuf>,

    /// Add a rule; MODE is `tag` or `xpath` (repeatable)
    #[arg(long, num_args = 3, value_names = ["MODE", "PATTERN", "VALUE"])]
    rule: Vec<String>,

    /// Save the combined rule list as a preset before running
    #[arg(long, value_name = "FILE")]
    save_preset: Option<PathBuf>,

    /// Audit log [default: <OUTPUT>.log.csv]
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    process::exit(run(cli));
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> i32 {
    let rules = match collect_rules(&cli) {
        Ok(rules) => rules,
        Err(err) => {
            eprintln!("Error: {}", err);
            return FAILURE;
        }
    };
    if rules.is_empty() {
        log::warn!("no rules given, XML entries will only be repacked");
    }
    if let Some(path) = &cli.save_preset {
        if let Err(err) = Preset::new(rules.clone()).save(path) {
            eprintln!("Error: cannot save preset {}: {}", path.display(), err);
            return FAILURE;
        }
        log::info!("saved {} rule(s) to {}", rules.len(), path.display());
    }

    let output = cli.output.unwrap_or_else(|| default_output(&cli.input));
    let log_path = cli.log.unwrap_or_else(|| {
        let mut path = output.clone().into_os_string();
        path.push(".log.csv");
        PathBuf::from(path)
    });
    let audit = match CsvAuditLog::create(&log_path) {
        Ok(audit) => audit,
        Err(err) => {
            eprintln!("Error: cannot create log {}: {}", log_path.display(), err);
            return FAILURE;
        }
    };

    let options = TransformOptions::default();
    install_interrupt_handler(options.cancel.clone());

    match transform_with_options(&cli.input, &output, &rules, audit, &options) {
        Ok(stats) => {
            print_summary(&stats, &output, &log_path);
            SUCCESS
        }
        Err(Error::Cancelled) => {
            eprintln!("Cancelled; partial output in {}", output.display());
            USER_INTERRUPT
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            FAILURE
        }
    }
}

// Returns false, after warning, when Ctrl+C can't be routed to `cancel`.
fn install_interrupt_handler(cancel: CancelToken) -> bool {
    let installed = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, finishing the current entry");
        cancel.cancel();
    });
    match installed {
        Ok(()) => true,
        Err(err) => {
            log::warn!(
                "cannot install Ctrl+C handler, an interrupt will not stop cleanly: {}",
                err
            );
            false
        }
    }
}

fn collect_rules(cli: &Cli) -> Result<Vec<Rule>, String> {
    let mut rules = Vec::new();
    for path in &cli.preset {
        let preset = Preset::load(path)
            .map_err(|err| format!("cannot load preset {}: {}", path.display(), err))?;
        rules.extend(preset.rules);
    }
    for args in cli.rule.chunks_exact(3) {
        let mode: Mode = args[0].parse()?;
        let rule = Rule::new(mode, args[1].as_str(), args[2].as_str())
            .map_err(|err| format!("--rule {} '{}': {}", args[0], args[1], err))?;
        rules.push(rule);
    }
    Ok(rules)
}

fn default_output(input: &Path) -> PathBuf {
    let name = input.to_string_lossy();
    let stem = match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".zip") => {
            &name[..cut]
        }
        _ => &name[..],
    };
    PathBuf::from(format!("{}_fixed.zip", stem))
}

fn print_summary(stats: &ProcessStats, output: &Path, log_path: &Path) {
    println!("Done: {}", output.display());
    println!("  entries:   {}", stats.total_files);
    println!("  changed:   {}", stats.xml_changed);
    println!("  unchanged: {}", stats.xml_unchanged);
    println!("  copied:    {}", stats.copied_other);
    println!("  errors:    {}", stats.errors);
    println!("Log: {}", log_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("dir/export.ZIP")),
            PathBuf::from("dir/export_fixed.zip")
        );
        assert_eq!(
            default_output(Path::new("export")),
            PathBuf::from("export_fixed.zip")
        );
    }

    #[test]
    fn test_second_interrupt_handler_is_refused() {
        assert!(install_interrupt_handler(CancelToken::new()));
        assert!(!install_interrupt_handler(CancelToken::new()));
    }

    #[test]
    fn test_cli_rules() {
        let cli = Cli::parse_from([
            "xml-batch-edit",
            "in.zip",
            "--rule",
            "tag",
            "C_STI_ORIG",
            "NEW",
            "--rule",
            "xpath",
            "//a[@id='1']",
            "",
        ]);
        let rules = collect_rules(&cli).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].to_string(), "xpath://a[@id='1']");
        assert_eq!(rules[1].new_value(), "");
    }
}
