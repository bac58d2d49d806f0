//! iprestrict: CLI tool for checking and inspecting access rule configurations.

use clap::{Parser, Subcommand};
use iprestrict::{Restrictor, RuleRecord};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "iprestrict")]
#[command(author = "Kaitu.io")]
#[command(version = "0.1.0")]
#[command(about = "Check requests against URL/IP access rules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether a request is allowed
    Check {
        /// Rule configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Request path
        #[arg(short, long)]
        url: String,

        /// Client IP address
        #[arg(short, long)]
        ip: String,
    },

    /// Show how every rule treats a request
    Explain {
        /// Rule configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Request path
        #[arg(short, long)]
        url: String,

        /// Client IP address
        #[arg(short, long)]
        ip: String,
    },

    /// List rules in evaluation order
    List {
        /// Rule configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Rule configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { config, url, ip } => check(&config, &url, &ip),
        Commands::Explain { config, url, ip } => explain(&config, &url, &ip),
        Commands::List { config } => list(&config),
        Commands::Validate { config } => validate(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn check(config: &Path, url: &str, ip: &str) -> iprestrict::Result<()> {
    let restrictor = Restrictor::from_path(config)?;
    let (action, rule) = restrictor.rules().evaluate_with_match(url, ip);

    match rule {
        Some(rule) => println!("{} (rule {} at rank {})", action, rule.id, rule.rank),
        None => println!("{} (no rule matched)", action),
    }
    Ok(())
}

fn explain(config: &Path, url: &str, ip: &str) -> iprestrict::Result<()> {
    let restrictor = Restrictor::from_path(config)?;
    let report = restrictor.rules().explain(url, ip);
    let decided = report.iter().position(|m| m.matched());

    println!("{:>6}  {:<6} {:<5} {:<5} {:<16} PATTERN", "RANK", "ACTION", "URL", "IP", "GROUP");
    for (i, entry) in report.iter().enumerate() {
        let marker = if Some(i) == decided { " <= decides" } else { "" };
        println!(
            "{:>6}  {:<6} {:<5} {:<5} {:<16} {}{}",
            entry.rule.rank,
            entry.rule.action.as_str(),
            yes_no(entry.url_matches),
            yes_no(entry.ip_matches),
            entry.rule.ip_group,
            entry.rule.url_pattern,
            marker
        );
    }

    let action = restrictor.decide(url, ip);
    println!();
    println!("Result: {}", action);
    Ok(())
}

fn list(config: &Path) -> iprestrict::Result<()> {
    let restrictor = Restrictor::from_path(config)?;
    for rule in restrictor.rules().rules() {
        print_rule(&rule);
    }
    Ok(())
}

fn validate(config: &Path) -> iprestrict::Result<()> {
    let restrictor = Restrictor::from_path(config)?;
    let rules = restrictor.rules();
    println!(
        "OK: {} groups, {} rules",
        rules.groups().len(),
        rules.len()
    );
    Ok(())
}

fn print_rule(rule: &RuleRecord) {
    println!(
        "{:>6}  {:<6} {:<16} {}",
        rule.rank,
        rule.action.as_str(),
        rule.ip_group,
        rule.url_pattern
    );
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
