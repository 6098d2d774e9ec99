//! CertForge CLI
//!
//! Commands: validate, ingest
//! Outputs JSON to stdout
//! Returns non-zero on validation failure

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use certforge_core::{
    BatchIngestor, ImageResolver, StaticRoots, Template, TemplateDoc, TemplateValidator,
};

#[derive(Parser)]
#[command(name = "certforge-cli")]
#[command(about = "CertForge CLI - Certificate template engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Static directory for resources referenced by path
    #[arg(short, long, env = "STATIC_DIR", default_value = "static")]
    static_dir: PathBuf,

    /// Bundled static directory
    #[arg(long, env = "INTERNAL_STATIC_DIR")]
    internal_static_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a template and print its normalized form
    Validate {
        /// Template file
        #[arg(short, long, default_value = "template.json")]
        template: String,
    },

    /// Merge a CSV list of records against a template
    Ingest {
        /// Template file
        #[arg(short, long, default_value = "template.json")]
        template: String,

        /// CSV file with one record per row
        #[arg(short, long, default_value = "records.csv")]
        list: String,
    },
}

fn main() -> ExitCode {
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    let cli = Cli::parse();

    // Scratch space for downloaded images, removed on drop
    let scratch = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            error!("Failed to create temporary directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut roots = StaticRoots::from_env()
        .with_static_dir(&cli.static_dir)
        .with_tmp_static_dir(scratch.path().join("static"));
    if let Some(dir) = &cli.internal_static_dir {
        roots = roots.with_internal_static_dir(dir);
    }

    let resolver = match ImageResolver::with_http(roots) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to set up image resolver: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Validate { template } => match load_template(&resolver, &template) {
            Ok(t) => {
                print_json(&t);
                ExitCode::SUCCESS
            }
            Err(message) => {
                println!("{}", serde_json::json!({ "valid": false, "error": message }));
                ExitCode::from(2)
            }
        },

        Commands::Ingest { template, list } => {
            let template = match load_template(&resolver, &template) {
                Ok(t) => t,
                Err(message) => {
                    println!("{}", serde_json::json!({ "success": false, "error": message }));
                    return ExitCode::from(2);
                }
            };

            let Some(list_path) = resolver.roots().locate_with_cwd(&list) else {
                println!(
                    "{}",
                    serde_json::json!({ "success": false, "error": format!("List '{}' not found!", list) })
                );
                return ExitCode::FAILURE;
            };

            match BatchIngestor::new(&template, &resolver).ingest_file(&list_path) {
                Ok(report) => {
                    info!("Entries loaded ({} of {} usable)", report.succeeded(), report.certificates.len());
                    print_json(&report);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    println!(
                        "{}",
                        serde_json::json!({ "success": false, "error": format!("Invalid list '{}' ({})", list, e) })
                    );
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn load_template(resolver: &ImageResolver, name: &str) -> Result<Template, String> {
    let path = resolver
        .roots()
        .locate_with_cwd(name)
        .ok_or_else(|| format!("Template '{}' not found!", name))?;
    let doc = TemplateDoc::load(&path).map_err(|e| format!("Invalid template '{}' ({})", name, e))?;
    let template = TemplateValidator::new(resolver)
        .validate(doc)
        .map_err(|e| format!("Invalid template '{}' ({})", name, e))?;
    info!("Using template '{}'", template.title);
    Ok(template)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("{}", serde_json::json!({ "error": e.to_string() })),
    }
}
