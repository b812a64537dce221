use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use spark_etl_agent::deploy::artifacts::{pinned_artifacts, verify_artifacts};
use spark_etl_agent::deploy::check::{check_manifest, has_errors};
use spark_etl_agent::deploy::image::{jars_dir, DEFAULT_COMMAND, DEFAULT_IMAGE, ENV_DEFAULTS};
use spark_etl_agent::deploy::manifest::{DeploymentProfile, SparkApplication};
use spark_etl_agent::utils::logger;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "deploy")]
#[command(about = "Render and verify the spark-etl-agent deployment contract")]
struct Args {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the SparkApplication descriptor
    Render {
        #[arg(long, default_value = DEFAULT_IMAGE)]
        image: String,
        #[arg(long, default_value = "1")]
        job_id: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "default")]
        namespace: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a descriptor against the image contract
    Check {
        file: PathBuf,
        /// Image that was built and published
        #[arg(long)]
        image: Option<String>,
    },
    /// Download the pinned jars and fail on any error or empty file
    VerifyArtifacts {
        /// Also save the jars into this directory
        #[arg(long)]
        jars_dir: Option<PathBuf>,
    },
    /// Print the image's environment defaults
    Env,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    match args.command {
        Command::Render {
            image,
            job_id,
            limit,
            namespace,
            output,
        } => {
            let profile = DeploymentProfile {
                image,
                job_id,
                limit,
                namespace,
                ..Default::default()
            };
            let yaml = SparkApplication::from_profile(&profile).to_yaml()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, yaml)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("📁 Descriptor written to {}", path.display());
                }
                None => print!("{}", yaml),
            }
        }
        Command::Check { file, image } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let app = SparkApplication::from_yaml(&content)
                .with_context(|| format!("parsing {}", file.display()))?;

            let findings = check_manifest(&app, image.as_deref());
            for finding in &findings {
                println!("{}", finding);
            }
            if has_errors(&findings) {
                bail!("{} failed the deployment contract check", file.display());
            }
            println!("✅ {} passed ({} warnings)", file.display(), findings.len());
        }
        Command::VerifyArtifacts { jars_dir: target } => {
            let client = reqwest::Client::new();
            let checks = verify_artifacts(&client, &pinned_artifacts(), target.as_deref()).await;

            let mut table = Table::new();
            table.set_header(vec!["Artifact", "Bytes", "Status"]);
            for check in &checks {
                table.add_row(vec![
                    check.file_name.clone(),
                    check.bytes.map(|b| b.to_string()).unwrap_or_default(),
                    check.error.clone().unwrap_or_else(|| "ok".to_string()),
                ]);
            }
            println!("{}", table);

            let failed = checks.iter().filter(|c| !c.is_ok()).count();
            if failed > 0 {
                bail!("{} of {} artifacts failed verification", failed, checks.len());
            }
            if let Some(dir) = target {
                println!("📁 Jars saved to {} (image path: {})", dir.display(), jars_dir());
            }
        }
        Command::Env => {
            let mut table = Table::new();
            table.set_header(vec!["Variable", "Default"]);
            for env in ENV_DEFAULTS {
                table.add_row(vec![env.name, env.value.unwrap_or("(unset)")]);
            }
            println!("{}", table);
            println!("Default command: {}", DEFAULT_COMMAND.join(" "));
        }
    }

    Ok(())
}
