use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sitestack::config::{find_closest_config, SiteConfig};
use sitestack::deploy::{aws_config_for, StackDeployer};
use sitestack::resources::CODE_KEY_PARAMETER;
use sitestack::{package, publish, Template};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sitestack", version, about = "Static website infrastructure on S3, CloudFront and Route 53")]
struct Cli {
    /// path to sitestack.toml. Defaults to the closest one above the current directory
    #[arg(long, global = true, env = "SITESTACK_CONFIG")]
    config: Option<PathBuf>,

    /// .env file with SITESTACK_* overrides
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// write the CloudFormation template
    Synth {
        /// output file. stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// validate the config and the generated template
    Check,
    /// print the order CloudFormation will create resources in
    Graph,
    /// show what a deploy would change
    Plan {
        /// object key of the invalidation function archive
        #[arg(long, env = "SITESTACK_CODE_KEY")]
        code_key: Option<String>,
    },
    /// create or update the stack
    Deploy {
        #[arg(long, env = "SITESTACK_CODE_KEY")]
        code_key: Option<String>,
    },
    /// print the outputs of the deployed stack
    Outputs,
    /// delete the stack
    Destroy,
    /// zip the invalidation function and upload it to the artifact bucket
    Package {
        /// the compiled function binary, named bootstrap
        #[arg(long)]
        bootstrap: PathBuf,
        #[arg(long, default_value = "target/lambda")]
        out_dir: PathBuf,
    },
    /// upload site content and refresh the edge cache
    Publish {
        /// directory holding the site
        #[arg(long)]
        dir: PathBuf,
        /// skip invoking the invalidation function
        #[arg(long)]
        no_invalidate: bool,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<SiteConfig> {
    let config_path = match &cli.config {
        Some(p) => Some(p.clone()),
        None => {
            let currdir = std::env::current_dir().context("Failed to get current directory")?;
            find_closest_config(currdir)
        }
    };
    let env_file = Some(cli.env_file.as_path()).filter(|p| p.is_file());
    if config_path.is_none() {
        tracing::warn!("no sitestack.toml found, reading settings from the environment only");
    }
    let conf = SiteConfig::load(config_path.as_deref(), env_file)?;
    Ok(conf)
}

fn stack_parameters(template: &Template, code_key: Option<String>) -> anyhow::Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    if template.parameters.contains_key(CODE_KEY_PARAMETER) {
        let key = code_key.context("The invalidation function needs --code-key. Run `sitestack package` to get one")?;
        params.insert(CODE_KEY_PARAMETER.to_string(), key);
    }
    Ok(params)
}

fn print_outputs(outputs: &std::collections::HashMap<String, String>) {
    let sorted: BTreeMap<_, _> = outputs.iter().collect();
    for (key, val) in sorted {
        println!("{key} = {val}");
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let conf = load_config(&cli)?;
    match cli.command {
        Commands::Synth { out } => {
            let template = sitestack::synthesize(&conf)?;
            let body = template.to_json()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!("wrote {}", path.display());
                }
                None => println!("{body}"),
            }
        }
        Commands::Check => {
            sitestack::synthesize(&conf)?;
            println!("{} is valid", conf.stack_name);
        }
        Commands::Graph => {
            let template = sitestack::synthesize(&conf)?;
            for (i, id) in template.dependency_order()?.iter().enumerate() {
                let deps: Vec<String> = template.references(id).into_iter().collect();
                if deps.is_empty() {
                    println!("{:>2}. {id}", i + 1);
                } else {
                    println!("{:>2}. {id} (after {})", i + 1, deps.join(", "));
                }
            }
        }
        Commands::Plan { code_key } => {
            let template = sitestack::synthesize(&conf)?;
            let params = stack_parameters(&template, code_key)?;
            let sdk = aws_config_for(&conf.region).await;
            let changes = StackDeployer::new(&sdk, &conf.stack_name).plan(&template.to_json()?, &params).await?;
            if changes.is_empty() {
                println!("{} is up to date", conf.stack_name);
            }
            for c in changes {
                let replacement = if c.replacement == "True" { " (replacement)" } else { "" };
                println!("{:<8} {:<28} {}{replacement}", c.action, c.logical_id, c.resource_type);
            }
        }
        Commands::Deploy { code_key } => {
            let template = sitestack::synthesize(&conf)?;
            let params = stack_parameters(&template, code_key)?;
            let sdk = aws_config_for(&conf.region).await;
            let outputs = StackDeployer::new(&sdk, &conf.stack_name).deploy(&template.to_json()?, &params).await?;
            print_outputs(&outputs);
        }
        Commands::Outputs => {
            let sdk = aws_config_for(&conf.region).await;
            let outputs = StackDeployer::new(&sdk, &conf.stack_name).outputs().await?;
            print_outputs(&outputs);
        }
        Commands::Destroy => {
            let sdk = aws_config_for(&conf.region).await;
            StackDeployer::new(&sdk, &conf.stack_name).destroy().await?;
            println!("deleted {}", conf.stack_name);
        }
        Commands::Package { bootstrap, out_dir } => {
            conf.validate()?;
            let inv = conf.invalidation.as_ref().context("No invalidation function is declared in the config")?;
            let sdk = aws_config_for(&conf.region).await;
            let key = package::package_function(&sdk, inv, &bootstrap, &out_dir).await?;
            println!("{key}");
        }
        Commands::Publish { dir, no_invalidate } => {
            conf.validate()?;
            if !dir.is_dir() {
                anyhow::bail!("{} is not a directory", dir.display());
            }
            let sdk = aws_config_for(&conf.region).await;
            let count = publish::upload_site(&sdk, &conf.bucket_name, &dir).await?;
            println!("uploaded {count} files to {}", conf.bucket_name);
            match (&conf.invalidation, no_invalidate) {
                (Some(inv), false) => {
                    let message = publish::trigger_invalidation(&sdk, &inv.function_name).await?;
                    println!("{message}");
                }
                (None, false) => tracing::warn!("no invalidation function declared, cached copies expire on their own"),
                _ => {}
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "sitestack=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
