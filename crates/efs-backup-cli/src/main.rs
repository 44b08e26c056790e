//! EFS backup stack CLI
//!
//! The `efs-backup` command assembles the scheduled EFS → S3 backup job for
//! one deployment and emits it as a CloudFormation template.
//!
//! ## Commands
//!
//! - `synth`: Write the CloudFormation template
//! - `plan`: Summarise roles, schedules, next runs and container environments
//! - `check`: Assemble only and print the graph digest

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, Level};

use efs_backup_core::{
    assemble, to_template_string, AssemblyInputs, EnvironmentContext, ImageSettings, ProfileName,
    ResourceGraph, StackProfile,
};
use efs_backup_state::StateSnapshot;

#[derive(Parser)]
#[command(name = "efs-backup")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Scheduled EFS to S3 backup stack", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Deployment profile (archive or demo)
    #[arg(long, global = true, env = "EFS_BACKUP_PROFILE", default_value = "archive")]
    profile: ProfileName,

    #[command(flatten)]
    deploy: DeployArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Deployment coordinates, deployed state and image settings.
#[derive(Args, Debug, Clone)]
struct DeployArgs {
    #[arg(long, global = true, env = "REGION", default_value = "ap-southeast-2")]
    region: String,

    #[arg(long, global = true, env = "ACCOUNT_NAME", default_value = "sandpit1")]
    account_name: String,

    /// Account id; looked up in --accounts-file when omitted
    #[arg(long, global = true, env = "ACCOUNT_ID")]
    account_id: Option<String>,

    /// YAML file with an `accounts` section mapping account name to id
    #[arg(
        long,
        global = true,
        env = "ACCOUNTS_FILE",
        default_value = "config/aws_account.yaml"
    )]
    accounts_file: PathBuf,

    #[arg(long, global = true, env = "ENVIRONMENT_NAME", default_value = "kate")]
    environment_name: String,

    #[arg(long, global = true, env = "RQP_STAGE", default_value = "dev")]
    stage: String,

    #[arg(long, global = true, env = "RQP_ZONE", default_value = "default")]
    zone: String,

    #[arg(long, global = true, env = "RQP_SLICE", default_value = "default")]
    slice: String,

    #[arg(long, global = true, env = "RQP_APPLICATION", default_value = "efs-backup-to-s3")]
    application: String,

    #[arg(long, global = true, env = "RQP_APPLICATION_VERSION", default_value = "latest")]
    application_version: String,

    #[arg(long, global = true, env = "RQP_REPOSITORY", default_value = "efs-backup-to-s3")]
    repository: String,

    /// Name of the existing VPC the task runs in
    #[arg(long, global = true, env = "VPC_NAME", default_value = "rqp-vpc")]
    vpc_name: String,

    /// JSON snapshot of deployed state (stacks, VPCs, security groups, keys, topics)
    #[arg(long, global = true, env = "EFS_BACKUP_STATE", default_value = "state.json")]
    state: PathBuf,

    /// Account hosting the image registry
    #[arg(long, global = true, env = "REGISTRY_ACCOUNT")]
    registry_account: Option<String>,

    /// Region of the image registry (default: ap-southeast-2 for archive, --region for demo)
    #[arg(long, global = true, env = "REGISTRY_REGION")]
    registry_region: Option<String>,

    /// Image repository (default for archive: the application name)
    #[arg(long, global = true, env = "ECR_REPOSITORY")]
    image_repository: Option<String>,

    /// Image tag (default for archive: the application version)
    #[arg(long, global = true, env = "IMAGE_TAG")]
    image_tag: Option<String>,

    /// Filesystem id, for profiles that do not resolve it from a producer stack
    #[arg(long, global = true, env = "FILE_SYSTEM_ID")]
    file_system_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the stack and emit the CloudFormation template
    Synth {
        /// Write the template here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show roles, schedules with upcoming runs, and container environments
    Plan {
        /// Compute runs after this instant (RFC 3339, default: now)
        #[arg(long)]
        from: Option<String>,

        /// Number of upcoming runs per schedule
        #[arg(short, long, default_value = "3")]
        count: usize,
    },

    /// Assemble only and print the graph digest
    Check,
}

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: AccountEntries,
}

/// `accounts` is either a `name: id` mapping or a list of `{name, id}` entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AccountEntries {
    Map(BTreeMap<String, AccountId>),
    List(Vec<AccountEntry>),
}

impl Default for AccountEntries {
    fn default() -> Self {
        AccountEntries::Map(BTreeMap::new())
    }
}

impl AccountEntries {
    fn get(&self, name: &str) -> Option<String> {
        match self {
            AccountEntries::Map(map) => map.get(name).map(AccountId::to_string),
            AccountEntries::List(list) => list
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.id.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    name: String,
    #[serde(alias = "accountId", alias = "account_id")]
    id: AccountId,
}

/// Unquoted ids parse as YAML integers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AccountId {
    Text(String),
    Number(u64),
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountId::Text(id) => f.write_str(id),
            // Account ids are twelve digits; keep leading zeros.
            AccountId::Number(id) => write!(f, "{:012}", id),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    efs_backup_core::init_tracing(cli.json, level);

    let graph = build_graph(cli.profile, &cli.deploy).await?;

    match cli.command {
        Commands::Synth { output } => cmd_synth(&graph, output.as_deref()).await,
        Commands::Plan { from, count } => cmd_plan(&graph, from.as_deref(), count),
        Commands::Check => cmd_check(&graph),
    }
}

/// Resolve the account id from the flag or the accounts file.
async fn resolve_account_id(args: &DeployArgs) -> Result<String> {
    if let Some(id) = &args.account_id {
        return Ok(id.clone());
    }
    let path = &args.accounts_file;
    let text = tokio::fs::read_to_string(path).await.with_context(|| {
        format!(
            "no account id for '{}': set --account-id or provide accounts file {}",
            args.account_name,
            path.display()
        )
    })?;
    let file: AccountsFile = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse accounts file {}", path.display()))?;
    match file.accounts.get(&args.account_name) {
        Some(id) => Ok(id),
        None => bail!(
            "account '{}' not found in {}",
            args.account_name,
            path.display()
        ),
    }
}

async fn environment_context(args: &DeployArgs) -> Result<EnvironmentContext> {
    Ok(EnvironmentContext {
        region: args.region.clone(),
        account_id: resolve_account_id(args).await?,
        account_name: args.account_name.clone(),
        environment_name: args.environment_name.clone(),
        stage: args.stage.clone(),
        zone: args.zone.clone(),
        slice: args.slice.clone(),
        application: args.application.clone(),
        application_version: args.application_version.clone(),
        repository: args.repository.clone(),
        network_handle: args.vpc_name.clone(),
    })
}

async fn build_graph(profile_name: ProfileName, args: &DeployArgs) -> Result<ResourceGraph> {
    let profile = StackProfile::named(profile_name);
    let ctx = environment_context(args).await?;

    let snapshot = StateSnapshot::load(&args.state)
        .await
        .with_context(|| format!("Failed to load state snapshot {}", args.state.display()))?;

    let image = profile
        .image_coordinate(
            &ctx,
            &ImageSettings {
                registry_account: args.registry_account.clone(),
                registry_region: args.registry_region.clone(),
                repository: args.image_repository.clone(),
                tag: args.image_tag.clone(),
            },
        )
        .context("Invalid container image settings")?;
    let inputs = AssemblyInputs {
        image,
        file_system_id: args.file_system_id.clone(),
        sizing: None,
    };

    assemble(&ctx, &profile, &inputs, &snapshot, &snapshot).with_context(|| {
        format!(
            "Failed to assemble {} stack for {}/{}/{}",
            profile_name, ctx.stage, ctx.zone, ctx.slice
        )
    })
}

async fn cmd_synth(graph: &ResourceGraph, output: Option<&Path>) -> Result<()> {
    let template = to_template_string(graph).context("Failed to render template")?;
    match output {
        Some(path) => {
            tokio::fs::write(path, format!("{}\n", template))
                .await
                .with_context(|| format!("Failed to write template to {}", path.display()))?;
            info!(path = %path.display(), "template written");
            println!(
                "Wrote {} resources for {} to {}",
                graph.resource_count(),
                graph.stack_name,
                path.display()
            );
        }
        None => println!("{}", template),
    }
    Ok(())
}

fn cmd_plan(graph: &ResourceGraph, from: Option<&str>, count: usize) -> Result<()> {
    let from = match from {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid --from instant '{}'", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    print!("{}", render_plan(graph, from, count));
    Ok(())
}

fn cmd_check(graph: &ResourceGraph) -> Result<()> {
    let digest = graph.digest().context("Failed to hash resource graph")?;
    println!(
        "{} ({} profile): {} resources, {} schedule(s)",
        graph.stack_name,
        graph.profile,
        graph.resource_count(),
        graph.schedule_bindings.len()
    );
    println!("digest: {}", digest);
    Ok(())
}

fn render_plan(graph: &ResourceGraph, from: DateTime<Utc>, count: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Stack {} ({} profile) in {} / {}\n",
        graph.stack_name, graph.profile, graph.account_id, graph.region
    ));
    out.push_str(&format!("Filesystem: {}\n", graph.file_system_id));
    out.push_str(&format!(
        "Network: {} ({} subnets)\n",
        graph.network.vpc_id,
        graph.network.subnet_ids.len()
    ));

    out.push_str("\nRoles:\n");
    for role in &graph.roles {
        out.push_str(&format!(
            "  {:<10} {} trusts {}, {} statement(s)",
            format!("{:?}", role.kind()),
            role.logical_id(),
            role.trust().as_str(),
            role.statements().len()
        ));
        if !role.pass_role_targets().is_empty() {
            out.push_str(&format!(", passes {}", role.pass_role_targets().join(", ")));
        }
        out.push('\n');
    }

    out.push_str("\nSchedules:\n");
    for binding in &graph.schedule_bindings {
        let marker = if binding.conditional { " (conditional)" } else { "" };
        out.push_str(&format!(
            "  {} {}{}\n",
            binding.logical_id,
            binding.schedule.schedule_expression(),
            marker
        ));
        for run in binding.schedule.upcoming(from, count) {
            out.push_str(&format!("    next: {}\n", run.to_rfc3339()));
        }
        for (key, value) in binding.effective_environment(&graph.task_spec) {
            out.push_str(&format!("    {}={}\n", key, value));
        }
    }

    out.push_str(&format!(
        "\nFailure alerts: exit codes {:?} -> {}\n",
        graph.failure_matcher.pattern.exit_codes.codes(),
        graph.failure_matcher.sink.topic_arn
    ));
    out
}
