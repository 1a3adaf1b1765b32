use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "kvg",
    about = "Versioned, multi-tenant knowledge graph",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (TOML); defaults apply when it does not exist
    #[arg(short, long, global = true, default_value = "kvg.toml")]
    pub config: PathBuf,

    /// Use this SQLite database instead of the configured store
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(flatten)]
    pub tenant: TenantArgs,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Clone, Debug, Default)]
pub struct TenantArgs {
    /// Organization id
    #[arg(long, global = true)]
    pub org: Option<Uuid>,
    /// Project id
    #[arg(long, global = true)]
    pub project: Option<Uuid>,
    /// Branch id; omit for the main line
    #[arg(long, global = true)]
    pub branch: Option<Uuid>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Write a configuration file with every default spelled out
    InitConfig(InitConfigArgs),
    /// Create, read, and modify objects
    Object(ObjectArgs),
    /// Create relationships
    Rel(RelArgs),
    /// Walk the graph from one or more roots
    Traverse(TraverseArgs),
    /// Search object heads
    Search(SearchArgs),
    /// Create or list branches
    Branch(BranchArgs),
    /// Dry-run comparison of two branches
    MergePreview(MergePreviewArgs),
    /// Fold a duplicate object into another
    MergeObjects(MergeObjectsArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Override the configured bind address
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args)]
pub struct InitConfigArgs {
    #[arg(short, long, default_value = "kvg.toml")]
    pub output: PathBuf,
    /// Configure a SQLite store at this path
    #[arg(long)]
    pub sqlite: Option<PathBuf>,
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ObjectArgs {
    #[command(subcommand)]
    pub action: ObjectAction,
}

#[derive(Subcommand)]
pub enum ObjectAction {
    /// Create a new object chain
    Create {
        #[arg(short = 't', long = "type")]
        object_type: String,
        #[arg(short, long)]
        key: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Properties as a JSON object
        #[arg(short, long)]
        props: Option<String>,
        #[arg(short, long = "label")]
        labels: Vec<String>,
    },
    /// Show a version, or the head of a chain
    Get { id: Uuid },
    /// Merge properties over the head
    Patch {
        id: Uuid,
        /// Properties as a JSON object; null removes a key
        #[arg(short, long)]
        props: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(short, long = "label")]
        labels: Vec<String>,
        /// Last version read; implied when ID is a version id
        #[arg(short, long)]
        expected: Option<u32>,
    },
    /// Append a tombstone
    Delete {
        id: Uuid,
        #[arg(short, long)]
        expected: Option<u32>,
    },
    /// Bring a deleted chain back
    Restore {
        id: Uuid,
        #[arg(short, long)]
        expected: Option<u32>,
    },
    /// List versions, newest first
    History {
        id: Uuid,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        before: Option<u32>,
    },
}

#[derive(Args)]
pub struct RelArgs {
    #[command(subcommand)]
    pub action: RelAction,
}

#[derive(Subcommand)]
pub enum RelAction {
    /// Create a relationship (idempotent for identical content)
    Create {
        #[arg(short = 't', long = "type")]
        relationship_type: String,
        #[arg(long)]
        src: Uuid,
        #[arg(long)]
        dst: Uuid,
        #[arg(short, long)]
        weight: Option<f64>,
        #[arg(short, long)]
        props: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum Direction {
    Out,
    In,
    Both,
}

#[derive(Args)]
pub struct TraverseArgs {
    #[arg(required = true)]
    pub roots: Vec<Uuid>,
    #[arg(short, long)]
    pub depth: Option<u32>,
    #[arg(long, default_value = "both")]
    pub direction: Direction,
    /// Relationship types to follow
    #[arg(short = 't', long = "type")]
    pub types: Vec<String>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub cursor: Option<String>,
}

#[derive(Args)]
pub struct SearchArgs {
    #[arg(short = 't', long = "type")]
    pub types: Vec<String>,
    #[arg(short, long)]
    pub key: Option<String>,
    #[arg(short, long = "label")]
    pub labels: Vec<String>,
    #[arg(long)]
    pub include_deleted: bool,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub cursor: Option<String>,
}

#[derive(Args)]
pub struct BranchArgs {
    #[command(subcommand)]
    pub action: BranchAction,
}

#[derive(Subcommand)]
pub enum BranchAction {
    /// Fork a branch from the main line or a parent branch
    Create {
        name: String,
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// List the project's branches
    List,
}

#[derive(Args)]
pub struct MergePreviewArgs {
    /// Branch receiving the merge
    #[arg(long)]
    pub target: Uuid,
    /// Branch being merged; omit for the main line
    #[arg(long)]
    pub source: Option<Uuid>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    /// Fail instead of truncating when the limit is exceeded
    #[arg(long)]
    pub strict: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum Strategy {
    SourceWins,
    TargetWins,
}

#[derive(Args)]
pub struct MergeObjectsArgs {
    pub source: Uuid,
    pub target: Uuid,
    #[arg(long, default_value = "source-wins")]
    pub strategy: Strategy,
    /// Record per-field provenance on the target
    #[arg(long)]
    pub provenance: bool,
    #[arg(long)]
    pub user: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_create() {
        let cli = Cli::try_parse_from([
            "kvg", "object", "create", "--type", "Doc", "--key", "d1", "-l", "a", "-l", "b",
        ])
        .unwrap();
        match cli.command {
            Command::Object(ObjectArgs {
                action:
                    ObjectAction::Create {
                        object_type,
                        key,
                        labels,
                        ..
                    },
            }) => {
                assert_eq!(object_type, "Doc");
                assert_eq!(key.as_deref(), Some("d1"));
                assert_eq!(labels, vec!["a", "b"]);
            }
            _ => panic!("expected object create"),
        }
        assert_eq!(cli.config, PathBuf::from("kvg.toml"));
    }

    #[test]
    fn tenant_flags_are_global() {
        let org = Uuid::now_v7();
        let project = Uuid::now_v7();
        let cli = Cli::try_parse_from([
            "kvg",
            "search",
            "--org",
            &org.to_string(),
            "--project",
            &project.to_string(),
        ])
        .unwrap();
        assert_eq!(cli.tenant.org, Some(org));
        assert_eq!(cli.tenant.project, Some(project));
        assert_eq!(cli.tenant.branch, None);
    }

    #[test]
    fn traverse_requires_a_root() {
        assert!(Cli::try_parse_from(["kvg", "traverse"]).is_err());
    }

    #[test]
    fn merge_objects_strategy() {
        let a = Uuid::now_v7().to_string();
        let b = Uuid::now_v7().to_string();
        let cli = Cli::try_parse_from(["kvg", "merge-objects", &a, &b, "--strategy", "target-wins"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::MergeObjects(MergeObjectsArgs {
                strategy: Strategy::TargetWins,
                ..
            })
        ));
    }
}
