use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use kvg_sdk::{
    BranchId, GraphObject, GraphRelationship, HistoryPage, KnowledgeGraph, KvgConfig,
    MergeConfig, MergePreviewRequest, MergeStatus, NewBranch, NewObject, NewRelationship,
    ObjectPatch, ObjectQuery, OrganizationId, ProjectId, PropertyStrategy, StoreConfig,
    TenantContext, TraverseDirection, TraverseRequest,
};
use kvg_server::{KvgServer, ServerConfig};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    debug!(store = ?config.kvg.store, "configuration loaded");
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args),
        Command::InitConfig(args) => cmd_init_config(args),
        Command::Object(args) => {
            let (graph, ctx) = open(&config, &cli.tenant)?;
            cmd_object(&graph, &ctx, args.action, &cli.format)
        }
        Command::Rel(args) => {
            let (graph, ctx) = open(&config, &cli.tenant)?;
            cmd_rel(&graph, &ctx, args.action, &cli.format)
        }
        Command::Traverse(args) => {
            let (graph, ctx) = open(&config, &cli.tenant)?;
            cmd_traverse(&graph, &ctx, args, &cli.format)
        }
        Command::Search(args) => {
            let (graph, ctx) = open(&config, &cli.tenant)?;
            cmd_search(&graph, &ctx, args, &cli.format)
        }
        Command::Branch(args) => {
            let (graph, ctx) = open(&config, &cli.tenant)?;
            cmd_branch(&graph, &ctx, args.action, &cli.format)
        }
        Command::MergePreview(args) => {
            let (graph, ctx) = open(&config, &cli.tenant)?;
            cmd_merge_preview(&graph, &ctx, args, &cli.format)
        }
        Command::MergeObjects(args) => {
            let (graph, ctx) = open(&config, &cli.tenant)?;
            cmd_merge_objects(&graph, &ctx, args, &cli.format)
        }
    }
}

/// The config file when present, else defaults with a local SQLite store.
/// `--db` always wins.
pub fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = if cli.config.exists() {
        ServerConfig::load(&cli.config)
            .with_context(|| format!("reading {}", cli.config.display()))?
    } else {
        ServerConfig {
            kvg: KvgConfig {
                store: StoreConfig::Sqlite {
                    path: "kvg.db".into(),
                },
                ..KvgConfig::default()
            },
            ..ServerConfig::default()
        }
    };
    if let Some(db) = &cli.db {
        config.kvg.store = StoreConfig::Sqlite { path: db.clone() };
    }
    Ok(config)
}

pub fn tenant(args: &TenantArgs) -> anyhow::Result<TenantContext> {
    let (Some(org), Some(project)) = (args.org, args.project) else {
        bail!("--org and --project are required");
    };
    let ctx = TenantContext::new(OrganizationId::from_uuid(org), ProjectId::from_uuid(project))?;
    Ok(ctx.on_branch(args.branch.map(BranchId::from_uuid)))
}

fn open(
    config: &ServerConfig,
    args: &TenantArgs,
) -> anyhow::Result<(KnowledgeGraph, TenantContext)> {
    let ctx = tenant(args)?;
    Ok((KnowledgeGraph::open(&config.kvg)?, ctx))
}

fn parse_props(props: Option<String>) -> anyhow::Result<kvg_sdk::Properties> {
    match props {
        None => Ok(Default::default()),
        Some(text) => match serde_json::from_str::<Value>(&text).context("--props is not JSON")? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => bail!("--props must be a JSON object"),
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn object_line(object: &GraphObject) -> String {
    let state = if object.meta.deleted_at.is_some() {
        " (deleted)".red().to_string()
    } else {
        String::new()
    };
    format!(
        "{} v{} {}{}{}",
        object.meta.canonical_id.to_string().cyan(),
        object.meta.version,
        object.object_type.bold(),
        object
            .key
            .as_deref()
            .map(|k| format!(" [{k}]"))
            .unwrap_or_default(),
        state
    )
}

fn relationship_line(rel: &GraphRelationship) -> String {
    format!(
        "{} v{} {} -[{}]-> {}",
        rel.meta.canonical_id.to_string().cyan(),
        rel.meta.version,
        rel.src_id.short_id(),
        rel.relationship_type.bold(),
        rel.dst_id.short_id()
    )
}

fn show_object(object: &GraphObject, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(object),
        OutputFormat::Text => {
            println!("{}", object_line(object));
            println!("  version id: {}", object.meta.id);
            println!("  hash: {}", object.meta.content_hash.short_hex().dimmed());
            if !object.meta.change_summary.paths.is_empty() {
                let paths: Vec<&str> = object
                    .meta
                    .change_summary
                    .paths
                    .iter()
                    .map(String::as_str)
                    .collect();
                println!("  changed: {}", paths.join(", "));
            }
            for (key, value) in &object.properties {
                println!("  {key} = {value}");
            }
            Ok(())
        }
    }
}

fn cmd_serve(mut config: ServerConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    println!("kvg server on {}", config.bind_addr.to_string().bold());
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(KvgServer::new(config).serve())?;
    Ok(())
}

fn cmd_init_config(args: InitConfigArgs) -> anyhow::Result<()> {
    if args.output.exists() && !args.force {
        bail!("{} exists; pass --force to overwrite", args.output.display());
    }
    let mut config = ServerConfig::default();
    if let Some(path) = args.sqlite {
        config.kvg.store = StoreConfig::Sqlite { path };
    }
    write_config(&args.output, &config)?;
    println!("{} Wrote {}", "✓".green().bold(), args.output.display().to_string().bold());
    Ok(())
}

fn write_config(path: &Path, config: &ServerConfig) -> anyhow::Result<()> {
    std::fs::write(path, config.to_toml_string()?)
        .with_context(|| format!("writing {}", path.display()))
}

fn cmd_object(
    graph: &KnowledgeGraph,
    ctx: &TenantContext,
    action: ObjectAction,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    match action {
        ObjectAction::Create {
            object_type,
            key,
            status,
            props,
            labels,
        } => {
            let input = NewObject {
                object_type,
                key,
                status,
                properties: parse_props(props)?,
                labels,
            };
            show_object(&graph.create_object(ctx, input)?, format)
        }
        ObjectAction::Get { id } => show_object(&graph.get_object(ctx, id)?, format),
        ObjectAction::Patch {
            id,
            props,
            status,
            labels,
            expected,
        } => {
            let patch = ObjectPatch {
                properties: parse_props(props)?,
                labels: (!labels.is_empty()).then_some(labels),
                status,
            };
            show_object(&graph.patch_object(ctx, id, patch, expected)?, format)
        }
        ObjectAction::Delete { id, expected } => {
            show_object(&graph.delete_object(ctx, id, expected)?, format)
        }
        ObjectAction::Restore { id, expected } => {
            show_object(&graph.restore_object(ctx, id, expected)?, format)
        }
        ObjectAction::History { id, limit, before } => {
            let history = graph.object_history(
                ctx,
                id,
                HistoryPage {
                    before_version: before,
                    limit,
                },
            )?;
            match format {
                OutputFormat::Json => print_json(&history),
                OutputFormat::Text => {
                    for version in &history.items {
                        println!(
                            "{}  {:?}  {}",
                            object_line(version),
                            version.meta.change_summary.kind,
                            version.meta.created_at.to_rfc3339().dimmed()
                        );
                    }
                    if let Some(next) = history.next_before_version {
                        println!("{}", format!("more: --before {next}").dimmed());
                    }
                    Ok(())
                }
            }
        }
    }
}

fn cmd_rel(
    graph: &KnowledgeGraph,
    ctx: &TenantContext,
    action: RelAction,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    match action {
        RelAction::Create {
            relationship_type,
            src,
            dst,
            weight,
            props,
        } => {
            let mut input = NewRelationship::new(relationship_type, src, dst);
            input.weight = weight;
            input.properties = parse_props(props)?;
            let outcome = graph.create_relationship(ctx, input)?;
            match format {
                OutputFormat::Json => print_json(&outcome.relationship),
                OutputFormat::Text => {
                    let verb = if outcome.created {
                        "Created".green()
                    } else {
                        "Exists".yellow()
                    };
                    println!("{verb} {}", relationship_line(&outcome.relationship));
                    Ok(())
                }
            }
        }
    }
}

fn cmd_traverse(
    graph: &KnowledgeGraph,
    ctx: &TenantContext,
    args: TraverseArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let request = TraverseRequest {
        roots: args.roots,
        direction: match args.direction {
            Direction::Out => TraverseDirection::Out,
            Direction::In => TraverseDirection::In,
            Direction::Both => TraverseDirection::Both,
        },
        max_depth: args.depth,
        allowed_types: (!args.types.is_empty()).then_some(args.types),
        cursor: args.cursor,
        limit: args.limit,
        ..TraverseRequest::default()
    };
    let result = graph.traverse(ctx, &request)?;
    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Text => {
            for node in &result.nodes {
                println!(
                    "{}{} {}",
                    "  ".repeat(node.depth as usize),
                    node.canonical_id.to_string().cyan(),
                    node.object_type.bold()
                );
            }
            println!(
                "{} nodes, {} edges ({}..{} of {}) in {} ms",
                result.nodes.len(),
                result.edges.len(),
                result.approx_position_start,
                result.approx_position_end,
                result.result_count,
                result.query_time_ms
            );
            if let Some(next) = &result.next_cursor {
                println!("{}", format!("next: --cursor {next}").dimmed());
            }
            Ok(())
        }
    }
}

fn cmd_search(
    graph: &KnowledgeGraph,
    ctx: &TenantContext,
    args: SearchArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let query = ObjectQuery {
        types: args.types,
        key: args.key,
        labels: args.labels,
        include_deleted: args.include_deleted,
        cursor: args.cursor,
        limit: args.limit,
        ..ObjectQuery::default()
    };
    let page = graph.search_objects(ctx, &query)?;
    match format {
        OutputFormat::Json => print_json(&page),
        OutputFormat::Text => {
            for object in &page.items {
                println!("{}", object_line(object));
            }
            println!("{} of {} matching", page.items.len(), page.total);
            if let Some(next) = &page.next_cursor {
                println!("{}", format!("next: --cursor {next}").dimmed());
            }
            Ok(())
        }
    }
}

fn cmd_branch(
    graph: &KnowledgeGraph,
    ctx: &TenantContext,
    action: BranchAction,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    match action {
        BranchAction::Create { name, parent } => {
            let mut input = NewBranch::new(name);
            if let Some(parent) = parent {
                input = input.from_parent(BranchId::from_uuid(parent));
            }
            let branch = graph.create_branch(ctx, input)?;
            match format {
                OutputFormat::Json => print_json(&branch),
                OutputFormat::Text => {
                    println!(
                        "{} Created branch {} ({})",
                        "✓".green().bold(),
                        branch.name.yellow(),
                        branch.id
                    );
                    Ok(())
                }
            }
        }
        BranchAction::List => {
            let branches = graph.list_branches(ctx)?;
            match format {
                OutputFormat::Json => print_json(&branches),
                OutputFormat::Text => {
                    let current = ctx.branch_id;
                    let marker = |on: bool| if on { "*" } else { " " };
                    println!("{} {}", marker(current.is_none()), "main".green().bold());
                    for branch in &branches {
                        println!(
                            "{} {} {}",
                            marker(current == Some(branch.id)),
                            branch.name.yellow(),
                            branch.id.to_string().dimmed()
                        );
                    }
                    Ok(())
                }
            }
        }
    }
}

fn cmd_merge_preview(
    graph: &KnowledgeGraph,
    ctx: &TenantContext,
    args: MergePreviewArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let request = MergePreviewRequest {
        source_branch_id: args.source.map(BranchId::from_uuid),
        limit: args.limit,
        allow_truncation: !args.strict,
    };
    let summary = graph.preview_merge(ctx, BranchId::from_uuid(args.target), &request)?;
    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Text => {
            for entry in &summary.objects {
                let status = match entry.status {
                    MergeStatus::Added => "added".green(),
                    MergeStatus::Unchanged => "unchanged".dimmed(),
                    MergeStatus::FastForward => "fast-forward".cyan(),
                    MergeStatus::Conflict => "conflict".red().bold(),
                };
                println!("{:>12}  {}", status, entry.canonical_id);
                for path in &entry.conflicts {
                    println!("{:>12}  {}", "", path.red());
                }
            }
            println!(
                "objects: {} total, {} added, {} unchanged, {} fast-forward, {} conflicts",
                summary.total_objects,
                summary.added_count,
                summary.unchanged_count,
                summary.fast_forward_count,
                summary.conflict_count
            );
            println!(
                "relationships: {} total, {} conflicts",
                summary.relationship_total, summary.relationship_conflict_count
            );
            if summary.truncated {
                println!("{}", format!("truncated at {}", summary.hard_limit).yellow());
            }
            Ok(())
        }
    }
}

fn cmd_merge_objects(
    graph: &KnowledgeGraph,
    ctx: &TenantContext,
    args: MergeObjectsArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let config = MergeConfig {
        property_strategy: match args.strategy {
            Strategy::SourceWins => PropertyStrategy::SourceWins,
            Strategy::TargetWins => PropertyStrategy::TargetWins,
        },
        track_provenance: args.provenance,
        user_id: args.user,
    };
    let result = graph.merge_objects(ctx, args.source, args.target, &config)?;
    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Text => {
            println!("{} Merged into {}", "✓".green().bold(), result.target_object_id);
            println!(
                "  relationships: {} redirected, {} dropped",
                result.redirected_relationships, result.dropped_relationships
            );
            Ok(())
        }
    }
}
