//! Resource tree command line
//!
//! Operates on a SQLite-backed tree and prints JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use resource_tree::{
    BatchReport, FilterValue, IdentityProvider, NodeId, NodeMetadata, Principal, ResourceFilter,
    ResourceNode, ResourceTree, RoleId, SessionIdentity, StaticIdentity, TreeConfig, UserId,
    WorkspaceId,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "restree")]
#[command(about = "Manage workspace resource trees")]
struct Args {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Database file (overrides the configuration)
    #[arg(short = 'd', long)]
    db: Option<PathBuf>,

    /// Act as this user id
    #[arg(short = 'u', long = "as")]
    user: Option<i64>,

    /// Act with platform administrator rights
    #[arg(long)]
    admin: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a user
    AddUser {
        username: String,
        first_name: String,
        last_name: String,
    },
    /// Create a workspace with its default roles; the acting user manages it
    InitWorkspace { name: String, code: String },
    /// List children (workspace roots without a parent)
    Ls {
        parent: Option<i64>,
        #[arg(short = 't', long = "type")]
        resource_type: Option<String>,
    },
    /// Print a subtree
    Tree { node: i64 },
    /// Path from the workspace root to a node
    Ancestors { node: i64 },
    Mkdir { parent: i64, name: String },
    /// Create a node of any registered type
    Create {
        parent: i64,
        resource_type: String,
        name: String,
        #[arg(long)]
        mime: Option<String>,
    },
    Rename { node: i64, name: String },
    /// Move nodes into a directory
    Mv {
        destination: i64,
        #[arg(required = true)]
        nodes: Vec<i64>,
    },
    /// Copy nodes into a directory
    Cp {
        destination: i64,
        #[arg(required = true)]
        nodes: Vec<i64>,
    },
    Rm {
        #[arg(required = true)]
        nodes: Vec<i64>,
    },
    /// Create shortcuts to nodes inside a directory
    Ln {
        destination: i64,
        #[arg(required = true)]
        targets: Vec<i64>,
    },
    /// Search nodes visible to the acting user
    Find {
        #[arg(long)]
        name: Option<String>,
        /// YYYY-MM-DD or RFC 3339
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long = "root")]
        roots: Vec<String>,
        #[arg(long = "type")]
        types: Vec<String>,
    },
    /// Users registered in a workspace
    Users {
        workspace: i64,
        #[arg(long = "role")]
        roles: Vec<i64>,
        #[arg(long)]
        search: Option<String>,
        /// List users outside the workspace roles that were not selected
        #[arg(long)]
        unregistered: bool,
        #[arg(long, default_value = "1")]
        page: u32,
    },
    #[command(subcommand)]
    Role(RoleCommand),
}

#[derive(Subcommand, Debug)]
enum RoleCommand {
    List {
        workspace: i64,
    },
    Create {
        workspace: i64,
        label: String,
        /// Also create a directory for the role under the workspace root
        #[arg(long)]
        with_directory: bool,
    },
    Remove {
        workspace: i64,
        role: i64,
    },
    Assign {
        role: i64,
        #[arg(required = true)]
        users: Vec<i64>,
    },
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ids(raw: &[i64]) -> Vec<NodeId> {
    raw.iter().copied().map(NodeId).collect()
}

fn report_json<T, F>(report: &BatchReport<T>, ok: F) -> Value
where
    F: Fn(&T) -> Value,
{
    Value::Array(
        report
            .items
            .iter()
            .map(|item| match &item.outcome {
                Ok(value) => json!({ "id": item.id, "ok": ok(value) }),
                Err(e) => json!({ "id": item.id, "error": e.to_string() }),
            })
            .collect(),
    )
}

fn subtree(tree: &ResourceTree, node: &ResourceNode) -> anyhow::Result<Value> {
    let mut children = Vec::new();
    if node.is_directory() {
        for child in tree.query().children(Some(node.id), None)? {
            children.push(subtree(tree, &child)?);
        }
    }
    let mut value = serde_json::to_value(tree.view(node))?;
    value["children"] = Value::Array(children);
    Ok(value)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TreeConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => TreeConfig::default(),
    };
    if let Some(db) = &args.db {
        config.database.path = Some(db.clone());
    }
    if config.database.path.is_none() {
        config.database.path = Some(PathBuf::from("restree.db"));
    }

    let identity: Arc<dyn IdentityProvider> = match args.user {
        Some(id) => {
            let user = UserId(id);
            let principal = if args.admin {
                Principal::admin(user)
            } else {
                Principal::user(user)
            };
            Arc::new(StaticIdentity(principal))
        }
        None => Arc::new(SessionIdentity::new()),
    };

    let tree = ResourceTree::builder()
        .config(config)
        .identity(identity)
        .audit_sink(|entries| {
            for entry in entries {
                info!(
                    "audit: user {} {:?} {:?} {}",
                    entry.actor, entry.operation, entry.target, entry.target_id
                );
            }
        })
        .build()
        .context("opening resource tree")?;

    debug!("Running {:?}", args.command);

    match args.command {
        Command::AddUser {
            username,
            first_name,
            last_name,
        } => print(&tree.access().register_user(&username, &first_name, &last_name)?)?,
        Command::InitWorkspace { name, code } => {
            let ws = tree.access().provision_workspace(&name, &code)?;
            print(&json!({
                "workspace": ws.workspace,
                "root": tree.view(&ws.root),
                "roles": [ws.manager, ws.collaborator, ws.visitor],
            }))?
        }
        Command::Ls {
            parent,
            resource_type,
        } => {
            let nodes = tree
                .query()
                .children(parent.map(NodeId), resource_type.as_deref())?;
            print(&tree.views(&nodes))?
        }
        Command::Tree { node } => {
            let root = tree.tree().open(NodeId(node))?;
            print(&subtree(&tree, &root)?)?
        }
        Command::Ancestors { node } => {
            let nodes = tree.query().ancestors(Some(NodeId(node)))?;
            print(&tree.views(&nodes))?
        }
        Command::Mkdir { parent, name } => {
            let node = tree
                .tree()
                .create(NodeId(parent), "directory", NodeMetadata::named(name))?;
            print(&tree.view(&node))?
        }
        Command::Create {
            parent,
            resource_type,
            name,
            mime,
        } => {
            let mut metadata = NodeMetadata::named(name);
            if let Some(mime) = mime {
                metadata = metadata.with_mime_type(mime);
            }
            let node = tree
                .tree()
                .create(NodeId(parent), &resource_type, metadata)?;
            print(&tree.view(&node))?
        }
        Command::Rename { node, name } => {
            let node = tree.tree().rename(NodeId(node), &name)?;
            print(&tree.view(&node))?
        }
        Command::Mv { destination, nodes } => {
            let report = tree.tree().move_many(&ids(&nodes), NodeId(destination))?;
            print(&report_json(&report, |n| json!(tree.view(n))))?
        }
        Command::Cp { destination, nodes } => {
            let report = tree.tree().copy_many(&ids(&nodes), NodeId(destination))?;
            print(&report_json(&report, |n| json!(tree.view(n))))?
        }
        Command::Rm { nodes } => {
            let report = tree.tree().delete_many(&ids(&nodes))?;
            print(&report_json(&report, |removed| json!(removed)))?
        }
        Command::Ln {
            destination,
            targets,
        } => {
            let report = tree
                .tree()
                .create_shortcuts(&ids(&targets), NodeId(destination))?;
            print(&report_json(&report, |n| json!(tree.view(n))))?
        }
        Command::Find {
            name,
            from,
            to,
            roots,
            types,
        } => {
            let mut params = BTreeMap::new();
            if let Some(name) = name {
                params.insert("name".to_string(), FilterValue::Text(name));
            }
            if let Some(from) = from {
                params.insert("dateFrom".to_string(), FilterValue::Text(from));
            }
            if let Some(to) = to {
                params.insert("dateTo".to_string(), FilterValue::Text(to));
            }
            if !roots.is_empty() {
                params.insert("roots".to_string(), FilterValue::List(roots));
            }
            if !types.is_empty() {
                params.insert("types".to_string(), FilterValue::List(types));
            }
            let nodes = tree
                .query()
                .filter(&ResourceFilter::from_params(&params))?;
            print(&tree.views(&nodes))?
        }
        Command::Users {
            workspace,
            roles,
            search,
            unregistered,
            page,
        } => {
            let roles: Vec<RoleId> = roles.into_iter().map(RoleId).collect();
            let listing = tree.query().registered_users(
                WorkspaceId(workspace),
                &roles,
                search.as_deref(),
                unregistered,
                tree.query().page(page),
            )?;
            print(&listing)?
        }
        Command::Role(RoleCommand::List { workspace }) => {
            print(&tree.access().workspace_roles(WorkspaceId(workspace))?)?
        }
        Command::Role(RoleCommand::Create {
            workspace,
            label,
            with_directory,
        }) => print(&tree.access().create_workspace_role(
            WorkspaceId(workspace),
            &label,
            with_directory,
        )?)?,
        Command::Role(RoleCommand::Remove { workspace, role }) => {
            let removed = tree
                .access()
                .remove_role(WorkspaceId(workspace), RoleId(role))?;
            print(&json!({
                "role": removed.role,
                "revokedPermissions": removed.revoked_permissions,
                "removedMemberships": removed.removed_memberships,
            }))?
        }
        Command::Role(RoleCommand::Assign { role, users }) => {
            let users: Vec<UserId> = users.into_iter().map(UserId).collect();
            let added = tree.access().associate_roles(&users, &[RoleId(role)])?;
            print(&json!({ "added": added }))?
        }
    }

    Ok(())
}
