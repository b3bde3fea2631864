use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rustacl::acl::{
    AclManager, FileAclStorage, ObjectType, ResourceDescriptor, ReverseSearchOptions, Rights, RuleSpec,
};
use rustacl::metrics::AclMetrics;
use rustacl::types::{ClusterId, GroupId, ObjectId, RuleId, UserId, ZoneId};
use rustacl::Config;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "rustacl-admin")]
#[command(about = "Manage ACL rules in a zone's persistent store")]
struct Cli {
    /// Configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Override `storage.path` from the configuration
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the ACL table if absent
    Bootstrap,
    /// List every rule
    List,
    /// Add a rule, e.g. `add @5 HOST/#42 USE`
    Add {
        /// `#uid`, `@gid` or `*`
        user: String,
        /// `TYPE[+TYPE...]/#oid|@gid|%cid|*`
        resource: String,
        /// `USE[+MANAGE+ADMIN+CREATE]`
        rights: String,
        /// `#zid` or `*`
        zone: Option<String>,
    },
    /// Delete a rule by id
    Delete { id: RuleId },
    /// Delete every rule referencing an entity
    #[command(subcommand)]
    Purge(PurgeTarget),
    /// Write the rule dump, to stdout by default
    Dump {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Decide one authorization request
    Check {
        uid: UserId,
        object_type: ObjectType,
        oid: ObjectId,
        rights: Rights,
        /// Groups of the user
        #[arg(long, value_delimiter = ',')]
        groups: Vec<GroupId>,
        /// Group owning the object
        #[arg(long, default_value_t = 0)]
        object_group: GroupId,
        /// Clusters of the object
        #[arg(long, value_delimiter = ',')]
        clusters: Vec<ClusterId>,
        /// Zone of the object; the configured zone when omitted
        #[arg(long)]
        zone: Option<ZoneId>,
    },
    /// List what a user can access for one object type
    Search {
        uid: UserId,
        object_type: ObjectType,
        rights: Rights,
        #[arg(long, value_delimiter = ',')]
        groups: Vec<GroupId>,
        #[arg(long)]
        disable_all: bool,
        #[arg(long)]
        disable_cluster: bool,
        #[arg(long)]
        disable_group: bool,
    },
    /// Load the store and print its metrics
    Stats,
}

#[derive(Subcommand)]
enum PurgeTarget {
    User { id: UserId },
    Group { id: GroupId },
    Cluster { id: ClusterId },
    Zone { id: ZoneId },
    Object { object_type: ObjectType, id: ObjectId },
}

fn open_manager(cli: &Cli) -> Result<AclManager> {
    let mut config = match &cli.config {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("failed to load configuration from {}", path))?
        }
        None => Config::default(),
    };
    if let Some(path) = &cli.storage {
        config.storage.path = path.clone();
    }
    config.validate().context("invalid configuration")?;

    debug!("Using ACL table {}", config.storage.path.display());
    let storage = Arc::new(FileAclStorage::new(&config.storage.path));
    let metrics = AclMetrics::new()?;
    Ok(AclManager::new(&config, storage, metrics))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let manager = open_manager(&cli)?;
    if let Commands::Bootstrap = cli.command {
        manager.bootstrap().context("failed to bootstrap the ACL table")?;
        println!("ACL table ready");
        return Ok(());
    }
    manager.reload().context("failed to load ACL rules")?;

    match &cli.command {
        Commands::Bootstrap => {}
        Commands::List => {
            let rules = manager.rules();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&manager.dump().rules)?),
                OutputFormat::Table => {
                    println!("{:<8} {:<12} {:<32} {:<24} {:<8}", "ID", "USER", "RESOURCE", "RIGHTS", "ZONE");
                    println!("{}", "=".repeat(88));
                    for rule in &rules {
                        let spec = rule.spec();
                        println!(
                            "{:<8} {:<12} {:<32} {:<24} {:<8}",
                            rule.id(),
                            spec.user.to_string(),
                            spec.resource.to_string(),
                            spec.rights.to_string(),
                            spec.zone.to_string()
                        );
                    }
                    println!("{} rules", rules.len());
                }
            }
        }
        Commands::Add { user, resource, rights, zone } => {
            let text = match zone {
                Some(zone) => format!("{} {} {} {}", user, resource, rights, zone),
                None => format!("{} {} {}", user, resource, rights),
            };
            let spec: RuleSpec = text.parse()?;
            let id = manager.add_rule_spec(&spec)?;
            println!("Added rule {}: {}", id, spec);
        }
        Commands::Delete { id } => {
            let rule = manager.del_rule(*id)?;
            println!("Deleted rule {}: {}", id, rule);
        }
        Commands::Purge(target) => {
            let (what, deleted) = match target {
                PurgeTarget::User { id } => (format!("user {}", id), manager.del_uid_rules(*id)?),
                PurgeTarget::Group { id } => (format!("group {}", id), manager.del_gid_rules(*id)?),
                PurgeTarget::Cluster { id } => (format!("cluster {}", id), manager.del_cid_rules(*id)?),
                PurgeTarget::Zone { id } => (format!("zone {}", id), manager.del_zid_rules(*id)?),
                PurgeTarget::Object { object_type, id } => (
                    format!("{} {}", object_type, id),
                    manager.del_resource_rules(*id, *object_type)?,
                ),
            };
            println!("Deleted {} rules referencing {}", deleted, what);
        }
        Commands::Dump { output } => {
            let json = manager.dump().to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Dumped {} rules to {}", manager.len(), path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Check {
            uid,
            object_type,
            oid,
            rights,
            groups,
            object_group,
            clusters,
            zone,
        } => {
            let groups: BTreeSet<GroupId> = groups.iter().copied().collect();
            let descriptor = ResourceDescriptor::new(*oid, *object_type)
                .with_group(*object_group)
                .with_clusters(clusters.iter().copied())
                .in_zone(zone.unwrap_or_else(|| manager.zone_id()));
            let allowed = manager.authorize(*uid, &groups, &descriptor, *rights);

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "allowed": allowed })),
                OutputFormat::Table => println!("{}", if allowed { "ALLOW" } else { "DENY" }),
            }
        }
        Commands::Search {
            uid,
            object_type,
            rights,
            groups,
            disable_all,
            disable_cluster,
            disable_group,
        } => {
            let groups: BTreeSet<GroupId> = groups.iter().copied().collect();
            let options = ReverseSearchOptions {
                disable_all: *disable_all,
                disable_cluster: *disable_cluster,
                disable_group: *disable_group,
            };
            let result = manager.reverse_search(*uid, &groups, *object_type, *rights, options);

            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Table => {
                    println!("all:      {}", result.all);
                    println!("objects:  {:?}", result.oids);
                    println!("groups:   {:?}", result.gids);
                    println!("clusters: {:?}", result.cids);
                }
            }
        }
        Commands::Stats => {
            manager.metrics().rules.set(manager.len() as i64);
            print!("{}", manager.metrics().encode_text()?);
        }
    }

    Ok(())
}
