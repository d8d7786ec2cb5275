use clap::{Parser, Subcommand, ValueEnum};
use sealdb::{
    ExportOptions, ImportMode, ImportOptions, Pipeline, Query, SealDbError, Store, TableConfig,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;

/// SealDB CLI: inspect and modify an encrypted SealDB file from the command line
#[derive(Parser)]
#[command(name = "sealdb", version, about)]
struct Cli {
    /// Path to the YAML or JSON configuration file
    #[arg(long, default_value = "sealdb.yaml")]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List table names
    Tables,

    /// Create an empty table
    CreateTable {
        table: String,
        /// Primary-key field (default: id)
        #[arg(long)]
        primary_key: Option<String>,
        /// Field that must hold distinct values (repeatable)
        #[arg(long = "unique")]
        unique: Vec<String>,
    },

    /// Drop a table and everything derived from it
    DropTable { table: String },

    /// Insert a document
    Insert {
        table: String,
        /// Whole document as a JSON object
        #[arg(long)]
        json: Option<String>,
        /// Field values (e.g. --field name="Ana" --field age=30)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Merge fields into a document
    Update {
        table: String,
        /// Primary-key value
        id: String,
        /// Patch as a JSON object
        #[arg(long)]
        json: Option<String>,
        /// Field values to set (e.g. --field status=active)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a document by primary key
    Delete {
        table: String,
        id: String,
        /// Show what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,
    },

    /// Find documents, optionally filtered (e.g. --filter '{"age":{"$gte":18}}')
    Find {
        table: String,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Get a single document by primary key
    Get { table: String, id: String },

    /// Count documents, optionally filtered
    Count {
        table: String,
        #[arg(long)]
        filter: Option<String>,
    },

    /// List every field name used in a table
    Columns { table: String },

    /// Run an aggregation pipeline given as a JSON array of stages
    Aggregate { table: String, pipeline: String },

    /// Show file, table and index statistics
    Stats,

    /// Remove every document and re-create the configured tables
    Reset,

    /// Copy the encrypted file into the backup directory
    Backup,

    /// List backups, newest first
    Backups,

    /// Replace the live data with a backup file
    Restore { file: PathBuf },

    /// Import tables from a JSON file
    Import {
        file: PathBuf,
        /// Discard all existing data instead of merging
        #[arg(long)]
        replace: bool,
        /// When merging, replace documents whose primary key already exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Export tables to a JSON file
    Export {
        file: PathBuf,
        /// Table to export (repeatable; default: all)
        #[arg(long = "table")]
        tables: Vec<String>,
        /// Leave out createdAt/updatedAt
        #[arg(long)]
        exclude_metadata: bool,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        // Machine-readable error on stderr
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    log::debug!("Using configuration {}", cli.config.display());
    let mut store = Store::open_path(&cli.config)?;
    let format = cli.format;

    match cli.command {
        Command::Tables => print_output(&store.table_names(), &format)?,

        Command::CreateTable {
            table,
            primary_key,
            unique,
        } => {
            let config = if primary_key.is_some() || !unique.is_empty() {
                let mut config = store.table_config(&table);
                if let Some(pk) = primary_key {
                    config = config.with_primary_key(&pk);
                }
                Some(unique.iter().fold(config, |c, f| c.with_unique(f)))
            } else {
                None::<TableConfig>
            };
            let created = store.create_table(&table, config)?;
            print_output(&json!({ "table": table, "created": created }), &format)?;
        }

        Command::DropTable { table } => {
            let dropped = store.drop_table(&table)?;
            print_output(&json!({ "table": table, "dropped": dropped }), &format)?;
        }

        Command::Insert {
            table,
            json,
            fields,
        } => {
            let data = document_arg(json.as_deref(), &fields)?;
            let doc = store.insert(&table, data)?;
            print_output(&doc, &format)?;
        }

        Command::Update {
            table,
            id,
            json,
            fields,
        } => {
            let patch = document_arg(json.as_deref(), &fields)?;
            match store.update(&table, scalar_arg(&id), patch)? {
                Some(doc) => print_output(&doc, &format)?,
                None => return Err(not_found(&table, &id).into()),
            }
        }

        Command::Delete { table, id, dry_run } => {
            if dry_run {
                let doc = store
                    .find_by_id(&table, scalar_arg(&id))
                    .ok_or_else(|| not_found(&table, &id))?;
                print_output(
                    &json!({
                        "dry_run": true,
                        "would_delete": { "table": table, "id": id },
                        "document": doc,
                    }),
                    &format,
                )?;
            } else {
                let deleted = store.delete(&table, scalar_arg(&id))?;
                print_output(&json!({ "table": table, "id": id, "deleted": deleted }), &format)?;
            }
        }

        Command::Find {
            table,
            filter,
            limit,
        } => {
            let query = query_arg(filter.as_deref())?;
            let mut docs = store.find(&table, &query);
            if let Some(limit) = limit {
                docs.truncate(limit);
            }
            print_output(&docs, &format)?;
        }

        Command::Get { table, id } => {
            let doc = store
                .find_by_id(&table, scalar_arg(&id))
                .ok_or_else(|| not_found(&table, &id))?;
            print_output(&doc, &format)?;
        }

        Command::Count { table, filter } => {
            let query = query_arg(filter.as_deref())?;
            let count = store.count(&table, Some(&query));
            print_output(&json!({ "table": table, "count": count }), &format)?;
        }

        Command::Columns { table } => print_output(&store.get_all_columns(&table), &format)?,

        Command::Aggregate { table, pipeline } => {
            let pipeline = Pipeline::from_json(&parse_json(&pipeline, "pipeline")?)?;
            print_output(&store.aggregate(&table, &pipeline), &format)?;
        }

        Command::Stats => print_output(&store.stats(), &format)?,

        Command::Reset => {
            store.reset()?;
            print_output(&json!({ "ok": true, "tables": store.table_names() }), &format)?;
        }

        Command::Backup => {
            let path = store.backup()?;
            print_output(&json!({ "backup": path }), &format)?;
        }

        Command::Backups => print_output(&store.list_backups()?, &format)?,

        Command::Restore { file } => {
            let safety = store.restore(&file)?;
            print_output(
                &json!({ "restored": file, "safety_backup": safety }),
                &format,
            )?;
        }

        Command::Import {
            file,
            replace,
            overwrite,
        } => {
            let mode = if replace {
                ImportMode::Replace
            } else {
                ImportMode::Merge
            };
            let report = store.import_from_json(&file, ImportOptions { mode, overwrite })?;
            print_output(&report, &format)?;
        }

        Command::Export {
            file,
            tables,
            exclude_metadata,
        } => {
            let options = ExportOptions {
                tables: (!tables.is_empty()).then_some(tables),
                exclude_metadata,
            };
            let written = store.export_to_json(&file, options)?;
            print_output(&json!({ "file": file, "documents": written }), &format)?;
        }
    }

    store.close();
    Ok(())
}

fn print_output<T: Serialize>(value: &T, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn not_found(table: &str, id: &str) -> SealDbError {
    SealDbError::NotFound {
        table: table.to_string(),
        id: id.to_string(),
    }
}

fn parse_json(text: &str, what: &str) -> Result<Value, SealDbError> {
    serde_json::from_str(text).map_err(|e| SealDbError::Validation(format!("Invalid {what} JSON: {e}")))
}

/// Numbers, booleans and JSON literals parse as such; anything else is a string.
fn scalar_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn document_arg(json: Option<&str>, fields: &[(String, String)]) -> Result<Value, SealDbError> {
    let mut map = match json {
        Some(text) => match parse_json(text, "document")? {
            Value::Object(map) => map,
            _ => {
                return Err(SealDbError::Validation(
                    "--json must be a JSON object".to_string(),
                ))
            }
        },
        None => serde_json::Map::new(),
    };
    for (key, val) in fields {
        map.insert(key.clone(), scalar_arg(val));
    }
    Ok(Value::Object(map))
}

fn query_arg(filter: Option<&str>) -> Result<Query, SealDbError> {
    match filter {
        Some(text) => Query::from_json(&parse_json(text, "filter")?),
        None => Ok(Query::all()),
    }
}
