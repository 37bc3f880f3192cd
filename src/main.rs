use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use metaquery::datatype::{Scalar, ValueType};
use metaquery::error::{MetaQueryError, Result};
use metaquery::evaluate::evaluate;
use metaquery::field::{AttributeMap, FieldDef, Registration, Scope};
use metaquery::normalize::Normalizer;
use metaquery::persist::SqliteStore;
use metaquery::query::Conjunction;
use metaquery::resolve::{Resolver, Selection};
use metaquery::settings::Settings;
use metaquery::store::{NodeId, Store};
use metaquery::term::Term;

#[derive(Parser)]
#[command(name = "metaquery")]
#[command(author, version, about = "Query engine for hierarchical metadata catalogs")]
struct Cli {
    /// Settings file (defaults to an optional metaquery.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database, overriding the settings
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Define a metadata field.
    Define {
        name: String,
        /// Int, Float, String, Timestamp or FieldSet (SQL spellings accepted)
        value_type: String,
        #[arg(long, default_value = "dir")]
        scope: String,
    },
    /// Remove a metadata field definition and its values.
    Undefine {
        name: String,
        #[arg(long, default_value = "dir")]
        scope: String,
    },
    /// Create a directory, including missing parents.
    Mkdir { path: String },
    /// Set a metadata value on a directory.
    Set { path: String, field: String, value: String },
    /// Define a field set from `field=value` members.
    Fieldset { name: String, members: Vec<String> },
    /// Show the metadata a directory has, inherited values included.
    Show { path: String },
    /// Normalize a query and print it as text and JSON.
    Parse { query: String },
    /// Evaluate a query against `field=value` attributes.
    Eval {
        query: String,
        #[arg(long = "attr")]
        attrs: Vec<String>,
    },
    /// Find the directories below a path that can satisfy a query.
    Resolve {
        query: String,
        #[arg(long, default_value = "/")]
        path: String,
    },
}

fn split_pair(pair: &str) -> Result<(String, String)> {
    pair.split_once('=')
        .map(|(field, value)| (field.trim().to_string(), value.trim().to_string()))
        .ok_or_else(|| MetaQueryError::parse("Expected field=value", pair))
}

fn directory(store: &SqliteStore, path: &str) -> Result<NodeId> {
    store
        .find_dir(path)?
        .ok_or_else(|| MetaQueryError::Store(format!("No such directory '{path}'")))
}

fn normalizer(store: &SqliteStore, settings: &Settings) -> Result<Normalizer> {
    Ok(Normalizer::new(store.all_field_types()?)
        .with_default_type(settings.default_type)
        .with_optimize(settings.optimize))
}

fn run(cli: Cli, settings: Settings) -> Result<()> {
    let database = cli.database.unwrap_or_else(|| PathBuf::from(&settings.database));
    let mut store = SqliteStore::open(&database)?;
    match cli.command {
        Commands::Define { name, value_type, scope } => {
            let def = FieldDef::new(name, value_type.parse::<ValueType>()?, scope.parse::<Scope>()?);
            match store.add_field_def(&def)? {
                Registration::Added => println!("Defined {def}"),
                Registration::AlreadyExists => println!("Already defined: {def}"),
            }
        }
        Commands::Undefine { name, scope } => {
            if store.remove_field_def(&name, scope.parse()?)? {
                println!("Removed {name}");
            } else {
                println!("No field {name} in scope {scope}");
            }
        }
        Commands::Mkdir { path } => {
            let node = store.make_dirs(&path)?;
            println!("{} ({node})", store.path_of(node)?);
        }
        Commands::Set { path, field, value } => {
            let node = directory(&store, &path)?;
            store.set_attribute(node, &field, Scalar::from(value))?;
        }
        Commands::Fieldset { name, members } => {
            let mut set = Conjunction::new();
            for member in &members {
                let (field, value) = split_pair(member)?;
                set.and_term(&field, Term::Eq(Scalar::from(value)))?;
            }
            store.define_field_set(&name, &set)?;
        }
        Commands::Show { path } => {
            let node = directory(&store, &path)?;
            let mut fields: Vec<String> = store.field_defs(Scope::Directory)?.into_keys().collect();
            fields.sort();
            let attrs = store.inherited_attributes(node, &fields)?;
            for field in fields {
                if let Some(value) = attrs.get(&field) {
                    println!("{field} = {value}");
                }
            }
        }
        Commands::Parse { query } => {
            let query = normalizer(&store, &settings)?.normalize(&query)?;
            println!("{query}");
            println!("{}", query.to_json());
        }
        Commands::Eval { query, attrs } => {
            let normalizer = normalizer(&store, &settings)?;
            let query = normalizer.normalize(&query)?;
            let mut values = AttributeMap::default();
            for pair in &attrs {
                let (field, value) = split_pair(pair)?;
                values.insert(field, Scalar::from(value));
            }
            println!("{}", evaluate(&query, &values, normalizer.types())?);
        }
        Commands::Resolve { query, path } => {
            let root = directory(&store, &path)?;
            let query = normalizer(&store, &settings)?.normalize(&query)?;
            let resolution = Resolver::new(&store).resolve(&query, root)?;
            println!("selection: {}", resolution.selection);
            if resolution.selection == Selection::Explicit {
                for node in &resolution.candidates {
                    println!("{}", store.path_of(node)?);
                }
            }
            if !resolution.unresolved_fields.is_empty() {
                println!("unresolved: {}", resolution.unresolved_fields.join(", "));
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    match run(cli, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
