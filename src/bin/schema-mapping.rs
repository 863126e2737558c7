//! Schema mapping CLI
//!
//! Command-line interface for generating index mappings from JSON Schemas and
//! round-tripping them through override templates.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use schema_mapping::{
    compile, load_document_str, materialize, schema_base_uri, serialize_document,
    ConfigDocument, MappingConfig, MAPPINGS_KEY,
};

/// Path argument meaning stdin or stdout.
const STDIO: &str = "-";

#[derive(Parser)]
#[command(name = "schema-mapping")]
#[command(about = "Generate index mappings from JSON Schemas and override them with templates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a JSON Schema into an index mapping
    SchemaToMapping {
        /// Input schema (stdin if "-")
        #[arg(default_value = STDIO)]
        schema: PathBuf,

        /// Output mapping (stdout if "-")
        #[arg(default_value = STDIO)]
        output: PathBuf,

        /// Type mapping configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Indentation of the output
        #[arg(long, short, default_value_t = 4)]
        indent: usize,

        /// Wrap the mapping as {"mappings": {NAME: ...}}
        #[arg(long = "mapping-type", short = 't')]
        mapping_type: Option<String>,
    },

    /// Print a mapping as a block-annotated template
    MappingToTemplate {
        /// Input mapping (stdin if "-")
        #[arg(default_value = STDIO)]
        mapping: PathBuf,

        /// Output template (stdout if "-")
        #[arg(default_value = STDIO)]
        output: PathBuf,

        /// Indentation of the output
        #[arg(long, short, default_value_t = 4)]
        indent: usize,

        /// Root block name (only for a single mapping type)
        #[arg(long = "mapping-type", short = 't')]
        mapping_type: Option<String>,
    },

    /// Render a template back into a mapping
    TemplateToMapping {
        /// Input template (stdin if "-")
        #[arg(default_value = STDIO)]
        template: PathBuf,

        /// Output mapping (stdout if "-")
        #[arg(default_value = STDIO)]
        output: PathBuf,

        /// Directory or file where extended templates are looked up
        #[arg(long = "context-path")]
        context_paths: Vec<PathBuf>,

        /// Indentation of the output
        #[arg(long, short, default_value_t = 4)]
        indent: usize,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schema_mapping=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::SchemaToMapping {
            schema,
            output,
            config,
            indent,
            mapping_type,
        } => run_schema_to_mapping(&schema, &output, config.as_deref(), indent, mapping_type),

        Commands::MappingToTemplate {
            mapping,
            output,
            indent,
            mapping_type,
        } => run_mapping_to_template(&mapping, &output, indent, mapping_type.as_deref()),

        Commands::TemplateToMapping {
            template,
            output,
            context_paths,
            indent,
        } => run_template_to_mapping(&template, &output, &context_paths, indent),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run_schema_to_mapping(
    schema_path: &Path,
    output: &Path,
    config_path: Option<&Path>,
    indent: usize,
    mapping_type: Option<String>,
) -> Result<(), u8> {
    let config = match config_path {
        Some(path) => ConfigDocument::from_path(path).and_then(|doc| MappingConfig::from_document(&doc)),
        None => Ok(MappingConfig::default()),
    }
    .map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let source = read_input(schema_path)?;
    let schema = load_document_str(&source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let file = (schema_path != Path::new(STDIO)).then_some(schema_path);
    let base_uri = schema_base_uri(&schema, file).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mapping = compile(&schema, &base_uri, HashMap::new(), &config).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mapping = match mapping_type {
        Some(name) => json!({ MAPPINGS_KEY: { name: mapping.to_value() } }),
        None => mapping.to_value(),
    };

    write_output(output, &to_json(&mapping, indent)?)
}

fn run_mapping_to_template(
    mapping_path: &Path,
    output: &Path,
    indent: usize,
    mapping_type: Option<&str>,
) -> Result<(), u8> {
    let source = read_input(mapping_path)?;
    let mapping = load_document_str(&source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let template = serialize_document(&mapping, mapping_type, indent).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    write_output(output, &template)
}

fn run_template_to_mapping(
    template_path: &Path,
    output: &Path,
    context_paths: &[PathBuf],
    indent: usize,
) -> Result<(), u8> {
    let template = read_input(template_path)?;
    let mapping = materialize(&template, context_paths, &[]).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    write_output(output, &to_json(&mapping, indent)?)
}

fn read_input(path: &Path) -> Result<String, u8> {
    let mut content = String::new();
    let result = if path == Path::new(STDIO) {
        std::io::stdin().read_to_string(&mut content).map(|_| content)
    } else {
        std::fs::read_to_string(path)
    };
    result.map_err(|e| {
        eprintln!("Error reading {}: {}", path.display(), e);
        3u8
    })
}

fn write_output(path: &Path, content: &str) -> Result<(), u8> {
    if path == Path::new(STDIO) {
        let mut stdout = std::io::stdout().lock();
        return writeln!(stdout, "{}", content).map_err(|e| {
            eprintln!("Error writing output: {}", e);
            3u8
        });
    }

    std::fs::write(path, format!("{content}\n")).map_err(|e| {
        eprintln!("Error writing to {}: {}", path.display(), e);
        3u8
    })
}

fn to_json(value: &Value, indent: usize) -> Result<String, u8> {
    let indent = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    String::from_utf8(buffer).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })
}
