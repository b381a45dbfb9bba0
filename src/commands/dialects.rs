use crate::cli::DialectsArgs;
use crate::commands::parse::load_registry;
use crate::dialects::DialectKind;
use colored::*;

pub fn run_dialects(args: DialectsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(args.dialect_file.as_deref())?;

    for name in registry.names() {
        let Some(dialect) = registry.get(name) else {
            continue;
        };
        let detail = match &dialect.kind {
            DialectKind::Regex { patterns } => format!("{} patterns", patterns.len()),
            DialectKind::MultilineRegex { patterns, delimiters } => {
                format!("{} patterns, {} delimiters", patterns.len(), delimiters.len())
            }
            DialectKind::Csv { columns } => format!("{} columns", columns.len()),
            DialectKind::JsonLines | DialectKind::Yaml => String::new(),
        };
        println!(
            "{:16} {:16} {:18} {:24} {}",
            name.cyan().bold(),
            dialect.format_type().as_str(),
            dialect.reporter,
            detail.dimmed(),
            dialect.file_patterns.join(", ")
        );
    }
    Ok(())
}
