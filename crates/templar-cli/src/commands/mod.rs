//! CLI commands implementation

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use templar_core::{CancellationToken, ConvertDataConfig, DataType, TemplateSet};
use templar_registry::{OciRegistryClient, StaticTokenProvider};
use templar_resolver::{TemplateRequest, TemplateResolutionService};

/// Options for the resolve command
pub struct ResolveOptions {
    pub config: Option<PathBuf>,
    pub custom_hl7: Option<PathBuf>,
    pub token: Option<String>,
    pub plain_http: bool,
    pub json: bool,
}

/// Resolve output
#[derive(Debug, Serialize)]
struct ResolveOutput<'a> {
    reference: &'a str,
    size: u64,
    templates: Vec<&'a str>,
}

/// Resolve a reference and print its templates
pub async fn resolve(reference: String, options: ResolveOptions) -> Result<()> {
    let mut config = match &options.config {
        Some(path) => ConvertDataConfig::from_file(path)?,
        None => ConvertDataConfig::default(),
    };
    if options.custom_hl7.is_some() {
        config.custom_hl7_templates_file = options.custom_hl7;
    }

    let mut client = OciRegistryClient::new(config.operation_timeout())?;
    if options.plain_http {
        client = client.with_plain_http();
    }
    let tokens = StaticTokenProvider::new(options.token.unwrap_or_default());
    let service = TemplateResolutionService::new(config, Arc::new(client), Arc::new(tokens))?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let templates = service
        .resolve(&TemplateRequest::new(reference.clone()), &cancel)
        .await?;
    service.dispose();

    let output = ResolveOutput {
        reference: &reference,
        size: templates.size(),
        templates: templates.template_names(),
    };
    if options.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{} ({} bytes)", output.reference, output.size);
        for name in &output.templates {
            println!("  {}", name);
        }
    }

    Ok(())
}

/// Print a package's templates and check the minimum-content rule
pub fn inspect(package: &Path, data_type: DataType) -> Result<()> {
    let bytes = std::fs::read(package)
        .with_context(|| format!("Failed to read package {}", package.display()))?;
    let layer = templar_store::read_package(&bytes, "")?;
    let templates = TemplateSet::from_layers([layer]);

    println!("{:<50} {:>8} {:>6}", "TEMPLATE", "BYTES", "ROOT");
    println!("{}", "-".repeat(66));
    for name in templates.template_names() {
        let size = templates.get(name).map_or(0, |t| t.source_len());
        let root = if name.contains('/') { "" } else { "yes" };
        println!("{:<50} {:>8} {:>6}", name, size, root);
    }

    if data_type.satisfies_minimum_content(&templates) {
        println!("\nValid {} package", data_type);
        Ok(())
    } else {
        bail!(
            "No root template starting with '{}' found; {} templates must be at the package root",
            data_type.required_root_prefix(),
            data_type
        )
    }
}

/// Pack every .liquid file under a directory
pub fn pack(dir: &Path, output: &Path) -> Result<()> {
    let sources = collect_templates(dir)?;
    if sources.is_empty() {
        bail!("No .liquid templates found in {}", dir.display());
    }

    let bytes = templar_store::pack_templates(
        sources.iter().map(|(name, source)| (name.as_str(), source.as_str())),
    )?;
    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Packed {} templates into {} ({} bytes)",
        sources.len(),
        output.display(),
        bytes.len()
    );
    Ok(())
}

/// `(name, source)` for every template under `dir`, sorted by name
fn collect_templates(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current)
            .with_context(|| format!("Failed to read directory {}", current.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if path.extension().map_or(false, |e| e == "liquid") {
                let relative = path.strip_prefix(dir)?.with_extension("");
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let source = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                found.push((name, source));
            }
        }
    }

    found.sort();
    Ok(found)
}
