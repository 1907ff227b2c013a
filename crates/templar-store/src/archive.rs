//! Template packages
//!
//! A package is a gzip-compressed tar archive. Every `*.liquid` entry becomes a
//! template named after its path without the extension, so `ADT_A01.liquid` is
//! the root template `ADT_A01` while `DataType/XAD.liquid` is `DataType/XAD`.
//! Other entries are ignored.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Read;
use templar_core::{Template, TemplateLayer, TemplateManagementError};
use tracing::debug;

const TEMPLATE_EXTENSION: &str = ".liquid";

/// Parse a package into a template layer
pub fn read_package(bytes: &[u8], digest: &str) -> Result<TemplateLayer, TemplateManagementError> {
    let invalid = |e: std::io::Error| {
        TemplateManagementError::ParseFailed(format!("package is not a valid tar.gz archive: {}", e))
    };

    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut layer = TemplateLayer {
        digest: digest.to_string(),
        size: bytes.len() as u64,
        ..Default::default()
    };

    for entry in archive.entries().map_err(invalid)? {
        let mut entry = entry.map_err(invalid)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path().map_err(invalid)?.to_string_lossy().into_owned();
        let Some(name) = template_name(&path) else {
            debug!(entry = %path, "Skipping non-template package entry");
            continue;
        };

        let mut source = String::new();
        entry.read_to_string(&mut source).map_err(|e| {
            TemplateManagementError::ParseFailed(format!("template '{}' is not valid UTF-8: {}", name, e))
        })?;
        layer.insert(Template::parse(&name, &source)?);
    }

    debug!(
        digest = digest,
        templates = layer.templates.len(),
        size = layer.size,
        "Parsed template package"
    );
    Ok(layer)
}

/// Build a package from `(template name, source)` pairs
pub fn pack_templates<'a, I>(templates: I) -> std::io::Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    for (name, source) in templates {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(source.len() as u64);
        header.set_mode(0o644);
        builder.append_data(
            &mut header,
            format!("{}{}", name, TEMPLATE_EXTENSION),
            source.as_bytes(),
        )?;
    }

    builder.into_inner()?.finish()
}

/// Template name for a package entry path, if it is a template
fn template_name(path: &str) -> Option<String> {
    let mut normalized = path.replace('\\', "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    let normalized = normalized.trim_start_matches('/');

    let stem = normalized.strip_suffix(TEMPLATE_EXTENSION)?;
    if stem.is_empty() || stem.ends_with('/') {
        return None;
    }
    Some(stem.to_string())
}
