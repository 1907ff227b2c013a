//! Built-in default template collections
//!
//! Sources are embedded at compile time from `templates/<data type>/`.

use include_dir::{include_dir, Dir};
use templar_core::{DataType, Template, TemplateLayer, TemplateManagementError, TemplateSet};
use tracing::debug;

static BUILTIN_TEMPLATES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/templates");

fn directory(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Hl7v2 => "hl7v2",
        DataType::Ccda => "ccda",
        DataType::Json => "json",
        DataType::Fhir => "stu3tor4",
    }
}

/// Materialize the built-in collection for a data type
pub fn builtin_templates(data_type: DataType) -> Result<TemplateSet, TemplateManagementError> {
    let root = directory(data_type);
    let dir = BUILTIN_TEMPLATES.get_dir(root).ok_or_else(|| {
        TemplateManagementError::ParseFailed(format!("no built-in templates for {}", data_type))
    })?;

    let mut layer = TemplateLayer::default();
    collect(dir, root, &mut layer)?;

    debug!(
        data_type = %data_type,
        templates = layer.templates.len(),
        size = layer.size,
        "Loaded built-in templates"
    );
    Ok(TemplateSet::from_layers([layer]))
}

fn collect(dir: &Dir<'_>, root: &str, layer: &mut TemplateLayer) -> Result<(), TemplateManagementError> {
    for file in dir.files() {
        let path = file.path().to_string_lossy().replace('\\', "/");
        let Some(name) = path
            .strip_prefix(root)
            .map(|p| p.trim_start_matches('/'))
            .and_then(|p| p.strip_suffix(".liquid"))
        else {
            continue;
        };
        let source = file.contents_utf8().ok_or_else(|| {
            TemplateManagementError::ParseFailed(format!("built-in template '{}' is not UTF-8", name))
        })?;
        layer.size += source.len() as u64;
        layer.insert(Template::parse(name, source)?);
    }
    for sub in dir.dirs() {
        collect(sub, root, layer)?;
    }
    Ok(())
}
