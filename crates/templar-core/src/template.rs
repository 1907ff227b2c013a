//! Data types, parsed templates, layers and template sets

use crate::TemplateManagementError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Source data type a template collection converts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// HL7 v2 messages
    Hl7v2,
    /// C-CDA documents
    Ccda,
    /// Arbitrary JSON
    Json,
    /// FHIR STU3 resources (to R4)
    Fhir,
}

impl DataType {
    /// Every supported data type
    pub const ALL: [DataType; 4] = [
        DataType::Hl7v2,
        DataType::Ccda,
        DataType::Json,
        DataType::Fhir,
    ];

    /// Well-known reference of the built-in default collection
    pub fn default_reference(&self) -> &'static str {
        match self {
            DataType::Hl7v2 => "microsofthealth/hl7v2templates:default",
            DataType::Ccda => "microsofthealth/ccdatemplates:default",
            DataType::Json => "microsofthealth/jsontemplates:default",
            DataType::Fhir => "microsofthealth/stu3tor4templates:default",
        }
    }

    /// Data type whose default reference this is
    pub fn from_default_reference(reference: &str) -> Option<DataType> {
        DataType::ALL
            .into_iter()
            .find(|t| t.default_reference() == reference)
    }

    /// Prefix at least one root template name must start with
    pub fn required_root_prefix(&self) -> &'static str {
        match self {
            DataType::Hl7v2 => "ADT_A",
            DataType::Ccda => "CCD",
            DataType::Json => "ExamplePatient",
            DataType::Fhir => "Patient",
        }
    }

    /// Minimum-content rule: some root template starts with the required prefix
    /// (ASCII case-insensitive).
    pub fn satisfies_minimum_content(&self, templates: &TemplateSet) -> bool {
        let prefix = self.required_root_prefix();
        templates.root_template_names().any(|name| {
            name.len() >= prefix.len()
                && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Hl7v2 => write!(f, "Hl7v2"),
            DataType::Ccda => write!(f, "Ccda"),
            DataType::Json => write!(f, "Json"),
            DataType::Fhir => write!(f, "Fhir"),
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hl7v2" => Ok(DataType::Hl7v2),
            "ccda" => Ok(DataType::Ccda),
            "json" => Ok(DataType::Json),
            "fhir" => Ok(DataType::Fhir),
            other => Err(format!("unknown data type: {}", other)),
        }
    }
}

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text
    Text(String),
    /// `{{ expression }}`
    Output(String),
    /// `{% tag %}`
    Tag(String),
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
    source_len: usize,
}

impl Template {
    /// Parse template source into text, output and tag segments
    pub fn parse(name: &str, source: &str) -> Result<Self, TemplateManagementError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while !rest.is_empty() {
            let next = [("{{", "}}"), ("{%", "%}")]
                .into_iter()
                .filter_map(|(open, close)| rest.find(open).map(|i| (i, open, close)))
                .min_by_key(|(i, _, _)| *i);

            let Some((start, open, close)) = next else {
                segments.push(Segment::Text(rest.to_string()));
                break;
            };

            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let body_start = start + open.len();
            let Some(len) = rest[body_start..].find(close) else {
                let line = source[..source.len() - rest.len() + start].matches('\n').count() + 1;
                return Err(TemplateManagementError::ParseFailed(format!(
                    "template '{}' has an unterminated '{}' on line {}",
                    name, open, line
                )));
            };
            let body = rest[body_start..body_start + len]
                .trim_matches('-')
                .trim()
                .to_string();
            segments.push(if open == "{{" {
                Segment::Output(body)
            } else {
                Segment::Tag(body)
            });
            rest = &rest[body_start + len + close.len()..];
        }

        Ok(Self {
            name: name.to_string(),
            segments,
            source_len: source.len(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Size of the source this template was parsed from, in bytes
    pub fn source_len(&self) -> usize {
        self.source_len
    }
}

/// Templates parsed from one package layer, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateLayer {
    /// Layer digest, empty for local packages
    pub digest: String,
    /// Templates by name
    pub templates: HashMap<String, Arc<Template>>,
    /// Size of the layer content in bytes
    pub size: u64,
}

impl TemplateLayer {
    /// Insert a template, replacing any existing one with the same name
    pub fn insert(&mut self, template: Template) {
        self.templates
            .insert(template.name().to_string(), Arc::new(template));
    }
}

/// Ordered groups of named templates; earlier groups take precedence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSet {
    groups: Vec<HashMap<String, Arc<Template>>>,
    size: u64,
}

impl TemplateSet {
    /// Build a set from layers ordered top-most first
    pub fn from_layers(layers: impl IntoIterator<Item = TemplateLayer>) -> Self {
        let mut set = Self::default();
        for layer in layers {
            set.size += layer.size;
            set.groups.push(layer.templates);
        }
        set
    }

    pub fn groups(&self) -> &[HashMap<String, Arc<Template>>] {
        &self.groups
    }

    /// Look a template up, first group wins
    pub fn get(&self, name: &str) -> Option<&Arc<Template>> {
        self.groups.iter().find_map(|g| g.get(name))
    }

    /// Declared size in bytes, used for cache accounting
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.is_empty())
    }

    /// Distinct template names, sorted
    pub fn template_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .groups
            .iter()
            .flat_map(|g| g.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Names of templates at the package root (no directory component)
    pub fn root_template_names(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.keys())
            .map(String::as_str)
            .filter(|name| !name.contains('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(names: &[&str], size: u64) -> TemplateLayer {
        let mut layer = TemplateLayer {
            size,
            ..Default::default()
        };
        for name in names {
            layer.insert(Template::parse(name, &format!("{{{{ msg.{name} }}}}")).unwrap());
        }
        layer
    }

    #[test]
    fn test_parse_segments() {
        let t = Template::parse("ADT_A01", "{\n\"id\": \"{{ msg.id }}\"{% if x -%},{% endif %}\n}").unwrap();
        assert_eq!(t.name(), "ADT_A01");
        assert_eq!(
            t.segments(),
            &[
                Segment::Text("{\n\"id\": \"".to_string()),
                Segment::Output("msg.id".to_string()),
                Segment::Text("\"".to_string()),
                Segment::Tag("if x".to_string()),
                Segment::Text(",".to_string()),
                Segment::Tag("endif".to_string()),
                Segment::Text("\n}".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_unterminated() {
        let err = Template::parse("Broken", "line one\n{{ msg.id").unwrap_err();
        match err {
            TemplateManagementError::ParseFailed(msg) => {
                assert!(msg.contains("Broken"));
                assert!(msg.contains("line 2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_template_set_precedence() {
        let mut top = layer(&["ADT_A01"], 10);
        top.insert(Template::parse("ADT_A01", "top").unwrap());
        let base = layer(&["ADT_A01", "ORU_R01"], 20);
        let set = TemplateSet::from_layers(vec![top, base]);

        assert_eq!(set.size(), 30);
        assert_eq!(set.get("ADT_A01").unwrap().source_len(), 3);
        assert!(set.get("ORU_R01").is_some());
        assert_eq!(set.template_names(), vec!["ADT_A01", "ORU_R01"]);
    }

    #[test]
    fn test_minimum_content_rule() {
        let set = TemplateSet::from_layers(vec![layer(&["adt_a01", "DataType/XAD"], 1)]);
        assert!(DataType::Hl7v2.satisfies_minimum_content(&set));

        let nested = TemplateSet::from_layers(vec![layer(&["Hl7v2/ADT_A01"], 1)]);
        assert!(!DataType::Hl7v2.satisfies_minimum_content(&nested));

        let ccda = TemplateSet::from_layers(vec![layer(&["CCD"], 1)]);
        assert!(DataType::Ccda.satisfies_minimum_content(&ccda));
        assert!(!DataType::Hl7v2.satisfies_minimum_content(&ccda));
    }

    #[test]
    fn test_default_reference_lookup() {
        for data_type in DataType::ALL {
            assert_eq!(
                DataType::from_default_reference(data_type.default_reference()),
                Some(data_type)
            );
        }
        assert_eq!(DataType::from_default_reference("myacr.azurecr.io/x:y"), None);
        assert_eq!("HL7V2".parse::<DataType>().unwrap(), DataType::Hl7v2);
    }
}
