//! Workflow Data Model
//!
//! Core data structures for pipeline definitions: parameter types and
//! values, file handles with secondary files, tool specifications, and
//! the workflow graph itself.
//!
//! # Example YAML Format
//!
//! ```yaml
//! inputs:
//!   - name: tumor_bams
//!     type: File[]
//!     secondary: ["^.bai"]
//!   - name: reference
//!     type: File
//!     secondary: [".fai"]
//!
//! steps:
//!   - id: call_variants
//!     run: tools/vardict.yaml
//!     in:
//!       bam: tumor_bams
//!       reference: reference
//!     scatter: [bam]
//!
//! outputs:
//!   - name: vcfs
//!     from: call_variants/vcf
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

/// The type of a parameter flowing along a graph edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Boolean,
    Int,
    Float,
    Str,
    File,
    Record,
    Array(Box<ParamType>),
}

impl ParamType {
    /// Parses a type annotation such as `File`, `string` or `File[]`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(item) = text.strip_suffix("[]") {
            return ParamType::parse(item).map(|t| ParamType::Array(Box::new(t)));
        }
        match text {
            "boolean" => Some(ParamType::Boolean),
            "int" | "long" => Some(ParamType::Int),
            "float" | "double" => Some(ParamType::Float),
            "string" => Some(ParamType::Str),
            "File" => Some(ParamType::File),
            "record" => Some(ParamType::Record),
            _ => None,
        }
    }

    /// Returns true if a value of type `self` may feed an input declared
    /// as `other`. Scalars must match (ints may feed floats); arrays are
    /// compatible when their item types are.
    pub fn feeds(&self, other: &ParamType) -> bool {
        match (self, other) {
            (ParamType::Int, ParamType::Float) => true,
            (ParamType::Array(a), ParamType::Array(b)) => a.feeds(b),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Boolean => write!(f, "boolean"),
            ParamType::Int => write!(f, "int"),
            ParamType::Float => write!(f, "float"),
            ParamType::Str => write!(f, "string"),
            ParamType::File => write!(f, "File"),
            ParamType::Record => write!(f, "record"),
            ParamType::Array(item) => write!(f, "{}[]", item),
        }
    }
}

impl Serialize for ParamType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ParamType::parse(&text)
            .ok_or_else(|| de::Error::custom(format!("unknown parameter type '{}'", text)))
    }
}

/// A file handle: a primary path plus zero or more secondary files
/// (indexes, dictionaries) located next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileValue {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary: Vec<PathBuf>,
}

impl FileValue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            secondary: Vec::new(),
        }
    }

    /// File name without its final extension (`sample.bam` -> `sample`).
    pub fn nameroot(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Final extension including the dot (`sample.bam` -> `.bam`).
    pub fn nameext(&self) -> String {
        self.path
            .extension()
            .and_then(|s| s.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default()
    }

    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    }

    pub fn dirname(&self) -> String {
        self.path
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// A secondary-file naming rule attached to a file-typed parameter.
///
/// A plain suffix appends to the full primary name (`.fai` on `ref.fasta`
/// gives `ref.fasta.fai`). Each leading caret strips one extension first
/// (`^.bai` on `sample.bam` gives `sample.bai`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecondaryFileRule(pub String);

impl SecondaryFileRule {
    /// Derives the companion path for a primary file.
    pub fn resolve(&self, primary: &Path) -> PathBuf {
        let pattern = self.0.as_str();
        let carets = pattern.chars().take_while(|c| *c == '^').count();
        let suffix = &pattern[carets..];

        let mut name = primary
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        for _ in 0..carets {
            if let Some(dot) = name.rfind('.') {
                name.truncate(dot);
            }
        }
        name.push_str(suffix);

        match primary.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
            _ => PathBuf::from(name),
        }
    }
}

/// A concrete parameter value bound along a graph edge.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Boolean(bool),
    Int(i64),
    Float(f64),
    Str(String),
    File(FileValue),
    Record(BTreeMap<String, ParamValue>),
    Array(Vec<ParamValue>),
}

impl ParamValue {
    /// The type this value carries. Empty arrays report a string item
    /// type; callers treat empty arrays as feeding any array.
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Boolean(_) => ParamType::Boolean,
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Str(_) => ParamType::Str,
            ParamValue::File(_) => ParamType::File,
            ParamValue::Record(_) => ParamType::Record,
            ParamValue::Array(items) => ParamType::Array(Box::new(
                items
                    .first()
                    .map(|v| v.param_type())
                    .unwrap_or(ParamType::Str),
            )),
        }
    }

    /// Coerces raw YAML into a value of the declared type. Plain strings
    /// under a `File` declaration become file handles; secondary files
    /// are attached by the caller once the rules are known.
    pub fn from_yaml(ty: &ParamType, raw: &YamlValue) -> Result<Self, String> {
        match (ty, raw) {
            (ParamType::Boolean, YamlValue::Bool(b)) => Ok(ParamValue::Boolean(*b)),
            (ParamType::Int, YamlValue::Number(n)) => n
                .as_i64()
                .map(ParamValue::Int)
                .ok_or_else(|| format!("'{:?}' is not an integer", n)),
            (ParamType::Float, YamlValue::Number(n)) => n
                .as_f64()
                .map(ParamValue::Float)
                .ok_or_else(|| format!("'{:?}' is not a number", n)),
            (ParamType::Str, YamlValue::String(s)) => Ok(ParamValue::Str(s.clone())),
            (ParamType::File, YamlValue::String(s)) => Ok(ParamValue::File(FileValue::new(s))),
            (ParamType::File, YamlValue::Mapping(_)) => {
                let file: FileValue =
                    serde_yaml::from_value(raw.clone()).map_err(|e| e.to_string())?;
                Ok(ParamValue::File(file))
            }
            (ParamType::Record, YamlValue::Mapping(map)) => {
                let mut fields = BTreeMap::new();
                for (key, value) in map {
                    let name = key
                        .as_str()
                        .ok_or_else(|| "record keys must be strings".to_string())?;
                    fields.insert(name.to_string(), ParamValue::from_raw(value)?);
                }
                Ok(ParamValue::Record(fields))
            }
            (ParamType::Array(item), YamlValue::Sequence(seq)) => {
                let items = seq
                    .iter()
                    .map(|v| ParamValue::from_yaml(item, v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ParamValue::Array(items))
            }
            _ => Err(format!("value does not match declared type {}", ty)),
        }
    }

    /// Coerces YAML without a declared type, inferring scalars. Used for
    /// record fields, where the pipeline config carries mixed scalars.
    fn from_raw(raw: &YamlValue) -> Result<Self, String> {
        match raw {
            YamlValue::Bool(b) => Ok(ParamValue::Boolean(*b)),
            YamlValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ParamValue::Int(i))
                } else {
                    Ok(ParamValue::Float(n.as_f64().unwrap_or_default()))
                }
            }
            YamlValue::String(s) => Ok(ParamValue::Str(s.clone())),
            YamlValue::Sequence(seq) => {
                let items = seq
                    .iter()
                    .map(ParamValue::from_raw)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ParamValue::Array(items))
            }
            YamlValue::Mapping(map) => {
                let mut fields = BTreeMap::new();
                for (key, value) in map {
                    let name = key
                        .as_str()
                        .ok_or_else(|| "record keys must be strings".to_string())?;
                    fields.insert(name.to_string(), ParamValue::from_raw(value)?);
                }
                Ok(ParamValue::Record(fields))
            }
            other => Err(format!("unsupported value: {:?}", other)),
        }
    }

    /// Attaches secondary files derived from the given rules to every
    /// file handle in this value (recursing through arrays).
    pub fn attach_secondary(&mut self, rules: &[SecondaryFileRule]) {
        match self {
            ParamValue::File(file) => {
                for rule in rules {
                    let companion = rule.resolve(&file.path);
                    if !file.secondary.contains(&companion) {
                        file.secondary.push(companion);
                    }
                }
            }
            ParamValue::Array(items) => {
                for item in items {
                    item.attach_secondary(rules);
                }
            }
            _ => {}
        }
    }

    /// Renders this value for command-line substitution. Files render as
    /// their primary path; arrays join elements with spaces.
    pub fn render(&self) -> String {
        match self {
            ParamValue::Boolean(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(x) => x.to_string(),
            ParamValue::Str(s) => s.clone(),
            ParamValue::File(f) => f.path.display().to_string(),
            ParamValue::Array(items) => items
                .iter()
                .map(|v| v.render())
                .collect::<Vec<_>>()
                .join(" "),
            ParamValue::Record(_) => String::new(),
        }
    }
}

/// A typed input declared by a tool or graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Secondary-file suffix rules honored for file-typed parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary: Vec<SecondaryFileRule>,
    /// Literal default used when no binding is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<YamlValue>,
}

impl ParamDecl {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            secondary: Vec::new(),
            default: None,
        }
    }

    pub fn with_secondary(mut self, rule: impl Into<String>) -> Self {
        self.secondary.push(SecondaryFileRule(rule.into()));
        self
    }

    pub fn with_default(mut self, raw: YamlValue) -> Self {
        self.default = Some(raw);
        self
    }

    pub fn required(&self) -> bool {
        self.default.is_none()
    }
}

/// An output declared by a tool: a typed, explicitly named file computed
/// from the bound inputs, never discovered by globbing the work dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Path template, interpolated against the bound inputs.
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary: Vec<SecondaryFileRule>,
}

/// Specification of one external tool invocation: typed inputs, a bash
/// command template, declared outputs and resource hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(default)]
    pub inputs: Vec<ParamDecl>,
    /// Command template with `$(expr)` interpolation.
    pub command: String,
    #[serde(default)]
    pub outputs: Vec<ToolOutput>,
    /// CPU cores this tool needs while running.
    #[serde(default = "default_cores")]
    pub cores: usize,
    /// Memory hint in megabytes, passed through to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
}

fn default_cores() -> usize {
    1
}

impl ToolSpec {
    pub fn input(&self, name: &str) -> Option<&ParamDecl> {
        self.inputs.iter().find(|d| d.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&ToolOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

/// Where a step's input value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingSource {
    /// A graph-level input, or `step/output` for an upstream edge.
    Reference(String),
    /// A literal value, coerced against the declared input type.
    Literal(YamlValue),
    /// An inline expression over the step's sibling inputs.
    Expression(String),
}

impl Serialize for BindingSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            BindingSource::Reference(r) => serializer.serialize_str(r),
            BindingSource::Literal(v) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("value", v)?;
                map.end()
            }
            BindingSource::Expression(e) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("expr", e)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for BindingSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = YamlValue::deserialize(deserializer)?;
        match raw {
            YamlValue::String(s) => Ok(BindingSource::Reference(s)),
            YamlValue::Mapping(ref map) if map.len() == 1 => {
                let (key, value) = map.iter().next().unwrap();
                match key.as_str() {
                    Some("value") => Ok(BindingSource::Literal(value.clone())),
                    Some("expr") => match value.as_str() {
                        Some(text) => Ok(BindingSource::Expression(text.to_string())),
                        None => Err(de::Error::custom("'expr' must be a string")),
                    },
                    _ => Err(de::Error::custom(
                        "binding must be a reference, {value: ...} or {expr: ...}",
                    )),
                }
            }
            _ => Err(de::Error::custom(
                "binding must be a reference, {value: ...} or {expr: ...}",
            )),
        }
    }
}

/// Scatter combination mode. Dotproduct pairs array elements by position
/// across all scattered inputs; it is the only mode this pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScatterMethod {
    #[default]
    #[serde(rename = "dotproduct")]
    DotProduct,
}

/// What a step runs: an inline tool, an inline sub-workflow, or a
/// reference to another document (resolved at load time).
#[derive(Debug, Clone)]
pub enum RunTarget {
    Tool(Box<ToolSpec>),
    Graph(Box<GraphSpec>),
    Path(String),
}

impl RunTarget {
    /// Names of the outputs this target exposes.
    pub fn output_names(&self) -> Vec<&str> {
        match self {
            RunTarget::Tool(tool) => tool.outputs.iter().map(|o| o.name.as_str()).collect(),
            RunTarget::Graph(graph) => graph.outputs.iter().map(|o| o.name.as_str()).collect(),
            RunTarget::Path(_) => Vec::new(),
        }
    }

    /// Declared type of a named output, if this target is resolved.
    pub fn output_type(&self, name: &str) -> Option<ParamType> {
        match self {
            RunTarget::Tool(tool) => tool.output(name).map(|o| o.ty.clone()),
            RunTarget::Graph(graph) => graph.output_type(name),
            RunTarget::Path(_) => None,
        }
    }

    /// Input declarations of this target.
    pub fn input_decls(&self) -> &[ParamDecl] {
        match self {
            RunTarget::Tool(tool) => &tool.inputs,
            RunTarget::Graph(graph) => &graph.inputs,
            RunTarget::Path(_) => &[],
        }
    }
}

impl Serialize for RunTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RunTarget::Tool(tool) => tool.serialize(serializer),
            RunTarget::Graph(graph) => graph.serialize(serializer),
            RunTarget::Path(path) => serializer.serialize_str(path),
        }
    }
}

impl<'de> Deserialize<'de> for RunTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = YamlValue::deserialize(deserializer)?;
        match raw {
            YamlValue::String(path) => Ok(RunTarget::Path(path)),
            YamlValue::Mapping(ref map) => {
                if map.contains_key("steps") {
                    let graph: GraphSpec =
                        serde_yaml::from_value(raw.clone()).map_err(de::Error::custom)?;
                    Ok(RunTarget::Graph(Box::new(graph)))
                } else if map.contains_key("command") {
                    let tool: ToolSpec =
                        serde_yaml::from_value(raw.clone()).map_err(de::Error::custom)?;
                    Ok(RunTarget::Tool(Box::new(tool)))
                } else {
                    Err(de::Error::custom(
                        "run target must declare 'command' (tool) or 'steps' (sub-workflow)",
                    ))
                }
            }
            _ => Err(de::Error::custom(
                "run target must be a path or an inline definition",
            )),
        }
    }
}

/// A single node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique identifier within the enclosing graph.
    pub id: String,

    /// Tool or sub-workflow this step runs.
    pub run: RunTarget,

    /// Input bindings, keyed by the run target's input names.
    #[serde(rename = "in", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, BindingSource>,

    /// Input names scattered over; all must bind arrays of equal length.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scatter: Vec<String>,

    #[serde(default, skip_serializing_if = "is_default_method")]
    pub scatter_method: ScatterMethod,
}

fn is_default_method(m: &ScatterMethod) -> bool {
    *m == ScatterMethod::DotProduct
}

impl StepSpec {
    pub fn new(id: impl Into<String>, run: RunTarget) -> Self {
        Self {
            id: id.into().trim().to_string(),
            run,
            inputs: BTreeMap::new(),
            scatter: Vec::new(),
            scatter_method: ScatterMethod::DotProduct,
        }
    }

    /// Binds an input to a graph input or `step/output` reference.
    pub fn bind(mut self, input: impl Into<String>, reference: impl Into<String>) -> Self {
        self.inputs
            .insert(input.into(), BindingSource::Reference(reference.into()));
        self
    }

    /// Binds an input to a literal value.
    pub fn bind_literal(mut self, input: impl Into<String>, raw: YamlValue) -> Self {
        self.inputs.insert(input.into(), BindingSource::Literal(raw));
        self
    }

    /// Binds an input to an expression over the sibling inputs.
    pub fn bind_expr(mut self, input: impl Into<String>, expr: impl Into<String>) -> Self {
        self.inputs
            .insert(input.into(), BindingSource::Expression(expr.into()));
        self
    }

    /// Scatters this step over the named array input.
    pub fn scatter_over(mut self, input: impl Into<String>) -> Self {
        self.scatter.push(input.into());
        self
    }
}

/// A graph-level output, bound to some step's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphOutput {
    pub name: String,
    /// `step/output` reference.
    pub from: String,
}

/// A workflow graph: typed inputs, step nodes and exposed outputs.
/// Definitions are immutable once parsed; only parameter values and
/// array lengths vary between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub inputs: Vec<ParamDecl>,

    pub steps: Vec<StepSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<GraphOutput>,
}

impl GraphSpec {
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn input(&self, name: &str) -> Option<&ParamDecl> {
        self.inputs.iter().find(|d| d.name == name)
    }

    /// Declared type of a graph output, traced through the producing step.
    pub fn output_type(&self, name: &str) -> Option<ParamType> {
        let output = self.outputs.iter().find(|o| o.name == name)?;
        let (step_id, out_name) = output.from.split_once('/')?;
        let step = self.step(step_id)?;
        let inner = step.run.output_type(out_name)?;
        if step.scatter.is_empty() {
            Some(inner)
        } else {
            Some(ParamType::Array(Box::new(inner)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_parse_and_display() {
        assert_eq!(ParamType::parse("File"), Some(ParamType::File));
        assert_eq!(
            ParamType::parse("File[]"),
            Some(ParamType::Array(Box::new(ParamType::File)))
        );
        assert_eq!(
            ParamType::parse("string[]").unwrap().to_string(),
            "string[]"
        );
        assert!(ParamType::parse("bogus").is_none());
    }

    #[test]
    fn test_param_type_compatibility() {
        assert!(ParamType::Int.feeds(&ParamType::Float));
        assert!(!ParamType::Float.feeds(&ParamType::Int));
        assert!(ParamType::Array(Box::new(ParamType::File))
            .feeds(&ParamType::Array(Box::new(ParamType::File))));
        assert!(!ParamType::File.feeds(&ParamType::Array(Box::new(ParamType::File))));
    }

    #[test]
    fn test_secondary_rule_plain_suffix() {
        let rule = SecondaryFileRule(".fai".to_string());
        assert_eq!(
            rule.resolve(Path::new("ref.fasta")),
            PathBuf::from("ref.fasta.fai")
        );
    }

    #[test]
    fn test_secondary_rule_caret_strips_extension() {
        let rule = SecondaryFileRule("^.bai".to_string());
        assert_eq!(
            rule.resolve(Path::new("sample.bam")),
            PathBuf::from("sample.bai")
        );
    }

    #[test]
    fn test_secondary_rule_preserves_directory() {
        let rule = SecondaryFileRule("^.bai".to_string());
        assert_eq!(
            rule.resolve(Path::new("bams/sample.bam")),
            PathBuf::from("bams/sample.bai")
        );
    }

    #[test]
    fn test_secondary_rule_double_caret() {
        let rule = SecondaryFileRule("^^.dict".to_string());
        assert_eq!(
            rule.resolve(Path::new("ref.fasta.gz")),
            PathBuf::from("ref.dict")
        );
    }

    #[test]
    fn test_file_value_name_parts() {
        let file = FileValue::new("bams/sample.bam");
        assert_eq!(file.basename(), "sample.bam");
        assert_eq!(file.nameroot(), "sample");
        assert_eq!(file.nameext(), ".bam");
        assert_eq!(file.dirname(), "bams");
    }

    #[test]
    fn test_value_coercion_file_from_string() {
        let raw = YamlValue::String("sample.bam".to_string());
        let value = ParamValue::from_yaml(&ParamType::File, &raw).unwrap();
        match value {
            ParamValue::File(f) => assert_eq!(f.path, PathBuf::from("sample.bam")),
            other => panic!("expected file, got {:?}", other),
        }
    }

    #[test]
    fn test_value_coercion_array() {
        let raw: YamlValue = serde_yaml::from_str("[a.bam, b.bam]").unwrap();
        let ty = ParamType::Array(Box::new(ParamType::File));
        let value = ParamValue::from_yaml(&ty, &raw).unwrap();
        match value {
            ParamValue::Array(items) => assert_eq!(items.len(), 2),
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_value_coercion_rejects_mismatch() {
        let raw = YamlValue::String("not a number".to_string());
        assert!(ParamValue::from_yaml(&ParamType::Int, &raw).is_err());
    }

    #[test]
    fn test_value_coercion_record() {
        let raw: YamlValue =
            serde_yaml::from_str("{min_qual: 20, caller: vardict}").unwrap();
        let value = ParamValue::from_yaml(&ParamType::Record, &raw).unwrap();
        match value {
            ParamValue::Record(fields) => {
                assert_eq!(fields.get("min_qual"), Some(&ParamValue::Int(20)));
                assert_eq!(
                    fields.get("caller"),
                    Some(&ParamValue::Str("vardict".to_string()))
                );
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_attach_secondary_recurses_arrays() {
        let mut value = ParamValue::Array(vec![
            ParamValue::File(FileValue::new("a.bam")),
            ParamValue::File(FileValue::new("b.bam")),
        ]);
        value.attach_secondary(&[SecondaryFileRule("^.bai".to_string())]);
        match value {
            ParamValue::Array(items) => match &items[1] {
                ParamValue::File(f) => {
                    assert_eq!(f.secondary, vec![PathBuf::from("b.bai")])
                }
                other => panic!("expected file, got {:?}", other),
            },
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_render_array_joins_with_spaces() {
        let value = ParamValue::Array(vec![
            ParamValue::File(FileValue::new("a.bam")),
            ParamValue::File(FileValue::new("b.bam")),
        ]);
        assert_eq!(value.render(), "a.bam b.bam");
    }

    #[test]
    fn test_binding_source_deserialization() {
        let reference: BindingSource = serde_yaml::from_str("tumor_bams").unwrap();
        assert_eq!(
            reference,
            BindingSource::Reference("tumor_bams".to_string())
        );

        let literal: BindingSource = serde_yaml::from_str("value: 20").unwrap();
        assert!(matches!(literal, BindingSource::Literal(_)));

        let expr: BindingSource =
            serde_yaml::from_str("expr: \"$(inputs.bam.nameroot)\"").unwrap();
        assert!(matches!(expr, BindingSource::Expression(_)));
    }

    #[test]
    fn test_run_target_deserialization() {
        let tool: RunTarget = serde_yaml::from_str(
            r#"
command: "bwa mem $(inputs.reference.path)"
inputs:
  - name: reference
    type: File
outputs:
  - name: sam
    type: File
    path: aligned.sam
cores: 8
"#,
        )
        .unwrap();
        match tool {
            RunTarget::Tool(t) => {
                assert_eq!(t.cores, 8);
                assert_eq!(t.outputs.len(), 1);
                assert_eq!(t.output("sam").unwrap().path, "aligned.sam");
            }
            other => panic!("expected tool, got {:?}", other),
        }

        let path: RunTarget = serde_yaml::from_str("tools/bwa.yaml").unwrap();
        assert!(matches!(path, RunTarget::Path(_)));
    }

    #[test]
    fn test_graph_output_type_lifts_scatter() {
        let tool = ToolSpec {
            inputs: vec![ParamDecl::new("bam", ParamType::File)],
            command: "true".to_string(),
            outputs: vec![ToolOutput {
                name: "vcf".to_string(),
                ty: ParamType::File,
                path: "out.vcf".to_string(),
                secondary: Vec::new(),
            }],
            cores: 1,
            memory_mb: None,
        };
        let graph = GraphSpec {
            inputs: vec![ParamDecl::new(
                "bams",
                ParamType::Array(Box::new(ParamType::File)),
            )],
            steps: vec![StepSpec::new("call", RunTarget::Tool(Box::new(tool)))
                .bind("bam", "bams")
                .scatter_over("bam")],
            outputs: vec![GraphOutput {
                name: "vcfs".to_string(),
                from: "call/vcf".to_string(),
            }],
        };
        assert_eq!(
            graph.output_type("vcfs"),
            Some(ParamType::Array(Box::new(ParamType::File)))
        );
    }
}
