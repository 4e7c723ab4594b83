//! Parsed schema file model
//!
//! Produced by the parser with type references as written; the linker
//! rewrites every reference to its fully-qualified `.pkg.Name` form.

use serde::{Deserialize, Serialize};

/// Declared syntax level of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Syntax {
    Proto2,
    Proto3,
    Edition(String),
}

/// A parsed `.proto` file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Path of the file within the image
    pub name: String,
    pub package: Option<String>,
    /// `None` when the file declares neither `syntax` nor `edition`
    pub syntax: Option<Syntax>,
    /// Imported paths, in declaration order
    pub dependencies: Vec<String>,
    /// Indexes into `dependencies` of `import public`
    pub public_dependencies: Vec<usize>,
    /// Indexes into `dependencies` of `import weak`
    pub weak_dependencies: Vec<usize>,
    pub options: Vec<OptionDecl>,
    pub messages: Vec<MessageDescriptor>,
    pub enums: Vec<EnumDescriptor>,
    pub services: Vec<ServiceDescriptor>,
    /// Top-level `extend` fields
    pub extensions: Vec<FieldDescriptor>,
}

impl FileDescriptor {
    /// Package prefix for fully-qualified names, empty without a package
    pub fn package_name(&self) -> &str {
        self.package.as_deref().unwrap_or("")
    }

    pub fn is_public_dependency(&self, index: usize) -> bool {
        self.public_dependencies.contains(&index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    pub nested_messages: Vec<MessageDescriptor>,
    pub enums: Vec<EnumDescriptor>,
    pub oneofs: Vec<OneofDescriptor>,
    /// Nested `extend` fields
    pub extensions: Vec<FieldDescriptor>,
    pub extension_ranges: Vec<FieldRange>,
    pub reserved_ranges: Vec<FieldRange>,
    pub reserved_names: Vec<String>,
    pub options: Vec<OptionDecl>,
    /// Synthesized entry type of a `map<,>` field
    pub is_map_entry: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneofDescriptor {
    pub name: String,
    pub options: Vec<OptionDecl>,
}

/// Inclusive range of field numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub fn from_keyword(s: &str) -> Option<Self> {
        Some(match s {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::Uint32,
            "uint64" => ScalarType::Uint64,
            "sint32" => ScalarType::Sint32,
            "sint64" => ScalarType::Sint64,
            "fixed32" => ScalarType::Fixed32,
            "fixed64" => ScalarType::Fixed64,
            "sfixed32" => ScalarType::Sfixed32,
            "sfixed64" => ScalarType::Sfixed64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        })
    }
}

/// Type of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Scalar(ScalarType),
    /// Fully-qualified message name
    Message(String),
    /// Fully-qualified enum name
    Enum(String),
    /// Type name as written, before linking
    Unresolved(String),
}

impl FieldType {
    /// Referenced type name, for message, enum, and unresolved types
    pub fn type_name(&self) -> Option<&str> {
        match self {
            FieldType::Scalar(_) => None,
            FieldType::Message(name) | FieldType::Enum(name) | FieldType::Unresolved(name) => {
                Some(name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: i64,
    /// `None` for proto3 fields without a label
    pub label: Option<Label>,
    pub field_type: FieldType,
    /// Message being extended, for `extend` fields
    pub extendee: Option<String>,
    pub oneof_index: Option<usize>,
    /// `optional` on a proto3 field
    pub proto3_optional: bool,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumDescriptor {
    pub name: String,
    pub values: Vec<EnumValueDescriptor>,
    pub reserved_ranges: Vec<FieldRange>,
    pub reserved_names: Vec<String>,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValueDescriptor {
    pub name: String,
    pub number: i64,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub options: Vec<OptionDecl>,
}

/// `option name = value;` or a `[name = value]` field option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDecl {
    pub name: Vec<OptionNamePart>,
    pub value: OptionValue,
}

impl OptionDecl {
    /// Name as written, e.g. `(acme.v1.tag).label`
    pub fn name_string(&self) -> String {
        self.name
            .iter()
            .map(|part| {
                if part.is_extension {
                    format!("({})", part.name)
                } else {
                    part.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// One dotted segment of an option name; parenthesized segments name extensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionNamePart {
    pub name: String,
    pub is_extension: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionValue {
    Identifier(String),
    String(String),
    /// Numeric literal as written, sign included
    Number(String),
    /// Text of a `{ ... }` message literal, braces excluded
    Aggregate(String),
}
