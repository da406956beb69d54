use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Source languages with a registered boundary extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    TypeScript,
    Python,
    Java,
}

impl Language {
    /// Parse the `language` value of a manifest service entry.
    pub fn from_manifest(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "go" | "golang" => Some(Language::Go),
            "typescript" | "ts" | "javascript" | "js" | "node" => Some(Language::TypeScript),
            "python" | "py" => Some(Language::Python),
            "java" | "kotlin" => Some(Language::Java),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Go => write!(f, "Go"),
            Language::TypeScript => write!(f, "TypeScript"),
            Language::Python => write!(f, "Python"),
            Language::Java => write!(f, "Java"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// The eight contract rules. The string forms are fixed identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleId {
    RequestShape,
    ResponseShape,
    StatusCodeHandling,
    SharedTypeSync,
    JsonTagMatch,
    DualTest,
    StrictnessParity,
    ManifestConformance,
}

impl RuleId {
    pub const ALL: [RuleId; 8] = [
        RuleId::RequestShape,
        RuleId::ResponseShape,
        RuleId::StatusCodeHandling,
        RuleId::SharedTypeSync,
        RuleId::JsonTagMatch,
        RuleId::DualTest,
        RuleId::StrictnessParity,
        RuleId::ManifestConformance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::RequestShape => "CTR-request-shape",
            RuleId::ResponseShape => "CTR-response-shape",
            RuleId::StatusCodeHandling => "CTR-status-code-handling",
            RuleId::SharedTypeSync => "CTR-shared-type-sync",
            RuleId::JsonTagMatch => "CTR-json-tag-match",
            RuleId::DualTest => "CTR-dual-test",
            RuleId::StrictnessParity => "CTR-strictness-parity",
            RuleId::ManifestConformance => "CTR-manifest-conformance",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RuleId::RequestShape => "Request bodies match the contract's request schema",
            RuleId::ResponseShape => "Response bodies match the contract's response schema",
            RuleId::StatusCodeHandling => "Consumers handle every declared status code",
            RuleId::SharedTypeSync => "Types shared across services stay in sync",
            RuleId::JsonTagMatch => "Serialized field names match the contract",
            RuleId::DualTest => "Both sides of a contract are exercised by tests",
            RuleId::StrictnessParity => "Producer and consumer interpret fields equally strictly",
            RuleId::ManifestConformance => "Bound code conforms to the manifest's declarations",
        }
    }

    pub fn why(&self) -> &'static str {
        match self {
            RuleId::RequestShape => "A field the server requires but the client never sends fails only at runtime.",
            RuleId::ResponseShape => "Clients silently read zero values for fields the server stopped sending.",
            RuleId::StatusCodeHandling => "An unhandled status code turns a documented failure into a crash.",
            RuleId::SharedTypeSync => "Copies of one type drift apart one field at a time.",
            RuleId::JsonTagMatch => "A renamed tag compiles on both sides and breaks on the wire.",
            RuleId::DualTest => "A contract tested from one side only can drift on the other.",
            RuleId::StrictnessParity => "Different unit, casing or range interpretations cause latent production breaks.",
            RuleId::ManifestConformance => "Code that diverges from the manifest makes the manifest a lie.",
        }
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::ALL
            .iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown rule id '{s}'"))
    }
}

impl Serialize for RuleId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RuleId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A position in an analyzed file (1-based line and column).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Which side of a contract a service plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Producer,
    Consumer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Producer => write!(f, "producer"),
            Role::Consumer => write!(f, "consumer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    Type,
    Unit,
    Case,
    Missing,
    Extra,
    Strictness,
    Enum,
    Format,
    Drift,
    Tag,
    Status,
    DualTest,
    Conformance,
}

/// One detected disagreement between the manifest and the code (or between
/// two sides of a contract). Converted 1:1 into a [`Violation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub contract_id: String,
    /// `METHOD path`, or empty for contract-level findings.
    pub endpoint_id: String,
    pub field_path: String,
    pub kind: MismatchKind,
    pub manifest_expectation: String,
    pub observed: String,
    pub rule_id: RuleId,
    pub severity: Severity,
    pub location: SourceLocation,
}

/// The record handed to the output formatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "RuleID")]
    pub rule_id: RuleId,
    #[serde(rename = "Severity")]
    pub severity: Severity,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "FilePath")]
    pub file_path: String,
    #[serde(rename = "StartLine")]
    pub start_line: usize,
    #[serde(rename = "StartColumn")]
    pub start_column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    SourceParse,
    AmbiguousBinding,
    UnreadableFile,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticKind::SourceParse => write!(f, "source parse error"),
            DiagnosticKind::AmbiguousBinding => write!(f, "ambiguous binding"),
            DiagnosticKind::UnreadableFile => write!(f, "unreadable file"),
        }
    }
}

/// A recovered, low-severity problem. Never affects the exit code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub location: SourceLocation,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_id_round_trips_through_its_string_form() {
        for rule in RuleId::ALL {
            assert_eq!(rule.as_str().parse::<RuleId>().unwrap(), rule);
        }
        assert!("CTR-nope".parse::<RuleId>().is_err());
    }

    #[test]
    fn test_violation_serializes_with_record_field_names() {
        let v = Violation {
            rule_id: RuleId::DualTest,
            severity: Severity::Warning,
            message: "m".to_string(),
            file_path: "a.go".to_string(),
            start_line: 3,
            start_column: 1,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["RuleID"], "CTR-dual-test");
        assert_eq!(json["Severity"], "warning");
        assert_eq!(json["StartLine"], 3);
    }

    #[test]
    fn test_language_from_manifest_aliases() {
        assert_eq!(Language::from_manifest("golang"), Some(Language::Go));
        assert_eq!(Language::from_manifest("JavaScript"), Some(Language::TypeScript));
        assert_eq!(Language::from_manifest("cobol"), None);
    }
}
