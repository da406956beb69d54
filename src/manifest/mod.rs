//! Contract manifest model.
//!
//! - [`loader`] — YAML parsing, validation, and `ref` expansion into the
//!   immutable [`ContractManifest`] below.
//!
//! The manifest is built once per run and shared read-only (`Arc`) by every
//! later stage.

pub mod loader;

use std::collections::BTreeMap;

use crate::comparator::units::QuantityClass;
use crate::conventions::Casing;
use crate::models::{Language, Role, SourceLocation};

pub use loader::{load, parse};

#[derive(Debug, Clone)]
pub struct ContractManifest {
    pub services: Vec<Service>,
    pub contracts: Vec<Contract>,
    pub conventions: Conventions,
    /// Display path of the manifest file, used as the location of
    /// manifest-level findings.
    pub source_path: String,
    source_text: String,
}

impl ContractManifest {
    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn contract(&self, id: &str) -> Option<&Contract> {
        self.contracts.iter().find(|c| c.id == id)
    }

    /// Locate a manifest entry by walking `anchors` forward through the
    /// document: each anchor is searched for after the line of the previous
    /// one. Falls back to the last anchor that matched (or line 1).
    pub fn locate(&self, anchors: &[&str]) -> SourceLocation {
        let lines: Vec<&str> = self.source_text.lines().collect();
        let mut found = (1, 1);
        let mut start = 0;
        for anchor in anchors {
            if anchor.is_empty() {
                continue;
            }
            let hit = lines
                .iter()
                .enumerate()
                .skip(start)
                .find_map(|(i, line)| line.find(anchor).map(|col| (i, col)));
            match hit {
                Some((i, col)) => {
                    found = (i + 1, col + 1);
                    start = i + 1;
                }
                None => break,
            }
        }
        SourceLocation::new(self.source_path.clone(), found.0, found.1)
    }
}

#[derive(Debug, Clone)]
pub struct Service {
    pub id: String,
    pub language: Language,
    pub base_url: Option<String>,
    /// Source tree prefix owned by this service.
    pub root: Option<String>,
}

impl Service {
    /// Path portion of `base_url` without a trailing slash (`/v1` for
    /// `https://api.example.com/v1/`), if any.
    pub fn base_path(&self) -> Option<String> {
        let url = self.base_url.as_deref()?;
        let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
        let path = without_scheme.find('/').map(|i| &without_scheme[i..])?;
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The producer serves the endpoints; consumers call them.
    Outbound,
    /// The producer calls endpoints served by the consumers (webhooks).
    Inbound,
}

#[derive(Debug, Clone)]
pub struct Contract {
    pub id: String,
    pub producer: String,
    pub consumers: Vec<String>,
    pub protocol: String,
    pub direction: Direction,
    pub verification: Option<Verification>,
    pub endpoints: Vec<Endpoint>,
}

impl Contract {
    /// Role played by the side that serves the endpoints.
    pub fn server_role(&self) -> Role {
        match self.direction {
            Direction::Outbound => Role::Producer,
            Direction::Inbound => Role::Consumer,
        }
    }

    /// Roles `service` may play in this contract.
    pub fn roles_of(&self, service: &str) -> Vec<Role> {
        let mut roles = Vec::new();
        if self.producer == service {
            roles.push(Role::Producer);
        }
        if self.consumers.iter().any(|c| c == service) {
            roles.push(Role::Consumer);
        }
        roles
    }

    /// Services playing `role`.
    pub fn services_in(&self, role: Role) -> Vec<&str> {
        match role {
            Role::Producer => vec![self.producer.as_str()],
            Role::Consumer => self.consumers.iter().map(String::as_str).collect(),
        }
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id() == id)
    }
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub method: String,
    pub header: String,
    pub timestamp_header: Option<String>,
    pub tolerance_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Upper-case HTTP method.
    pub method: String,
    pub path: String,
    pub request: Option<Payload>,
    /// Response bodies keyed by status code.
    pub responses: BTreeMap<u16, Payload>,
    pub status_codes: Vec<u16>,
}

impl Endpoint {
    /// Stable identifier within a contract: `METHOD path`.
    pub fn id(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// The body of the lowest declared 2xx response.
    pub fn success_response(&self) -> Option<&Payload> {
        self.responses
            .iter()
            .find(|(code, _)| (200..300).contains(*code))
            .map(|(_, payload)| payload)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Enum,
}

impl FieldType {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldType::Object | FieldType::Array)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Object => write!(f, "object"),
            FieldType::Array => write!(f, "array"),
            FieldType::Enum => write!(f, "enum"),
        }
    }
}

/// Inclusive numeric bounds; either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    /// True when `self` rejects some value `other` accepts.
    pub fn narrower_than(&self, other: &Range) -> bool {
        let min_tighter = match (self.min, other.min) {
            (Some(a), Some(b)) => a > b,
            (Some(_), None) => true,
            _ => false,
        };
        let max_tighter = match (self.max, other.max) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            _ => false,
        };
        min_tighter || max_tighter
    }

    /// True when `self` accepts some value `other` rejects.
    pub fn broader_than(&self, other: &Range) -> bool {
        other.narrower_than(self)
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = |b: Option<f64>| b.map(|v| v.to_string()).unwrap_or_else(|| "*".to_string());
        write!(f, "[{}, {}]", bound(self.min), bound(self.max))
    }
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub format: Option<String>,
    pub unit: Option<String>,
    pub range: Option<Range>,
    pub enum_values: Vec<String>,
    pub required: bool,
    /// Object members, in declaration order.
    pub children: Vec<FieldSchema>,
    /// Element schema of an array.
    pub items: Option<Box<FieldSchema>>,
    /// Named type this object was expanded from.
    pub type_ref: Option<String>,
    /// Expansion stopped here (cycle or max depth).
    pub truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Conventions {
    pub monetary_values: Option<String>,
    pub weight: Option<String>,
    pub dimensions: Option<String>,
    pub country_codes: Option<String>,
    pub timestamps: Option<String>,
    pub enum_case: BTreeMap<String, Casing>,
}

impl Conventions {
    /// The declared convention for a quantity class, if any.
    pub fn for_class(&self, class: QuantityClass) -> Option<&str> {
        match class {
            QuantityClass::Money => self.monetary_values.as_deref(),
            QuantityClass::Weight => self.weight.as_deref(),
            QuantityClass::Dimension => self.dimensions.as_deref(),
            QuantityClass::CountryCode => self.country_codes.as_deref(),
            QuantityClass::Timestamp => self.timestamps.as_deref(),
        }
    }

    pub fn enum_case_for(&self, service: &str) -> Option<Casing> {
        self.enum_case.get(service).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_narrower_and_broader() {
        let contract = Range {
            min: Some(0.0),
            max: Some(100.0),
        };
        let tight = Range {
            min: Some(1.0),
            max: Some(100.0),
        };
        let open = Range {
            min: None,
            max: Some(100.0),
        };
        assert!(tight.narrower_than(&contract));
        assert!(!contract.narrower_than(&contract));
        assert!(open.broader_than(&contract));
        assert!(!tight.broader_than(&contract));
    }

    #[test]
    fn test_service_base_path() {
        let svc = Service {
            id: "orders".into(),
            language: Language::Go,
            base_url: Some("https://orders.internal:8080/api/v1/".into()),
            root: None,
        };
        assert_eq!(svc.base_path().as_deref(), Some("/api/v1"));

        let bare = Service {
            base_url: Some("http://localhost:3000".into()),
            ..svc
        };
        assert_eq!(bare.base_path(), None);
    }
}
