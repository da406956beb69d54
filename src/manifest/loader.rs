use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use super::{
    Contract, ContractManifest, Conventions, Direction, Endpoint, FieldSchema, FieldType, Payload,
    Range, Service, Verification,
};
use crate::conventions::Casing;
use crate::error::ManifestError;
use crate::models::Language;

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Read and validate the manifest at `path`.
pub fn load(path: &Path, max_depth: usize) -> Result<ContractManifest, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, &path.display().to_string(), max_depth)
}

/// Parse and validate manifest text. `source_path` is only used to locate
/// manifest-level findings later on.
pub fn parse(text: &str, source_path: &str, max_depth: usize) -> Result<ContractManifest, ManifestError> {
    let raw: RawManifest =
        serde_yaml::from_str(text).map_err(|e| ManifestError::Yaml(e.to_string()))?;

    let services = build_services(&raw.services)?;
    let known: HashSet<&str> = services.iter().map(|s| s.id.as_str()).collect();

    let types = SchemaBuilder {
        types: &raw.types,
        max_depth: max_depth.max(1),
    };
    // Named types are validated even when no endpoint references them.
    types.check_fields(&raw.types, "types")?;
    for (name, field) in &raw.types.0 {
        types.build_field(name, field, &format!("types.{name}"), &mut Vec::new(), 0)?;
    }

    let mut seen_contracts = HashSet::new();
    let mut contracts = Vec::with_capacity(raw.contracts.len());
    for rc in &raw.contracts {
        if !seen_contracts.insert(rc.id.as_str()) {
            return Err(ManifestError::DuplicateContract(rc.id.clone()));
        }
        contracts.push(build_contract(rc, &known, &types)?);
    }

    let conventions = build_conventions(&raw.conventions, &known)?;

    Ok(ContractManifest {
        services,
        contracts,
        conventions,
        source_path: source_path.to_string(),
        source_text: text.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    services: Vec<RawService>,
    #[serde(default)]
    contracts: Vec<RawContract>,
    #[serde(default)]
    conventions: RawConventions,
    #[serde(default)]
    types: OrderedMap<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawService {
    id: String,
    language: String,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    root: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    id: String,
    producer: String,
    #[serde(default)]
    consumers: Vec<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    verification: Option<RawVerification>,
    #[serde(default)]
    endpoints: Vec<RawEndpoint>,
}

#[derive(Debug, Deserialize)]
struct RawVerification {
    method: String,
    header: String,
    #[serde(default)]
    timestamp_header: Option<String>,
    #[serde(default)]
    tolerance_seconds: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    path: String,
    method: String,
    #[serde(default)]
    request: Option<RawPayload>,
    #[serde(default)]
    response: Option<RawPayload>,
    #[serde(default)]
    responses: OrderedMap<RawPayload>,
    #[serde(default)]
    status_codes: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(default)]
    fields: OrderedMap<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    range: Option<RawRange>,
    #[serde(default)]
    values: Option<Vec<serde_yaml::Value>>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    default: Option<serde_yaml::Value>,
    #[serde(default)]
    fields: Option<OrderedMap<RawField>>,
    #[serde(default)]
    items: Option<Box<RawField>>,
    #[serde(default, rename = "ref")]
    type_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRange {
    Bounds {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Pair(Vec<Option<f64>>),
}

#[derive(Debug, Default, Deserialize)]
struct RawConventions {
    #[serde(default)]
    monetary_values: Option<String>,
    #[serde(default)]
    weight: Option<String>,
    #[serde(default)]
    dimensions: Option<String>,
    #[serde(default)]
    country_codes: Option<String>,
    #[serde(default)]
    timestamps: Option<String>,
    #[serde(default)]
    enum_case: OrderedMap<String>,
}

/// A YAML mapping kept in document order, duplicates included, so the
/// validator (not the YAML layer) decides what a duplicate means.
#[derive(Debug)]
struct OrderedMap<T>(Vec<(String, T)>);

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        OrderedMap(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(OrderedMap::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(key) = map.next_key::<serde_yaml::Value>()? {
                    let key = match key {
                        serde_yaml::Value::String(s) => s,
                        serde_yaml::Value::Number(n) => n.to_string(),
                        serde_yaml::Value::Bool(b) => b.to_string(),
                        other => {
                            return Err(de::Error::custom(format!(
                                "unsupported mapping key {other:?}"
                            )))
                        }
                    };
                    entries.push((key, map.next_value()?));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn build_services(raw: &[RawService]) -> Result<Vec<Service>, ManifestError> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|rs| {
            if !seen.insert(rs.id.as_str()) {
                return Err(ManifestError::DuplicateService(rs.id.clone()));
            }
            let language =
                Language::from_manifest(&rs.language).ok_or_else(|| ManifestError::UnknownLanguage {
                    service: rs.id.clone(),
                    language: rs.language.clone(),
                })?;
            Ok(Service {
                id: rs.id.clone(),
                language,
                base_url: rs.base_url.clone(),
                root: rs.root.as_deref().map(|r| r.trim_end_matches('/').to_string()),
            })
        })
        .collect()
}

fn build_contract(
    rc: &RawContract,
    known: &HashSet<&str>,
    types: &SchemaBuilder,
) -> Result<Contract, ManifestError> {
    for service in std::iter::once(&rc.producer).chain(rc.consumers.iter()) {
        if !known.contains(service.as_str()) {
            return Err(ManifestError::UnknownService {
                contract: rc.id.clone(),
                service: service.clone(),
            });
        }
    }

    let direction = match rc.direction.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("outbound") => Direction::Outbound,
        Some("inbound") => Direction::Inbound,
        Some(other) => {
            return Err(ManifestError::InvalidDirection {
                contract: rc.id.clone(),
                direction: other.to_string(),
            })
        }
    };

    let verification = rc
        .verification
        .as_ref()
        .map(|rv| build_verification(&rc.id, rv))
        .transpose()?;

    let mut seen = HashSet::new();
    let mut endpoints = Vec::with_capacity(rc.endpoints.len());
    for re in &rc.endpoints {
        let endpoint = build_endpoint(&rc.id, re, types)?;
        if !seen.insert(endpoint.id()) {
            return Err(ManifestError::DuplicateEndpoint {
                contract: rc.id.clone(),
                endpoint: endpoint.id(),
            });
        }
        endpoints.push(endpoint);
    }

    Ok(Contract {
        id: rc.id.clone(),
        producer: rc.producer.clone(),
        consumers: rc.consumers.clone(),
        protocol: rc.protocol.clone().unwrap_or_else(|| "http".to_string()),
        direction,
        verification,
        endpoints,
    })
}

fn build_verification(contract: &str, rv: &RawVerification) -> Result<Verification, ManifestError> {
    let tolerance_seconds = match &rv.tolerance_seconds {
        None | Some(serde_yaml::Value::Null) => None,
        Some(value) => Some(value.as_u64().ok_or_else(|| ManifestError::InvalidTolerance {
            contract: contract.to_string(),
            value: serde_yaml::to_string(value)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
        })?),
    };
    Ok(Verification {
        method: rv.method.clone(),
        header: rv.header.clone(),
        timestamp_header: rv.timestamp_header.clone(),
        tolerance_seconds,
    })
}

fn build_endpoint(contract: &str, re: &RawEndpoint, types: &SchemaBuilder) -> Result<Endpoint, ManifestError> {
    let method = re.method.trim().to_ascii_uppercase();
    if !HTTP_METHODS.contains(&method.as_str()) {
        return Err(ManifestError::InvalidMethod {
            contract: contract.to_string(),
            method: re.method.clone(),
        });
    }
    let id = format!("{} {}", method, re.path);

    let mut status_codes = Vec::with_capacity(re.status_codes.len());
    for &code in &re.status_codes {
        if !(100..=599).contains(&code) {
            return Err(ManifestError::InvalidStatusCode {
                contract: contract.to_string(),
                endpoint: id.clone(),
                code,
            });
        }
        status_codes.push(code as u16);
    }

    let request = re
        .request
        .as_ref()
        .map(|p| types.build_payload(p, &format!("{contract} {id} request")))
        .transpose()?;

    let mut responses = BTreeMap::new();
    if let Some(body) = &re.response {
        let payload = types.build_payload(body, &format!("{contract} {id} response"))?;
        let success: Vec<u16> = status_codes
            .iter()
            .copied()
            .filter(|c| (200..300).contains(c))
            .collect();
        if success.is_empty() {
            responses.insert(200, payload);
        } else {
            for code in success {
                responses.insert(code, payload.clone());
            }
        }
    }
    for (code, body) in &re.responses.0 {
        let parsed: i64 = code.trim().parse().unwrap_or(-1);
        if !(100..=599).contains(&parsed) {
            return Err(ManifestError::InvalidStatusCode {
                contract: contract.to_string(),
                endpoint: id.clone(),
                code: parsed,
            });
        }
        let payload = types.build_payload(body, &format!("{contract} {id} response {code}"))?;
        responses.insert(parsed as u16, payload);
    }

    Ok(Endpoint {
        method,
        path: re.path.clone(),
        request,
        responses,
        status_codes,
    })
}

fn build_conventions(raw: &RawConventions, known: &HashSet<&str>) -> Result<Conventions, ManifestError> {
    let mut enum_case = BTreeMap::new();
    for (service, casing) in &raw.enum_case.0 {
        if !known.contains(service.as_str()) {
            return Err(ManifestError::UnknownCasingService(service.clone()));
        }
        let parsed = Casing::parse(casing).ok_or_else(|| ManifestError::UnknownCasing {
            service: service.clone(),
            casing: casing.clone(),
        })?;
        enum_case.insert(service.clone(), parsed);
    }
    Ok(Conventions {
        monetary_values: raw.monetary_values.clone(),
        weight: raw.weight.clone(),
        dimensions: raw.dimensions.clone(),
        country_codes: raw.country_codes.clone(),
        timestamps: raw.timestamps.clone(),
        enum_case,
    })
}

/// Builds [`FieldSchema`] trees, expanding `ref`s against the top-level
/// `types` map with an identity stack and a depth cap.
struct SchemaBuilder<'a> {
    types: &'a OrderedMap<RawField>,
    max_depth: usize,
}

impl SchemaBuilder<'_> {
    fn build_payload(&self, raw: &RawPayload, scope: &str) -> Result<Payload, ManifestError> {
        self.check_fields(&raw.fields, scope)?;
        let fields = raw
            .fields
            .0
            .iter()
            .map(|(name, field)| self.build_field(name, field, name, &mut Vec::new(), 0))
            .collect::<Result<_, _>>()?;
        Ok(Payload { fields })
    }

    fn check_fields(&self, fields: &OrderedMap<RawField>, scope: &str) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for (name, _) in &fields.0 {
            if !seen.insert(name.as_str()) {
                return Err(ManifestError::DuplicateField {
                    scope: scope.to_string(),
                    field: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn build_field(
        &self,
        name: &str,
        raw: &RawField,
        path: &str,
        visiting: &mut Vec<String>,
        depth: usize,
    ) -> Result<FieldSchema, ManifestError> {
        let field_type = parse_field_type(&raw.ty).ok_or_else(|| ManifestError::UnknownFieldType {
            path: path.to_string(),
            ty: raw.ty.clone(),
        })?;

        if !field_type.is_scalar() {
            if raw.range.is_some() {
                return Err(ManifestError::ScalarOnly {
                    path: path.to_string(),
                    attribute: "range",
                });
            }
            if raw.values.is_some() {
                return Err(ManifestError::ScalarOnly {
                    path: path.to_string(),
                    attribute: "values",
                });
            }
        }
        if raw.required && raw.default.is_some() && !raw.optional {
            return Err(ManifestError::RequiredWithDefault {
                path: path.to_string(),
            });
        }

        let range = raw.range.as_ref().map(|r| build_range(r, path)).transpose()?;
        let enum_values = raw
            .values
            .iter()
            .flatten()
            .map(yaml_scalar_to_string)
            .collect();

        let mut schema = FieldSchema {
            name: name.to_string(),
            field_type,
            format: raw.format.clone(),
            unit: raw.unit.clone(),
            range,
            enum_values,
            required: raw.required && !raw.optional,
            children: Vec::new(),
            items: None,
            type_ref: None,
            truncated: false,
        };

        match field_type {
            FieldType::Object => {
                if let Some(type_name) = &raw.type_ref {
                    schema.type_ref = Some(type_name.clone());
                    let target = self
                        .types
                        .0
                        .iter()
                        .find(|(n, _)| n == type_name)
                        .map(|(_, f)| f)
                        .ok_or_else(|| ManifestError::UnknownRef {
                            path: path.to_string(),
                            name: type_name.clone(),
                        })?;
                    if visiting.contains(type_name) || depth >= self.max_depth {
                        schema.truncated = true;
                        return Ok(schema);
                    }
                    visiting.push(type_name.clone());
                    let expanded = self.build_children(target.fields.as_ref(), path, visiting, depth);
                    visiting.pop();
                    schema.children = expanded?;
                } else if raw.fields.is_some() && depth >= self.max_depth {
                    schema.truncated = true;
                } else {
                    schema.children = self.build_children(raw.fields.as_ref(), path, visiting, depth)?;
                }
            }
            FieldType::Array => {
                if let Some(items) = &raw.items {
                    if depth >= self.max_depth {
                        schema.truncated = true;
                        return Ok(schema);
                    }
                    let item_path = format!("{path}[]");
                    let item = self.build_field("[]", items, &item_path, visiting, depth + 1)?;
                    schema.items = Some(Box::new(item));
                }
            }
            _ => {}
        }

        Ok(schema)
    }

    fn build_children(
        &self,
        fields: Option<&OrderedMap<RawField>>,
        path: &str,
        visiting: &mut Vec<String>,
        depth: usize,
    ) -> Result<Vec<FieldSchema>, ManifestError> {
        let Some(fields) = fields else {
            return Ok(Vec::new());
        };
        if depth >= self.max_depth {
            return Ok(Vec::new());
        }
        self.check_fields(fields, path)?;
        fields
            .0
            .iter()
            .map(|(name, f)| self.build_field(name, f, &format!("{path}.{name}"), visiting, depth + 1))
            .collect()
    }
}

fn parse_field_type(raw: &str) -> Option<FieldType> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "string" | "str" => Some(FieldType::String),
        "integer" | "int" => Some(FieldType::Integer),
        "number" | "float" | "double" | "decimal" => Some(FieldType::Number),
        "boolean" | "bool" => Some(FieldType::Boolean),
        "object" => Some(FieldType::Object),
        "array" | "list" => Some(FieldType::Array),
        "enum" => Some(FieldType::Enum),
        _ => None,
    }
}

fn build_range(raw: &RawRange, path: &str) -> Result<Range, ManifestError> {
    let range = match raw {
        RawRange::Bounds { min, max } => Range { min: *min, max: *max },
        RawRange::Pair(bounds) if bounds.len() == 2 => Range {
            min: bounds[0],
            max: bounds[1],
        },
        RawRange::Pair(_) => {
            return Err(ManifestError::InvalidRange {
                path: path.to_string(),
            })
        }
    };
    let inverted = matches!((range.min, range.max), (Some(lo), Some(hi)) if lo > hi);
    if inverted || (range.min.is_none() && range.max.is_none()) {
        return Err(ManifestError::InvalidRange {
            path: path.to_string(),
        });
    }
    Ok(range)
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
