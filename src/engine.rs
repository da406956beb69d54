//! Run orchestration.
//!
//! Load the manifest (blocking, fatal on error), extract every source file
//! on the blocking pool in bounded batches, bind after a full barrier, then
//! compare each contract as its own blocking task over the shared manifest
//! and binding set. Output order never depends on task scheduling.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::binder::{Binder, Binding, BindingSet};
use crate::comparator::compare_contract;
use crate::config::Config;
use crate::conventions;
use crate::detector::{count_by_language, discover_sources, SourceCandidate};
use crate::emitter;
use crate::extractor::{ExtractorRegistry, FileExtraction, SourceFile};
use crate::manifest::{self, ContractManifest};
use crate::models::{Diagnostic, DiagnosticKind, Language, Mismatch, RuleId, SourceLocation, Violation};

/// What a run needs besides the configuration file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub manifest: PathBuf,
    /// Restrict evaluation to one rule.
    pub rule: Option<RuleId>,
    pub exclude_languages: Vec<Language>,
    /// Overrides `engine.jobs` when set.
    pub jobs: Option<usize>,
    /// Print `→` status lines on stderr.
    pub verbose: bool,
    /// Show an extraction progress bar.
    pub progress: bool,
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>, manifest: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest: manifest.into(),
            rule: None,
            exclude_languages: Vec::new(),
            jobs: None,
            verbose: false,
            progress: false,
        }
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct Report {
    pub violations: Vec<Violation>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// Run the engine end to end. A [`crate::error::ManifestError`] stays
/// reachable through the returned error's chain.
pub async fn run(options: &RunOptions, config: &Config) -> Result<Report> {
    let max_depth = config.engine.max_depth;

    let manifest_path = options.manifest.clone();
    let manifest = tokio::task::spawn_blocking(move || manifest::load(&manifest_path, max_depth))
        .await
        .context("manifest loader task failed")??;
    let manifest = Arc::new(manifest);
    info!(
        "manifest {}: {} services, {} contracts",
        manifest.source_path,
        manifest.services.len(),
        manifest.contracts.len()
    );

    let registry = Arc::new(ExtractorRegistry::new().without(&options.exclude_languages));
    let sources = discover_sources(&options.root, &registry, &config.engine.exclude);
    if options.verbose {
        for (language, count) in count_by_language(&sources) {
            eprintln!("  {} {} {} source files", "→".cyan(), language, count);
        }
    }

    let jobs = options.jobs.filter(|j| *j > 0).unwrap_or_else(|| config.engine.jobs());
    let (files, mut diagnostics) = extract_all(&registry, sources, jobs, options.progress).await?;

    let bindings = Binder::new(&manifest, &config.services, max_depth).bind(&files);
    if options.verbose {
        eprintln!("  {} {} bindings", "→".cyan(), bindings.bindings.len());
    }
    diagnostics.extend(bindings.diagnostics.iter().cloned());
    let bindings = Arc::new(bindings);

    let mut mismatches = compare_all(&manifest, &bindings).await?;
    if options.verbose {
        eprintln!("  {} {} contracts compared", "→".cyan(), manifest.contracts.len());
    }
    mismatches.extend(bindings.mismatches.iter().cloned());
    mismatches.extend(conventions::analyze(&manifest, &bindings));

    diagnostics.sort();
    diagnostics.dedup();
    Ok(Report {
        violations: emitter::emit(mismatches, config, options.rule),
        diagnostics,
    })
}

fn extract_one(registry: &ExtractorRegistry, source: &SourceCandidate) -> Result<FileExtraction, Diagnostic> {
    let text = std::fs::read_to_string(&source.path).map_err(|e| Diagnostic {
        kind: DiagnosticKind::UnreadableFile,
        location: SourceLocation::new(source.relative.clone(), 1, 1),
        message: e.to_string(),
    })?;
    let Some(extractor) = registry.get(source.language) else {
        return Err(Diagnostic {
            kind: DiagnosticKind::UnreadableFile,
            location: SourceLocation::new(source.relative.clone(), 1, 1),
            message: format!("no extractor for {}", source.language),
        });
    };
    let file = SourceFile {
        path: source.relative.clone(),
        text,
    };
    extractor.extract(&file).map_err(|e| Diagnostic {
        kind: DiagnosticKind::SourceParse,
        location: SourceLocation::new(e.path.clone(), e.line, 1),
        message: e.message,
    })
}

/// One blocking task per file, `jobs` files at a time. Results come back
/// sorted by path.
async fn extract_all(
    registry: &Arc<ExtractorRegistry>,
    sources: Vec<SourceCandidate>,
    jobs: usize,
    progress: bool,
) -> Result<(Vec<FileExtraction>, Vec<Diagnostic>)> {
    let pb = if progress {
        let pb = ProgressBar::new(sources.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut files = Vec::with_capacity(sources.len());
    let mut diagnostics = Vec::new();
    for batch in sources.chunks(jobs.max(1)) {
        let tasks: Vec<_> = batch
            .iter()
            .cloned()
            .map(|source| {
                let registry = Arc::clone(registry);
                tokio::task::spawn_blocking(move || extract_one(&registry, &source))
            })
            .collect();

        for result in join_all(tasks).await {
            match result.context("extraction task failed")? {
                Ok(file) => {
                    debug!("{}: {} observations, {} types", file.path, file.observations.len(), file.types.len());
                    files.push(file);
                }
                Err(diagnostic) => {
                    warn!("skipping {}: {} ({})", diagnostic.location.file, diagnostic.message, diagnostic.kind);
                    diagnostics.push(diagnostic);
                }
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }
    }

    if let Some(pb) = pb {
        pb.finish_with_message("Done");
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok((files, diagnostics))
}

/// One blocking task per contract.
async fn compare_all(manifest: &Arc<ContractManifest>, bindings: &Arc<BindingSet>) -> Result<Vec<Mismatch>> {
    let tasks: Vec<_> = manifest
        .contracts
        .iter()
        .map(|contract| {
            let manifest = Arc::clone(manifest);
            let bindings = Arc::clone(bindings);
            let id = contract.id.clone();
            tokio::task::spawn_blocking(move || {
                let Some(contract) = manifest.contract(&id) else {
                    return Vec::new();
                };
                let bound: Vec<&Binding> = bindings.for_contract(&id).collect();
                compare_contract(&manifest, contract, &bound)
            })
        })
        .collect();

    let mut out = Vec::new();
    for result in join_all(tasks).await {
        out.extend(result.context("comparison task failed")?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ManifestError;
    use crate::models::Severity;
    use std::fs;
    use std::path::Path;

    const MANIFEST: &str = r#"
services:
  - id: orders
    language: go
  - id: web
    language: typescript
contracts:
  - id: orders-api
    producer: orders
    consumers: [web]
    endpoints:
      - path: /orders/{id}
        method: GET
        status_codes: [200]
        response:
          fields:
            id: {type: string, required: true}
            amount: {type: integer, unit: cents, required: true}
"#;

    const GO_SERVER: &str = r#"package orders

type Order struct {
	ID     string `json:"id"`
	Amount int64  `json:"amount"`
}

func (h *Handler) Routes(mux *http.ServeMux) {
	mux.HandleFunc("GET /orders/{id}", h.getOrder)
}

func (h *Handler) getOrder(w http.ResponseWriter, r *http.Request) {
	order := Order{ID: "1", Amount: 1250}
	w.WriteHeader(http.StatusOK)
	json.NewEncoder(w).Encode(order)
}
"#;

    const GO_TEST: &str = r#"package orders

func TestGetOrder(t *testing.T) {
	req, _ := http.NewRequest("GET", "/orders/1", nil)
	_ = req
}
"#;

    const TS_CLIENT: &str = r#"
export interface Order {
  id: string;
  amount: number;
}

export async function getOrder(id: string): Promise<Order> {
  const res = await fetch(`/orders/${id}`);
  if (res.status === 200) {
    const order: Order = await res.json();
    return order;
  }
  throw new Error('failed');
}
"#;

    const TS_TEST: &str = r#"
describe('orders api', () => {
  it('loads an order', async () => {
    const res = await fetch('/orders/1');
  });
});
"#;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    /// A project where both sides agree with the manifest and each other.
    fn clean_project(manifest: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "contracts.yml", manifest);
        write(dir.path(), "orders/handler.go", GO_SERVER);
        write(dir.path(), "orders/handler_test.go", GO_TEST);
        write(dir.path(), "web/src/api.ts", TS_CLIENT);
        write(dir.path(), "web/src/api.test.ts", TS_TEST);
        dir
    }

    async fn check(dir: &Path) -> Report {
        let options = RunOptions::new(dir, dir.join("contracts.yml"));
        run(&options, &Config::default()).await.unwrap()
    }

    fn of_rule(report: &Report, rule: RuleId) -> Vec<&Violation> {
        report.violations.iter().filter(|v| v.rule_id == rule).collect()
    }

    #[tokio::test]
    async fn test_clean_corpus_has_no_violations() {
        let dir = clean_project(MANIFEST);
        let report = check(dir.path()).await;
        assert!(report.violations.is_empty(), "{:#?}", report.violations);
        assert!(report.diagnostics.is_empty(), "{:#?}", report.diagnostics);
    }

    #[tokio::test]
    async fn test_grams_read_as_kilograms() {
        let manifest = MANIFEST.replace(
            "            amount: {type: integer, unit: cents, required: true}\n",
            "            amount: {type: integer, unit: cents, required: true}\n            weight: {type: number, unit: grams, required: true}\n",
        );
        let dir = clean_project(&manifest);
        write(
            dir.path(),
            "orders/handler.go",
            &GO_SERVER.replace(
                "\tAmount int64  `json:\"amount\"`\n",
                "\tAmount int64  `json:\"amount\"`\n\tWeight float64 `json:\"weight\"`\n",
            ),
        );
        write(
            dir.path(),
            "web/src/api.ts",
            &TS_CLIENT.replace("  amount: number;\n", "  amount: number;\n  weight: number; // unit: kilograms\n"),
        );

        let report = check(dir.path()).await;
        let found = of_rule(&report, RuleId::StrictnessParity);
        assert_eq!(found.len(), 1, "{:#?}", report.violations);
        assert!(found[0].message.contains("'weight'"));
        assert!(found[0].message.contains("without /1000 conversion"));
        assert_eq!(found[0].file_path, "web/src/api.ts");
    }

    #[tokio::test]
    async fn test_cents_rendered_without_conversion() {
        let dir = clean_project(MANIFEST);
        write(
            dir.path(),
            "web/src/api.ts",
            &TS_CLIENT.replace("    return order;\n", "    console.log(`$${order.amount.toFixed(2)}`);\n    return order;\n"),
        );

        let report = check(dir.path()).await;
        let found = of_rule(&report, RuleId::StrictnessParity);
        assert_eq!(found.len(), 1, "{:#?}", report.violations);
        assert!(found[0].message.contains("amount"));
        assert!(found[0].message.contains("unit mismatch: cents rendered without /100 conversion"));
        assert_eq!(found[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_enum_case_and_lower_casing_evidence() {
        let manifest = format!(
            "{}            status: {{type: enum, values: [pending, in_transit], required: true}}\nconventions:\n  enum_case:\n    web: snake_case\n",
            MANIFEST
        );
        let server = GO_SERVER.replace(
            "\tAmount int64  `json:\"amount\"`\n",
            "\tAmount int64  `json:\"amount\"`\n\tStatus string `json:\"status\"`\n",
        );
        let client = TS_CLIENT.replace("  amount: number;\n", "  amount: number;\n  status: string;\n");
        let compare = "    if (order.status === 'IN_TRANSIT') {\n      console.log('on its way');\n    }\n    return order;\n";

        let dir = clean_project(&manifest);
        write(dir.path(), "orders/handler.go", &server);
        write(dir.path(), "web/src/api.ts", &client.replace("    return order;\n", compare));
        let report = check(dir.path()).await;
        let found = of_rule(&report, RuleId::StrictnessParity);
        assert_eq!(found.len(), 1, "{:#?}", report.violations);
        assert!(found[0].message.contains("IN_TRANSIT"));

        let lowered = format!("    const status = order.status.toLowerCase();\n{compare}");
        write(dir.path(), "web/src/api.ts", &client.replace("    return order;\n", &lowered));
        let report = check(dir.path()).await;
        assert!(of_rule(&report, RuleId::StrictnessParity).is_empty(), "{:#?}", report.violations);
    }

    #[tokio::test]
    async fn test_conversions_in_unrelated_functions_do_not_count() {
        let manifest = format!(
            "{}            weight: {{type: number, unit: grams, required: true}}\n            status: {{type: enum, values: [pending, in_transit], required: true}}\nconventions:\n  enum_case:\n    web: snake_case\n",
            MANIFEST
        );
        let server = GO_SERVER.replace(
            "\tAmount int64  `json:\"amount\"`\n",
            "\tAmount int64  `json:\"amount\"`\n\tWeight float64 `json:\"weight\"`\n\tStatus string `json:\"status\"`\n",
        );
        let client = TS_CLIENT
            .replace(
                "  amount: number;\n",
                "  amount: number;\n  weight: number; // unit: kilograms\n  status: string;\n",
            )
            .replace(
                "    return order;\n",
                "    if (order.status === 'IN_TRANSIT') {\n      console.log('on its way');\n    }\n    return order;\n",
            );
        let helpers = "\nexport function legacyParcel(p: { weight: number }) {\n  return p.weight / 1000;\n}\n\nexport function label(s: { status: string }) {\n  return s.status.toLowerCase();\n}\n";

        let dir = clean_project(&manifest);
        write(dir.path(), "orders/handler.go", &server);
        write(dir.path(), "web/src/api.ts", &format!("{client}{helpers}"));

        let report = check(dir.path()).await;
        let found = of_rule(&report, RuleId::StrictnessParity);
        assert_eq!(found.len(), 2, "{:#?}", report.violations);
        assert!(found.iter().any(|v| v.message.contains("without /1000 conversion")));
        assert!(found.iter().any(|v| v.message.contains("IN_TRANSIT")));
    }

    #[tokio::test]
    async fn test_unhandled_declared_status_codes() {
        let dir = clean_project(&MANIFEST.replace("status_codes: [200]", "status_codes: [200, 400, 402, 500]"));
        write(
            dir.path(),
            "web/src/api.ts",
            &TS_CLIENT.replace(
                "  throw new Error('failed');\n",
                "  if (res.status === 400) {\n    throw new Error('bad request');\n  }\n  throw new Error('failed');\n",
            ),
        );

        let report = check(dir.path()).await;
        let found = of_rule(&report, RuleId::StatusCodeHandling);
        assert_eq!(found.len(), 2, "{:#?}", report.violations);
        assert!(found.iter().any(|v| v.message.contains("402 is declared")));
        assert!(found.iter().any(|v| v.message.contains("500 is declared")));
    }

    #[tokio::test]
    async fn test_missing_required_response_field() {
        let dir = clean_project(MANIFEST);
        write(
            dir.path(),
            "orders/handler.go",
            &GO_SERVER
                .replace("\tAmount int64  `json:\"amount\"`\n", "")
                .replace(", Amount: 1250", ""),
        );

        let report = check(dir.path()).await;
        let found = of_rule(&report, RuleId::ResponseShape);
        assert!(
            found.iter().any(|v| v.message.contains("missing required field 'amount'")),
            "{:#?}",
            report.violations
        );
    }

    #[tokio::test]
    async fn test_output_is_deterministic() {
        let dir = clean_project(&MANIFEST.replace("status_codes: [200]", "status_codes: [200, 404]"));
        write(dir.path(), "web/src/api.test.ts", "");
        let first = serde_json::to_string(&check(dir.path()).await).unwrap();
        let second = serde_json::to_string(&check(dir.path()).await).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("CTR-status-code-handling"));
    }

    #[tokio::test]
    async fn test_unparsable_file_does_not_affect_others() {
        let dir = clean_project(&MANIFEST.replace("status_codes: [200]", "status_codes: [200, 404]"));
        let before = check(dir.path()).await;

        write(dir.path(), "web/src/broken.ts", "function broken() {\n");
        let after = check(dir.path()).await;
        assert_eq!(before.violations, after.violations);
        assert!(after
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::SourceParse && d.location.file == "web/src/broken.ts"));
    }

    #[tokio::test]
    async fn test_rule_filter_and_manifest_errors() {
        let dir = clean_project(&MANIFEST.replace("status_codes: [200]", "status_codes: [200, 404]"));
        let mut options = RunOptions::new(dir.path(), dir.path().join("contracts.yml"));
        options.rule = Some(RuleId::DualTest);
        let report = run(&options, &Config::default()).await.unwrap();
        assert!(report.violations.is_empty());

        write(dir.path(), "contracts.yml", "services: [");
        let err = run(&options, &Config::default()).await.unwrap_err();
        assert!(err.downcast_ref::<ManifestError>().is_some());
    }
}
