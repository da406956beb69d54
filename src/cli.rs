use std::path::PathBuf;

use clap::Parser;

use crate::models::{Language, RuleId};

#[derive(Parser, Debug)]
#[command(
    name = "contract-checkr",
    about = "Check that services agree on the contracts they exchange",
    version
)]
pub struct Cli {
    /// Project path to scan
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Contract manifest (YAML); without it nothing is checked
    #[arg(long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Evaluate a single rule, e.g. CTR-dual-test
    #[arg(long, value_name = "RULE_ID", value_parser = parse_rule)]
    pub rule: Option<RuleId>,

    /// Run config file [default: ./.contract-checkr/config.toml, fallback ~/.config/contract-checkr/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Exclude a source language from extraction (repeatable)
    #[arg(long = "exclude-lang", value_name = "LANG")]
    pub exclude_lang: Vec<LanguageArg>,

    /// Extraction batch size [default: engine.jobs, else available parallelism]
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Print stage progress and a per-rule summary
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress progress and recovered-diagnostic logging
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

fn parse_rule(raw: &str) -> Result<RuleId, String> {
    raw.parse::<RuleId>().map_err(|_| {
        let known: Vec<&str> = RuleId::ALL.iter().map(|r| r.as_str()).collect();
        format!("unknown rule '{raw}' (expected one of: {})", known.join(", "))
    })
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum LanguageArg {
    Go,
    Typescript,
    Python,
    Java,
}

impl From<&LanguageArg> for Language {
    fn from(arg: &LanguageArg) -> Self {
        match arg {
            LanguageArg::Go => Language::Go,
            LanguageArg::Typescript => Language::TypeScript,
            LanguageArg::Python => Language::Python,
            LanguageArg::Java => Language::Java,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_full_surface() {
        let cli = Cli::try_parse_from([
            "contract-checkr",
            "repo",
            "--manifest",
            "contracts.yml",
            "--rule",
            "CTR-dual-test",
            "--exclude-lang",
            "java",
            "--exclude-lang",
            "python",
            "--report",
            "json",
            "--jobs",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.path, PathBuf::from("repo"));
        assert_eq!(cli.rule, Some(RuleId::DualTest));
        let langs: Vec<Language> = cli.exclude_lang.iter().map(Into::into).collect();
        assert_eq!(langs, vec![Language::Java, Language::Python]);
        assert!(matches!(cli.report, ReportFormat::Json));
        assert_eq!(cli.jobs, Some(3));
    }

    #[test]
    fn test_unknown_rule_is_rejected() {
        let err = Cli::try_parse_from(["contract-checkr", "--rule", "CTR-nope"]).unwrap_err();
        assert!(err.to_string().contains("CTR-nope"));
    }

    #[test]
    fn test_manifest_is_optional() {
        let cli = Cli::try_parse_from(["contract-checkr"]).unwrap();
        assert!(cli.manifest.is_none());
        assert_eq!(cli.path, PathBuf::from("."));
    }
}
