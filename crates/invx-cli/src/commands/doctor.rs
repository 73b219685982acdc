//! Doctor command - check external tools and credentials.

use std::process::Command;

use clap::Args;
use console::style;
use serde::Serialize;

use invx_core::models::config::{InvxConfig, RasterizerKind};
use invx_core::ocr;
use invx_core::{Capability, CapabilityResolver, CapabilityStatus, SystemResolver};

use super::load_config;

/// Arguments for the doctor command.
#[derive(Args)]
pub struct DoctorArgs {
    /// Output results as JSON
    #[arg(long)]
    json: bool,
}

/// Status of a diagnostic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Warning,
    Fail,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "{}", style("✓").green()),
            CheckStatus::Warning => write!(f, "{}", style("⚠").yellow()),
            CheckStatus::Fail => write!(f, "{}", style("✗").red()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct DiagnosticCheck {
    name: String,
    status: CheckStatus,
    message: String,
    recommendation: Option<String>,
}

pub async fn run(args: DoctorArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let checks = run_checks(&config);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&checks)?);
        return Ok(());
    }

    for check in &checks {
        println!("{} {:<12} {}", check.status, check.name, check.message);
    }

    let recommendations: Vec<&str> = checks.iter().filter_map(|c| c.recommendation.as_deref()).collect();
    if !recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for (i, rec) in recommendations.iter().enumerate() {
            println!("  {}. {}", i + 1, rec.replace('\n', "\n     "));
        }
    }

    Ok(())
}

fn run_checks(config: &InvxConfig) -> Vec<DiagnosticCheck> {
    let resolver = SystemResolver::new(config.capabilities.clone());

    let mut checks = vec![DiagnosticCheck {
        name: "ocr engine".to_string(),
        status: CheckStatus::Pass,
        message: if ocr::NATIVE_ENGINE {
            format!("libtesseract, in-process ({})", config.ocr.language)
        } else {
            format!("tesseract command line ({})", config.ocr.language)
        },
        recommendation: None,
    }];

    // The binary is only a fallback when tesseract is linked in.
    checks.push(check_capability(&resolver, Capability::Tesseract, !ocr::NATIVE_ENGINE));

    // pdftoppm only matters with the poppler rasterizer.
    let needs_poppler = config.pdf.rasterizer == RasterizerKind::Poppler;
    checks.push(check_capability(&resolver, Capability::Pdftoppm, needs_poppler));

    let key_set = std::env::var(&config.structuring.api_key_env)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    checks.push(if key_set {
        DiagnosticCheck {
            name: "api key".to_string(),
            status: CheckStatus::Pass,
            message: format!("{} is set (model {})", config.structuring.api_key_env, config.structuring.model),
            recommendation: None,
        }
    } else {
        DiagnosticCheck {
            name: "api key".to_string(),
            status: CheckStatus::Fail,
            message: format!("{} is not set", config.structuring.api_key_env),
            recommendation: Some(format!(
                "Export {} with a Gemini API key to enable structuring",
                config.structuring.api_key_env
            )),
        }
    });

    checks
}

fn check_capability(resolver: &dyn CapabilityResolver, capability: Capability, required: bool) -> DiagnosticCheck {
    match resolver.resolve(capability) {
        CapabilityStatus::Available(path) => DiagnosticCheck {
            name: capability.to_string(),
            status: CheckStatus::Pass,
            message: match tool_version(&path) {
                Some(version) => format!("{} ({})", version, path.display()),
                None => path.display().to_string(),
            },
            recommendation: None,
        },
        CapabilityStatus::Unavailable { reason } => DiagnosticCheck {
            name: capability.to_string(),
            status: if required { CheckStatus::Fail } else { CheckStatus::Warning },
            message: reason,
            recommendation: Some(capability.remediation().to_string()),
        },
    }
}

/// First line of `<tool> -v`; both tools print their version this way.
fn tool_version(path: &std::path::Path) -> Option<String> {
    let output = Command::new(path).arg("-v").output().ok()?;
    // pdftoppm writes its version to stderr, tesseract to stdout.
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    text.lines().next().map(|l| l.trim().to_string()).filter(|l| !l.is_empty())
}
