//! Archive command implementation.
//!
//! Archives every selected course, continuing past failures, and prints a
//! YAML summary of the archived ones on stdout.

use anyhow::{Context, Result};
use colored::Colorize;
use naucse_core::{find_definitions, ArchivedCourse, Archiver, CliRuntime, Config, SystemClock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

/// Archives the courses whose slugs match `patterns` (all courses if empty).
pub async fn archive(config: Config, patterns: Vec<String>) -> Result<()> {
    let patterns = if patterns.is_empty() { vec!["*".to_string()] } else { patterns };
    let courses = find_definitions(&config.data_dir, &patterns).with_context(|| {
        format!("Failed to read course definitions in {}", config.data_dir.display())
    })?;
    if courses.is_empty() {
        anyhow::bail!("No courses match");
    }

    eprintln!(
        "{} {} course(s) to archive",
        "==>".bold().blue(),
        courses.len().to_string().yellow()
    );

    let runtime = Arc::new(CliRuntime::new(config.container_tool.clone()));
    let archiver = Archiver::new(config, runtime, Arc::new(SystemClock));

    let mut archived: BTreeMap<String, ArchivedCourse> = BTreeMap::new();
    let mut failed = Vec::new();
    for course in &courses {
        eprintln!("{} {}", "==>".bold().blue(), course.slug.green());
        match archiver.archive(course).await {
            Ok(info) => {
                eprintln!("{} {}", "✓".green(), course.slug);
                archived.insert(course.slug.clone(), info);
            }
            Err(e) => {
                error!(course = %course.slug, "Archiving failed: {}", e);
                eprintln!("{} Error archiving {}: {}", "✗".red(), course.slug.bold(), e);
                failed.push(course.slug.clone());
            }
        }
    }

    print!("{}", summary(&archived)?);

    if !failed.is_empty() {
        anyhow::bail!(
            "{} of {} course(s) failed: {}",
            failed.len(),
            courses.len(),
            failed.join(", ")
        );
    }
    Ok(())
}

/// YAML mapping of slug to archive info.
fn summary(archived: &BTreeMap<String, ArchivedCourse>) -> Result<String> {
    serde_yaml::to_string(archived).context("Failed to serialize summary")
}
