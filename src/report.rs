// Copyright 2023 - 2025 The faultline authors

//! Read-only views over the cache: result listings, diffs, JUnit XML and
//! the HTML report.

use std::fmt::Write as _;
use std::fs;

use anyhow::{anyhow, Context};
use camino::Utf8Path;
use console::style;
use itertools::Itertools;

use crate::cache::{Cache, MutantRecord};
use crate::mutant::Mutant;
use crate::options::Options;
use crate::source::SourceFile;
use crate::tester::MutantStatus;
use crate::visit::walk_file;
use crate::Result;

/// `results`: surviving, timed-out and suspicious mutants grouped by file
/// with pk ranges.
pub fn print_results(cache: &Cache) -> Result<()> {
    print!("{}", render_results(cache));
    Ok(())
}

fn render_results(cache: &Cache) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "To apply a mutant on disk:\n    faultline apply <id>\n");
    let _ = writeln!(out, "To show a mutant:\n    faultline show <id>\n");
    for (title, status) in [
        ("Survived", MutantStatus::Survived),
        ("Timeout", MutantStatus::Timeout),
        ("Suspicious", MutantStatus::Suspicious),
    ] {
        let mut section = String::new();
        for (file, records) in cache.records_by_file() {
            let pks: Vec<u64> = records
                .iter()
                .filter(|r| r.status == status)
                .map(|r| r.pk)
                .sorted()
                .collect();
            if !pks.is_empty() {
                let _ = writeln!(section, "---- {} ({}) ----\n", file, pks.len());
                let _ = writeln!(section, "{}\n", format_ranges(&pks));
            }
        }
        if !section.is_empty() {
            let _ = writeln!(out, "{}", style(title).bold());
            out.push_str(&section);
        }
    }
    out
}

/// `result-ids`: the pks of mutants with the given status, space-separated.
pub fn result_ids(cache: &Cache, status: &str) -> Result<String> {
    let status: MutantStatus = status
        .parse()
        .map_err(|_| anyhow!("invalid status {status:?}"))?;
    Ok(cache
        .records_by_file()
        .iter()
        .flat_map(|(_, records)| records.iter())
        .filter(|r| r.status == status)
        .map(|r| r.pk)
        .sorted()
        .join(" "))
}

/// Collapse sorted pks to ranges: `[1,2,3,5]` → `"1-3, 5"`.
pub fn format_ranges(pks: &[u64]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut run: Option<(u64, u64)> = None;
    for &pk in pks {
        run = match run {
            None => Some((pk, pk)),
            Some((start, end)) if pk == end + 1 => Some((start, pk)),
            Some((start, end)) => {
                parts.push(range_text(start, end));
                Some((pk, pk))
            }
        };
    }
    if let Some((start, end)) = run {
        parts.push(range_text(start, end));
    }
    parts.join(", ")
}

fn range_text(start: u64, end: u64) -> String {
    if start == end {
        format!("{start}")
    } else {
        format!("{start}-{end}")
    }
}

/// Re-generate the [Mutant] for a cached record by walking the file's
/// current content.
pub fn mutant_for_record(
    record: &MutantRecord,
    filename: &str,
    options: &Options,
) -> Result<Mutant> {
    let source_file = SourceFile::load(Utf8Path::new(filename))?;
    let mutants = walk_file(&source_file, options, None)?;
    mutants
        .into_iter()
        .find(|m| m.id.matches(&record.id))
        .ok_or_else(|| {
            anyhow!(
                "mutant {} no longer exists in {}; the file has changed",
                record.pk,
                filename
            )
        })
}

pub fn find_record<'a>(cache: &'a Cache, pk: u64) -> Result<(&'a str, &'a MutantRecord)> {
    cache
        .find_by_pk(pk)
        .ok_or_else(|| anyhow!("no mutant with id {pk} in the cache; run `faultline run` first"))
}

/// `show`: a unified diff of one mutant, all mutants, or one file's
/// mutants.
pub fn show(cache: &Cache, options: &Options, what: Option<&str>) -> Result<()> {
    match what {
        None | Some("all") => {
            for (file, records) in cache.records_by_file() {
                println!("{}", style(file).bold());
                for record in records {
                    show_record(record, file, options)?;
                }
            }
        }
        Some(arg) => {
            if let Ok(pk) = arg.parse::<u64>() {
                let (file, record) = find_record(cache, pk)?;
                show_record(record, file, options)?;
            } else {
                let records = cache
                    .records_by_file()
                    .into_iter()
                    .find(|(file, _)| *file == arg)
                    .map(|(_, records)| records.to_vec())
                    .ok_or_else(|| anyhow!("no cached mutants for {arg:?}"))?;
                for record in &records {
                    show_record(record, arg, options)?;
                }
            }
        }
    }
    Ok(())
}

fn show_record(record: &MutantRecord, filename: &str, options: &Options) -> Result<()> {
    match mutant_for_record(record, filename, options) {
        Ok(mutant) => {
            println!("# {} ({})", record.pk, record.status);
            let mutated = mutant.mutated_code()?;
            println!("{}", mutant.diff(&mutated));
        }
        Err(err) => println!("# {} ({}): {err}", record.pk, record.status),
    }
    Ok(())
}

/// JUnit XML: `tests` is the number of known mutants, `failures` the
/// number that survived, each with its diff.
pub fn junitxml(cache: &Cache, options: &Options) -> Result<String> {
    let total = cache.total_mutants();
    let failures = count_status(cache, MutantStatus::Survived);
    let mut out = String::new();
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="utf-8"?>"#);
    let _ = writeln!(
        out,
        r#"<testsuite name="faultline" tests="{total}" failures="{failures}" errors="0" disabled="0">"#,
    );
    for (file, records) in cache.records_by_file() {
        for record in records {
            let _ = write!(
                out,
                r#"  <testcase classname="{}" name="mutant {}" line="{}""#,
                xml_escape(file),
                record.pk,
                record.id.line_number + 1,
            );
            match record.status {
                MutantStatus::Survived => {
                    let detail = mutant_for_record(record, file, options)
                        .and_then(|m| {
                            let mutated = m.mutated_code()?;
                            Ok(m.diff(&mutated))
                        })
                        .unwrap_or_else(|err| err.to_string());
                    let _ = writeln!(
                        out,
                        ">\n    <failure message=\"mutant survived\">{}</failure>\n  </testcase>",
                        xml_escape(&detail),
                    );
                }
                MutantStatus::Skipped | MutantStatus::Untested => {
                    let _ = writeln!(out, ">\n    <skipped/>\n  </testcase>");
                }
                _ => {
                    let _ = writeln!(out, "/>");
                }
            }
        }
    }
    let _ = writeln!(out, "</testsuite>");
    Ok(out)
}

/// `html`: write `<dir>/index.html` with one row per file.
pub fn write_html_report(cache: &Cache, dir: &Utf8Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create report directory {dir:?}"))?;
    let mut rows = String::new();
    for (file, records) in cache.records_by_file() {
        let count = |status| records.iter().filter(|r| r.status == status).count();
        let surviving: Vec<u64> = records
            .iter()
            .filter(|r| r.status == MutantStatus::Survived)
            .map(|r| r.pk)
            .sorted()
            .collect();
        let _ = writeln!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            xml_escape(file),
            records.len(),
            count(MutantStatus::Killed),
            surviving.len(),
            count(MutantStatus::Timeout) + count(MutantStatus::Suspicious),
            count(MutantStatus::Skipped) + count(MutantStatus::Untested),
            xml_escape(&format_ranges(&surviving)),
        );
    }
    let page = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>faultline report</title></head>\n\
         <body><h1>faultline report</h1>\n\
         <table border=\"1\">\n\
         <tr><th>file</th><th>mutants</th><th>killed</th><th>survived</th><th>slow</th><th>skipped</th><th>surviving ids</th></tr>\n\
         {rows}</table></body></html>\n"
    );
    let path = dir.join("index.html");
    fs::write(&path, page).with_context(|| format!("write {path:?}"))?;
    Ok(())
}

fn count_status(cache: &Cache, status: MutantStatus) -> usize {
    cache
        .records_by_file()
        .iter()
        .flat_map(|(_, records)| records.iter())
        .filter(|r| r.status == status)
        .count()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
