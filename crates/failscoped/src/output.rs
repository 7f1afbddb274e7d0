use std::io::Write;

use failscope_analysis::{CrossTab, GroupedFailureRate, SampleSizeByGroup, Summary};
use failscope_core::{FilterOptions, ppm};
use failscope_query::FrMatrix;
use failscope_store::ScopeRecord;
use serde::Serialize;

pub fn write_json<T: Serialize>(value: &T, out: &mut dyn Write) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)
}

pub fn write_scopes(scopes: &[ScopeRecord], out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "id\tname\tcreated_at\tissues\tstations")?;
    for scope in scopes {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            scope.id,
            normalize_field(&scope.name),
            scope.created_at,
            scope.issue_count,
            scope.station_count
        )?;
    }
    Ok(())
}

pub fn write_rate(rate: &GroupedFailureRate, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "{}\tfailures\ttotal_samples\tppm", rate.group_by.as_str())?;
    for (key, failures, samples) in rate.rows() {
        writeln!(
            out,
            "{}\t{failures}\t{samples}\t{}",
            normalize_field(key),
            ppm(failures, samples)
        )?;
    }
    Ok(())
}

pub fn write_cross_tab(table: &CrossTab, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        out,
        "{}\t{}\tspec_sn\tstrife_sn\ttotal\ttotal_samples",
        table.dimension1.as_str(),
        table.dimension2.as_str()
    )?;
    for cell in &table.cells {
        let first = table
            .dimension1_values
            .get(cell.dim1_index)
            .map(String::as_str)
            .unwrap_or_default();
        let second = table
            .dimension2_values
            .get(cell.dim2_index)
            .map(String::as_str)
            .unwrap_or_default();
        let samples = cell
            .denominator
            .or_else(|| table.denom_by_dim2.get(cell.dim2_index).copied())
            .unwrap_or(0);
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{samples}",
            normalize_field(first),
            normalize_field(second),
            cell.spec_sn,
            cell.strife_sn,
            cell.total
        )?;
    }
    Ok(())
}

pub fn write_samples(sizes: &SampleSizeByGroup, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "{}\ttotal_samples", sizes.group_by.as_str())?;
    for (key, samples) in sizes.keys.iter().zip(&sizes.total_samples) {
        writeln!(out, "{}\t{samples}", normalize_field(key))?;
    }
    Ok(())
}

/// Overview as `metric\tvalue` lines, then one `dimension\tkey\tfailures\ttotal_samples`
/// block per distribution and the status breakdown.
pub fn write_summary(summary: &Summary, out: &mut dyn Write) -> std::io::Result<()> {
    let overview = &summary.overview;
    writeln!(out, "metric\tvalue")?;
    for (metric, value) in [
        ("total_issues", overview.total_issues),
        ("spec_count", overview.spec_count),
        ("strife_count", overview.strife_count),
        ("spec_units", overview.spec_units),
        ("strife_units", overview.strife_units),
        ("station_count", overview.station_count),
        ("config_count", overview.config_count),
        ("symptom_count", overview.symptom_count),
        ("total_samples", overview.total_samples),
        ("spec_ppm", overview.spec_ppm),
        ("strife_ppm", overview.strife_ppm),
        ("overall_ppm", overview.overall_ppm),
    ] {
        writeln!(out, "{metric}\t{value}")?;
    }

    writeln!(out)?;
    writeln!(out, "dimension\tkey\tfailures\ttotal_samples")?;
    for (dimension, rate) in &summary.distributions {
        for (key, failures, samples) in rate.rows() {
            writeln!(
                out,
                "{}\t{}\t{failures}\t{samples}",
                dimension.as_str(),
                normalize_field(key)
            )?;
        }
    }

    writeln!(out)?;
    writeln!(out, "status\tcount")?;
    for status in &summary.status_breakdown {
        writeln!(out, "{}\t{}", normalize_field(&status.status), status.count)?;
    }

    if let Some(trend) = &summary.trend {
        writeln!(out)?;
        writeln!(out, "period\ttotal\tspec_units\tstrife_units")?;
        for bucket in &trend.buckets {
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                bucket.period, bucket.total, bucket.spec_units, bucket.strife_units
            )?;
        }
    }
    Ok(())
}

pub fn write_options(options: &FilterOptions, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "field\tvalue")?;
    for (field, values) in &options.values {
        for value in values {
            writeln!(out, "{}\t{}", field.as_str(), normalize_field(value))?;
        }
    }
    Ok(())
}

pub fn write_matrix(matrix: &FrMatrix, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "scope\tconfig\tfailures\ttotal_samples\tppm")?;
    for [scope_index, config_index, failures, samples] in &matrix.rows {
        let scope = matrix
            .scopes
            .get(*scope_index as usize)
            .map(ToString::to_string)
            .unwrap_or_default();
        let config = matrix
            .configs
            .get(*config_index as usize)
            .map(String::as_str)
            .unwrap_or_default();
        writeln!(
            out,
            "{scope}\t{}\t{failures}\t{samples}\t{}",
            normalize_field(config),
            ppm(*failures, *samples)
        )?;
    }
    Ok(())
}

fn normalize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
