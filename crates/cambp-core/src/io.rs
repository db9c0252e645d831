//! CSV loading and export.
//!
//! Input tables are read into typed rows here; everything past this module
//! works on [`FeatureTable`], [`ReferenceBeat`] and the waveform structs.

use std::io::{BufRead, Read, Write};

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};

use crate::error::PipelineError;
use crate::pipeline::MethodSummary;
use crate::reference::{AlignedReference, ReferenceBeat};
use crate::table::{detect_time_column, FeatureRow, FeatureTable, DEFAULT_GROUP};
use crate::waveform::{FingerWave, PhoneWave};

pub const BEAT_TIME_COLUMN: &str = "Time [s]";
pub const BEAT_SBP_COLUMN: &str = "Beat Sys [mmHg]";
pub const BEAT_DBP_COLUMN: &str = "Beat Dia [mmHg]";
pub const SOURCE_FILE_COLUMN: &str = "source_file";
/// Column prefixes of the phone feature-extraction methods.
pub const METHOD_COLUMN_PREFIXES: [&str; 3] = ["M1_", "M2_", "M3_"];

/// Empty or unparsable cells become NaN.
fn parse_cell(cell: &str) -> f64 {
    let cell = cell.trim().trim_matches('"');
    if cell.is_empty() {
        return f64::NAN;
    }
    cell.parse().unwrap_or(f64::NAN)
}

fn finite_cell(cell: Option<&str>) -> Option<f64> {
    cell.map(parse_cell).filter(|v| v.is_finite())
}

fn format_cell(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::new()
    }
}

fn clean_headers(record: &StringRecord) -> Vec<String> {
    record
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().trim_matches('"').trim().to_string())
        .collect()
}

fn require(headers: &[String], name: &str) -> Result<usize, PipelineError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
}

/// Load a training table keeping the `feature_columns` that exist, followed
/// by any other method-prefixed column so feature outlier rejection sees
/// every method feature.
///
/// The time column is auto-detected and converted to seconds; rows whose
/// time cannot be parsed are dropped. Without `group_column` every row lands
/// in [`DEFAULT_GROUP`].
pub fn read_feature_table<R: Read>(
    reader: R,
    feature_columns: &[String],
    group_column: &str,
) -> Result<FeatureTable, PipelineError> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let headers = clean_headers(rdr.headers()?);

    let time_source = detect_time_column(&headers);
    let time_idx = time_source
        .as_ref()
        .and_then(|src| headers.iter().position(|h| h == &src.column));
    let group_idx = headers.iter().position(|h| h == group_column);
    let sbp_idx = headers.iter().position(|h| h == "ref_SBP");
    let dbp_idx = headers.iter().position(|h| h == "ref_DBP");

    let (mut names, mut columns): (Vec<String>, Vec<usize>) = feature_columns
        .iter()
        .filter_map(|f| headers.iter().position(|h| h == f).map(|i| (f.clone(), i)))
        .unzip();
    if names.len() < feature_columns.len() {
        log::debug!(
            "feature columns absent from input: present={} requested={}",
            names.len(),
            feature_columns.len()
        );
    }
    for (i, h) in headers.iter().enumerate() {
        if METHOD_COLUMN_PREFIXES.iter().any(|p| h.starts_with(p)) && !names.contains(h) {
            names.push(h.clone());
            columns.push(i);
        }
    }
    if group_idx.is_none() {
        log::warn!("no group column, using single group: column={} group={}", group_column, DEFAULT_GROUP);
    }

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in rdr.records() {
        let record = record?;
        let elapsed_s = match (&time_source, time_idx) {
            (Some(src), Some(i)) => {
                let t = record.get(i).map(parse_cell).unwrap_or(f64::NAN);
                if !t.is_finite() {
                    dropped += 1;
                    continue;
                }
                Some(src.unit.to_seconds(t))
            }
            _ => None,
        };
        let group = group_idx
            .and_then(|i| record.get(i))
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_GROUP)
            .to_string();
        rows.push(FeatureRow {
            group,
            elapsed_s,
            features: columns
                .iter()
                .map(|&i| record.get(i).map(parse_cell).unwrap_or(f64::NAN))
                .collect(),
            ref_sbp: finite_cell(sbp_idx.and_then(|i| record.get(i))),
            ref_dbp: finite_cell(dbp_idx.and_then(|i| record.get(i))),
        });
    }
    if dropped > 0 {
        log::warn!("rows without a valid time dropped: count={}", dropped);
    }
    log::info!(
        "feature table loaded: rows={} features={} time_column={}",
        rows.len(),
        names.len(),
        time_source.as_ref().map(|s| s.column.as_str()).unwrap_or("none")
    );

    FeatureTable::new(names, time_source, rows)
}

/// Load a beat-to-beat monitor export (`;` separated, quoted headers).
///
/// Rows with an unparsable time are dropped; missing pressures stay `None`.
pub fn read_beats<R: Read>(reader: R) -> Result<Vec<ReferenceBeat>, PipelineError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b';')
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = clean_headers(rdr.headers()?);
    let t_idx = require(&headers, BEAT_TIME_COLUMN)?;
    let s_idx = require(&headers, BEAT_SBP_COLUMN)?;
    let d_idx = require(&headers, BEAT_DBP_COLUMN)?;

    let mut beats = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let time_s = record.get(t_idx).map(parse_cell).unwrap_or(f64::NAN);
        if !time_s.is_finite() {
            continue;
        }
        beats.push(ReferenceBeat {
            time_s,
            sbp: finite_cell(record.get(s_idx)),
            dbp: finite_cell(record.get(d_idx)),
        });
    }
    log::debug!("beats loaded: count={}", beats.len());
    Ok(beats)
}

/// Whitespace-separated finger export; the first `n_channels` numeric
/// columns of each line. Lines that do not parse are skipped.
pub fn read_finger_wave<R: BufRead>(reader: R, n_channels: usize) -> Result<FingerWave, PipelineError> {
    let mut channels = vec![Vec::new(); n_channels];
    let mut skipped = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let values: Vec<f64> = line
            .split_whitespace()
            .take(n_channels)
            .map(|v| v.parse::<f64>().unwrap_or(f64::NAN))
            .collect();
        if values.len() < n_channels || values.iter().all(|v| v.is_nan()) {
            skipped += 1;
            continue;
        }
        for (channel, v) in channels.iter_mut().zip(values) {
            channel.push(v);
        }
    }
    if skipped > 0 {
        log::debug!("finger lines skipped: count={}", skipped);
    }
    if channels.first().map_or(true, |c| c.is_empty()) {
        return Err(PipelineError::NoValidRows("finger waveform parsing".to_string()));
    }
    Ok(FingerWave { channels })
}

/// Phone waveform CSV with a time column and one column per channel.
pub fn read_phone_wave<R: Read>(
    reader: R,
    time_column: &str,
    channels: &[String],
) -> Result<PhoneWave, PipelineError> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let headers = clean_headers(rdr.headers()?);
    let t_idx = require(&headers, time_column)?;
    let c_idx = channels
        .iter()
        .map(|c| require(&headers, c))
        .collect::<Result<Vec<_>, _>>()?;

    let mut wave = PhoneWave {
        times: Vec::new(),
        channels: vec![Vec::new(); channels.len()],
    };
    for record in rdr.records() {
        let record = record?;
        let t = record.get(t_idx).map(parse_cell).unwrap_or(f64::NAN);
        if !t.is_finite() {
            continue;
        }
        wave.times.push(t);
        for (out, &i) in wave.channels.iter_mut().zip(c_idx.iter()) {
            out.push(record.get(i).map(parse_cell).unwrap_or(f64::NAN));
        }
    }
    Ok(wave)
}

/// Untyped CSV table, used where all input columns must survive to output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    headers: Vec<String>,
    records: Vec<Vec<String>>,
}

impl RawTable {
    pub fn read<R: Read>(reader: R) -> Result<Self, PipelineError> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).flexible(true).from_reader(reader);
        let headers = clean_headers(rdr.headers()?);
        let width = headers.len();
        let mut records = Vec::new();
        for record in rdr.records() {
            let mut cells: Vec<String> = record?.iter().map(str::to_string).collect();
            cells.resize(width, String::new());
            records.push(cells);
        }
        Ok(Self { headers, records })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        let i = self.column_index(name)?;
        Some(self.records.iter().map(|r| parse_cell(&r[i])).collect())
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        let i = self.column_index(name)?;
        self.records.get(row).map(|r| r[i].as_str())
    }

    /// Replace `name` in place, or append it as the last column.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> Result<(), PipelineError> {
        if values.len() != self.records.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: self.records.len(),
                got: values.len(),
            });
        }
        let i = match self.column_index(name) {
            Some(i) => i,
            None => {
                self.headers.push(name.to_string());
                self.records.iter_mut().for_each(|r| r.push(String::new()));
                self.headers.len() - 1
            }
        };
        for (record, v) in self.records.iter_mut().zip(values) {
            record[i] = v;
        }
        Ok(())
    }

    pub fn retain_rows<F: FnMut(&[String]) -> bool>(&mut self, mut keep: F) {
        self.records.retain(|r| keep(r.as_slice()));
    }

    /// Row-wise union; headers in first-seen order, absent cells empty.
    pub fn concat(tables: Vec<RawTable>) -> RawTable {
        let mut headers: Vec<String> = Vec::new();
        for t in &tables {
            for h in &t.headers {
                if !headers.contains(h) {
                    headers.push(h.clone());
                }
            }
        }
        let mut records = Vec::new();
        for t in tables {
            let map: Vec<Option<usize>> = headers.iter().map(|h| t.column_index(h)).collect();
            for r in t.records {
                records.push(
                    map.iter()
                        .map(|i| i.map(|i| r[i].clone()).unwrap_or_default())
                        .collect(),
                );
            }
        }
        RawTable { headers, records }
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<(), PipelineError> {
        let mut wtr = WriterBuilder::new().from_writer(writer);
        wtr.write_record(&self.headers)?;
        for r in &self.records {
            wtr.write_record(r)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Turn one phone training export into merged training rows.
///
/// Rows without a valid time are dropped. Adds `ref_SBP`, `ref_DBP`,
/// `subject_id` (the session key), `source_file`, and `timestamp` in
/// milliseconds when the input has none. Without a `reference` the session
/// is kept with empty reference columns. Returns the number of rows that
/// received both reference values.
pub fn attach_reference_columns(
    table: &mut RawTable,
    reference: Option<&AlignedReference>,
    session_key: &str,
    source_file: &str,
) -> Result<usize, PipelineError> {
    let source = detect_time_column(table.headers())
        .ok_or_else(|| PipelineError::MissingColumn("経過時間_秒".to_string()))?;
    let t_idx = require(table.headers(), &source.column)?;
    table.retain_rows(|r| parse_cell(&r[t_idx]).is_finite());

    let times: Vec<f64> = table
        .records
        .iter()
        .map(|r| source.unit.to_seconds(parse_cell(&r[t_idx])))
        .collect();
    let (sbp, dbp) = match reference {
        Some(r) => r.interpolate(&times),
        None => (vec![f64::NAN; times.len()], vec![f64::NAN; times.len()]),
    };
    let covered = sbp
        .iter()
        .zip(dbp.iter())
        .filter(|(s, d)| s.is_finite() && d.is_finite())
        .count();

    let n = table.len();
    table.set_column("ref_SBP", sbp.into_iter().map(format_cell).collect())?;
    table.set_column("ref_DBP", dbp.into_iter().map(format_cell).collect())?;
    table.set_column("subject_id", vec![session_key.to_string(); n])?;
    if table.column_index("timestamp").is_none() {
        let ms = times.iter().map(|t| format_cell((t * 1000.0).round())).collect();
        table.set_column("timestamp", ms)?;
    }
    table.set_column(SOURCE_FILE_COLUMN, vec![source_file.to_string(); n])?;

    log::info!(
        "reference attached: session={} rows={} covered={}",
        session_key,
        n,
        covered
    );
    Ok(covered)
}

pub fn write_summary<W: Write>(writer: W, summary: &[MethodSummary]) -> Result<(), PipelineError> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    for line in summary {
        wtr.serialize(line)?;
    }
    wtr.flush()?;
    Ok(())
}
