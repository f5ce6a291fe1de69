//! Source Reader: tick exports on disk (CSV, gzip CSV, Parquet) streamed as ascending
//! chunks.
//!
//! A source is one path, a glob pattern or an explicit list of paths. Pattern matches
//! are visited in filename order. Every chunk stays inside one file; with no chunk size
//! the whole source is a single chunk. Files stored newest-first are read from the end
//! when `reverse` is set so the chunk sequence is still ascending.

use crate::parquet::{read_series_file, read_series_rows, row_count, write_series_file};
use chrono::SecondsFormat;
use csv::{Position, ReaderBuilder, StringRecord, Trim};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tc_types::time::{ns_to_dt, parse_timestamp};
use tc_types::{Column, ColumnData, StoreError, TickSeries, TimeRange, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Path(PathBuf),
    Pattern(String),
    Paths(Vec<PathBuf>),
}

impl From<&str> for SourceRef {
    fn from(s: &str) -> Self {
        if s.contains(['*', '?', '[']) {
            SourceRef::Pattern(s.to_string())
        } else {
            SourceRef::Path(PathBuf::from(s))
        }
    }
}

impl From<String> for SourceRef {
    fn from(s: String) -> Self {
        SourceRef::from(s.as_str())
    }
}

impl From<PathBuf> for SourceRef {
    fn from(p: PathBuf) -> Self {
        SourceRef::Path(p)
    }
}

impl From<&Path> for SourceRef {
    fn from(p: &Path) -> Self {
        SourceRef::Path(p.to_path_buf())
    }
}

impl From<Vec<PathBuf>> for SourceRef {
    fn from(p: Vec<PathBuf>) -> Self {
        SourceRef::Paths(p)
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceRef::Path(p) => write!(f, "{}", p.display()),
            SourceRef::Pattern(p) => f.write_str(p),
            SourceRef::Paths(ps) => write!(f, "{} files", ps.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    CsvGz,
    Parquet,
}

impl FileFormat {
    pub fn of(path: &Path) -> Result<Self, StoreError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if name.ends_with(".gz") {
            Ok(FileFormat::CsvGz)
        } else if name.ends_with(".parquet") || name.ends_with(".pq") {
            Ok(FileFormat::Parquet)
        } else if name.ends_with(".csv") || name.ends_with(".txt") {
            Ok(FileFormat::Csv)
        } else {
            Err(StoreError::source_format(
                path.display(),
                "unsupported extension (expected .csv, .csv.gz or .parquet)",
            ))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Rows per chunk; `None` yields the whole source as one chunk.
    pub chunk_size: Option<usize>,
    /// Files are stored in descending timestamp order.
    pub reverse: bool,
    /// Only rows inside `[start, finish]` are yielded.
    pub range: Option<TimeRange>,
}

pub struct SourceReader {
    files: Vec<PathBuf>,
    opts: SourceOptions,
}

fn resolve(source: &SourceRef) -> Result<Vec<PathBuf>, StoreError> {
    let files = match source {
        SourceRef::Path(p) => vec![p.clone()],
        SourceRef::Paths(ps) => ps.clone(),
        SourceRef::Pattern(pattern) => {
            let paths = glob::glob(pattern)
                .map_err(|e| StoreError::source_format(pattern, e.to_string()))?;
            let mut files = Vec::new();
            for entry in paths {
                let path = entry.map_err(|e| StoreError::source_format(pattern, e.to_string()))?;
                if path.is_file() {
                    files.push(path);
                }
            }
            files.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
            files
        }
    };
    if files.is_empty() {
        return Err(StoreError::SourceNotFound(source.to_string()));
    }
    if let Some(missing) = files.iter().find(|p| !p.is_file()) {
        return Err(StoreError::SourceNotFound(missing.display().to_string()));
    }
    Ok(files)
}

impl SourceReader {
    pub fn open(source: &SourceRef, opts: SourceOptions) -> Result<Self, StoreError> {
        let files = resolve(source)?;
        for f in &files {
            FileFormat::of(f)?;
        }
        tracing::info!(%source, files = files.len(), chunk_size = ?opts.chunk_size, reverse = opts.reverse, "resolved source");
        Ok(Self { files, opts })
    }

    /// Single-pass chunk sequence; call again to restart from the first file.
    pub fn chunks(&self) -> ChunkCursor {
        ChunkCursor {
            files: self.files.clone().into(),
            opts: self.opts.clone(),
            current: None,
            whole_done: false,
            failed: false,
        }
    }

    /// Every chunk concatenated in order.
    pub fn read_all(&self) -> Result<TickSeries, StoreError> {
        let parts = self.chunks().collect::<Result<Vec<_>, _>>()?;
        TickSeries::concat(parts)
    }
}

/// Reads a whole source, optionally restricted to `range`.
pub fn read(source: &SourceRef, range: Option<&TimeRange>) -> Result<TickSeries, StoreError> {
    let opts = SourceOptions {
        range: range.copied(),
        ..SourceOptions::default()
    };
    SourceReader::open(source, opts)?.read_all()
}

// --------- CSV decoding ---------

struct Header {
    names: Vec<String>,
    ts_idx: usize,
}

impl Header {
    fn from_record(path: &Path, rec: &StringRecord) -> Result<Self, StoreError> {
        if rec.is_empty() {
            return Err(StoreError::source_format(path.display(), "missing header row"));
        }
        let names: Vec<String> = rec
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = h.trim();
                if h.is_empty() {
                    format!("col{i}")
                } else {
                    h.to_string()
                }
            })
            .collect();
        let ts_idx = crate::parquet::timestamp_column_index(&names);
        Ok(Self { names, ts_idx })
    }
}

fn csv_err(path: &Path, e: csv::Error) -> StoreError {
    StoreError::source_format(path.display(), e.to_string())
}

fn open_err(path: &Path, e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::NotFound {
        StoreError::SourceNotFound(path.display().to_string())
    } else {
        StoreError::source_format(path.display(), e.to_string())
    }
}

fn csv_reader<R: Read>(r: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(r)
}

fn open_input(path: &Path) -> Result<Box<dyn Read>, StoreError> {
    let file = File::open(path).map_err(|e| open_err(path, e))?;
    if FileFormat::of(path)? == FileFormat::CsvGz {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn read_header<R: Read>(path: &Path, reader: &mut csv::Reader<R>) -> Result<Header, StoreError> {
    let rec = reader.headers().map_err(|e| csv_err(path, e))?.clone();
    Header::from_record(path, &rec)
}

fn read_records<R: Read>(
    path: &Path,
    reader: &mut csv::Reader<R>,
    max: usize,
) -> Result<Vec<StringRecord>, StoreError> {
    let mut out = Vec::with_capacity(max.min(1 << 16));
    while out.len() < max {
        let mut rec = StringRecord::new();
        if !reader.read_record(&mut rec).map_err(|e| csv_err(path, e))? {
            break;
        }
        out.push(rec);
    }
    Ok(out)
}

/// Builds a series from raw rows. A column is float when every non-empty cell parses.
fn build_chunk(path: &Path, header: &Header, records: &[StringRecord]) -> Result<TickSeries, StoreError> {
    let mut timestamps = Vec::with_capacity(records.len());
    for rec in records {
        let cell = rec.get(header.ts_idx).unwrap_or_default();
        let ts = parse_timestamp(cell).ok_or_else(|| {
            let line = rec.position().map_or(0, |p| p.line());
            StoreError::source_format(path.display(), format!("line {line}: bad timestamp '{cell}'"))
        })?;
        timestamps.push(ts);
    }

    let mut columns = Vec::with_capacity(header.names.len().saturating_sub(1));
    for (j, name) in header.names.iter().enumerate() {
        if j == header.ts_idx {
            continue;
        }
        let cells = records.iter().map(|r| r.get(j).unwrap_or_default().trim());
        let floats: Option<Vec<Option<f64>>> = cells
            .clone()
            .map(|c| {
                if c.is_empty() {
                    Some(None)
                } else {
                    c.parse::<f64>().ok().map(Some)
                }
            })
            .collect();
        let data = match floats {
            Some(values) => ColumnData::Float(values),
            None => ColumnData::Text(
                cells
                    .map(|c| (!c.is_empty()).then(|| c.to_string()))
                    .collect(),
            ),
        };
        columns.push(Column::new(name.clone(), data));
    }
    TickSeries::new(timestamps, columns)
        .map_err(|e| StoreError::source_format(path.display(), e.to_string()))
}

// --------- chunk cursor ---------

/// One chunk to read back from a file read in reverse.
struct ChunkPlan {
    position: Position,
    rows: usize,
}

enum FileChunks {
    CsvForward {
        path: PathBuf,
        header: Header,
        reader: csv::Reader<Box<dyn Read>>,
    },
    CsvReverse {
        path: PathBuf,
        header: Header,
        /// Decompressed copy of a gzip source; removed when the file is done.
        spool: Option<NamedTempFile>,
        plan: VecDeque<ChunkPlan>,
    },
    Parquet {
        path: PathBuf,
        plan: VecDeque<(usize, usize)>,
    },
}

fn plan_offsets(total: usize, chunk: usize) -> VecDeque<(usize, usize)> {
    (0..total)
        .step_by(chunk)
        .map(|start| (start, chunk.min(total - start)))
        .collect()
}

impl FileChunks {
    fn open(path: &Path, chunk: usize, reverse: bool) -> Result<Self, StoreError> {
        let format = FileFormat::of(path)?;
        if format == FileFormat::Parquet {
            let total = row_count(path).map_err(|e| StoreError::source_format(path.display(), e.to_string()))?;
            return Ok(FileChunks::Parquet {
                path: path.to_path_buf(),
                plan: plan_offsets(total, chunk),
            });
        }
        if !reverse {
            let mut reader = csv_reader(open_input(path)?);
            let header = read_header(path, &mut reader)?;
            return Ok(FileChunks::CsvForward {
                path: path.to_path_buf(),
                header,
                reader,
            });
        }
        // gzip has no random access: decompress once so every chunk can seek.
        let spool = match format {
            FileFormat::CsvGz => Some(spool_gzip(path)?),
            _ => None,
        };
        let plain = spool.as_ref().map_or(path, |t| t.path());
        let mut reader = csv_reader(File::open(plain).map_err(|e| open_err(path, e))?);
        let header = read_header(path, &mut reader)?;
        // Counting pass: remember where every chunk starts.
        let mut plan: VecDeque<ChunkPlan> = VecDeque::new();
        let mut rec = StringRecord::new();
        let mut count = 0usize;
        loop {
            let position = reader.position().clone();
            if !reader.read_record(&mut rec).map_err(|e| csv_err(path, e))? {
                break;
            }
            if count % chunk == 0 {
                plan.push_back(ChunkPlan {
                    position,
                    rows: 0,
                });
            }
            if let Some(last) = plan.back_mut() {
                last.rows += 1;
            }
            count += 1;
        }
        tracing::debug!(path=%path.display(), rows = count, chunks = plan.len(), "planned reverse read");
        Ok(FileChunks::CsvReverse {
            path: path.to_path_buf(),
            header,
            spool,
            plan,
        })
    }

    fn next(&mut self, chunk: usize, reverse: bool) -> Option<Result<TickSeries, StoreError>> {
        match self {
            FileChunks::CsvForward {
                path,
                header,
                reader,
            } => match read_records(path, reader, chunk) {
                Ok(records) if records.is_empty() => None,
                Ok(records) => Some(build_chunk(path, header, &records)),
                Err(e) => Some(Err(e)),
            },
            FileChunks::CsvReverse {
                path,
                header,
                spool,
                plan,
            } => {
                let step = plan.pop_back()?;
                let plain = spool.as_ref().map_or(path.as_path(), |t| t.path());
                Some(read_planned(path, plain, header, &step).map(|s| s.reversed().into_ascending()))
            }
            FileChunks::Parquet { path, plan } => {
                let (offset, rows) = if reverse { plan.pop_back()? } else { plan.pop_front()? };
                let chunk = read_series_rows(path, offset, Some(rows))
                    .map_err(|e| StoreError::source_format(path.display(), e.to_string()));
                Some(chunk.map(|s| if reverse { s.reversed().into_ascending() } else { s }))
            }
        }
    }
}

fn spool_gzip(path: &Path) -> Result<NamedTempFile, StoreError> {
    let mut spool = NamedTempFile::new().map_err(|e| open_err(path, e))?;
    let mut input = open_input(path)?;
    let mut out = BufWriter::new(spool.as_file_mut());
    let bytes = io::copy(&mut input, &mut out).map_err(|e| open_err(path, e))?;
    out.flush().map_err(|e| open_err(path, e))?;
    drop(out);
    tracing::debug!(path=%path.display(), bytes, "spooled gzip source for reverse read");
    Ok(spool)
}

/// Reads one planned chunk of `plain`, the seekable text behind `path`.
fn read_planned(path: &Path, plain: &Path, header: &Header, step: &ChunkPlan) -> Result<TickSeries, StoreError> {
    let file = File::open(plain).map_err(|e| open_err(path, e))?;
    let mut reader = csv_reader(file);
    reader.seek(step.position.clone()).map_err(|e| csv_err(path, e))?;
    let records = read_records(path, &mut reader, step.rows)?;
    build_chunk(path, header, &records)
}

fn read_whole_file(path: &Path, reverse: bool) -> Result<TickSeries, StoreError> {
    let series = match FileFormat::of(path)? {
        FileFormat::Parquet => {
            read_series_file(path).map_err(|e| StoreError::source_format(path.display(), e.to_string()))?
        }
        FileFormat::Csv | FileFormat::CsvGz => {
            let mut reader = csv_reader(open_input(path)?);
            let header = read_header(path, &mut reader)?;
            let records = read_records(path, &mut reader, usize::MAX)?;
            build_chunk(path, &header, &records)?
        }
    };
    Ok(if reverse {
        series.reversed().into_ascending()
    } else {
        series
    })
}

/// Lazy, finite chunk sequence over the files of a source. Stops after the first error.
pub struct ChunkCursor {
    files: VecDeque<PathBuf>,
    opts: SourceOptions,
    current: Option<FileChunks>,
    whole_done: bool,
    failed: bool,
}

impl ChunkCursor {
    fn read_whole(&mut self) -> Result<TickSeries, StoreError> {
        let mut parts = Vec::with_capacity(self.files.len());
        while let Some(path) = self.files.pop_front() {
            parts.push(read_whole_file(&path, self.opts.reverse)?);
        }
        TickSeries::concat(parts)
    }

    fn next_chunk(&mut self, chunk: usize) -> Option<Result<TickSeries, StoreError>> {
        loop {
            if self.current.is_none() {
                let path = self.files.pop_front()?;
                match FileChunks::open(&path, chunk, self.opts.reverse) {
                    Ok(fc) => self.current = Some(fc),
                    Err(e) => return Some(Err(e)),
                }
            }
            let current = self.current.as_mut()?;
            match current.next(chunk, self.opts.reverse) {
                Some(item) => return Some(item),
                None => self.current = None,
            }
        }
    }
}

impl Iterator for ChunkCursor {
    type Item = Result<TickSeries, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let item = match self.opts.chunk_size {
                None => {
                    if self.whole_done {
                        return None;
                    }
                    self.whole_done = true;
                    self.read_whole()
                }
                Some(n) => self.next_chunk(n.max(1))?,
            };
            match item {
                Ok(chunk) => {
                    let chunk = match &self.opts.range {
                        Some(r) => chunk.within(r),
                        None => chunk,
                    };
                    // Chunks emptied by the range filter are skipped; whole-source mode
                    // always yields its one chunk.
                    if chunk.is_empty() && self.opts.chunk_size.is_some() {
                        continue;
                    }
                    return Some(Ok(chunk));
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// --------- export ---------

fn cell(v: Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Float(x) => x.to_string(),
        Value::Text(s) => s,
    }
}

fn write_csv_to<W: Write>(writer: W, series: &TickSeries) -> csv::Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    let mut header = vec!["date".to_string()];
    header.extend(series.columns().iter().map(|c| c.name.clone()));
    w.write_record(&header)?;
    for (row, ts) in series.timestamps().iter().enumerate() {
        let mut rec = Vec::with_capacity(header.len());
        rec.push(ns_to_dt(*ts).to_rfc3339_opts(SecondsFormat::Nanos, true));
        rec.extend(series.columns().iter().map(|c| cell(c.data.value(row))));
        w.write_record(&rec)?;
    }
    w.flush()?;
    Ok(())
}

/// Writes `series` as CSV with a leading `date` column (RFC 3339, nanosecond precision).
/// A `.gz` suffix produces gzip output.
pub fn write_csv(path: &Path, series: &TickSeries) -> Result<(), StoreError> {
    let file = File::create(path).map_err(|e| StoreError::source_format(path.display(), e.to_string()))?;
    let out = BufWriter::new(file);
    let res = if FileFormat::of(path)? == FileFormat::CsvGz {
        let mut gz = GzEncoder::new(out, Compression::default());
        write_csv_to(&mut gz, series).and_then(|_| gz.finish().map(|_| ()).map_err(csv::Error::from))
    } else {
        write_csv_to(out, series)
    };
    res.map_err(|e| StoreError::source_format(path.display(), e.to_string()))
}

/// Writes `series` as Parquet with `ts_ns` nanoseconds as the first column.
pub fn write_parquet(path: &Path, series: &TickSeries, zstd_level: i32) -> Result<(), StoreError> {
    write_series_file(path, series, zstd_level)
        .map(|_| ())
        .map_err(|e| StoreError::source_format(path.display(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn series(ts: &[i64]) -> TickSeries {
        let mid = ts.iter().map(|t| *t as f64 / 10.0).collect();
        TickSeries::from_floats(ts.to_vec(), &[("mid", mid)]).expect("series")
    }

    #[rstest]
    #[case("a.csv", FileFormat::Csv)]
    #[case("a.CSV.GZ", FileFormat::CsvGz)]
    #[case("a.parquet", FileFormat::Parquet)]
    #[case("dir/a.pq", FileFormat::Parquet)]
    fn formats_follow_the_extension(#[case] name: &str, #[case] want: FileFormat) {
        assert_eq!(FileFormat::of(Path::new(name)).expect("format"), want);
    }

    #[test]
    fn wildcard_characters_make_a_pattern() {
        assert!(matches!(SourceRef::from("/data/eur_*.csv"), SourceRef::Pattern(_)));
        assert!(matches!(SourceRef::from("/data/eur.csv"), SourceRef::Path(_)));
    }

    #[test]
    fn text_columns_are_inferred_per_chunk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trades.csv");
        std::fs::write(
            &path,
            "Date,executed_price,side,notional\n2017-01-01 00:00:00,1.5,buy,\n2017-01-01 00:00:01,1.6,sell,20\n",
        )
        .expect("write");
        let s = read(&SourceRef::from(path.as_path()), None).expect("read");
        assert_eq!(s.len(), 2);
        assert_eq!(s.texts("side").expect("side")[1].as_deref(), Some("sell"));
        assert_eq!(s.floats("notional").expect("notional"), &[None, Some(20.0)]);
    }

    #[test]
    fn bad_timestamp_reports_the_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "date,mid\n2017-01-01,1\nnot-a-date,2\n").expect("write");
        let err = read(&SourceRef::from(path.as_path()), None).unwrap_err();
        match err {
            StoreError::SourceFormat { reason, .. } => assert!(reason.contains("line 3"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_sources_are_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pattern = format!("{}/none_*.csv", dir.path().display());
        assert!(matches!(read(&SourceRef::from(pattern), None), Err(StoreError::SourceNotFound(_))));
        let path = dir.path().join("nope.csv");
        assert!(matches!(read(&SourceRef::from(path), None), Err(StoreError::SourceNotFound(_))));
    }

    #[rstest]
    #[case("desc.csv")]
    #[case("desc.csv.gz")]
    #[case("desc.parquet")]
    fn reverse_files_yield_ascending_chunks(#[case] name: &str) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(name);
        let asc = series(&(0..10).collect::<Vec<_>>());
        if name.ends_with(".parquet") {
            write_parquet(&path, &asc.reversed(), 3).expect("write");
        } else {
            write_csv(&path, &asc.reversed()).expect("write");
        }
        let reader = SourceReader::open(
            &SourceRef::from(path.as_path()),
            SourceOptions {
                chunk_size: Some(4),
                reverse: true,
                range: None,
            },
        )
        .expect("open");
        let chunks: Vec<TickSeries> = reader.chunks().collect::<Result<_, _>>().expect("chunks");
        let firsts: Vec<i64> = chunks.iter().map(|c| c.timestamps()[0]).collect();
        assert_eq!(firsts, vec![0, 2, 6]);
        assert!(chunks.iter().all(|c| c.is_ascending()));
        assert_eq!(reader.read_all().expect("all").timestamps(), asc.timestamps());
    }

    #[test]
    fn range_filter_skips_empty_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("asc.csv");
        write_csv(&path, &series(&(0..10).collect::<Vec<_>>())).expect("write");
        let reader = SourceReader::open(
            &SourceRef::from(path.as_path()),
            SourceOptions {
                chunk_size: Some(3),
                reverse: false,
                range: Some(TimeRange::from_ns(4, 5).expect("range")),
            },
        )
        .expect("open");
        let chunks: Vec<TickSeries> = reader.chunks().collect::<Result<_, _>>().expect("chunks");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].timestamps(), &[4, 5]);
    }

    #[test]
    fn reverse_gzip_is_decompressed_once_and_cleaned_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("desc.csv.gz");
        let asc = series(&(0..25).collect::<Vec<_>>());
        write_csv(&path, &asc.reversed()).expect("write");

        let mut chunks = FileChunks::open(&path, 4, true).expect("open");
        let spooled = match &chunks {
            FileChunks::CsvReverse { spool: Some(t), plan, .. } => {
                assert_eq!(plan.len(), 7);
                t.path().to_path_buf()
            }
            _ => panic!("expected a spooled reverse reader"),
        };
        assert!(spooled.is_file());
        let mut seen = Vec::new();
        while let Some(chunk) = chunks.next(4, true) {
            seen.extend_from_slice(chunk.expect("chunk").timestamps());
        }
        seen.sort_unstable();
        assert_eq!(seen, asc.timestamps());
        drop(chunks);
        assert!(!spooled.exists());
    }
}
