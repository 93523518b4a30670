//! Rewrites the XML entries of a zip archive into a new archive.

use crate::audit::{AuditRow, AuditSink, AuditStatus};
use crate::central::{self, CentralRecord, EntryAttributes};
use crate::engine::apply_rules;
use crate::error::{Error, Result};
use crate::rule::Rule;
use crate::stats::{EntryStatus, ProcessStats};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use zip::result::{ZipError, ZipResult};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

// Entries this large need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Shared flag to stop a running transform between entries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub cancel: CancelToken,
    /// Entries whose name ends with this, ignoring ASCII case, are run
    /// through the rules. Default `.xml`.
    pub xml_suffix: String,
}

impl Default for TransformOptions {
    fn default() -> Self {
        TransformOptions {
            cancel: CancelToken::new(),
            xml_suffix: ".xml".to_string(),
        }
    }
}

/// Applies `rules` to every XML entry of the archive at `input` and writes
/// the result to a new archive at `output`. See [`transform_archives`].
pub fn transform<I, O, S>(input: I, output: O, rules: &[Rule], sink: S) -> Result<ProcessStats>
where
    I: AsRef<Path>,
    O: AsRef<Path>,
    S: AuditSink,
{
    transform_with_options(input, output, rules, sink, &TransformOptions::default())
}

/// # Errors
///
/// - [`Error::InputArchive`]: `input` can't be opened or isn't a zip archive.
/// - [`Error::OutputArchive`]: `output` can't be created or finalized.
/// - [`Error::Cancelled`]: The token was cancelled. `output` holds the
///   entries written so far.
/// - [`Error::Io`]: The audit sink failed while reporting a written entry,
///   a `fatal` entry or the summary.
pub fn transform_with_options<I, O, S>(
    input: I,
    output: O,
    rules: &[Rule],
    sink: S,
    options: &TransformOptions,
) -> Result<ProcessStats>
where
    I: AsRef<Path>,
    O: AsRef<Path>,
    S: AuditSink,
{
    let input = input.as_ref();
    let output = output.as_ref();
    let input_error = |source: ZipError| Error::InputArchive {
        path: input.to_path_buf(),
        source,
    };
    let output_error = |source: ZipError| Error::OutputArchive {
        path: output.to_path_buf(),
        source,
    };

    let reader = File::open(input).map_err(|err| input_error(err.into()))?;
    let (archive, records) = open_archive(BufReader::new(reader)).map_err(input_error)?;
    let writer = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
        .map_err(|err| output_error(err.into()))?;

    log::info!("transforming {} into {}", input.display(), output.display());
    let writer = ZipWriter::new(OutputFile(BufWriter::new(writer)));
    let pipeline = Pipeline::new(archive, records, writer, sink, options);
    match pipeline.run(rules) {
        Ok((stats, _)) => Ok(stats),
        Err(Error::Zip(source)) => Err(output_error(source)),
        Err(err) => Err(err),
    }
}

/// Like [`transform_with_options`], over any seekable reader and writer.
///
/// Entries are processed one at a time, in central directory order. Each
/// XML entry is rewritten by [`apply_rules`]; it is stored as rewritten
/// only when a rule matched and the bytes actually differ, otherwise the
/// original bytes are kept. Other entries are copied. Every entry is
/// recompressed with deflate, keeping its name, modification time,
/// originating system and external attributes.
///
/// An entry that can't be read, or written, is reported to `sink` as
/// `fatal` and left out of the output. The run goes on with the next entry.
/// Central directory records that reuse the name of another entry can't be
/// read and are reported as `fatal` after all other entries.
///
/// Returns the writer after the archive has been finished.
pub fn transform_archives<R, W, S>(
    reader: R,
    writer: W,
    rules: &[Rule],
    sink: S,
    options: &TransformOptions,
) -> Result<(ProcessStats, W)>
where
    R: Read + Seek,
    W: Read + Write + Seek,
    S: AuditSink,
{
    let (archive, records) = open_archive(reader)?;
    Pipeline::new(archive, records, ZipWriter::new(writer), sink, options).run(rules)
}

fn open_archive<R: Read + Seek>(
    mut reader: R,
) -> ZipResult<(ZipArchive<R>, Option<Vec<CentralRecord>>)> {
    let records = central::read_records(&mut reader);
    let archive = ZipArchive::new(reader)?;
    let records = records
        .map_err(|err| {
            log::warn!(
                "cannot read central directory records ({}), entry attributes and \
                 duplicate names are not checked",
                err
            )
        })
        .ok();
    Ok((archive, records))
}

// Pairs each entry the reader exposes with its central directory record.
// Returns the attributes per entry index, and the names of the records no
// entry was paired with.
fn index_records<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    records: Option<Vec<CentralRecord>>,
) -> (Vec<Option<EntryAttributes>>, Vec<String>) {
    let records = match records {
        Some(records) => records,
        None => return (vec![None; archive.len()], Vec::new()),
    };
    let mut by_start: HashMap<u64, usize> = HashMap::new();
    for (pos, record) in records.iter().enumerate() {
        by_start.entry(record.header_start).or_insert(pos);
    }

    let mut paired = vec![false; records.len()];
    let mut attributes = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let header_start = archive.by_index_raw(index).map(|file| file.header_start()).ok();
        let pos = header_start
            .and_then(|start| by_start.get(&start).copied())
            .filter(|&pos| !paired[pos])
            .or_else(|| {
                let name = archive.name_for_index(index)?.as_bytes();
                (0..records.len()).find(|&pos| !paired[pos] && records[pos].name == name)
            });
        if let Some(pos) = pos {
            paired[pos] = true;
        }
        attributes.push(pos.map(|pos| records[pos].attributes));
    }

    let unpaired = records
        .iter()
        .zip(&paired)
        .filter(|(_, paired)| !**paired)
        .map(|(record, _)| record.display_name())
        .collect();
    (attributes, unpaired)
}

// Buffered output file the central directory can be read back from.
struct OutputFile(BufWriter<File>);

impl Read for OutputFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.flush()?;
        self.0.get_mut().read(buf)
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Seek for OutputFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

struct EntryMeta {
    name: String,
    is_dir: bool,
    modified: Option<DateTime>,
    unix_mode: Option<u32>,
    size: u64,
    attributes: Option<EntryAttributes>,
}

impl EntryMeta {
    fn options(&self) -> SimpleFileOptions {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(self.modified.unwrap_or_default())
            .large_file(self.size >= ZIP64_THRESHOLD);
        match self.unix_mode {
            Some(mode) => options.unix_permissions(mode),
            None => options,
        }
    }
}

struct Pipeline<'o, R: Read + Seek, W: Read + Write + Seek, S: AuditSink> {
    archive: ZipArchive<R>,
    // source attributes by entry index
    attributes: Vec<Option<EntryAttributes>>,
    // records the reader merged into another entry of the same name
    shadowed: Vec<String>,
    writer: ZipWriter<W>,
    // source attributes of each entry in the output, in write order
    written: Vec<Option<EntryAttributes>>,
    sink: S,
    options: &'o TransformOptions,
    stats: ProcessStats,
    started: Instant,
    // error from the sink that ends the run
    sink_failure: Option<Error>,
}

impl<'o, R: Read + Seek, W: Read + Write + Seek, S: AuditSink> Pipeline<'o, R, W, S> {
    fn new(
        mut archive: ZipArchive<R>,
        records: Option<Vec<CentralRecord>>,
        writer: ZipWriter<W>,
        sink: S,
        options: &'o TransformOptions,
    ) -> Self {
        let (attributes, shadowed) = index_records(&mut archive, records);
        Pipeline {
            archive,
            attributes,
            shadowed,
            writer,
            written: Vec::new(),
            sink,
            options,
            stats: ProcessStats::default(),
            started: Instant::now(),
            sink_failure: None,
        }
    }

    // The output archive is finished and the summary written even when the
    // run was cancelled.
    fn run(mut self, rules: &[Rule]) -> Result<(ProcessStats, W)> {
        let outcome = self.process_entries(rules);
        let mut writer = self.writer.finish()?;
        if !central::patch_attributes(&mut writer, &self.written).map_err(ZipError::Io)? {
            log::warn!("output entries don't match their sources, attributes not restored");
        }
        writer.flush().map_err(ZipError::Io)?;
        if let Some(err) = self.sink_failure {
            return Err(err);
        }

        let elapsed = self.started.elapsed();
        self.sink.summary(&self.stats, elapsed)?;
        log::info!(
            "{} entries in {:.2}s: {} changed, {} unchanged, {} copied, {} errors",
            self.stats.total_files,
            elapsed.as_secs_f64(),
            self.stats.xml_changed,
            self.stats.xml_unchanged,
            self.stats.copied_other,
            self.stats.errors
        );
        outcome.map(|()| (self.stats, writer))
    }

    fn process_entries(&mut self, rules: &[Rule]) -> Result<()> {
        let total = self.archive.len() + self.shadowed.len();
        for index in 0..self.archive.len() {
            self.check_cancelled(index, total)?;
            self.stats.total_files += 1;
            if let Err(err) = self.process_entry(index, rules) {
                let name = self
                    .archive
                    .name_for_index(index)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("<entry #{}>", index));
                self.fatal(name, err);
            }
            if self.sink_failure.is_some() {
                return Ok(());
            }
        }

        let shadowed = std::mem::take(&mut self.shadowed);
        for (done, name) in (self.archive.len()..).zip(shadowed) {
            self.check_cancelled(done, total)?;
            self.stats.total_files += 1;
            self.fatal(name.clone(), Error::DuplicateEntry(name));
            if self.sink_failure.is_some() {
                return Ok(());
            }
        }
        Ok(())
    }

    fn check_cancelled(&self, done: usize, total: usize) -> Result<()> {
        if self.options.cancel.is_cancelled() {
            log::info!("cancelled after {} of {} entries", done, total);
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn process_entry(&mut self, index: usize, rules: &[Rule]) -> Result<()> {
        let (meta, data) = self.read_entry(index)?;

        if meta.is_dir {
            self.writer.add_directory(meta.name.as_str(), meta.options())?;
            self.written.push(meta.attributes);
            log::debug!("{}: directory", meta.name);
            self.stats.record(EntryStatus::Copied);
            return Ok(());
        }

        if !self.is_xml(&meta.name) {
            self.write_entry(&meta, &data)?;
            log::debug!("{}: copied", meta.name);
            self.stats.record(EntryStatus::Copied);
            return Ok(());
        }

        let outcome = apply_rules(&data, rules);
        for error in &outcome.errors {
            log::debug!("{}: {}", meta.name, error);
            self.sink
                .record(AuditRow::new(&meta.name, AuditStatus::Error, error.as_str()))?;
        }
        self.stats.add_errors(outcome.errors.len());

        let (status, bytes) = if outcome.applied > 0 && outcome.bytes != data {
            (EntryStatus::Changed, &outcome.bytes)
        } else {
            (EntryStatus::Unchanged, &data)
        };
        self.write_entry(&meta, bytes)?;
        self.stats.record(status);

        let audit_status = match status {
            EntryStatus::Changed => AuditStatus::Changed,
            _ => AuditStatus::Unchanged,
        };
        log::debug!("{}: {} (applied={})", meta.name, audit_status, outcome.applied);
        let row = AuditRow::new(meta.name, audit_status, format!("applied={}", outcome.applied));
        // the entry is already in the output, so this can't make it fatal
        if let Err(err) = self.sink.record(row) {
            self.sink_failure = Some(err);
        }
        Ok(())
    }

    fn read_entry(&mut self, index: usize) -> Result<(EntryMeta, Vec<u8>)> {
        let mut file = self.archive.by_index(index)?;
        let meta = EntryMeta {
            name: file.name().to_string(),
            is_dir: file.is_dir(),
            modified: file.last_modified(),
            unix_mode: file.unix_mode(),
            size: file.size(),
            attributes: self.attributes.get(index).copied().flatten(),
        };
        let mut data = Vec::with_capacity(meta.size.min(1 << 24) as usize);
        file.read_to_end(&mut data)?;
        Ok((meta, data))
    }

    fn write_entry(&mut self, meta: &EntryMeta, data: &[u8]) -> Result<()> {
        self.writer.start_file(meta.name.as_str(), meta.options())?;
        if let Err(err) = self.writer.write_all(data) {
            self.writer.abort_file()?;
            return Err(err.into());
        }
        self.written.push(meta.attributes);
        Ok(())
    }

    fn is_xml(&self, name: &str) -> bool {
        let suffix = self.options.xml_suffix.as_bytes();
        let name = name.as_bytes();
        name.len() >= suffix.len() && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    }

    fn fatal(&mut self, name: String, err: Error) {
        log::warn!("{}: dropped from output: {}", name, err);
        self.stats.add_errors(1);
        if let Err(sink_err) = self
            .sink
            .record(AuditRow::new(name, AuditStatus::Fatal, err.to_string()))
        {
            self.sink_failure = Some(sink_err);
        }
    }
}
