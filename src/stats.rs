use serde::Serialize;

/// Counters for one archive run.
///
/// Every processed entry lands in exactly one of `xml_changed`,
/// `xml_unchanged` or `copied_other`, except entries that failed fatally,
/// which only count towards `errors`. Rule errors count towards `errors`
/// as well, so `errors` is not a number of entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessStats {
    pub total_files: usize,
    pub xml_changed: usize,
    pub xml_unchanged: usize,
    pub copied_other: usize,
    pub errors: usize,
}

/// What happened to an entry that made it into the output archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Changed,
    Unchanged,
    Copied,
}

impl ProcessStats {
    pub fn record(&mut self, status: EntryStatus) {
        match status {
            EntryStatus::Changed => self.xml_changed += 1,
            EntryStatus::Unchanged => self.xml_unchanged += 1,
            EntryStatus::Copied => self.copied_other += 1,
        }
    }

    pub fn add_errors(&mut self, count: usize) {
        self.errors += count;
    }

    /// Entries written to the output archive.
    pub fn written(&self) -> usize {
        self.xml_changed + self.xml_unchanged + self.copied_other
    }
}
