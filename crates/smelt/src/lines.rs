//! The compressed source-line table.
//!
//! The table is a byte string of (byte-offset-delta, line-delta) pairs, one
//! or more per line-annotated instruction. Deltas wider than 255 are split
//! across padding entries: (255, 0) repeated while the offset delta remains
//! too large, then (delta, 255) while the line delta does, then a final
//! entry with the residuals. A (0, 0) entry is emitted when an annotated
//! instruction introduces no movement in either dimension, which keeps the
//! table aligned with the instruction it describes.

/// Incrementally encodes the line table during byte emission.
///
/// `record` must be called in increasing address order, once per
/// line-annotated instruction.
#[derive(Debug)]
pub(crate) struct LineTableBuilder {
    table: Vec<u8>,
    last_line: u32,
    last_addr: u32,
}

impl LineTableBuilder {
    pub(crate) fn new(first_line: u32) -> Self {
        Self {
            table: Vec::new(),
            last_line: first_line,
            last_addr: 0,
        }
    }

    /// Records that the instruction starting at `addr` carries `line`.
    ///
    /// A line lower than the previous annotation contributes a zero line
    /// delta; the table cannot express decreasing lines.
    pub(crate) fn record(&mut self, addr: u32, line: u32) {
        let mut inc_pos = addr - self.last_addr;
        let mut inc_line = line.saturating_sub(self.last_line);
        self.last_addr = addr;
        if line > self.last_line {
            self.last_line = line;
        }

        if inc_pos == 0 && inc_line == 0 {
            self.table.extend([0, 0]);
            return;
        }
        while inc_pos > 255 {
            self.table.extend([255, 0]);
            inc_pos -= 255;
        }
        while inc_line > 255 {
            self.table.extend([u8::try_from(inc_pos).expect("offset delta reduced below 256"), 255]);
            inc_pos = 0;
            inc_line -= 255;
        }
        if inc_pos != 0 || inc_line != 0 {
            self.table.extend([
                u8::try_from(inc_pos).expect("offset delta reduced below 256"),
                u8::try_from(inc_line).expect("line delta reduced below 256"),
            ]);
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.table
    }
}

/// Expands a line table into (address, line) pairs, one per line transition.
///
/// The scan accumulates deltas pairwise and reports the running line at each
/// point where the byte offset advances onto a new line, plus a final entry
/// for the trailing region. Line deltas are unsigned; the builder never
/// emits negative movement.
pub(crate) fn line_starts(table: &[u8], first_line: u32) -> Vec<(u32, u32)> {
    let mut starts = Vec::new();
    let mut last_line = None;
    let mut line = first_line;
    let mut addr: u32 = 0;

    for pair in table.chunks_exact(2) {
        let (byte_incr, line_incr) = (pair[0], pair[1]);
        if byte_incr > 0 {
            if last_line != Some(line) {
                starts.push((addr, line));
                last_line = Some(line);
            }
            addr += u32::from(byte_incr);
        }
        line += u32::from(line_incr);
    }
    if last_line != Some(line) {
        starts.push((addr, line));
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_annotation_at_start() {
        let mut builder = LineTableBuilder::new(1);
        builder.record(0, 1);
        let table = builder.finish();
        assert_eq!(table, vec![0, 0]);
        assert_eq!(line_starts(&table, 1), vec![(0, 1)]);
    }

    #[test]
    fn increasing_lines() {
        let mut builder = LineTableBuilder::new(1);
        builder.record(0, 1);
        builder.record(3, 2);
        builder.record(9, 5);
        let table = builder.finish();
        assert_eq!(table, vec![0, 0, 3, 1, 6, 3]);
        assert_eq!(line_starts(&table, 1), vec![(0, 1), (3, 2), (9, 5)]);
    }

    #[test]
    fn wide_offset_delta_is_padded() {
        let mut builder = LineTableBuilder::new(1);
        builder.record(0, 1);
        builder.record(300, 2);
        let table = builder.finish();
        assert_eq!(table, vec![0, 0, 255, 0, 45, 1]);
        assert_eq!(line_starts(&table, 1), vec![(0, 1), (300, 2)]);
    }

    #[test]
    fn wide_line_delta_is_padded() {
        let mut builder = LineTableBuilder::new(1);
        builder.record(0, 1);
        builder.record(2, 302);
        let table = builder.finish();
        assert_eq!(table, vec![0, 0, 2, 255, 0, 46]);
        assert_eq!(line_starts(&table, 1), vec![(0, 1), (2, 302)]);
    }

    #[test]
    fn decreasing_line_contributes_zero_delta() {
        let mut builder = LineTableBuilder::new(1);
        builder.record(0, 10);
        builder.record(4, 3);
        let table = builder.finish();
        assert_eq!(line_starts(&table, 1), vec![(0, 10)]);
    }

    #[test]
    fn empty_table_reports_first_line() {
        assert_eq!(line_starts(&[], 7), vec![(0, 7)]);
    }
}
