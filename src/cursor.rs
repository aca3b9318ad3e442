//! Query execution over an engine cursor
//!
//! Turns a [`Query`] into a prefix-bounded range scan:
//! - ascending: seek to `filter ++ offset`, walk forward
//! - descending: seek just past every key starting with the filter (the
//!   prefix padded with `0xff` bytes), walk backward; when resuming, step
//!   back from `filter ++ offset` itself
//!
//! The scan stops at the first key outside the filter prefix. When an
//! ascending query carries an offset, a first key equal to the resume
//! point is the row the previous page ended on and is skipped. A
//! descending resume never lands on it: every key at or above the resume
//! point was produced by earlier pages, including longer keys that merely
//! start with it.

use std::ops::ControlFlow;

use crate::engine::Cursor;
use crate::error::Result;
use crate::query::Query;
use crate::record::Record;

/// Callback invoked once per produced row
///
/// `ControlFlow::Break(())` ends the scan early without an error.
pub type Visitor<'v> = dyn FnMut(&Record) -> Result<ControlFlow<()>> + 'v;

/// Padding appended to the start key of a descending scan
const DESC_SEEK_TAIL: usize = 1024;

/// Run `query` against `cursor`, calling `visit` for each produced row
///
/// Resets `query.num_rows`, then counts produced rows into it and moves
/// the query's offset to the last produced row.
pub fn execute<C: Cursor + ?Sized>(
    cursor: &mut C,
    query: &mut Query,
    mut visit: Option<&mut Visitor<'_>>,
) -> Result<()> {
    query.num_rows = 0;
    let mut remaining = query.row_limit();
    if remaining == Some(0) {
        return Ok(());
    }

    let prefix = query.filter().to_vec();
    let mut start = prefix.clone();
    start.extend_from_slice(query.current_offset());
    let resuming = !query.current_offset().is_empty();
    let desc = query.is_desc();
    let mut skip_first = resuming && !desc;

    let mut item = if desc && resuming {
        cursor.seek(&start)?;
        cursor.prev()?
    } else if desc {
        let mut probe = start.clone();
        probe.resize(start.len() + DESC_SEEK_TAIL, 0xff);
        cursor.seek(&probe)?;
        cursor.prev()?
    } else {
        cursor.seek(&start)?
    };

    while let Some((key, value)) = item {
        if !key.starts_with(&prefix) {
            break;
        }
        if std::mem::take(&mut skip_first) && key == start {
            item = step(cursor, desc)?;
            continue;
        }

        let record = Record::from_raw(key, value);
        if !query.accepts(&record) {
            item = step(cursor, desc)?;
            continue;
        }

        query.set_offset(&record.key[prefix.len()..]);
        if let Some(n) = remaining.as_mut() {
            *n -= 1;
        }
        if let Some(visit) = visit.as_deref_mut() {
            if visit(&record)?.is_break() {
                break;
            }
        }
        query.num_rows += 1;

        if remaining == Some(0) {
            break;
        }
        item = step(cursor, desc)?;
    }
    Ok(())
}

fn step<C: Cursor + ?Sized>(cursor: &mut C, desc: bool) -> crate::engine::CursorResult {
    if desc {
        cursor.prev()
    } else {
        cursor.next()
    }
}
