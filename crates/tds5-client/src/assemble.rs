//! Result assembler (§4.5).
//!
//! Turns one buffered run of data tokens into a [`OpResult`], driven by the
//! flags on the `done` token that closed the run. Flags are consulted in the
//! order the specification lists them: `more` short-circuits everything
//! else, `count` and `proc` each may produce a result (the later one wins if
//! both fire), and `error` aborts the whole operation.

use tds5_protocol::{Done, DoneStatus, OrderBy, Token, Value};

use crate::error::Error;

/// One TDS reply outcome, partitioned out of the token stream by `done`.
#[derive(Debug, Clone, PartialEq)]
pub enum OpResult {
    /// A non-row-returning statement's affected-row count.
    AffectedRows(u64),
    /// A row-returning statement's result set.
    ResultSet {
        /// Derived field names, one per column.
        columns: Vec<String>,
        /// Ordering metadata, if the server sent any (at most one entry).
        meta: Vec<OrderBy>,
        /// Rows, in arrival order.
        rows: Vec<Vec<Value>>,
    },
    /// A stored procedure's return status and output parameters.
    ProcedureResult {
        /// Procedure return status.
        return_status: i32,
        /// OUTPUT parameter values, in positional order.
        out_params: Vec<Value>,
    },
}

/// What the consumer should do after handing a completed `done` to the
/// assembler.
pub enum Signal {
    /// The segment isn't finished; keep accumulating into the same buffer.
    More,
    /// The segment completed and its result was appended to `results`.
    Segment,
}

/// Assemble the buffered tokens of one segment into a result, given the
/// `done` token that closed it.
///
/// `results` is the running list of results produced so far by this
/// operation; a `proc` segment may retroactively drop `AffectedRows` entries
/// already appended to it (they were intermediate in-procedure updates).
pub fn assemble_segment(
    buffer: &[Token],
    done: Done,
    results: &mut Vec<OpResult>,
) -> Result<Signal, Error> {
    let produces_result = done.status.intersects(DoneStatus::COUNT | DoneStatus::PROC);

    // A `more` segment with no `count`/`proc` is a pure continuation marker:
    // nothing to assemble yet, so the buffer stays intact for the next
    // segment's tokens. `more` alongside `count`/`proc` still assembles now
    // (S4's intermediate `AffectedRows` has to actually exist so a later
    // `proc` segment can drop it).
    if done.status.contains(DoneStatus::MORE) && !produces_result {
        return Ok(Signal::More);
    }

    let mut segment_result = None;

    if done.status.contains(DoneStatus::COUNT) {
        segment_result = Some(assemble_count(buffer, done.count));
    }

    if done.status.contains(DoneStatus::PROC) {
        results.retain(|r| !matches!(r, OpResult::AffectedRows(_)));
        segment_result = Some(assemble_proc(buffer));
    }

    // `event`, `attn`, `trans` contribute nothing to the result.

    if done.status.contains(DoneStatus::ERROR) {
        let message = buffer
            .iter()
            .find_map(|t| match t {
                Token::Message(m) => Some(m.text.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "server reported an error with no message".to_string());
        return Err(Error::remote(message));
    }

    results.push(segment_result.unwrap_or(OpResult::AffectedRows(done.count)));
    Ok(Signal::Segment)
}

fn assemble_count(buffer: &[Token], count: u64) -> OpResult {
    let Some(format) = buffer.iter().find_map(|t| match t {
        Token::RowFormat(f) => Some(f),
        _ => None,
    }) else {
        return OpResult::AffectedRows(count);
    };

    let columns = format.columns.iter().map(|c| c.field_name().to_string()).collect();
    let meta = buffer
        .iter()
        .find_map(|t| match t {
            Token::OrderBy(o) => Some(o.clone()),
            _ => None,
        })
        .into_iter()
        .collect();
    let rows = buffer
        .iter()
        .filter_map(|t| match t {
            Token::Row(values) => Some(values.clone()),
            _ => None,
        })
        .take(count as usize)
        .collect();

    OpResult::ResultSet { columns, meta, rows }
}

fn assemble_proc(buffer: &[Token]) -> OpResult {
    let return_status = buffer
        .iter()
        .find_map(|t| match t {
            Token::ReturnStatus(s) => Some(*s),
            _ => None,
        })
        .unwrap_or(0);
    let out_params = buffer
        .iter()
        .find_map(|t| match t {
            Token::Params(values) => Some(values.clone()),
            _ => None,
        })
        .unwrap_or_default();

    OpResult::ProcedureResult { return_status, out_params }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds5_protocol::{ColumnFormat, RowFormat, TypeId};

    fn done(status: DoneStatus, count: u64) -> Done {
        Done { status, txn_state: 0, count }
    }

    #[test]
    fn s1_empty_query() {
        let mut results = Vec::new();
        let signal = assemble_segment(&[], done(DoneStatus::COUNT, 0), &mut results).unwrap();
        assert!(matches!(signal, Signal::Segment));
        assert_eq!(results, vec![OpResult::AffectedRows(0)]);
    }

    #[test]
    fn s2_single_row() {
        let format = RowFormat {
            columns: vec![ColumnFormat {
                label_name: String::new(),
                column_name: "x".to_string(),
                type_id: TypeId::Int4,
            }],
        };
        let buffer = vec![
            Token::RowFormat(format),
            Token::Row(vec![Value::Int(42)]),
        ];
        let mut results = Vec::new();
        assemble_segment(&buffer, done(DoneStatus::COUNT, 1), &mut results).unwrap();
        assert_eq!(
            results,
            vec![OpResult::ResultSet {
                columns: vec!["x".to_string()],
                meta: vec![],
                rows: vec![vec![Value::Int(42)]],
            }]
        );
    }

    #[test]
    fn bare_more_flag_defers_without_producing_a_result() {
        let mut results = Vec::new();
        let signal = assemble_segment(&[], done(DoneStatus::MORE, 0), &mut results).unwrap();
        assert!(matches!(signal, Signal::More));
        assert!(results.is_empty());
    }

    #[test]
    fn more_flag_with_count_still_assembles() {
        // S4's intermediate segment: `more` is set, but `count` still means
        // there's a result to produce now (and potentially retract later).
        let mut results = Vec::new();
        let signal =
            assemble_segment(&[], done(DoneStatus::COUNT | DoneStatus::MORE, 5), &mut results)
                .unwrap();
        assert!(matches!(signal, Signal::Segment));
        assert_eq!(results, vec![OpResult::AffectedRows(5)]);
    }

    #[test]
    fn s4_proc_suppresses_prior_affected_rows() {
        let mut results = vec![OpResult::AffectedRows(5)];
        let buffer = vec![
            Token::ReturnStatus(0),
            Token::Params(vec![Value::Int(99), Value::Text("x".to_string())]),
        ];
        assemble_segment(&buffer, done(DoneStatus::COUNT | DoneStatus::PROC, 0), &mut results)
            .unwrap();
        assert_eq!(
            results,
            vec![OpResult::ProcedureResult {
                return_status: 0,
                out_params: vec![Value::Int(99), Value::Text("x".to_string())],
            }]
        );
    }

    #[test]
    fn s5_remote_error_aborts() {
        let buffer = vec![Token::Message(tds5_protocol::Message {
            number: 207,
            class: 16,
            state: 1,
            text: "invalid column".to_string(),
            server: String::new(),
            procedure: String::new(),
            line: 1,
        })];
        let mut results = Vec::new();
        let err = assemble_segment(&buffer, done(DoneStatus::COUNT | DoneStatus::ERROR, 0), &mut results)
            .unwrap_err();
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "server error: invalid column");
    }
}
