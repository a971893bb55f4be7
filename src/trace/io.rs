//! Line-oriented trace files.
//!
//! ```text
//! #:	x	i	pc
//! 0:	2	0	0
//! 1:	2	0	1
//! ```

use std::path::Path;

use tracing::debug;

use super::{State, Trace};
use crate::diagnostic::{render_diagnostics, Diagnostic};
use crate::error::{DisputeError, Result};
use crate::span::{Span, Spanned};

pub const HEADER: &str = "#:\tx\ti\tpc";

/// Render a trace in the text format, header included.
pub fn write_trace(trace: &Trace) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for (j, s) in trace.states().iter().enumerate() {
        out.push_str(&format!("{}:\t{}\t{}\t{}\n", j, s.x, s.i, s.pc));
    }
    out
}

/// Parse the text format. Every malformed line yields one diagnostic.
pub fn parse_trace(source: &str) -> std::result::Result<Trace, Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();
    let mut states: Vec<Spanned<State>> = Vec::new();
    let mut offset = 0u32;

    for raw in source.split_inclusive('\n') {
        let start = offset;
        offset += raw.len() as u32;
        let line = raw.trim_end();
        let span = Span::new(start, start + line.len() as u32);

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_line(line, span, states.len()) {
            Ok(state) => states.push(Spanned::new(state, span)),
            Err(d) => diagnostics.push(d),
        }
    }

    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    let whole = match (states.first(), states.last()) {
        (Some(a), Some(b)) => a.span.merge(b.span),
        _ => Span::new(0, source.len() as u32),
    };
    let states: Vec<State> = states.into_iter().map(|s| s.node).collect();
    Trace::new(states).map_err(|e| {
        vec![Diagnostic::error(e.to_string(), whole)
            .with_help("pad the trace by repeating its final state".to_string())]
    })
}

fn parse_line(line: &str, span: Span, expected: usize) -> std::result::Result<State, Diagnostic> {
    let Some((index, rest)) = line.split_once(':') else {
        return Err(Diagnostic::error(
            "missing `index:` prefix".to_string(),
            span,
        ));
    };

    let index_span = Span::new(span.start, span.start + index.len() as u32);
    match index.trim().parse::<usize>() {
        Ok(j) if j == expected => {}
        Ok(j) => {
            return Err(Diagnostic::error(
                format!("expected index {}, found {}", expected, j),
                index_span,
            ))
        }
        Err(_) => {
            return Err(Diagnostic::error(
                format!("`{}` is not a trace index", index.trim()),
                index_span,
            ))
        }
    }

    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(Diagnostic::error(
            format!("expected 3 fields (x, i, pc), found {}", fields.len()),
            span,
        ));
    }

    let mut values = [0u16; 3];
    for (slot, field) in values.iter_mut().zip(&fields) {
        *slot = field.parse::<u16>().map_err(|_| {
            Diagnostic::error(format!("`{}` is not a 16-bit number", field), span)
                .with_note("states hold values in 0..=65535".to_string())
        })?;
    }
    Ok(State::new(values[0], values[1], values[2]))
}

/// Read and parse a trace file, rendering diagnostics to stderr on failure.
pub fn load_trace(path: &Path) -> Result<Trace> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| DisputeError::TraceFormat(format!("cannot read {}: {}", path.display(), e)))?;
    let filename = path.display().to_string();
    match parse_trace(&source) {
        Ok(trace) => {
            debug!(file = %filename, states = trace.len(), "loaded trace");
            Ok(trace)
        }
        Err(diagnostics) => {
            render_diagnostics(&diagnostics, &filename, &source);
            Err(DisputeError::TraceFormat(format!(
                "{} error(s) in {}",
                diagnostics.len(),
                filename
            )))
        }
    }
}

pub fn save_trace(path: &Path, trace: &Trace) -> Result<()> {
    std::fs::write(path, write_trace(trace))
        .map_err(|e| DisputeError::TraceFormat(format!("cannot write {}: {}", path.display(), e)))
}
