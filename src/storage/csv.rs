//! Text format of persisted chunk results.
//!
//! One header row `chain,draw,<param names>` followed by one row per
//! retained draw, chain by chain, similar to a CmdStan draws file. Names
//! containing commas or quotes are quoted as in RFC 4180. Floats are written
//! in their shortest round-trip form, so a result read back compares equal
//! to the one written.

use std::borrow::Cow;
use std::io::{self, Write};
use std::path::Path;

use itertools::Itertools;

use super::StorageError;
use crate::sampler::{ChainDraws, ChunkResult};

fn quote(name: &str) -> io::Result<Cow<'_, str>> {
    if name.contains(['\n', '\r']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("parameter name {:?} contains a line break", name),
        ));
    }
    if name.contains([',', '"']) {
        Ok(Cow::Owned(format!("\"{}\"", name.replace('"', "\"\""))))
    } else {
        Ok(Cow::Borrowed(name))
    }
}

/// Split the header row into column names, undoing `quote`.
fn split_header(line: &str) -> Result<Vec<String>, String> {
    let mut columns = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        let mut column = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        column.push('"');
                    }
                    Some('"') => break,
                    Some(c) => column.push(c),
                    None => return Err("unterminated quoted column name".into()),
                }
            }
            match chars.next() {
                None => {
                    columns.push(column);
                    return Ok(columns);
                }
                Some(',') => columns.push(column),
                Some(c) => return Err(format!("unexpected {:?} after quoted column name", c)),
            }
        } else {
            loop {
                match chars.next() {
                    None => {
                        columns.push(column);
                        return Ok(columns);
                    }
                    Some(',') => break,
                    Some(c) => column.push(c),
                }
            }
            columns.push(column);
        }
    }
}

pub(crate) fn write_result<W: Write>(writer: &mut W, result: &ChunkResult) -> io::Result<()> {
    let names: Vec<Cow<'_, str>> = result
        .param_names
        .iter()
        .map(|name| quote(name))
        .collect::<io::Result<_>>()?;
    let header = ["chain", "draw"]
        .into_iter()
        .chain(names.iter().map(|name| name.as_ref()))
        .join(",");
    writeln!(writer, "{}", header)?;

    for chain in result.chains.iter() {
        for (draw, values) in chain.draws.iter().enumerate() {
            write!(writer, "{},{}", chain.chain, draw)?;
            for value in values.iter() {
                write!(writer, ",{}", value)?;
            }
            writeln!(writer)?;
        }
    }
    Ok(())
}

pub(crate) fn read_result(path: &Path, index: u64, text: &str) -> Result<ChunkResult, StorageError> {
    let malformed = |line: usize, message: String| StorageError::Csv {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut lines = text.lines().enumerate();
    let Some((_, header)) = lines.next() else {
        return Err(malformed(1, "missing header".into()));
    };
    let mut columns = split_header(header).map_err(|message| malformed(1, message))?;
    if columns.len() < 2 || columns[0] != "chain" || columns[1] != "draw" {
        return Err(malformed(1, "header has to start with chain,draw".into()));
    }
    let param_names = columns.split_off(2);

    let mut chains: Vec<ChainDraws> = Vec::new();
    for (line_idx, line) in lines {
        let line_no = line_idx + 1;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',');
        let chain: u64 = fields
            .next()
            .and_then(|field| field.parse().ok())
            .ok_or_else(|| malformed(line_no, "invalid chain id".into()))?;
        // The draw column only mirrors the row position within a chain
        fields
            .next()
            .and_then(|field| field.parse::<u64>().ok())
            .ok_or_else(|| malformed(line_no, "invalid draw number".into()))?;
        let values: Box<[f64]> = fields
            .map(|field| field.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|err| malformed(line_no, err.to_string()))?;
        if values.len() != param_names.len() {
            return Err(malformed(
                line_no,
                format!(
                    "expected {} values, found {}",
                    param_names.len(),
                    values.len()
                ),
            ));
        }

        match chains.last_mut() {
            Some(current) if current.chain == chain => current.draws.push(values),
            _ => chains.push(ChainDraws {
                chain,
                draws: vec![values],
            }),
        }
    }

    Ok(ChunkResult {
        index,
        param_names,
        chains,
    })
}
