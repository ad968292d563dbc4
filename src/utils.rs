use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use log::debug;

use crate::common::{Addr, Instr, Instructions};
use crate::error::{CoherenceError, Result};

fn hex(s: &str) -> std::result::Result<u64, std::num::ParseIntError> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(digits, 16)
}

/// Parse one core's trace: `<op> <hex> [value]` per line where op is 0 (load),
/// 1 (store) or 2 (other work for `<hex>` cycles). Stores without a value write
/// `default_value`. Blank lines and lines starting with `#` are skipped.
pub fn parse_trace(text: &str, default_value: u8) -> Result<Instructions> {
    let mut insts = VecDeque::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let bad = |reason: String| CoherenceError::Trace { line: i + 1, reason };
        let mut parts = line.split_whitespace();
        let op = parts.next().unwrap_or_default();
        let arg = parts
            .next()
            .ok_or_else(|| bad("missing operand".into()))
            .and_then(|a| hex(a).map_err(|e| bad(format!("operand `{a}`: {e}"))))?;
        insts.push_back(match op {
            "0" => Instr::Read(Addr(arg)),
            "1" => {
                let value = match parts.next() {
                    Some(v) => hex(v)
                        .ok()
                        .and_then(|v| u8::try_from(v).ok())
                        .ok_or_else(|| bad(format!("value `{v}` is not a byte")))?,
                    None => default_value,
                };
                Instr::Write(Addr(arg), value)
            }
            "2" => Instr::Other(
                u32::try_from(arg).map_err(|_| bad(format!("cycle count {arg:#x} too large")))?,
            ),
            _ => return Err(bad(format!("unknown instruction `{op}`"))),
        });
    }
    Ok(insts)
}

pub fn read_trace(path: impl AsRef<Path>, default_value: u8) -> Result<Instructions> {
    parse_trace(&fs::read_to_string(path)?, default_value)
}

/// Read every `<testname>*.data` file in `dir`, one per core, in file name order.
/// Core `i` stores `i + 1` when a store carries no value, so at most 255 files are accepted.
pub fn read_testfiles(dir: impl AsRef<Path>, testname: &str) -> Result<Vec<Instructions>> {
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(testname) && n.ends_with(".data"))
        })
        .collect();
    paths.sort();
    paths
        .iter()
        .enumerate()
        .map(|(i, p)| {
            debug!("reading trace {}", p.display());
            let value =
                u8::try_from(i + 1).map_err(|_| CoherenceError::TooManyTraces(paths.len()))?;
            read_trace(p, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_instruction_kinds() {
        let insts = parse_trace("0 0x8000\n\n# comment\n1 8004 2a\n2 0x1f\n1 0x10\n", 7).unwrap();
        assert_eq!(
            insts,
            VecDeque::from(vec![
                Instr::Read(Addr(0x8000)),
                Instr::Write(Addr(0x8004), 0x2a),
                Instr::Other(0x1f),
                Instr::Write(Addr(0x10), 7),
            ])
        );
    }

    #[test]
    fn reports_line_of_bad_input() {
        let err = parse_trace("0 0x0\n3 0x0\n", 0).unwrap_err();
        assert!(matches!(err, CoherenceError::Trace { line: 2, .. }));
        let err = parse_trace("1 0x0 0x100\n", 0).unwrap_err();
        assert!(matches!(err, CoherenceError::Trace { line: 1, .. }));
        let err = parse_trace("0\n", 0).unwrap_err();
        assert!(matches!(err, CoherenceError::Trace { line: 1, .. }));
    }
}
