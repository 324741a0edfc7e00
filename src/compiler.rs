//! # Compiler
//!
//! Single-pass, line-oriented compiler from Karel source to the packed
//! bytecode format. Forward references (a call to a symbol not yet seen)
//! are recorded as pending fixups and patched once every top-level symbol
//! has been compiled; a call that is never defined resolves to the
//! noop-func rather than failing.
//!
//! Source is read through the [`LineSource`] trait so the compiler has no
//! filesystem dependency of its own — a host supplies lines from a file, a
//! string, or a test fixture. [`ByteSliceLines`] is the one concrete source
//! this crate ships, used internally by the facade's `load`/`load_file`.

use std::collections::HashMap;

use crate::bytecode::{self, patch_u32, push_branch, push_repeat, push_simple, Condition, Opcode, NOOP_FUNC};
use crate::error::CompileError;

/// A producer of source lines. Lines are returned without their trailing
/// newline; `None` signals end of input.
pub trait LineSource {
    fn next_line(&mut self) -> Option<String>;
}

/// Splits an in-memory byte slice into lines on `\n`, tolerating a trailing
/// `\r`. UTF-8 errors are replaced rather than rejected, since Karel source
/// tokens are all ASCII.
pub struct ByteSliceLines<'a> {
    remaining: &'a [u8],
}

impl<'a> ByteSliceLines<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteSliceLines { remaining: bytes }
    }
}

impl<'a> LineSource for ByteSliceLines<'a> {
    fn next_line(&mut self) -> Option<String> {
        if self.remaining.is_empty() {
            return None;
        }
        let (line, rest) = match self.remaining.iter().position(|&b| b == b'\n') {
            Some(i) => (&self.remaining[..i], &self.remaining[i + 1..]),
            None => (self.remaining, &[][..]),
        };
        self.remaining = rest;
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Some(String::from_utf8_lossy(line).into_owned())
    }
}

/// Strips comments (everything from the first `;` onward) and blank lines
/// out of a raw [`LineSource`], yielding only meaningful, trimmed lines.
struct CleanLines<'s> {
    source: &'s mut dyn LineSource,
}

impl<'s> Iterator for CleanLines<'s> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let raw = self.source.next_line()?;
            let code = match raw.find(';') {
                Some(i) => &raw[..i],
                None => raw.as_str(),
            };
            let trimmed = code.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(trimmed.to_string());
        }
    }
}

type Fixups = HashMap<String, Vec<usize>>;

/// Compile `source` into a bytecode buffer and its symbol table.
pub fn compile(source: &mut dyn LineSource) -> Result<(Vec<u8>, HashMap<String, u32>), CompileError> {
    let mut buf = Vec::new();
    push_simple(&mut buf, Opcode::Stop); // null-func at 0x0
    push_simple(&mut buf, Opcode::Retn); // noop-func at 0x1

    let mut symbols: HashMap<String, u32> = HashMap::new();
    let mut fixups: Fixups = HashMap::new();
    let mut lines = CleanLines { source };

    while let Some(name) = lines.next() {
        if symbols.contains_key(&name) {
            return Err(CompileError::SymbolAlreadyDefined(name));
        }
        let addr = buf.len() as u32;
        symbols.insert(name.clone(), addr);
        compile_stmts(&mut lines, &mut buf, &mut fixups, &["END"])?;
        if buf.len() as u32 == addr {
            // Empty body: point straight at the noop-func instead of
            // emitting a dedicated RETN nobody will ever reach otherwise.
            symbols.insert(name, NOOP_FUNC);
        } else {
            push_simple(&mut buf, Opcode::Retn);
        }
    }

    for (name, slots) in fixups {
        let target = symbols.get(&name).copied().unwrap_or(NOOP_FUNC);
        for slot in slots {
            patch_u32(&mut buf, slot, target);
        }
    }

    Ok((buf, symbols))
}

/// Compile statements until one of `stop_tokens` is reached, consuming that
/// token and returning it. Used both for plain bodies (stop on `END`) and
/// for `IF` bodies (stop on `ELSE` or `END`).
fn compile_stmts(
    lines: &mut impl Iterator<Item = String>,
    buf: &mut Vec<u8>,
    fixups: &mut Fixups,
    stop_tokens: &[&str],
) -> Result<String, CompileError> {
    loop {
        let line = lines.next().ok_or(CompileError::UnexpectedEndOfFile)?;
        if stop_tokens.contains(&line.as_str()) {
            return Ok(line);
        }
        match line.as_str() {
            "STEP" => push_simple(buf, Opcode::Step),
            "LEFT" => push_simple(buf, Opcode::Left),
            "PICK" => push_simple(buf, Opcode::PickUp),
            "PLACE" => push_simple(buf, Opcode::Place),
            "STOP" => push_simple(buf, Opcode::Stop),
            _ if line.starts_with("REPEAT ") => compile_repeat(&line, lines, buf, fixups)?,
            _ if line.starts_with("UNTIL ") => compile_until(&line[6..], lines, buf, fixups)?,
            _ if line.starts_with("IF ") => compile_if(&line[3..], lines, buf, fixups)?,
            name => compile_call(name, buf, fixups),
        }
    }
}

fn compile_repeat(
    line: &str,
    lines: &mut impl Iterator<Item = String>,
    buf: &mut Vec<u8>,
    fixups: &mut Fixups,
) -> Result<(), CompileError> {
    let rest = &line["REPEAT ".len()..];
    let count_str = rest
        .strip_suffix("-TIMES")
        .ok_or_else(|| CompileError::RepeatCountInvalid(rest.to_string()))?;
    let count = parse_count(count_str)?;

    let loop_top = buf.len() as u32;
    compile_stmts(lines, buf, fixups, &["END"])?;
    push_repeat(buf, count, loop_top);
    Ok(())
}

/// `UNTIL <cond> ... END`: a guard branch skips the loop entirely if the
/// condition already holds, then the body runs with a per-iteration
/// re-test on the back edge.
fn compile_until(
    cond_tokens: &str,
    lines: &mut impl Iterator<Item = String>,
    buf: &mut Vec<u8>,
    fixups: &mut Fixups,
) -> Result<(), CompileError> {
    let (cond, inverted) = parse_cond(cond_tokens)?;

    let guard_slot = push_branch(buf, Opcode::Branch, cond, inverted, 0);
    let loop_top = buf.len() as u32;
    compile_stmts(lines, buf, fixups, &["END"])?;
    push_branch(buf, Opcode::Branch, cond, !inverted, loop_top);
    patch_u32(buf, guard_slot, buf.len() as u32);
    Ok(())
}

/// `IF <cond> ... [ELSE ...] END`.
fn compile_if(
    cond_tokens: &str,
    lines: &mut impl Iterator<Item = String>,
    buf: &mut Vec<u8>,
    fixups: &mut Fixups,
) -> Result<(), CompileError> {
    let (cond, inverted) = parse_cond(cond_tokens)?;

    // Branch to the else-clause (or if-end) when the condition is false.
    let to_else_slot = push_branch(buf, Opcode::Branch, cond, !inverted, 0);
    let terminator = compile_stmts(lines, buf, fixups, &["ELSE", "END"])?;
    let skip_else_slot = push_branch(buf, Opcode::Branch, Condition::None, false, 0);
    patch_u32(buf, to_else_slot, buf.len() as u32);

    if terminator == "ELSE" {
        compile_stmts(lines, buf, fixups, &["END"])?;
    }
    patch_u32(buf, skip_else_slot, buf.len() as u32);
    Ok(())
}

fn compile_call(name: &str, buf: &mut Vec<u8>, fixups: &mut Fixups) {
    let slot = push_branch(buf, Opcode::BranchLinked, Condition::None, false, 0);
    fixups.entry(name.to_string()).or_default().push(slot);
}

fn parse_cond(rest: &str) -> Result<(Condition, bool), CompileError> {
    let mut parts = rest.split_whitespace();
    let prefix = parts
        .next()
        .ok_or_else(|| CompileError::UnknownConditionPrefix(rest.to_string()))?;
    let inverted = match prefix {
        "IS" => false,
        "ISNOT" => true,
        other => return Err(CompileError::UnknownConditionPrefix(other.to_string())),
    };
    let pred = parts
        .next()
        .ok_or_else(|| CompileError::UnknownCondition(String::new()))?;
    let cond = match pred {
        "WALL" => Condition::IsWall,
        "FLAG" => Condition::IsFlag,
        "HOME" => Condition::IsHome,
        "NORTH" => Condition::IsNorth,
        "EAST" => Condition::IsEast,
        "SOUTH" => Condition::IsSouth,
        "WEST" => Condition::IsWest,
        other => return Err(CompileError::UnknownCondition(other.to_string())),
    };
    Ok((cond, inverted))
}

fn parse_count(s: &str) -> Result<u16, CompileError> {
    let parsed: Result<u32, _> = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u32::from_str_radix(bin, 2)
    } else {
        s.parse::<u32>()
    }
    .map_err(|_| CompileError::RepeatCountInvalid(s.to_string()));
    let value = parsed?;
    u16::try_from(value).map_err(|_| CompileError::RepeatCountTooBig(s.to_string()))
}

/// Opcode/condition decode re-exported here only for the sake of
/// `dump_loaded_symbols`-style tooling that wants to pretty-print a
/// compiled buffer without reaching into `bytecode` directly.
pub use bytecode::decode_header;

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_str(src: &str) -> (Vec<u8>, HashMap<String, u32>) {
        let mut lines = ByteSliceLines::new(src.as_bytes());
        compile(&mut lines).expect("compile")
    }

    #[test]
    fn empty_symbol_resolves_to_noop_func() {
        let (_, symbols) = compile_str("MAIN\nEND\n");
        assert_eq!(symbols["MAIN"], NOOP_FUNC);
    }

    #[test]
    fn undefined_call_resolves_silently_to_noop() {
        let (buf, symbols) = compile_str("MAIN\n  NOSUCH\nEND\n");
        let addr = symbols["MAIN"];
        let header = decode_header(buf[addr as usize]).unwrap();
        assert_eq!(header.opcode, Opcode::BranchLinked);
        let target = bytecode::branch_target(&buf, addr).unwrap();
        assert_eq!(target, NOOP_FUNC);
    }

    #[test]
    fn duplicate_symbol_is_an_error() {
        let mut lines = ByteSliceLines::new(b"MAIN\nEND\nMAIN\nEND\n");
        let err = compile(&mut lines).unwrap_err();
        assert_eq!(err, CompileError::SymbolAlreadyDefined("MAIN".to_string()));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let (buf, symbols) = compile_str("; a comment\nMAIN\n  STEP ; walk forward\n\nEND\n");
        let addr = symbols["MAIN"] as usize;
        assert_eq!(buf[addr], bytecode::encode_header(Opcode::Step, Condition::None, false));
    }

    #[test]
    fn repeat_count_accepts_hex_and_rejects_overflow() {
        assert_eq!(parse_count("0x10").unwrap(), 16);
        assert!(parse_count("99999999999").is_err());
    }

    #[test]
    fn forward_reference_resolves_after_later_definition() {
        let (buf, symbols) = compile_str("MAIN\n  HELPER\nEND\nHELPER\n  STEP\nEND\n");
        let call_addr = symbols["MAIN"];
        let target = bytecode::branch_target(&buf, call_addr).unwrap();
        assert_eq!(target, symbols["HELPER"]);
    }
}
