//! Assembly source tokenizer.
//!
//! A pure, deterministic function from source lines to instruction
//! tuples. Each line is, in order: an optional `<label>:` prefix,
//! optional whitespace, then an optional instruction or `#`-comment.
//! Lines carrying only a label or a comment compile to `NOP`.
//!
//! # Grammar
//!
//! ```text
//!   NOP | SWP | SAV | NEG
//!   MOV <int>,<ACC|NIL|node:Rk>
//!   MOV <ACC|NIL|Rk>,<ACC|NIL|node:Rk>
//!   (ADD|SUB) <int>  |  (ADD|SUB) <ACC|NIL|Rk>
//!   (JMP|JEZ|JNZ|JGZ|JLZ) <label>
//!   JRO <int>  |  JRO <ACC|NIL|Rk>
//!   PUSH <int>,<node>  |  PUSH <ACC|NIL|Rk>,<node>
//!   POP <node>,<ACC|NIL>
//!   IN <ACC|NIL>
//!   OUT <int>  |  OUT <ACC|NIL|Rk>
//! ```
//!
//! Labels are case-insensitive and unique per program. Node addresses may
//! carry a `host:port` form, so a network register reference is split on
//! its LAST colon.

use crate::tis::errors::AsmError;
use crate::tis::program::{Instr, LabelMap, LocalDst, MovDst, NetRef, Src};

/// Scans label declarations, mapping each (uppercased) name to its line
/// index. Duplicate declarations fail the whole program.
pub fn scan_labels(lines: &[&str]) -> Result<LabelMap, AsmError> {
    let mut labels = LabelMap::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some((name, _)) = split_label(line) {
            let name = name.to_ascii_uppercase();
            if labels.contains_key(&name) {
                return Err(AsmError::DuplicateLabel(name));
            }
            labels.insert(name, i);
        }
    }

    Ok(labels)
}

/// Converts each source line into one instruction tuple.
pub fn tokenize(lines: &[&str], labels: &LabelMap) -> Result<Vec<Instr>, AsmError> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| parse_line(i, line, labels))
        .collect()
}

/// Splits an optional `<label>:` prefix off a line.
///
/// The prefix is a run of word characters directly followed by a colon;
/// anything else (including `p2:R1` operands, which sit after a mnemonic
/// and whitespace) is left untouched.
fn split_label(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    let end = trimmed.find(':')?;
    let name = &trimmed[..end];
    if name.is_empty() || !is_word(name) {
        return None;
    }
    Some((name, &trimmed[end + 1..]))
}

fn is_word(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_line(line_no: usize, line: &str, labels: &LabelMap) -> Result<Instr, AsmError> {
    let rest = match split_label(line) {
        Some((_, rest)) => rest,
        None => line,
    };

    let text = rest.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(Instr::Nop);
    }

    let invalid = || AsmError::InvalidInstruction {
        line: line_no,
        text: text.to_string(),
    };

    let (mnemonic, args) = match text.split_once(char::is_whitespace) {
        Some((m, a)) => (m, a.trim()),
        None => (text, ""),
    };

    match mnemonic {
        "NOP" | "SWP" | "SAV" | "NEG" if args.is_empty() => Ok(match mnemonic {
            "NOP" => Instr::Nop,
            "SWP" => Instr::Swp,
            "SAV" => Instr::Sav,
            _ => Instr::Neg,
        }),
        "MOV" => {
            let (a, b) = split_operands(args).ok_or_else(invalid)?;
            let src = parse_src(a).ok_or_else(invalid)?;
            let dst = parse_mov_dst(b).ok_or_else(invalid)?;
            Ok(Instr::Mov { src, dst })
        }
        "ADD" | "SUB" if !args.is_empty() => {
            let src = parse_src(args).ok_or_else(invalid)?;
            Ok(match mnemonic {
                "ADD" => Instr::Add(src),
                _ => Instr::Sub(src),
            })
        }
        "JMP" | "JEZ" | "JNZ" | "JGZ" | "JLZ" if is_word(args) && !args.is_empty() => {
            let label = args.to_ascii_uppercase();
            let target = *labels.get(&label).ok_or(AsmError::UndeclaredLabel {
                line: line_no,
                label,
            })?;
            Ok(match mnemonic {
                "JMP" => Instr::Jmp(target),
                "JEZ" => Instr::Jez(target),
                "JNZ" => Instr::Jnz(target),
                "JGZ" => Instr::Jgz(target),
                _ => Instr::Jlz(target),
            })
        }
        "JRO" if !args.is_empty() => {
            let src = parse_src(args).ok_or_else(invalid)?;
            Ok(Instr::Jro(src))
        }
        "PUSH" => {
            let (a, b) = split_operands(args).ok_or_else(invalid)?;
            let src = parse_src(a).ok_or_else(invalid)?;
            let stack = parse_node(b).ok_or_else(invalid)?;
            Ok(Instr::Push { src, stack })
        }
        "POP" => {
            let (a, b) = split_operands(args).ok_or_else(invalid)?;
            let stack = parse_node(a).ok_or_else(invalid)?;
            let dst = parse_local_dst(b).ok_or_else(invalid)?;
            Ok(Instr::Pop { stack, dst })
        }
        "IN" if !args.is_empty() => {
            let dst = parse_local_dst(args).ok_or_else(invalid)?;
            Ok(Instr::In(dst))
        }
        "OUT" if !args.is_empty() => {
            let src = parse_src(args).ok_or_else(invalid)?;
            Ok(Instr::Out(src))
        }
        _ => Err(invalid()),
    }
}

fn split_operands(args: &str) -> Option<(&str, &str)> {
    let (a, b) = args.split_once(',')?;
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some((a, b))
}

fn parse_src(tok: &str) -> Option<Src> {
    if let Ok(v) = tok.parse::<i32>() {
        return Some(Src::Imm(v));
    }
    match tok {
        "ACC" => Some(Src::Acc),
        "NIL" => Some(Src::Nil),
        _ => parse_reg(tok).map(Src::Reg),
    }
}

fn parse_local_dst(tok: &str) -> Option<LocalDst> {
    match tok {
        "ACC" => Some(LocalDst::Acc),
        "NIL" => Some(LocalDst::Nil),
        _ => None,
    }
}

fn parse_mov_dst(tok: &str) -> Option<MovDst> {
    if let Some(dst) = parse_local_dst(tok) {
        return Some(MovDst::Local(dst));
    }
    parse_net_ref(tok).map(MovDst::Net)
}

/// Parses a mailbox name `R0`..`R3`.
fn parse_reg(tok: &str) -> Option<u8> {
    match tok {
        "R0" => Some(0),
        "R1" => Some(1),
        "R2" => Some(2),
        "R3" => Some(3),
        _ => None,
    }
}

/// Parses `<addr>:Rk`, splitting on the last colon so that `host:port`
/// addresses survive.
fn parse_net_ref(tok: &str) -> Option<NetRef> {
    let (addr, reg) = tok.rsplit_once(':')?;
    let register = parse_reg(reg)?;
    let addr = parse_node(addr)?;
    Some(NetRef { addr, register })
}

/// Parses a bare node address (stack targets, the addr half of a network
/// register reference). A token that itself reads as `<addr>:Rk` is not a
/// bare address.
fn parse_node(tok: &str) -> Option<String> {
    let valid = !tok.is_empty()
        && tok
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ':'));
    if !valid {
        return None;
    }
    if let Some((_, reg)) = tok.rsplit_once(':') {
        if parse_reg(reg).is_some() {
            return None;
        }
    }
    Some(tok.to_string())
}
