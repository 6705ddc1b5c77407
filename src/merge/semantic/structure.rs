//! Top-level structure extraction
//!
//! Splits a file into units: import statements, named constructs
//! (functions, classes, variables) and loose top-level code. Blank lines
//! between units belong to no unit. Python extents follow indentation;
//! brace languages follow bracket balance with strings and comments skipped.
//! Unbalanced input is a parse error so callers can fall back to a line merge.

use std::collections::HashMap;

use crate::merge::semantic::language::Language;

/// Named construct kinds addressed by location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstructKind {
    Function,
    Class,
    Variable,
}

impl ConstructKind {
    pub fn location_prefix(&self) -> &'static str {
        match self {
            ConstructKind::Function => "function",
            ConstructKind::Class => "class",
            ConstructKind::Variable => "variable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    /// Import statement, keyed by its whitespace-normalized text
    Import { key: String },
    Construct { kind: ConstructKind, name: String },
    Loose,
}

/// A contiguous run of lines `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub kind: UnitKind,
    pub start: usize,
    pub end: usize,
}

impl Unit {
    /// `function:<name>`, `class:<name>` or `variable:<name>` for constructs
    pub fn location(&self) -> Option<String> {
        match &self.kind {
            UnitKind::Construct { kind, name } => {
                Some(format!("{}:{}", kind.location_prefix(), name))
            }
            _ => None,
        }
    }

    pub fn import_key(&self) -> Option<&str> {
        match &self.kind {
            UnitKind::Import { key } => Some(key),
            _ => None,
        }
    }

    pub fn is_construct(&self) -> bool {
        matches!(self.kind, UnitKind::Construct { .. })
    }
}

/// Parsed top-level layout of one file
#[derive(Debug, Clone)]
pub struct FileStructure {
    pub language: Language,
    pub lines: Vec<String>,
    pub units: Vec<Unit>,
}

impl FileStructure {
    /// Parse LF-normalized content
    pub fn parse(content: &str, language: Language) -> Result<Self, String> {
        let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
        let mut units = if language.uses_braces() {
            scan_brace_units(&lines, language)?
        } else {
            scan_python_units(&lines, language)?
        };
        disambiguate_names(&mut units);
        Ok(Self {
            language,
            lines,
            units,
        })
    }

    pub fn text(&self, unit: &Unit) -> String {
        self.lines[unit.start..unit.end].join("\n")
    }

    pub fn imports(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.import_key().is_some())
    }

    pub fn constructs(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.is_construct())
    }

    pub fn loose(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.kind == UnitKind::Loose)
    }

    pub fn construct_at(&self, location: &str) -> Option<&Unit> {
        self.constructs()
            .find(|u| u.location().as_deref() == Some(location))
    }

    /// Line index just past the last import, if there are imports
    pub fn imports_end(&self) -> Option<usize> {
        self.imports().map(|u| u.end).max()
    }

    pub fn first_construct_start(&self) -> Option<usize> {
        self.constructs().map(|u| u.start).min()
    }

    pub fn last_construct_end(&self) -> Option<usize> {
        self.constructs().map(|u| u.end).max()
    }
}

/// Collapse runs of whitespace so formatting differences compare equal
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Classify a header line (already trimmed at the start)
fn classify(trimmed: &str, language: Language) -> Option<UnitKind> {
    let patterns = language.patterns();

    if patterns.imports.iter().any(|re| re.is_match(trimmed)) {
        // Key filled in once the unit extent is known
        return Some(UnitKind::Import { key: String::new() });
    }

    if let Some(re) = &patterns.impl_block {
        if let Some(caps) = re.captures(trimmed) {
            return Some(UnitKind::Construct {
                kind: ConstructKind::Class,
                name: format!("impl {}", normalize_whitespace(&caps[1])),
            });
        }
    }

    let groups = [
        (ConstructKind::Function, &patterns.functions),
        (ConstructKind::Class, &patterns.classes),
        (ConstructKind::Variable, &patterns.variables),
    ];
    for (kind, regexes) in groups {
        if let Some(name) = regexes
            .iter()
            .find_map(|re| re.captures(trimmed).map(|c| c[1].to_string()))
        {
            return Some(UnitKind::Construct { kind, name });
        }
    }

    None
}

fn finish_unit(kind: UnitKind, start: usize, end: usize, lines: &[String]) -> Unit {
    let kind = match kind {
        UnitKind::Import { .. } => UnitKind::Import {
            key: normalize_whitespace(&lines[start..end].join(" "))
                .trim_end_matches(';')
                .to_string(),
        },
        other => other,
    };
    Unit { kind, start, end }
}

/// Second and later constructs sharing a location get a `#n` suffix
fn disambiguate_names(units: &mut [Unit]) {
    let mut seen: HashMap<(ConstructKind, String), usize> = HashMap::new();
    for unit in units.iter_mut() {
        if let UnitKind::Construct { kind, name } = &mut unit.kind {
            let count = seen.entry((*kind, name.clone())).or_insert(0);
            *count += 1;
            if *count > 1 {
                *name = format!("{}#{}", name, count);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Bracket balance scanning
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Balance {
    depth: i32,
    opened_brace: bool,
    in_block_comment: bool,
    in_template: bool,
    triple: Option<&'static str>,
}

impl Balance {
    fn is_open(&self) -> bool {
        self.depth > 0 || self.in_block_comment || self.in_template || self.triple.is_some()
    }

    fn feed(&mut self, line: &str, language: Language) -> Result<(), String> {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if self.in_block_comment {
                if c == '*' && next == Some('/') {
                    self.in_block_comment = false;
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }
            if let Some(delim) = self.triple {
                if line[char_offset(&chars, i)..].starts_with(delim) {
                    self.triple = None;
                    i += 3;
                } else {
                    i += if c == '\\' { 2 } else { 1 };
                }
                continue;
            }
            if self.in_template {
                match c {
                    '\\' => i += 2,
                    '`' => {
                        self.in_template = false;
                        i += 1;
                    }
                    _ => i += 1,
                }
                continue;
            }

            match (language, c) {
                (Language::Python, '#') => break,
                (Language::Python, '"') | (Language::Python, '\'') => {
                    let rest = &line[char_offset(&chars, i)..];
                    if rest.starts_with("\"\"\"") {
                        self.triple = Some("\"\"\"");
                        i += 3;
                    } else if rest.starts_with("'''") {
                        self.triple = Some("'''");
                        i += 3;
                    } else {
                        i = skip_string(&chars, i, c);
                    }
                }
                (_, '/') if language.uses_braces() && next == Some('/') => break,
                (_, '/') if language.uses_braces() && next == Some('*') => {
                    self.in_block_comment = true;
                    i += 2;
                }
                (Language::JavaScript, '`') | (Language::TypeScript, '`') => {
                    self.in_template = true;
                    i += 1;
                }
                (Language::Rust, '\'') => i = skip_rust_quote(&chars, i),
                (_, '"') | (_, '\'') => i = skip_string(&chars, i, c),
                (_, '(') | (_, '[') => {
                    self.depth += 1;
                    i += 1;
                }
                (_, '{') => {
                    self.depth += 1;
                    self.opened_brace = true;
                    i += 1;
                }
                (_, ')') | (_, ']') | (_, '}') => {
                    self.depth -= 1;
                    if self.depth < 0 {
                        return Err(format!("unbalanced '{}'", c));
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }
        Ok(())
    }
}

fn char_offset(chars: &[char], idx: usize) -> usize {
    chars[..idx].iter().map(|c| c.len_utf8()).sum()
}

/// Index just past the closing quote (or end of line)
fn skip_string(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Char literals are skipped; lifetimes are left alone
fn skip_rust_quote(chars: &[char], start: usize) -> usize {
    if chars.get(start + 2) == Some(&'\'') {
        return start + 3;
    }
    if chars.get(start + 1) == Some(&'\\') {
        if let Some(close) = (start + 2..chars.len().min(start + 12)).find(|&j| chars[j] == '\'') {
            return close + 1;
        }
    }
    start + 1
}

/// Index just past the logical line starting at `start`
fn end_of_logical_line(lines: &[String], start: usize, language: Language) -> Result<usize, String> {
    let mut balance = Balance::default();
    let mut i = start;
    while i < lines.len() {
        balance
            .feed(&lines[i], language)
            .map_err(|e| format!("{} at line {}", e, i + 1))?;
        let continued = lines[i].trim_end().ends_with('\\');
        i += 1;
        if !balance.is_open() && !continued {
            return Ok(i);
        }
    }
    Err(format!("unterminated statement starting at line {}", start + 1))
}

const CONTINUATION_SUFFIXES: &[&str] = &[",", "=", "(", "+", "-", "&&", "||", "?", ":", ".", "=>", "|"];

/// Index just past a brace-language statement or block starting at `start`
fn end_of_brace_statement(
    lines: &[String],
    start: usize,
    language: Language,
    block: bool,
) -> Result<usize, String> {
    let mut balance = Balance::default();
    let mut i = start;
    while i < lines.len() {
        balance
            .feed(&lines[i], language)
            .map_err(|e| format!("{} at line {}", e, i + 1))?;
        let trimmed = lines[i].trim_end();
        i += 1;
        if balance.is_open() {
            continue;
        }
        if block {
            if balance.opened_brace || trimmed.ends_with(';') {
                return Ok(i);
            }
            continue;
        }
        let continues = CONTINUATION_SUFFIXES.iter().any(|s| trimmed.ends_with(s))
            || lines
                .get(i)
                .map_or(false, |next| next.trim_start().starts_with('.'));
        if !continues {
            return Ok(i);
        }
    }
    Err(format!("unterminated block starting at line {}", start + 1))
}

// -----------------------------------------------------------------------------
// Unit scanners
// -----------------------------------------------------------------------------

/// Skip attachable lines (decorators, attributes, comments) from `start`
fn skip_attachables(lines: &[String], start: usize, language: Language) -> Result<usize, String> {
    let mut i = start;
    while i < lines.len() && language.is_attachable(lines[i].trim_start()) {
        if language == Language::Python && indent_width(&lines[i]) > 0 {
            break;
        }
        i = end_of_logical_line(lines, i, language)?;
    }
    Ok(i)
}

fn scan_python_units(lines: &[String], language: Language) -> Result<Vec<Unit>, String> {
    let mut units = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if is_blank(&lines[i]) {
            i += 1;
            continue;
        }
        if indent_width(&lines[i]) > 0 {
            return Err(format!("unexpected indentation at line {}", i + 1));
        }

        let start = i;
        let header = skip_attachables(lines, i, language)?;
        let kind = lines
            .get(header)
            .filter(|l| !is_blank(l) && indent_width(l) == 0)
            .and_then(|l| classify(l, language));

        let (kind, header) = match kind {
            Some(kind @ UnitKind::Construct { .. }) => (kind, header),
            _ if header > start => {
                units.push(Unit {
                    kind: UnitKind::Loose,
                    start,
                    end: header,
                });
                i = header;
                continue;
            }
            Some(kind) => (kind, header),
            None => (UnitKind::Loose, header),
        };

        // Header, then every following indented or blank line
        let mut end = end_of_logical_line(lines, header, language)?;
        let mut j = end;
        while j < lines.len() && (is_blank(&lines[j]) || indent_width(&lines[j]) > 0) {
            if is_blank(&lines[j]) {
                j += 1;
            } else {
                j = end_of_logical_line(lines, j, language)?;
                end = j;
            }
        }

        units.push(finish_unit(kind, start, end, lines));
        i = end;
    }

    Ok(units)
}

fn scan_brace_units(lines: &[String], language: Language) -> Result<Vec<Unit>, String> {
    let mut units = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if is_blank(&lines[i]) {
            i += 1;
            continue;
        }

        let start = i;
        let header = skip_attachables(lines, i, language)?;
        let kind = lines
            .get(header)
            .filter(|l| !is_blank(l))
            .and_then(|l| classify(l.trim_start(), language));

        let (kind, header) = match kind {
            Some(kind @ UnitKind::Construct { .. }) => (kind, header),
            _ if header > start => {
                units.push(Unit {
                    kind: UnitKind::Loose,
                    start,
                    end: header,
                });
                i = header;
                continue;
            }
            Some(kind) => (kind, header),
            None => (UnitKind::Loose, header),
        };

        let block = matches!(
            kind,
            UnitKind::Construct {
                kind: ConstructKind::Function | ConstructKind::Class,
                ..
            }
        );
        let end = end_of_brace_statement(lines, header, language, block)?;
        units.push(finish_unit(kind, start, end, lines));
        i = end;
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locations(structure: &FileStructure) -> Vec<String> {
        structure.constructs().filter_map(|u| u.location()).collect()
    }

    #[test]
    fn test_python_units() {
        let content = "\
import os
from typing import (
    List,
    Dict,
)

MAX_RETRIES = 3


@retry
def fetch(url):
    \"\"\"Fetch a URL.

Long description at column zero.
\"\"\"
    return get(url)


class Client:
    def __init__(self):
        self.session = None

    def close(self):
        pass


if __name__ == \"__main__\":
    main()
";
        let structure = FileStructure::parse(content, Language::Python).unwrap();
        let keys: Vec<_> = structure.imports().filter_map(|u| u.import_key()).collect();
        assert_eq!(keys, vec!["import os", "from typing import ( List, Dict, )"]);
        assert_eq!(
            locations(&structure),
            vec!["variable:MAX_RETRIES", "function:fetch", "class:Client"]
        );

        let fetch = structure.construct_at("function:fetch").unwrap();
        assert!(structure.text(fetch).starts_with("@retry\ndef fetch(url):"));
        assert!(structure.text(fetch).ends_with("    return get(url)"));

        let client = structure.construct_at("class:Client").unwrap();
        assert!(structure.text(client).ends_with("        pass"));

        assert_eq!(structure.loose().count(), 1);
        assert_eq!(structure.imports_end(), Some(5));
    }

    #[test]
    fn test_python_unexpected_indent_is_error() {
        // Indented line after a blank is still part of the previous unit
        let continued = FileStructure::parse("x = 1\n\n    y = 2\n", Language::Python).unwrap();
        assert_eq!(continued.units.len(), 1);
        assert_eq!(continued.units[0].end, 3);
        assert!(FileStructure::parse("    y = 2\n", Language::Python).is_err());
    }

    #[test]
    fn test_typescript_units() {
        let content = "\
import { a } from './a';
import {
  b,
  c,
} from './bc';

/** Greets */
export function greet(name: string): string {
  const msg = `Hello ${name} }`;
  return msg; // }
}

export const handler = async (req: Request) => {
  return greet(req.url);
};

export class Server {
  start() {}
}

const config = {
  port: 8080,
};

console.log('ready');
";
        let structure = FileStructure::parse(content, Language::TypeScript).unwrap();
        assert_eq!(structure.imports().count(), 2);
        assert_eq!(
            locations(&structure),
            vec![
                "function:greet",
                "function:handler",
                "class:Server",
                "variable:config"
            ]
        );
        let greet = structure.construct_at("function:greet").unwrap();
        assert!(structure.text(greet).starts_with("/** Greets */"));
        assert_eq!(structure.loose().count(), 1);
    }

    #[test]
    fn test_rust_units_with_impl_and_lifetimes() {
        let content = "\
use std::fmt;

#[derive(Debug)]
pub struct Name<'a> {
    inner: &'a str,
}

impl<'a> fmt::Display for Name<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, \"{}\", '}')
    }
}

pub const LIMIT: usize = 10;

pub fn run() {}
";
        let structure = FileStructure::parse(content, Language::Rust).unwrap();
        assert_eq!(
            locations(&structure),
            vec![
                "class:Name",
                "class:impl fmt::Display for Name<'a>",
                "variable:LIMIT",
                "function:run"
            ]
        );
        let name = structure.construct_at("class:Name").unwrap();
        assert!(structure.text(name).starts_with("#[derive(Debug)]"));
    }

    #[test]
    fn test_unbalanced_braces_fail() {
        assert!(FileStructure::parse("fn broken() {\n", Language::Rust).is_err());
        assert!(FileStructure::parse("}\n", Language::JavaScript).is_err());
    }

    #[test]
    fn test_duplicate_names_are_disambiguated() {
        let content = "impl Foo {}\n\nimpl Foo {}\n";
        let structure = FileStructure::parse(content, Language::Rust).unwrap();
        assert_eq!(
            locations(&structure),
            vec!["class:impl Foo", "class:impl Foo#2"]
        );
    }
}
