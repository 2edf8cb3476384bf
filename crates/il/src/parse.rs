//! IL text parser
//!
//! Hand-rolled tokenizer and recursive-descent parser for the canonical
//! textual form. Whitespace and `#` comments are insignificant. Parsing is
//! recoverable at statement boundaries: on a malformed instruction the
//! parser records a diagnostic and resynchronizes at the next block label,
//! function, or closing brace, so one bad line does not hide the rest.

use crate::diag::Diag;
use crate::instr::{BranchTarget, FloatPred, Instr, IntPred, Opcode, SourceLoc};
use crate::module::{
    ClassDecl, Extern, FnOopInfo, Function, GlobalConst, GlobalInit, InterfaceImpl, Module,
    StructDecl,
};
use crate::types::{Signature, Type};
use crate::value::{SsaId, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum TokKind {
    /// Bare identifier or keyword (also type names and labels)
    Ident,
    /// `%name` temporary reference (text holds the name without `%`)
    Temp,
    /// `@name` global symbol (text holds the name without `@`)
    Global,
    /// Integer literal, decoded
    Int(i64),
    /// Float literal, decoded
    Float(f64),
    /// String literal, unescaped
    Str(String),
    /// Punctuation: `( ) { } [ ] , : = -> @ !`
    Punct,
}

/// A token with 0-indexed source position (1-indexed in messages).
#[derive(Debug, Clone)]
struct Token {
    text: String,
    kind: TokKind,
    line: usize,
    column: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    file: String,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, file: &str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 0,
            col: 0,
            file: file.to_string(),
        }
    }

    fn err(&self, code: &'static str, msg: impl Into<String>) -> Diag {
        Diag::error(code, msg).with_loc(&self.file, self.line as u32 + 1, self.col as u32 + 1)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<u8> {
        self.src.get(self.pos + off).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, Diag> {
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.bump();
                continue;
            }
            if c == b'#' {
                while let Some(c) = self.peek() {
                    if c == b'\n' {
                        break;
                    }
                    self.bump();
                }
                continue;
            }
            let (line, col) = (self.line, self.col);
            let tok = |text: &str, kind| Token {
                text: text.to_string(),
                kind,
                line,
                column: col,
            };
            match c {
                b'"' => {
                    let s = self.lex_string()?;
                    out.push(Token {
                        text: String::new(),
                        kind: TokKind::Str(s),
                        line,
                        column: col,
                    });
                }
                b'%' => {
                    self.bump();
                    let name = self.lex_ident_body();
                    if name.is_empty() {
                        return Err(self.err("IL-PARSE-001", "expected name after '%'"));
                    }
                    out.push(Token {
                        text: name,
                        kind: TokKind::Temp,
                        line,
                        column: col,
                    });
                }
                b'@' => {
                    self.bump();
                    if self.peek().is_some_and(|c| is_ident_start(c as char)) {
                        let name = self.lex_ident_body();
                        out.push(Token {
                            text: name,
                            kind: TokKind::Global,
                            line,
                            column: col,
                        });
                    } else {
                        out.push(tok("@", TokKind::Punct));
                    }
                }
                b'-' => {
                    if self.peek_at(1) == Some(b'>') {
                        self.bump();
                        self.bump();
                        out.push(tok("->", TokKind::Punct));
                    } else if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                        out.push(self.lex_number(line, col)?);
                    } else if self.src[self.pos..].starts_with(b"-Inf") {
                        for _ in 0..4 {
                            self.bump();
                        }
                        out.push(Token {
                            text: "-Inf".to_string(),
                            kind: TokKind::Float(f64::NEG_INFINITY),
                            line,
                            column: col,
                        });
                    } else {
                        return Err(self.err("IL-PARSE-001", "stray '-'"));
                    }
                }
                b'(' | b')' | b'{' | b'}' | b'[' | b']' | b',' | b':' | b'=' | b'!' => {
                    self.bump();
                    out.push(tok(&(c as char).to_string(), TokKind::Punct));
                }
                c if c.is_ascii_digit() => out.push(self.lex_number(line, col)?),
                c if is_ident_start(c as char) => {
                    let name = self.lex_ident_body();
                    let kind = match name.as_str() {
                        "NaN" => TokKind::Float(f64::NAN),
                        "Inf" => TokKind::Float(f64::INFINITY),
                        _ => TokKind::Ident,
                    };
                    out.push(Token {
                        text: name,
                        kind,
                        line,
                        column: col,
                    });
                }
                other => {
                    return Err(self.err(
                        "IL-PARSE-001",
                        format!("unexpected character '{}'", other as char),
                    ));
                }
            }
        }
        Ok(out)
    }

    fn lex_ident_body(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if is_ident_char(c as char) {
                s.push(c as char);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn lex_string(&mut self) -> Result<String, Diag> {
        self.bump(); // opening quote
        // Accumulate bytes so multi-byte UTF-8 text passes through intact.
        let mut bytes: Vec<u8> = Vec::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.err("IL-PARSE-004", "unclosed string literal"));
            };
            match c {
                b'"' => {
                    return String::from_utf8(bytes)
                        .map_err(|_| self.err("IL-PARSE-004", "string is not valid UTF-8"));
                }
                b'\\' => {
                    let Some(esc) = self.bump() else {
                        return Err(self.err("IL-PARSE-004", "unclosed escape sequence"));
                    };
                    match esc {
                        b'n' => bytes.push(b'\n'),
                        b't' => bytes.push(b'\t'),
                        b'\\' => bytes.push(b'\\'),
                        b'"' => bytes.push(b'"'),
                        b'x' => {
                            let hi = self.bump();
                            let lo = self.bump();
                            let (Some(hi), Some(lo)) = (hi, lo) else {
                                return Err(self.err("IL-PARSE-004", "truncated \\x escape"));
                            };
                            let hex = [hi, lo];
                            let value = std::str::from_utf8(&hex)
                                .ok()
                                .and_then(|h| u8::from_str_radix(h, 16).ok());
                            match value {
                                Some(b) => {
                                    // The escape denotes a code point.
                                    let mut buf = [0u8; 4];
                                    bytes.extend_from_slice(
                                        (b as char).encode_utf8(&mut buf).as_bytes(),
                                    );
                                }
                                None => {
                                    return Err(
                                        self.err("IL-PARSE-004", "invalid \\x escape digits")
                                    );
                                }
                            }
                        }
                        other => {
                            return Err(self.err(
                                "IL-PARSE-004",
                                format!("unknown escape '\\{}'", other as char),
                            ));
                        }
                    }
                }
                b'\n' => return Err(self.err("IL-PARSE-004", "unclosed string literal")),
                other => bytes.push(other),
            }
        }
    }

    fn lex_number(&mut self, line: usize, col: usize) -> Result<Token, Diag> {
        let neg = self.peek() == Some(b'-');
        if neg {
            self.bump();
        }
        let mut text = String::new();
        if self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X') | Some(b'b') | Some(b'B'))
        {
            self.bump();
            let radix = if matches!(self.bump(), Some(b'x') | Some(b'X')) {
                16
            } else {
                2
            };
            while let Some(c) = self.peek() {
                if (c as char).is_ascii_hexdigit() {
                    text.push(c as char);
                    self.bump();
                } else {
                    break;
                }
            }
            let mag = u64::from_str_radix(&text, radix)
                .map_err(|_| self.err("IL-PARSE-003", format!("bad integer literal '{}'", text)))?;
            let value = if neg {
                (mag as i64).wrapping_neg()
            } else {
                mag as i64
            };
            return Ok(Token {
                text,
                kind: TokKind::Int(value),
                line,
                column: col,
            });
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => {
                    text.push(c as char);
                    self.bump();
                }
                b'.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                    is_float = true;
                    text.push('.');
                    self.bump();
                }
                b'e' | b'E' => {
                    is_float = true;
                    text.push(c as char);
                    self.bump();
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        text.push(self.bump().unwrap_or(b'+') as char);
                    }
                }
                _ => break,
            }
        }
        if is_float {
            let x: f64 = text
                .parse()
                .map_err(|_| self.err("IL-PARSE-003", format!("bad float literal '{}'", text)))?;
            Ok(Token {
                text,
                kind: TokKind::Float(if neg { -x } else { x }),
                line,
                column: col,
            })
        } else {
            let wide: i128 = text
                .parse()
                .map_err(|_| self.err("IL-PARSE-003", format!("bad integer literal '{}'", text)))?;
            let wide = if neg { -wide } else { wide };
            if wide < i64::MIN as i128 || wide > i64::MAX as i128 {
                return Err(self.err(
                    "IL-PARSE-003",
                    format!("integer literal '{}' out of i64 range", text),
                ));
            }
            Ok(Token {
                text,
                kind: TokKind::Int(wide as i64),
                line,
                column: col,
            })
        }
    }
}

/// Deferred branch-target fixup: labels may be referenced before their
/// block is parsed.
struct PendingTarget {
    block: usize,
    instr: usize,
    slot: usize,
    label: String,
    line: u32,
    col: u32,
}

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
    file: String,
    diags: Vec<Diag>,
    module: Module,
}

/// Parse a module from canonical text. On success the module is returned;
/// otherwise every diagnostic collected while resynchronizing.
pub fn parse_module(src: &str, file: &str) -> Result<Module, Vec<Diag>> {
    let toks = match Lexer::new(src, file).tokenize() {
        Ok(t) => t,
        Err(d) => return Err(vec![d]),
    };
    let mut p = Parser {
        toks,
        pos: 0,
        file: file.to_string(),
        diags: Vec::new(),
        module: Module::new(""),
    };
    p.run();
    if p.diags.is_empty() {
        Ok(p.module)
    } else {
        Err(p.diags)
    }
}

impl Parser {
    fn run(&mut self) {
        while !self.at_end() {
            let keyword = self.peek_text().to_string();
            let res = match keyword.as_str() {
                "module" => self.parse_module_header(),
                "extern" => self.parse_extern(),
                "struct" => self.parse_struct(),
                "global" => self.parse_global(),
                "class" => self.parse_class(),
                "fn" => self.parse_fn(),
                other => Err(self.err_here(format!("expected declaration, found '{}'", other))),
            };
            if let Err(d) = res {
                self.diags.push(d);
                self.recover_top_level();
            }
        }
    }

    // ---- token helpers ----

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, off: usize) -> Option<&Token> {
        self.toks.get(self.pos + off)
    }

    fn peek_text(&self) -> &str {
        self.peek().map(|t| t.text.as_str()).unwrap_or("")
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn err_here(&self, msg: impl Into<String>) -> Diag {
        let (line, col) = self
            .peek()
            .map(|t| (t.line as u32 + 1, t.column as u32 + 1))
            .unwrap_or((0, 0));
        Diag::error("IL-PARSE-001", msg).with_loc(&self.file, line, col)
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), Diag> {
        if self.peek().is_some_and(|t| t.kind == TokKind::Punct && t.text == p) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err_here(format!("expected '{}', found '{}'", p, self.peek_text())))
        }
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().is_some_and(|t| t.kind == TokKind::Punct && t.text == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, kw: &str) -> bool {
        if self.peek().is_some_and(|t| t.kind == TokKind::Ident && t.text == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<String, Diag> {
        match self.peek() {
            Some(t) if t.kind == TokKind::Ident => {
                let s = t.text.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.err_here(format!("expected identifier, found '{}'", self.peek_text()))),
        }
    }

    fn expect_global(&mut self) -> Result<String, Diag> {
        match self.peek() {
            Some(t) if t.kind == TokKind::Global => {
                let s = t.text.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.err_here(format!("expected '@name', found '{}'", self.peek_text()))),
        }
    }

    fn expect_temp(&mut self) -> Result<String, Diag> {
        match self.peek() {
            Some(t) if t.kind == TokKind::Temp => {
                let s = t.text.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.err_here(format!("expected '%name', found '{}'", self.peek_text()))),
        }
    }

    fn expect_int(&mut self) -> Result<i64, Diag> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokKind::Int(n)) => {
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.err_here(format!("expected integer, found '{}'", self.peek_text()))),
        }
    }

    // ---- recovery ----

    fn recover_top_level(&mut self) {
        let mut depth = 0usize;
        while let Some(t) = self.peek() {
            if t.kind == TokKind::Punct && t.text == "{" {
                depth += 1;
            } else if t.kind == TokKind::Punct && t.text == "}" {
                if depth == 0 {
                    self.pos += 1;
                    return;
                }
                depth -= 1;
            } else if depth == 0
                && t.kind == TokKind::Ident
                && matches!(
                    t.text.as_str(),
                    "module" | "extern" | "struct" | "global" | "class" | "fn"
                )
            {
                return;
            }
            self.pos += 1;
        }
    }

    /// Skip to the next block label, function, or closing brace.
    fn recover_in_body(&mut self) {
        while let Some(t) = self.peek() {
            if t.kind == TokKind::Punct && t.text == "}" {
                return;
            }
            if t.kind == TokKind::Ident && t.text == "fn" {
                return;
            }
            if t.kind == TokKind::Ident {
                let next = self.peek_at(1);
                if next.is_some_and(|n| n.kind == TokKind::Punct && (n.text == ":" || n.text == "("))
                {
                    return;
                }
            }
            self.pos += 1;
        }
    }

    // ---- types ----

    fn parse_type(&mut self) -> Result<Type, Diag> {
        if self.eat_punct("[") {
            let elem = self.parse_type()?;
            self.expect_punct("]")?;
            return Ok(Type::Array(Box::new(elem)));
        }
        let name = self.expect_ident()?;
        match name.as_str() {
            "void" => Ok(Type::Void),
            "i1" => Ok(Type::I1),
            "i8" => Ok(Type::I8),
            "i16" => Ok(Type::I16),
            "i32" => Ok(Type::I32),
            "i64" => Ok(Type::I64),
            "f32" => Ok(Type::F32),
            "f64" => Ok(Type::F64),
            "ptr" => Ok(Type::Ptr),
            "str" => Ok(Type::Str),
            "fn" => {
                self.expect_punct("(")?;
                let params = self.parse_type_list()?;
                self.expect_punct(")")?;
                self.expect_punct("->")?;
                let ret = self.parse_type()?;
                Ok(Type::Func(Box::new(Signature::new(params, ret))))
            }
            other => {
                if let Some(idx) = other.strip_prefix("struct.") {
                    let idx: u32 = idx
                        .parse()
                        .map_err(|_| self.err_here(format!("bad struct type '{}'", other)))?;
                    Ok(Type::Struct(idx))
                } else {
                    Err(self.err_here(format!("unknown type '{}'", other)))
                }
            }
        }
    }

    fn parse_type_list(&mut self) -> Result<Vec<Type>, Diag> {
        let mut types = Vec::new();
        if self
            .peek()
            .is_some_and(|t| t.kind == TokKind::Punct && (t.text == ")" || t.text == "}"))
        {
            return Ok(types);
        }
        loop {
            types.push(self.parse_type()?);
            if !self.eat_punct(",") {
                return Ok(types);
            }
        }
    }

    // ---- top-level declarations ----

    fn parse_module_header(&mut self) -> Result<(), Diag> {
        self.pos += 1; // "module"
        match self.advance().map(|t| t.kind) {
            Some(TokKind::Str(name)) => {
                self.module.name = name;
                Ok(())
            }
            _ => Err(self.err_here("expected module name string")),
        }
    }

    fn parse_extern(&mut self) -> Result<(), Diag> {
        self.pos += 1;
        let name = self.expect_global()?;
        self.expect_punct("(")?;
        let params = self.parse_type_list()?;
        self.expect_punct(")")?;
        self.expect_punct("->")?;
        let ret = self.parse_type()?;
        self.module.externs.push(Extern {
            name,
            sig: Signature::new(params, ret),
        });
        Ok(())
    }

    fn parse_struct(&mut self) -> Result<(), Diag> {
        self.pos += 1;
        let name = self.expect_temp()?;
        self.expect_punct("=")?;
        self.expect_punct("{")?;
        let fields = self.parse_type_list()?;
        self.expect_punct("}")?;
        self.module.structs.push(StructDecl { name, fields });
        Ok(())
    }

    fn parse_global(&mut self) -> Result<(), Diag> {
        self.pos += 1;
        let name = self.expect_global()?;
        self.expect_punct(":")?;
        let ty = self.parse_type()?;
        self.expect_punct("=")?;
        let init = match self.advance().map(|t| t.kind) {
            Some(TokKind::Int(n)) => GlobalInit::Int(n),
            Some(TokKind::Float(x)) => GlobalInit::Float(x),
            Some(TokKind::Str(s)) => GlobalInit::Str(s),
            _ => return Err(self.err_here("expected literal initializer")),
        };
        self.module.globals.push(GlobalConst { name, ty, init });
        Ok(())
    }

    fn parse_class(&mut self) -> Result<(), Diag> {
        self.pos += 1;
        let name = self.expect_global()?;
        let base = if self.eat_ident("base") {
            Some(self.expect_global()?)
        } else {
            None
        };
        self.expect_punct("{")?;
        let mut decl = ClassDecl {
            name,
            base,
            fields: Vec::new(),
            vtable: Vec::new(),
            interfaces: Vec::new(),
        };
        loop {
            if self.eat_punct("}") {
                break;
            }
            if self.eat_ident("fields") {
                self.expect_punct("{")?;
                decl.fields = self.parse_type_list()?;
                self.expect_punct("}")?;
            } else if self.eat_ident("vtable") {
                self.expect_punct("{")?;
                decl.vtable = self.parse_symbol_list()?;
                self.expect_punct("}")?;
            } else if self.eat_ident("impl") {
                let iface = self.expect_global()?;
                self.expect_punct("{")?;
                let slots = self.parse_symbol_list()?;
                self.expect_punct("}")?;
                decl.interfaces.push(InterfaceImpl { iface, slots });
            } else {
                return Err(self.err_here(format!(
                    "expected 'fields', 'vtable', 'impl' or '}}', found '{}'",
                    self.peek_text()
                )));
            }
        }
        self.module.classes.push(decl);
        Ok(())
    }

    fn parse_symbol_list(&mut self) -> Result<Vec<String>, Diag> {
        let mut out = Vec::new();
        if self.peek().is_some_and(|t| t.kind == TokKind::Punct && t.text == "}") {
            return Ok(out);
        }
        loop {
            out.push(self.expect_global()?);
            if !self.eat_punct(",") {
                return Ok(out);
            }
        }
    }

    // ---- functions ----

    fn parse_fn(&mut self) -> Result<(), Diag> {
        self.pos += 1;
        let name = self.expect_global()?;
        self.expect_punct("(")?;
        let mut header_params: Vec<(String, Type)> = Vec::new();
        if !self.eat_punct(")") {
            loop {
                let pname = self.expect_temp()?;
                self.expect_punct(":")?;
                let ty = self.parse_type()?;
                header_params.push((pname, ty));
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }
        self.expect_punct("->")?;
        let ret = self.parse_type()?;
        let sig = Signature::new(header_params.iter().map(|(_, t)| t.clone()).collect(), ret);
        let mut func = Function::new_empty(name, sig);

        if self.eat_ident("method") {
            let class = self.expect_global()?;
            let slot = if self.eat_ident("slot") {
                Some(self.expect_int()? as u32)
            } else {
                None
            };
            func.oop = Some(FnOopInfo {
                class,
                slot,
                ctor: false,
            });
        } else if self.eat_ident("ctor") {
            let class = self.expect_global()?;
            func.oop = Some(FnOopInfo {
                class,
                slot: None,
                ctor: true,
            });
        }

        self.expect_punct("{")?;

        let mut temps: HashMap<String, SsaId> = HashMap::new();
        let mut pending: Vec<PendingTarget> = Vec::new();
        let mut first_block = true;

        loop {
            if self.eat_punct("}") {
                break;
            }
            if self.at_end() {
                return Err(self.err_here("unexpected end of input inside function body"));
            }
            if self.peek().is_some_and(|t| t.kind == TokKind::Ident && t.text == "fn") {
                self.diags
                    .push(self.err_here("missing '}' before next function"));
                break;
            }
            // Block header?
            let is_label = self.peek().is_some_and(|t| t.kind == TokKind::Ident)
                && self.peek_at(1).is_some_and(|n| {
                    n.kind == TokKind::Punct && (n.text == ":" || n.text == "(")
                })
                && self.block_header_ahead();
            if is_label {
                if let Err(d) = self.parse_block_header(&mut func, &mut temps, first_block, &header_params) {
                    self.diags.push(d);
                    self.recover_in_body();
                }
                first_block = false;
                continue;
            }
            if first_block {
                self.diags
                    .push(self.err_here("function body must start with a block label"));
                self.recover_in_body();
                first_block = false;
                continue;
            }
            if func.blocks.is_empty() {
                // Entry header failed to parse; skip until something labels.
                self.recover_in_body();
                if self.peek().is_some_and(|t| t.kind == TokKind::Punct && t.text == "}")
                    || self.at_end()
                {
                    continue;
                }
                if !self.block_header_ahead() {
                    self.pos += 1;
                }
                continue;
            }
            let pending_mark = pending.len();
            match self.parse_instr(&mut func, &mut temps, &mut pending) {
                Ok(instr) => {
                    let bid = func.blocks.len() - 1;
                    func.blocks[bid].instrs.push(instr);
                }
                Err(d) => {
                    // Drop target fixups registered by the aborted
                    // instruction.
                    pending.truncate(pending_mark);
                    self.diags.push(d);
                    self.recover_in_body();
                }
            }
        }

        // Resolve deferred branch targets now that all labels are known.
        for p in pending {
            match func.block_id(&p.label) {
                Some(dest) => func.blocks[p.block].instrs[p.instr].targets[p.slot].block = dest,
                None => self.diags.push(
                    Diag::error("IL-PARSE-002", format!("unknown label '{}'", p.label))
                        .with_loc(&self.file, p.line, p.col),
                ),
            }
        }
        self.module.funcs.push(func);
        Ok(())
    }

    /// Lookahead: distinguishes `label(... ):` block headers from
    /// instruction text. A header's parenthesis closes with `):`.
    fn block_header_ahead(&self) -> bool {
        let next = match self.peek_at(1) {
            Some(t) => t,
            None => return false,
        };
        if next.text == ":" {
            return true;
        }
        // scan for matching ')' followed by ':'
        let mut depth = 0usize;
        let mut i = self.pos + 1;
        while let Some(t) = self.toks.get(i) {
            if t.kind == TokKind::Punct {
                match t.text.as_str() {
                    "(" => depth += 1,
                    ")" => {
                        depth -= 1;
                        if depth == 0 {
                            return self
                                .toks
                                .get(i + 1)
                                .is_some_and(|n| n.kind == TokKind::Punct && n.text == ":");
                        }
                    }
                    "{" | "}" => return false,
                    _ => {}
                }
            }
            i += 1;
        }
        false
    }

    fn parse_block_header(
        &mut self,
        func: &mut Function,
        temps: &mut HashMap<String, SsaId>,
        first_block: bool,
        header_params: &[(String, Type)],
    ) -> Result<(), Diag> {
        let label = self.expect_ident()?;
        let mut params: Vec<(String, Type)> = Vec::new();
        if self.eat_punct("(") {
            if !self.eat_punct(")") {
                loop {
                    let pname = self.expect_temp()?;
                    self.expect_punct(":")?;
                    let ty = self.parse_type()?;
                    params.push((pname, ty));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
            }
        }
        self.expect_punct(":")?;
        if first_block {
            if !params.is_empty() {
                return Err(self.err_here(
                    "entry block takes its parameters from the function header",
                ));
            }
            params = header_params.to_vec();
        }
        let bid = func
            .create_block(label, params)
            .map_err(|e| self.err_here(e))?;
        for p in &func.blocks[bid].params {
            temps.insert(p.name.clone(), p.id);
        }
        Ok(())
    }

    fn temp_id(&self, func: &mut Function, temps: &mut HashMap<String, SsaId>, name: &str) -> SsaId {
        if let Some(id) = temps.get(name) {
            return *id;
        }
        let id = func.reserve_temp();
        temps.insert(name.to_string(), id);
        id
    }

    fn parse_value(
        &mut self,
        func: &mut Function,
        temps: &mut HashMap<String, SsaId>,
    ) -> Result<Value, Diag> {
        let tok = self
            .peek()
            .cloned()
            .ok_or_else(|| self.err_here("expected operand"))?;
        match tok.kind {
            TokKind::Temp => {
                self.pos += 1;
                Ok(Value::Temp(self.temp_id(func, temps, &tok.text)))
            }
            TokKind::Global => {
                self.pos += 1;
                Ok(Value::Global(tok.text))
            }
            TokKind::Int(n) => {
                self.pos += 1;
                Ok(Value::ConstInt(n))
            }
            TokKind::Float(x) => {
                self.pos += 1;
                Ok(Value::ConstFloat(x))
            }
            TokKind::Str(s) => {
                self.pos += 1;
                Ok(Value::ConstStr(self.module.intern_string(&s)))
            }
            TokKind::Ident if tok.text == "true" => {
                self.pos += 1;
                Ok(Value::ConstBool(true))
            }
            TokKind::Ident if tok.text == "false" => {
                self.pos += 1;
                Ok(Value::ConstBool(false))
            }
            TokKind::Ident if tok.text == "null" => {
                self.pos += 1;
                Ok(Value::Null)
            }
            _ => Err(self.err_here(format!("expected operand, found '{}'", tok.text))),
        }
    }

    fn parse_args(
        &mut self,
        func: &mut Function,
        temps: &mut HashMap<String, SsaId>,
    ) -> Result<Vec<Value>, Diag> {
        let mut args = Vec::new();
        if self.peek().is_some_and(|t| t.kind == TokKind::Punct && t.text == ")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_value(func, temps)?);
            if !self.eat_punct(",") {
                return Ok(args);
            }
        }
    }

    /// `label` or `label(args)` - records an unresolved target and returns
    /// its slot.
    fn parse_target(
        &mut self,
        func: &mut Function,
        temps: &mut HashMap<String, SsaId>,
        instr: &mut Instr,
        pending: &mut Vec<PendingTarget>,
        block: usize,
        instr_index: usize,
    ) -> Result<(), Diag> {
        let tok = self
            .peek()
            .cloned()
            .ok_or_else(|| self.err_here("expected branch target"))?;
        let label = self.expect_ident()?;
        let mut args = Vec::new();
        if self.eat_punct("(") {
            args = self.parse_args(func, temps)?;
            self.expect_punct(")")?;
        }
        let slot = instr.targets.len();
        instr.targets.push(BranchTarget {
            block: usize::MAX,
            args,
        });
        pending.push(PendingTarget {
            block,
            instr: instr_index,
            slot,
            label,
            line: tok.line as u32 + 1,
            col: tok.column as u32 + 1,
        });
        Ok(())
    }

    fn parse_instr(
        &mut self,
        func: &mut Function,
        temps: &mut HashMap<String, SsaId>,
        pending: &mut Vec<PendingTarget>,
    ) -> Result<Instr, Diag> {
        let block = func.blocks.len() - 1;
        let instr_index = func.blocks[block].instrs.len();

        // optional result
        let mut result_name: Option<String> = None;
        if self.peek().is_some_and(|t| t.kind == TokKind::Temp)
            && self.peek_at(1).is_some_and(|t| t.kind == TokKind::Punct && t.text == "=")
        {
            result_name = Some(self.expect_temp()?);
            self.expect_punct("=")?;
        }

        let tail = self.eat_ident("tail");
        let mn = self.expect_ident()?;
        let mut i = self.dispatch_opcode(&mn, func, temps, pending, block, instr_index)?;
        i.tail = tail;
        if tail && !matches!(i.op, Opcode::Call | Opcode::ICall) {
            return Err(self.err_here("'tail' is only valid on call/icall"));
        }

        if let Some(name) = result_name {
            if !crate::instr::schema(i.op).has_result {
                return Err(self.err_here(format!("{} does not produce a result", i.op)));
            }
            i.result = Some(self.temp_id(func, temps, &name));
        }

        // optional `!eh N` hint
        if self.peek().is_some_and(|t| t.kind == TokKind::Punct && t.text == "!") {
            self.pos += 1;
            if !self.eat_ident("eh") {
                return Err(self.err_here("expected 'eh' after '!'"));
            }
            i.eh_scope = Some(self.expect_int()? as u32);
        }

        // optional `@"file":line:col`
        if self.peek().is_some_and(|t| t.kind == TokKind::Punct && t.text == "@") {
            self.pos += 1;
            let file = match self.advance().map(|t| t.kind) {
                Some(TokKind::Str(s)) => s,
                _ => return Err(self.err_here("expected quoted file name in location")),
            };
            self.expect_punct(":")?;
            let line = self.expect_int()?;
            self.expect_punct(":")?;
            let col = self.expect_int()?;
            let file_id = self.module.intern_file(&file);
            i.loc = SourceLoc::new(file_id, line as u32, col as u32);
        }
        Ok(i)
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_opcode(
        &mut self,
        mn: &str,
        func: &mut Function,
        temps: &mut HashMap<String, SsaId>,
        pending: &mut Vec<PendingTarget>,
        block: usize,
        instr_index: usize,
    ) -> Result<Instr, Diag> {
        let (base, suffix) = match mn.split_once('.') {
            Some((b, s)) => (b, Some(s)),
            None => (mn, None),
        };
        let op = match base {
            "add" => Opcode::Add,
            "sub" => Opcode::Sub,
            "mul" => Opcode::Mul,
            "sdiv" => Opcode::Sdiv,
            "udiv" => Opcode::Udiv,
            "srem" => Opcode::Srem,
            "urem" => Opcode::Urem,
            "fadd" => Opcode::Fadd,
            "fsub" => Opcode::Fsub,
            "fmul" => Opcode::Fmul,
            "fdiv" => Opcode::Fdiv,
            "abs" => Opcode::Abs,
            "and" => Opcode::And,
            "or" => Opcode::Or,
            "xor" => Opcode::Xor,
            "shl" => Opcode::Shl,
            "lshr" => Opcode::Lshr,
            "ashr" => Opcode::Ashr,
            "icmp" => {
                let pred = suffix
                    .and_then(IntPred::from_mnemonic)
                    .ok_or_else(|| self.err_here(format!("bad icmp predicate in '{}'", mn)))?;
                Opcode::ICmp(pred)
            }
            "fcmp" => {
                let pred = suffix
                    .and_then(FloatPred::from_mnemonic)
                    .ok_or_else(|| self.err_here(format!("bad fcmp predicate in '{}'", mn)))?;
                Opcode::FCmp(pred)
            }
            "sext" => Opcode::Sext,
            "zext" => Opcode::Zext,
            "trunc" => Opcode::Trunc,
            "sitofp" => Opcode::SiToFp,
            "uitofp" => Opcode::UiToFp,
            "fptosi" => Opcode::FpToSi,
            "fptoui" => Opcode::FpToUi,
            "bitcast" => Opcode::Bitcast,
            "ptrtoint" => Opcode::PtrToInt,
            "inttoptr" => Opcode::IntToPtr,
            "alloca" => Opcode::Alloca,
            "load" => Opcode::Load,
            "store" => Opcode::Store,
            "gep" => Opcode::Gep,
            "addrof" => Opcode::AddrOf,
            "ret" => Opcode::Ret,
            "br" => Opcode::Br,
            "cbr" => Opcode::CBr,
            "switch" => {
                if suffix != Some("i32") {
                    return Err(self.err_here("switch scrutinee must be i32 ('switch.i32')"));
                }
                Opcode::Switch
            }
            "unreachable" => Opcode::Unreachable,
            "resume" => Opcode::Resume,
            "call" => Opcode::Call,
            "icall" => Opcode::ICall,
            "invoke" => Opcode::Invoke,
            "landingpad" => Opcode::Landingpad,
            other => return Err(self.err_here(format!("unknown opcode '{}'", other))),
        };

        let mut i = Instr::new(op);
        use crate::instr::OpKind;
        match crate::instr::schema(op).kind {
            OpKind::IntBin | OpKind::FloatBin | OpKind::IntCmp | OpKind::FloatCmp => {
                i.ty = self.parse_type()?;
                i.operands.push(self.parse_value(func, temps)?);
                self.expect_punct(",")?;
                i.operands.push(self.parse_value(func, temps)?);
                i.result_ty = if matches!(op, Opcode::ICmp(_) | Opcode::FCmp(_)) {
                    Type::I1
                } else {
                    i.ty.clone()
                };
            }
            OpKind::NumUnary => {
                i.ty = self.parse_type()?;
                i.operands.push(self.parse_value(func, temps)?);
                i.result_ty = i.ty.clone();
            }
            OpKind::Convert => {
                i.ty = self.parse_type()?;
                i.operands.push(self.parse_value(func, temps)?);
                if !self.eat_ident("to") {
                    return Err(self.err_here("expected 'to' in conversion"));
                }
                i.result_ty = self.parse_type()?;
            }
            OpKind::Alloca => {
                i.ty = self.parse_type()?;
                self.expect_punct(",")?;
                i.operands.push(self.parse_value(func, temps)?);
                i.result_ty = Type::Ptr;
            }
            OpKind::Load => {
                i.ty = self.parse_type()?;
                self.expect_punct(",")?;
                i.operands.push(self.parse_value(func, temps)?);
                i.result_ty = i.ty.clone();
            }
            OpKind::Store => {
                i.ty = self.parse_type()?;
                self.expect_punct(",")?;
                i.operands.push(self.parse_value(func, temps)?);
                self.expect_punct(",")?;
                i.operands.push(self.parse_value(func, temps)?);
            }
            OpKind::Gep => {
                i.operands.push(self.parse_value(func, temps)?);
                self.expect_punct(",")?;
                i.operands.push(self.parse_value(func, temps)?);
                i.result_ty = Type::Ptr;
            }
            OpKind::AddrOf => {
                i.operands.push(self.parse_value(func, temps)?);
                i.result_ty = Type::Ptr;
            }
            OpKind::Ret => {
                i.ty = func.sig.ret.clone();
                if func.sig.ret != Type::Void {
                    i.operands.push(self.parse_value(func, temps)?);
                }
            }
            OpKind::Br => {
                self.parse_target(func, temps, &mut i, pending, block, instr_index)?;
            }
            OpKind::CBr => {
                i.operands.push(self.parse_value(func, temps)?);
                self.expect_punct(",")?;
                self.parse_target(func, temps, &mut i, pending, block, instr_index)?;
                self.expect_punct(",")?;
                self.parse_target(func, temps, &mut i, pending, block, instr_index)?;
            }
            OpKind::Switch => {
                i.ty = Type::I32;
                i.operands.push(self.parse_value(func, temps)?);
                self.expect_punct(",")?;
                self.parse_target(func, temps, &mut i, pending, block, instr_index)?;
                self.expect_punct("[")?;
                if !self.eat_punct("]") {
                    loop {
                        let key = self.expect_int()?;
                        if key < i32::MIN as i64 || key > i32::MAX as i64 {
                            return Err(self.err_here(format!("case key {} out of i32 range", key)));
                        }
                        self.expect_punct("->")?;
                        self.parse_target(func, temps, &mut i, pending, block, instr_index)?;
                        i.case_keys.push(key as i32);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct("]")?;
                }
            }
            OpKind::Unreachable | OpKind::Resume => {}
            OpKind::Call => {
                i.callee = Some(self.expect_global()?);
                self.expect_punct("(")?;
                i.operands = self.parse_args(func, temps)?;
                self.expect_punct(")")?;
                self.expect_punct("->")?;
                i.result_ty = self.parse_type()?;
            }
            OpKind::ICall => {
                let fp = self.parse_value(func, temps)?;
                i.operands.push(fp);
                self.expect_punct("(")?;
                let args = self.parse_args(func, temps)?;
                i.operands.extend(args);
                self.expect_punct(")")?;
                self.expect_punct(":")?;
                if !self.eat_ident("fn") {
                    return Err(self.err_here("expected 'fn' signature on icall"));
                }
                self.expect_punct("(")?;
                i.sig_params = self.parse_type_list()?;
                self.expect_punct(")")?;
                self.expect_punct("->")?;
                i.result_ty = self.parse_type()?;
            }
            OpKind::Invoke => {
                i.callee = Some(self.expect_global()?);
                self.expect_punct("(")?;
                i.operands = self.parse_args(func, temps)?;
                self.expect_punct(")")?;
                self.expect_punct("->")?;
                i.result_ty = self.parse_type()?;
                if !self.eat_ident("normal") {
                    return Err(self.err_here("expected 'normal' destination on invoke"));
                }
                self.parse_target(func, temps, &mut i, pending, block, instr_index)?;
                if !self.eat_ident("unwind") {
                    return Err(self.err_here("expected 'unwind' destination on invoke"));
                }
                self.parse_target(func, temps, &mut i, pending, block, instr_index)?;
            }
            OpKind::Landingpad => {
                i.result_ty = Type::Ptr;
            }
        }
        Ok(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::module_text;

    const TINY: &str = r#"
module "tiny"

fn @main() -> i64 {
entry:
  %0 = add i64 40, 2
  ret %0
}
"#;

    #[test]
    fn test_parse_tiny() {
        let m = parse_module(TINY, "tiny.vil").unwrap();
        assert_eq!(m.name, "tiny");
        assert_eq!(m.funcs.len(), 1);
        let f = &m.funcs[0];
        assert_eq!(f.name, "main");
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].instrs.len(), 2);
        assert_eq!(f.blocks[0].instrs[0].op, Opcode::Add);
    }

    #[test]
    fn test_parse_block_params_and_branches() {
        let src = r#"
module "loop"
fn @sum() -> i64 {
entry:
  br body(0, 0)
body(%i: i64, %acc: i64):
  %c = icmp.slt i64 %i, 10
  cbr %c, latch(%i, %acc), done(%acc)
latch(%i2: i64, %acc2: i64):
  %n = add i64 %i2, 1
  %a = add i64 %acc2, %i2
  br body(%n, %a)
done(%r: i64):
  ret %r
}
"#;
        let m = parse_module(src, "loop.vil").unwrap();
        let f = &m.funcs[0];
        assert_eq!(f.blocks.len(), 4);
        let term = f.blocks[0].terminator().unwrap();
        assert_eq!(term.op, Opcode::Br);
        assert_eq!(term.targets[0].block, 1);
        assert_eq!(term.targets[0].args.len(), 2);
    }

    #[test]
    fn test_forward_label_reference() {
        let src = r#"
module "fwd"
fn @f() -> void {
entry:
  br later
later:
  ret
}
"#;
        let m = parse_module(src, "f.vil").unwrap();
        assert_eq!(m.funcs[0].blocks[0].terminator().unwrap().targets[0].block, 1);
    }

    #[test]
    fn test_unknown_label_is_diagnosed() {
        let src = r#"
module "bad"
fn @f() -> void {
entry:
  br nowhere
}
"#;
        let diags = parse_module(src, "f.vil").unwrap_err();
        assert!(diags.iter().any(|d| d.code == "IL-PARSE-002"));
    }

    #[test]
    fn test_int_literal_forms() {
        let src = r#"
module "ints"
fn @f() -> i64 {
entry:
  %a = add i64 0x10, 0b101
  %b = add i64 %a, -3
  ret %b
}
"#;
        let m = parse_module(src, "i.vil").unwrap();
        let ops = &m.funcs[0].blocks[0].instrs[0].operands;
        assert_eq!(ops[0], Value::ConstInt(16));
        assert_eq!(ops[1], Value::ConstInt(5));
        assert_eq!(
            m.funcs[0].blocks[0].instrs[1].operands[1],
            Value::ConstInt(-3)
        );
    }

    #[test]
    fn test_string_escapes_and_pool() {
        let src = r#"
module "s"
extern @Viper.Console.PrintStr(str) -> void
fn @f() -> void {
entry:
  call @Viper.Console.PrintStr("a\nb\x21") -> void
  ret
}
"#;
        let m = parse_module(src, "s.vil").unwrap();
        assert_eq!(m.strings[0], "a\nb!");
    }

    #[test]
    fn test_recovery_collects_multiple_errors() {
        let src = r#"
module "multi"
fn @f() -> void {
entry:
  bogus_op i64 1, 2
  ret
}
fn @g() -> void {
entry:
  also_bogus
  ret
}
"#;
        let diags = parse_module(src, "m.vil").unwrap_err();
        assert!(diags.len() >= 2);
    }

    #[test]
    fn test_location_suffix() {
        let src = r#"
module "loc"
fn @f() -> void {
entry:
  ret @"prog.bas":7:3
}
"#;
        let m = parse_module(src, "l.vil").unwrap();
        let loc = m.funcs[0].blocks[0].instrs[0].loc;
        assert_eq!(m.file_name(loc), Some("prog.bas"));
        assert_eq!((loc.line, loc.col), (7, 3));
    }

    #[test]
    fn test_round_trip_fixed_point() {
        let src = r#"
module "rt"
extern @Viper.Console.PrintI64(i64) -> void
global @limit: i64 = 99
fn @main(%n: i64) -> i64 {
entry:
  %c = icmp.sge i64 %n, 0
  cbr %c, pos, neg
pos:
  %v = mul i64 %n, 2
  br out(%v)
neg:
  %w = sub i64 0, %n
  br out(%w)
out(%r: i64):
  call @Viper.Console.PrintI64(%r) -> void
  ret %r
}
"#;
        let m1 = parse_module(src, "rt.vil").unwrap();
        let t1 = module_text(&m1);
        let m2 = parse_module(&t1, "rt.vil").unwrap();
        let t2 = module_text(&m2);
        assert_eq!(t1, t2);
    }

    #[test]
    fn test_class_and_method_metadata_round_trip() {
        let src = r#"
module "oop"
class @Geo.Shape {
  fields { i64 }
  vtable { @Geo.Shape.Area }
}
class @Geo.Circle base @Geo.Shape {
  fields { i64, f64 }
  vtable { @Geo.Circle.Area }
  impl @Geo.IDrawable { @Geo.Circle.Draw }
}
fn @Geo.Circle.__ctor(%self: ptr) -> ptr ctor @Geo.Circle {
entry:
  ret %self
}
fn @Geo.Circle.Area(%self: ptr) -> f64 method @Geo.Circle slot 0 {
entry:
  ret 0.0
}
"#;
        let m = parse_module(src, "oop.vil").unwrap();
        assert_eq!(m.classes.len(), 2);
        let circle = &m.classes[1];
        assert_eq!(circle.base.as_deref(), Some("Geo.Shape"));
        assert_eq!(circle.vtable, vec!["Geo.Circle.Area".to_string()]);
        assert_eq!(circle.interfaces[0].iface, "Geo.IDrawable");
        assert_eq!(circle.ctor_symbol(), "Geo.Circle.__ctor");
        let ctor = &m.funcs[0];
        assert!(ctor.oop.as_ref().unwrap().ctor);
        let area = &m.funcs[1];
        assert_eq!(area.oop.as_ref().unwrap().slot, Some(0));

        let t1 = crate::emit::module_text(&m);
        let m2 = parse_module(&t1, "oop.vil").unwrap();
        assert_eq!(crate::emit::module_text(&m2), t1);
        assert_eq!(m2.classes, m.classes);
    }

    #[test]
    fn test_switch_parses() {
        let src = r#"
module "sw"
fn @f(%x: i32) -> i64 {
entry:
  switch.i32 %x, other [0 -> zero, 1 -> one]
zero:
  ret 0
one:
  ret 1
other:
  ret -1
}
"#;
        let m = parse_module(src, "sw.vil").unwrap();
        let term = m.funcs[0].blocks[0].terminator().unwrap();
        assert_eq!(term.op, Opcode::Switch);
        assert_eq!(term.case_keys, vec![0, 1]);
        assert_eq!(term.targets.len(), 3);
    }
}
