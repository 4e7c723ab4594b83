//! Schema file parser
//!
//! Hand-written tokenizer and recursive-descent parser for `.proto`
//! sources. Type names are kept as written; resolution happens at link
//! time. Every error carries the file path and line.

use crate::error::{ModuleError, Result};

use super::descriptor::{
    EnumDescriptor, EnumValueDescriptor, FieldDescriptor, FieldRange, FieldType, FileDescriptor,
    Label, MessageDescriptor, MethodDescriptor, OneofDescriptor, OptionDecl, OptionNamePart,
    OptionValue, ScalarType, ServiceDescriptor, Syntax,
};

/// Highest valid field number
pub const MAX_FIELD_NUMBER: i64 = 536_870_911;

/// Deepest allowed chain of nested message declarations
pub const MAX_NESTING_DEPTH: usize = 100;

/// Field numbers reserved for the protobuf implementation
const RESERVED_FIELD_NUMBERS: std::ops::RangeInclusive<i64> = 19_000..=19_999;

/// Parse one `.proto` file
pub fn parse_file(path: &str, content: &str) -> Result<FileDescriptor> {
    let tokens = tokenize(path, content)?;
    Parser {
        path,
        tokens,
        pos: 0,
        syntax: None,
        depth: 0,
    }
    .file()
}

// =============================================================================
// Tokenizer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Number(String),
    Str(String),
    Symbol(char),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
}

fn tokenize(path: &str, content: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = content.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    let error = |line: usize, message: &str| ModuleError::Parse {
        path: path.to_string(),
        line,
        message: message.to_string(),
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\n' {
            line += 1;
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && next == Some('*') {
            let start_line = line;
            i += 2;
            loop {
                match chars.get(i) {
                    None => return Err(error(start_line, "unterminated block comment")),
                    Some('*') if chars.get(i + 1) == Some(&'/') => {
                        i += 2;
                        break;
                    }
                    Some('\n') => {
                        line += 1;
                        i += 1;
                    }
                    Some(_) => i += 1,
                }
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(chars[start..i].iter().collect()),
                line,
            });
        } else if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            let is_hex = c == '0' && matches!(next, Some('x') | Some('X'));
            while i < chars.len() {
                let ch = chars[i];
                let exponent_sign = (ch == '+' || ch == '-')
                    && !is_hex
                    && matches!(chars[i - 1], 'e' | 'E');
                if ch.is_ascii_alphanumeric() || ch == '.' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Number(chars[start..i].iter().collect()),
                line,
            });
        } else if c == '"' || c == '\'' {
            let (value, end) = read_string(&chars, i, c).map_err(|m| error(line, &m))?;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                line,
            });
            i = end;
        } else if c.is_ascii_punctuation() {
            tokens.push(Token {
                kind: TokenKind::Symbol(c),
                line,
            });
            i += 1;
        } else {
            return Err(error(line, &format!("unexpected character {:?}", c)));
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
    });
    Ok(tokens)
}

/// Read a quoted string starting at `start`, returning its value and the
/// index just past the closing quote
fn read_string(
    chars: &[char],
    start: usize,
    quote: char,
) -> std::result::Result<(String, usize), String> {
    let mut value = String::new();
    let mut i = start + 1;
    loop {
        let c = *chars.get(i).ok_or("unterminated string literal")?;
        i += 1;
        match c {
            '\n' => return Err("unterminated string literal".to_string()),
            c if c == quote => return Ok((value, i)),
            '\\' => {
                let e = *chars.get(i).ok_or("unterminated string literal")?;
                i += 1;
                match e {
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    'a' => value.push('\u{07}'),
                    'b' => value.push('\u{08}'),
                    'f' => value.push('\u{0C}'),
                    'v' => value.push('\u{0B}'),
                    '\\' | '\'' | '"' | '?' => value.push(e),
                    'x' | 'X' => {
                        let digits = take_digits(chars, &mut i, 2, 16);
                        let code = u32::from_str_radix(&digits, 16)
                            .map_err(|_| "invalid hex escape")?;
                        value.push(char::from_u32(code).ok_or("invalid hex escape")?);
                    }
                    'u' | 'U' => {
                        let len = if e == 'u' { 4 } else { 8 };
                        let digits = take_digits(chars, &mut i, len, 16);
                        if digits.len() != len {
                            return Err("invalid unicode escape".to_string());
                        }
                        let code = u32::from_str_radix(&digits, 16)
                            .map_err(|_| "invalid unicode escape")?;
                        value.push(char::from_u32(code).ok_or("invalid unicode escape")?);
                    }
                    '0'..='7' => {
                        i -= 1;
                        let digits = take_digits(chars, &mut i, 3, 8);
                        let code = u32::from_str_radix(&digits, 8)
                            .map_err(|_| "invalid octal escape")?;
                        value.push(char::from_u32(code).ok_or("invalid octal escape")?);
                    }
                    other => return Err(format!("invalid escape sequence \\{}", other)),
                }
            }
            c => value.push(c),
        }
    }
}

fn take_digits(chars: &[char], i: &mut usize, max: usize, radix: u32) -> String {
    let mut digits = String::new();
    while digits.len() < max {
        match chars.get(*i) {
            Some(c) if c.is_digit(radix) => {
                digits.push(*c);
                *i += 1;
            }
            _ => break,
        }
    }
    digits
}

// =============================================================================
// Parser
// =============================================================================

struct Parser<'a> {
    path: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    syntax: Option<Syntax>,
    /// Current message nesting
    depth: usize,
}

impl<'a> Parser<'a> {
    // --- token helpers ---

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn error(&self, message: impl Into<String>) -> ModuleError {
        let index = self.pos.min(self.tokens.len() - 1);
        ModuleError::Parse {
            path: self.path.to_string(),
            line: self.tokens[index].line,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> ModuleError {
        let found = match self.peek() {
            TokenKind::Ident(s) => format!("{:?}", s),
            TokenKind::Number(s) => s.clone(),
            TokenKind::Str(s) => format!("string {:?}", s),
            TokenKind::Symbol(c) => format!("'{}'", c),
            TokenKind::Eof => "end of file".to_string(),
        };
        self.error(format!("expected {}, found {}", expected, found))
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.peek() {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }

    fn is_symbol(&self, c: char) -> bool {
        *self.peek() == TokenKind::Symbol(c)
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if self.is_symbol(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<()> {
        if self.eat_symbol(c) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", c)))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_ident() == Some(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("{:?}", keyword)))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek() {
            TokenKind::Ident(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn full_ident(&mut self) -> Result<String> {
        let mut name = self.ident()?;
        while self.is_symbol('.') {
            self.advance();
            name.push('.');
            name.push_str(&self.ident()?);
        }
        Ok(name)
    }

    /// `[.]a.b.C`
    fn type_name(&mut self) -> Result<String> {
        if self.eat_symbol('.') {
            Ok(format!(".{}", self.full_ident()?))
        } else {
            self.full_ident()
        }
    }

    /// One or more adjacent string literals, concatenated
    fn string_literal(&mut self) -> Result<String> {
        let mut value = match self.peek() {
            TokenKind::Str(s) => s.clone(),
            _ => return Err(self.unexpected("string literal")),
        };
        self.advance();
        while let TokenKind::Str(s) = self.peek() {
            value.push_str(s);
            self.advance();
        }
        Ok(value)
    }

    fn int_literal(&mut self) -> Result<i64> {
        let negative = self.eat_symbol('-');
        let text = match self.peek() {
            TokenKind::Number(s) => s.clone(),
            _ => return Err(self.unexpected("integer")),
        };
        let value = parse_int(&text)
            .ok_or_else(|| self.error(format!("invalid integer {:?}", text)))?;
        self.advance();
        Ok(if negative { -value } else { value })
    }

    /// `message`/`enum`/`oneof`/`extend` start a declaration unless the
    /// statement reads like a field of that type (`enum foo = 1;`)
    fn at_declaration(&self, keyword: &str) -> bool {
        let reads_like_field = matches!(self.peek_at(1), TokenKind::Ident(_))
            && *self.peek_at(2) == TokenKind::Symbol('=');
        self.peek_ident() == Some(keyword) && !reads_like_field
    }

    // --- file ---

    fn file(mut self) -> Result<FileDescriptor> {
        let mut fd = FileDescriptor {
            name: self.path.to_string(),
            ..Default::default()
        };
        let mut first_statement = true;

        loop {
            let keyword = match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Symbol(';') => {
                    self.advance();
                    continue;
                }
                TokenKind::Ident(s) => s.clone(),
                _ => return Err(self.unexpected("top-level declaration")),
            };

            match keyword.as_str() {
                "syntax" | "edition" => {
                    if !first_statement {
                        return Err(self.error(format!(
                            "{} must be the first statement in the file",
                            keyword
                        )));
                    }
                    self.advance();
                    self.expect_symbol('=')?;
                    let value = self.string_literal()?;
                    self.expect_symbol(';')?;
                    let syntax = match (keyword.as_str(), value.as_str()) {
                        ("syntax", "proto2") => Syntax::Proto2,
                        ("syntax", "proto3") => Syntax::Proto3,
                        ("syntax", other) => {
                            return Err(self.error(format!("unknown syntax {:?}", other)));
                        }
                        (_, edition) => Syntax::Edition(edition.to_string()),
                    };
                    self.syntax = Some(syntax.clone());
                    fd.syntax = Some(syntax);
                }
                "package" => {
                    if fd.package.is_some() {
                        return Err(self.error("multiple package declarations"));
                    }
                    self.advance();
                    fd.package = Some(self.full_ident()?);
                    self.expect_symbol(';')?;
                }
                "import" => {
                    self.advance();
                    let index = fd.dependencies.len();
                    if self.eat_keyword("public") {
                        fd.public_dependencies.push(index);
                    } else if self.eat_keyword("weak") {
                        fd.weak_dependencies.push(index);
                    }
                    let import = self.string_literal()?;
                    if fd.dependencies.contains(&import) {
                        return Err(self.error(format!("import {:?} was listed twice", import)));
                    }
                    fd.dependencies.push(import);
                    self.expect_symbol(';')?;
                }
                "option" => fd.options.push(self.option_statement()?),
                "message" => fd.messages.push(self.message()?),
                "enum" => fd.enums.push(self.enum_decl()?),
                "service" => fd.services.push(self.service()?),
                "extend" => self.extend(&mut fd.extensions)?,
                _ => return Err(self.unexpected("top-level declaration")),
            }
            first_statement = false;
        }
        Ok(fd)
    }

    // --- options ---

    fn option_statement(&mut self) -> Result<OptionDecl> {
        self.expect_keyword("option")?;
        let option = self.option_assignment()?;
        self.expect_symbol(';')?;
        Ok(option)
    }

    fn option_assignment(&mut self) -> Result<OptionDecl> {
        let name = self.option_name()?;
        self.expect_symbol('=')?;
        let value = self.option_value()?;
        Ok(OptionDecl { name, value })
    }

    fn option_name(&mut self) -> Result<Vec<OptionNamePart>> {
        let mut parts = Vec::new();
        loop {
            if self.eat_symbol('(') {
                let name = self.type_name()?;
                self.expect_symbol(')')?;
                parts.push(OptionNamePart { name, is_extension: true });
            } else {
                parts.push(OptionNamePart {
                    name: self.ident()?,
                    is_extension: false,
                });
            }
            if !self.eat_symbol('.') {
                return Ok(parts);
            }
        }
    }

    fn option_value(&mut self) -> Result<OptionValue> {
        match self.peek().clone() {
            TokenKind::Str(_) => Ok(OptionValue::String(self.string_literal()?)),
            TokenKind::Number(n) => {
                self.advance();
                Ok(OptionValue::Number(n))
            }
            TokenKind::Ident(s) => {
                self.advance();
                Ok(OptionValue::Identifier(s))
            }
            TokenKind::Symbol(sign @ ('-' | '+')) => {
                self.advance();
                match self.advance() {
                    TokenKind::Number(n) => Ok(OptionValue::Number(format!("{}{}", sign, n))),
                    TokenKind::Ident(s) if s == "inf" || s == "nan" => {
                        Ok(OptionValue::Identifier(format!("{}{}", sign, s)))
                    }
                    _ => Err(self.error("expected number after sign")),
                }
            }
            TokenKind::Symbol('{') => Ok(OptionValue::Aggregate(self.aggregate()?)),
            _ => Err(self.unexpected("option value")),
        }
    }

    /// Raw text of a `{ ... }` message literal
    fn aggregate(&mut self) -> Result<String> {
        self.expect_symbol('{')?;
        let mut depth = 1;
        let mut parts: Vec<String> = Vec::new();
        loop {
            match self.advance() {
                TokenKind::Eof => return Err(self.error("unterminated message literal")),
                TokenKind::Symbol('{') => {
                    depth += 1;
                    parts.push("{".to_string());
                }
                TokenKind::Symbol('}') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(parts.join(" "));
                    }
                    parts.push("}".to_string());
                }
                TokenKind::Symbol(c) => parts.push(c.to_string()),
                TokenKind::Ident(s) | TokenKind::Number(s) => parts.push(s),
                TokenKind::Str(s) => parts.push(format!("{:?}", s)),
            }
        }
    }

    /// Optional `[name = value, ...]`
    fn compact_options(&mut self) -> Result<Vec<OptionDecl>> {
        let mut options = Vec::new();
        if !self.eat_symbol('[') {
            return Ok(options);
        }
        loop {
            options.push(self.option_assignment()?);
            if self.eat_symbol(']') {
                return Ok(options);
            }
            self.expect_symbol(',')?;
        }
    }

    // --- messages ---

    fn message(&mut self) -> Result<MessageDescriptor> {
        if self.depth == MAX_NESTING_DEPTH {
            return Err(self.error(format!(
                "messages are nested more than {} levels deep",
                MAX_NESTING_DEPTH
            )));
        }
        self.depth += 1;
        let message = self.message_body();
        self.depth -= 1;
        message
    }

    fn message_body(&mut self) -> Result<MessageDescriptor> {
        self.expect_keyword("message")?;
        let name = self.ident()?;
        let mut message = MessageDescriptor {
            name,
            ..Default::default()
        };
        self.expect_symbol('{')?;

        loop {
            if self.eat_symbol('}') {
                return Ok(message);
            }
            if self.eat_symbol(';') {
                continue;
            }
            match self.peek() {
                TokenKind::Eof => {
                    return Err(self.error(format!(
                        "unexpected end of file in message {}",
                        message.name
                    )));
                }
                TokenKind::Ident(_) | TokenKind::Symbol('.') => {}
                _ => return Err(self.unexpected("message element")),
            }

            if self.at_declaration("message") {
                let nested = self.message()?;
                message.nested_messages.push(nested);
            } else if self.at_declaration("enum") {
                let nested = self.enum_decl()?;
                message.enums.push(nested);
            } else if self.at_declaration("extend") {
                self.extend(&mut message.extensions)?;
            } else if self.at_declaration("oneof") {
                self.oneof(&mut message)?;
            } else if self.peek_ident() == Some("option") {
                message.options.push(self.option_statement()?);
            } else if self.peek_ident() == Some("extensions") {
                self.advance();
                let ranges = self.ranges(MAX_FIELD_NUMBER)?;
                message.extension_ranges.extend(ranges);
                self.compact_options()?;
                self.expect_symbol(';')?;
            } else if self.peek_ident() == Some("reserved") {
                self.reserved(
                    &mut message.reserved_ranges,
                    &mut message.reserved_names,
                    MAX_FIELD_NUMBER,
                )?;
            } else if self.peek_ident() == Some("map")
                && *self.peek_at(1) == TokenKind::Symbol('<')
            {
                self.map_field(&mut message)?;
            } else {
                let field = self.field(true)?;
                message.fields.push(field);
            }
        }
    }

    fn field(&mut self, allow_label: bool) -> Result<FieldDescriptor> {
        let label = match self.peek_ident() {
            Some("optional") if allow_label => Some(Label::Optional),
            Some("required") if allow_label => Some(Label::Required),
            Some("repeated") if allow_label => Some(Label::Repeated),
            _ => None,
        };
        if label.is_some() {
            self.advance();
        }
        if self.peek_ident() == Some("group") {
            return Err(self.error("groups are not supported"));
        }
        if label == Some(Label::Required) && self.syntax == Some(Syntax::Proto3) {
            return Err(self.error("required fields are not allowed in proto3"));
        }

        let type_name = self.type_name()?;
        let field_type = match ScalarType::from_keyword(&type_name) {
            Some(scalar) => FieldType::Scalar(scalar),
            None => FieldType::Unresolved(type_name),
        };
        let name = self.ident()?;
        self.expect_symbol('=')?;
        let number = self.field_number()?;
        let options = self.compact_options()?;
        self.expect_symbol(';')?;

        Ok(FieldDescriptor {
            name,
            number,
            proto3_optional: label == Some(Label::Optional) && self.syntax == Some(Syntax::Proto3),
            label,
            field_type,
            extendee: None,
            oneof_index: None,
            options,
        })
    }

    fn field_number(&mut self) -> Result<i64> {
        let number = self.int_literal()?;
        if !(1..=MAX_FIELD_NUMBER).contains(&number) {
            return Err(self.error(format!(
                "field number {} is out of range 1 to {}",
                number, MAX_FIELD_NUMBER
            )));
        }
        if RESERVED_FIELD_NUMBERS.contains(&number) {
            return Err(self.error(format!(
                "field number {} is reserved for the protobuf implementation",
                number
            )));
        }
        Ok(number)
    }

    /// `map<K, V> name = N;` becomes a repeated field of a synthesized entry message
    fn map_field(&mut self, message: &mut MessageDescriptor) -> Result<()> {
        self.expect_keyword("map")?;
        self.expect_symbol('<')?;
        let key_name = self.type_name()?;
        let key_type = match ScalarType::from_keyword(&key_name) {
            Some(ScalarType::Double | ScalarType::Float | ScalarType::Bytes) | None => {
                return Err(self.error(format!("invalid map key type {:?}", key_name)));
            }
            Some(scalar) => scalar,
        };
        self.expect_symbol(',')?;
        let value_name = self.type_name()?;
        self.expect_symbol('>')?;
        let name = self.ident()?;
        self.expect_symbol('=')?;
        let number = self.field_number()?;
        let options = self.compact_options()?;
        self.expect_symbol(';')?;

        let entry_name = map_entry_name(&name);
        let value_type = match ScalarType::from_keyword(&value_name) {
            Some(scalar) => FieldType::Scalar(scalar),
            None => FieldType::Unresolved(value_name),
        };
        let entry_field = |name: &str, number: i64, field_type: FieldType| FieldDescriptor {
            name: name.to_string(),
            number,
            label: Some(Label::Optional),
            field_type,
            extendee: None,
            oneof_index: None,
            proto3_optional: false,
            options: Vec::new(),
        };
        message.nested_messages.push(MessageDescriptor {
            name: entry_name.clone(),
            fields: vec![
                entry_field("key", 1, FieldType::Scalar(key_type)),
                entry_field("value", 2, value_type),
            ],
            is_map_entry: true,
            ..Default::default()
        });
        message.fields.push(FieldDescriptor {
            name,
            number,
            label: Some(Label::Repeated),
            field_type: FieldType::Unresolved(entry_name),
            extendee: None,
            oneof_index: None,
            proto3_optional: false,
            options,
        });
        Ok(())
    }

    fn oneof(&mut self, message: &mut MessageDescriptor) -> Result<()> {
        self.expect_keyword("oneof")?;
        let index = message.oneofs.len();
        let mut oneof = OneofDescriptor {
            name: self.ident()?,
            options: Vec::new(),
        };
        self.expect_symbol('{')?;
        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.eat_symbol(';') {
                continue;
            }
            if *self.peek() == TokenKind::Eof {
                return Err(self.error(format!("unexpected end of file in oneof {}", oneof.name)));
            }
            if self.peek_ident() == Some("option") {
                oneof.options.push(self.option_statement()?);
                continue;
            }
            if matches!(self.peek_ident(), Some("optional" | "required" | "repeated")) {
                return Err(self.error("fields in oneofs must not have labels"));
            }
            let mut field = self.field(false)?;
            field.oneof_index = Some(index);
            message.fields.push(field);
        }
        message.oneofs.push(oneof);
        Ok(())
    }

    fn extend(&mut self, out: &mut Vec<FieldDescriptor>) -> Result<()> {
        self.expect_keyword("extend")?;
        let extendee = self.type_name()?;
        self.expect_symbol('{')?;
        loop {
            if self.eat_symbol('}') {
                return Ok(());
            }
            if self.eat_symbol(';') {
                continue;
            }
            if *self.peek() == TokenKind::Eof {
                return Err(self.error(format!("unexpected end of file in extend {}", extendee)));
            }
            let mut field = self.field(true)?;
            field.extendee = Some(extendee.clone());
            out.push(field);
        }
    }

    /// `N`, `N to M`, `N to max`, comma-separated
    fn ranges(&mut self, max: i64) -> Result<Vec<FieldRange>> {
        let mut ranges = Vec::new();
        loop {
            let start = self.int_literal()?;
            let end = if self.eat_keyword("to") {
                if self.eat_keyword("max") {
                    max
                } else {
                    self.int_literal()?
                }
            } else {
                start
            };
            if end < start {
                return Err(self.error(format!("range end {} is before start {}", end, start)));
            }
            ranges.push(FieldRange { start, end });
            if !self.eat_symbol(',') {
                return Ok(ranges);
            }
        }
    }

    fn reserved(
        &mut self,
        ranges: &mut Vec<FieldRange>,
        names: &mut Vec<String>,
        max: i64,
    ) -> Result<()> {
        self.expect_keyword("reserved")?;
        match self.peek() {
            TokenKind::Str(_) | TokenKind::Ident(_) => loop {
                let name = match self.peek() {
                    TokenKind::Str(_) => self.string_literal()?,
                    _ => self.ident()?,
                };
                names.push(name);
                if !self.eat_symbol(',') {
                    break;
                }
            },
            _ => ranges.extend(self.ranges(max)?),
        }
        self.expect_symbol(';')
    }

    // --- enums ---

    fn enum_decl(&mut self) -> Result<EnumDescriptor> {
        self.expect_keyword("enum")?;
        let mut decl = EnumDescriptor {
            name: self.ident()?,
            ..Default::default()
        };
        self.expect_symbol('{')?;
        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.eat_symbol(';') {
                continue;
            }
            match self.peek_ident() {
                Some("option") => decl.options.push(self.option_statement()?),
                Some("reserved") if *self.peek_at(1) != TokenKind::Symbol('=') => {
                    let max = i32::MAX as i64;
                    self.reserved(&mut decl.reserved_ranges, &mut decl.reserved_names, max)?;
                }
                Some(_) => {
                    let name = self.ident()?;
                    self.expect_symbol('=')?;
                    let number = self.int_literal()?;
                    let options = self.compact_options()?;
                    self.expect_symbol(';')?;
                    decl.values.push(EnumValueDescriptor { name, number, options });
                }
                None if *self.peek() == TokenKind::Eof => {
                    return Err(self.error(format!("unexpected end of file in enum {}", decl.name)));
                }
                None => return Err(self.unexpected("enum value")),
            }
        }
        if decl.values.is_empty() {
            return Err(self.error(format!("enum {} must define at least one value", decl.name)));
        }
        if self.syntax == Some(Syntax::Proto3) && decl.values[0].number != 0 {
            return Err(self.error(format!(
                "the first value of proto3 enum {} must be zero",
                decl.name
            )));
        }
        Ok(decl)
    }

    // --- services ---

    fn service(&mut self) -> Result<ServiceDescriptor> {
        self.expect_keyword("service")?;
        let mut service = ServiceDescriptor {
            name: self.ident()?,
            ..Default::default()
        };
        self.expect_symbol('{')?;
        loop {
            if self.eat_symbol('}') {
                return Ok(service);
            }
            if self.eat_symbol(';') {
                continue;
            }
            match self.peek_ident() {
                Some("option") => service.options.push(self.option_statement()?),
                Some("rpc") => service.methods.push(self.rpc()?),
                _ if *self.peek() == TokenKind::Eof => {
                    return Err(self.error(format!(
                        "unexpected end of file in service {}",
                        service.name
                    )));
                }
                _ => return Err(self.unexpected("\"rpc\" or \"option\"")),
            }
        }
    }

    fn rpc(&mut self) -> Result<MethodDescriptor> {
        self.expect_keyword("rpc")?;
        let name = self.ident()?;
        let (client_streaming, input_type) = self.rpc_type()?;
        self.expect_keyword("returns")?;
        let (server_streaming, output_type) = self.rpc_type()?;

        let mut options = Vec::new();
        if self.eat_symbol('{') {
            loop {
                if self.eat_symbol('}') {
                    break;
                }
                if self.eat_symbol(';') {
                    continue;
                }
                if self.peek_ident() == Some("option") {
                    options.push(self.option_statement()?);
                } else {
                    return Err(self.unexpected("\"option\""));
                }
            }
            self.eat_symbol(';');
        } else {
            self.expect_symbol(';')?;
        }

        Ok(MethodDescriptor {
            name,
            input_type,
            output_type,
            client_streaming,
            server_streaming,
            options,
        })
    }

    /// `( [stream] Type )`
    fn rpc_type(&mut self) -> Result<(bool, String)> {
        self.expect_symbol('(')?;
        let streaming = self.peek_ident() == Some("stream")
            && matches!(self.peek_at(1), TokenKind::Ident(_) | TokenKind::Symbol('.'));
        if streaming {
            self.advance();
        }
        let type_name = self.type_name()?;
        self.expect_symbol(')')?;
        Ok((streaming, type_name))
    }
}

/// `foo_bar` → `FooBarEntry`
fn map_entry_name(field: &str) -> String {
    let mut name = String::with_capacity(field.len() + 5);
    let mut upper = true;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            name.extend(c.to_uppercase());
            upper = false;
        } else {
            name.push(c);
        }
    }
    name.push_str("Entry");
    name
}

fn parse_int(text: &str) -> Option<i64> {
    let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8).ok()?
    } else {
        text.parse::<u64>().ok()?
    };
    i64::try_from(value).ok()
}
