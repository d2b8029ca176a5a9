//! Recursive-descent parser for path templates.
//!
//! Positions in errors are char offsets into the template string.

use super::TemplateError;
use chrono::format::{Item, StrftimeItems};

/// Case transform applied to a rendered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Upper,
    Lower,
}

/// `[i]` picks one element, `[i:j]` a range. Negative bounds count from the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    Index(i64),
    Range(Option<i64>, Option<i64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// strftime format over the media date.
    Date(String),
    Basename,
    Name,
    Ext,
    OriginalName,
    Title,
    Album,
    CameraMake,
    CameraModel,
    City,
    State,
    Country,
    Location,
    Folder,
    Folders,
    Custom,
    /// Quoted literal; always resolves.
    Text(String),
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "basename" | "stem" => Field::Basename,
            "name" => Field::Name,
            "ext" => Field::Ext,
            "original_name" => Field::OriginalName,
            "title" => Field::Title,
            "album" => Field::Album,
            "camera_make" => Field::CameraMake,
            "camera_model" => Field::CameraModel,
            "city" => Field::City,
            "state" => Field::State,
            "country" => Field::Country,
            "location" => Field::Location,
            "folder" => Field::Folder,
            "folders" => Field::Folders,
            "custom" => Field::Custom,
            _ => return None,
        })
    }

    fn is_list(&self) -> bool {
        matches!(self, Field::Folders)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub field: Field,
    pub slice: Option<Slice>,
    pub case: Option<Case>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Literal(String),
    Placeholder(Placeholder),
    /// Alternatives tried left to right; each is a sub-template.
    Fallback(Vec<Vec<Node>>),
}

/// Parse a template string into its AST.
pub fn parse(template: &str) -> Result<Vec<Node>, TemplateError> {
    let chars: Vec<char> = template.chars().collect();
    let mut parser = Parser { chars: &chars, pos: 0 };
    parser.sequence(chars.len(), true)
}

fn syntax(position: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        position,
        message: message.into(),
    }
}

struct Parser<'a> {
    chars: &'a [char],
    pos: usize,
}

impl Parser<'_> {
    fn peek_at(&self, i: usize) -> Option<char> {
        self.chars.get(i).copied()
    }

    /// `%u<` or `%l<` at the current position.
    fn case_before_group(&self) -> Option<Case> {
        if self.peek_at(self.pos) != Some('%') || self.peek_at(self.pos + 2) != Some('<') {
            return None;
        }
        match self.peek_at(self.pos + 1) {
            Some('u') => Some(Case::Upper),
            Some('l') => Some(Case::Lower),
            _ => None,
        }
    }

    /// Literals and groups up to `end`.
    fn sequence(&mut self, end: usize, top_level: bool) -> Result<Vec<Node>, TemplateError> {
        let mut nodes = Vec::new();
        let mut literal = String::new();
        while self.pos < end {
            let c = self.chars[self.pos];
            let case = self.case_before_group();
            if c == '<' || case.is_some() {
                if !literal.is_empty() {
                    nodes.push(Node::Literal(std::mem::take(&mut literal)));
                }
                if case.is_some() {
                    self.pos += 2;
                }
                nodes.push(self.group(case)?);
                continue;
            }
            match c {
                '>' => return Err(syntax(self.pos, "unexpected '>'")),
                '|' if top_level => return Err(syntax(self.pos, "dangling '|' outside a group")),
                _ => literal.push(c),
            }
            self.pos += 1;
        }
        if !literal.is_empty() {
            nodes.push(Node::Literal(literal));
        }
        Ok(nodes)
    }

    /// Find where the alternative starting at `start` ends (`|` or `>` at
    /// depth zero) and whether it contains a nested group.
    fn scan_alternative(&self, start: usize, open: usize) -> Result<(usize, bool), TemplateError> {
        let mut depth = 0usize;
        let mut quote_start = None;
        let mut nested = false;
        let mut i = start;
        while let Some(c) = self.peek_at(i) {
            if quote_start.is_some() {
                if c == '"' {
                    quote_start = None;
                }
                i += 1;
                continue;
            }
            match c {
                '"' if depth == 0 && !nested => quote_start = Some(i),
                '<' => {
                    depth += 1;
                    nested = true;
                }
                '>' if depth == 0 => return Ok((i, nested)),
                '>' => depth -= 1,
                '|' if depth == 0 => return Ok((i, nested)),
                _ => {}
            }
            i += 1;
        }
        match quote_start {
            Some(q) => Err(syntax(q, "unterminated quote")),
            None => Err(syntax(open, "unbalanced '<'")),
        }
    }

    fn group(&mut self, outer_case: Option<Case>) -> Result<Node, TemplateError> {
        let open = self.pos;
        self.pos += 1;
        let mut branches: Vec<Vec<Node>> = Vec::new();
        let mut single_field = None;
        loop {
            let start = self.pos;
            let (end, nested) = self.scan_alternative(start, open)?;
            if end == start {
                let message = if self.chars[end] == '|' || !branches.is_empty() {
                    "dangling '|'"
                } else {
                    "empty field"
                };
                return Err(syntax(start, message));
            }
            if nested {
                branches.push(self.sequence(end, false)?);
                single_field = None;
            } else {
                let placeholder = parse_field(&self.chars[start..end], start)?;
                if branches.is_empty() {
                    single_field = Some(placeholder.clone());
                } else {
                    single_field = None;
                }
                branches.push(vec![Node::Placeholder(placeholder)]);
            }
            self.pos = end + 1;
            if self.chars[end] == '>' {
                break;
            }
        }

        if branches.len() == 1 {
            if let Some(mut placeholder) = single_field {
                placeholder.case = placeholder.case.or(outer_case);
                return Ok(Node::Placeholder(placeholder));
            }
        }
        if let Some(case) = outer_case {
            for branch in &mut branches {
                apply_case(branch, case);
            }
        }
        Ok(Node::Fallback(branches))
    }
}

fn apply_case(nodes: &mut [Node], case: Case) {
    for node in nodes {
        match node {
            Node::Placeholder(p) => {
                p.case.get_or_insert(case);
            }
            Node::Fallback(branches) => {
                for branch in branches {
                    apply_case(branch, case);
                }
            }
            Node::Literal(_) => {}
        }
    }
}

/// Parse one field alternative: `%u`/`%l` prefix, field, optional slice.
fn parse_field(chars: &[char], offset: usize) -> Result<Placeholder, TemplateError> {
    let mut i = 0;
    let mut case = None;
    if chars.len() > 2 && chars[0] == '%' && (chars[2].is_ascii_alphabetic() || chars[2] == '"') {
        case = match chars[1] {
            'u' => Some(Case::Upper),
            'l' => Some(Case::Lower),
            _ => None,
        };
        if case.is_some() {
            i = 2;
        }
    }
    let rest = &chars[i..];
    let at = offset + i;

    if rest.first() == Some(&'"') {
        let close = rest[1..]
            .iter()
            .position(|&c| c == '"')
            .ok_or_else(|| syntax(at, "unterminated quote"))?
            + 1;
        if close + 1 != rest.len() {
            return Err(syntax(at + close + 1, "unexpected text after quoted literal"));
        }
        return Ok(Placeholder {
            field: Field::Text(rest[1..close].iter().collect()),
            slice: None,
            case,
        });
    }

    if rest.first() == Some(&'%') {
        let format: String = rest.iter().collect();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(syntax(at, format!("invalid date format '{format}'")));
        }
        return Ok(Placeholder {
            field: Field::Date(format),
            slice: None,
            case,
        });
    }

    let name_len = rest
        .iter()
        .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
        .count();
    if name_len == 0 {
        return Err(syntax(at, "empty field"));
    }
    let name: String = rest[..name_len].iter().collect();
    let field = Field::from_name(&name)
        .ok_or_else(|| syntax(at, format!("unknown field '{name}'")))?;

    let slice_chars = &rest[name_len..];
    let slice = if slice_chars.is_empty() {
        None
    } else if slice_chars[0] != '[' {
        return Err(syntax(at + name_len, format!("unexpected '{}'", slice_chars[0])));
    } else if !field.is_list() {
        return Err(syntax(at + name_len, format!("'{name}' cannot be sliced")));
    } else {
        Some(parse_slice(slice_chars, at + name_len)?)
    };

    Ok(Placeholder { field, slice, case })
}

fn parse_slice(chars: &[char], offset: usize) -> Result<Slice, TemplateError> {
    let bad = || syntax(offset, "bad slice");
    if chars.last() != Some(&']') {
        return Err(bad());
    }
    let inner: String = chars[1..chars.len() - 1].iter().collect();
    let bound = |s: &str| -> Result<Option<i64>, TemplateError> {
        let s = s.trim();
        if s.is_empty() {
            Ok(None)
        } else {
            s.parse().map(Some).map_err(|_| bad())
        }
    };
    match inner.split_once(':') {
        Some((a, b)) => Ok(Slice::Range(bound(a)?, bound(b)?)),
        None => bound(&inner)?.map(Slice::Index).ok_or_else(bad),
    }
}
