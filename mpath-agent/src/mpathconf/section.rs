//! Section model for multipath.conf.
//!
//! The file is a tree of named blocks (`defaults { ... }`, `devices {
//! device { ... } }`) holding `key value` properties. Sections live in an
//! arena and are addressed by [`SectionId`]; the root section is unnamed.
//! Comments are not preserved across a parse/render cycle.

use std::fmt::{self, Display, Write};
use std::fs;
use std::io::Write as IoWrite;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use super::error::{ConfigError, Result};

/// Index of a section inside a [`MultipathConfig`].
pub type SectionId = usize;

const ROOT: SectionId = 0;

/// Strip one pair of surrounding double quotes.
pub fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Quote a value when it would not survive re-parsing as a single token.
fn quote_if_needed(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '#' | '!'));
    if needs_quotes && !(value.len() >= 2 && value.starts_with('"') && value.ends_with('"')) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

fn indent(level: usize) -> String {
    "    ".repeat(level)
}

/// Ordered property list. Keys may repeat (e.g. several `devnode` entries).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(Vec<(String, String)>);

impl Properties {
    /// First value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first value for `key`, or append it.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.0.push((key.to_string(), value.to_string())),
        }
    }

    fn push(&mut self, key: String, value: String) {
        self.0.push((key, value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A named block and its properties.
#[derive(Debug, Clone, Default)]
pub struct Section {
    pub name: String,
    pub properties: Properties,
    pub children: Vec<SectionId>,
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Open,
    Close,
    Newline,
}

fn tokenize(content: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let mut chars = line.chars().peekable();
        while let Some(&c) = chars.peek() {
            match c {
                '#' | '!' => break,
                '{' => {
                    chars.next();
                    tokens.push(Token::Open);
                }
                '}' => {
                    chars.next();
                    tokens.push(Token::Close);
                }
                '"' => {
                    chars.next();
                    let mut word = String::from('"');
                    let mut closed = false;
                    for c in chars.by_ref() {
                        word.push(c);
                        if c == '"' {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(ConfigError::ParseError(format!(
                            "unterminated quote on line {}",
                            lineno + 1
                        )));
                    }
                    tokens.push(Token::Word(word));
                }
                c if c.is_whitespace() => {
                    chars.next();
                }
                _ => {
                    let mut word = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_whitespace() || matches!(c, '{' | '}' | '"' | '#') {
                            break;
                        }
                        word.push(c);
                        chars.next();
                    }
                    tokens.push(Token::Word(word));
                }
            }
        }
        tokens.push(Token::Newline);
    }
    Ok(tokens)
}

/// Parsed multipath configuration.
#[derive(Debug, Clone)]
pub struct MultipathConfig {
    sections: Vec<Section>,
}

impl Default for MultipathConfig {
    fn default() -> Self {
        Self {
            sections: vec![Section::default()],
        }
    }
}

impl MultipathConfig {
    /// Parse configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut stack = vec![ROOT];
        let mut statement: Vec<String> = Vec::new();

        for token in tokenize(content)? {
            let current = *stack.last().unwrap_or(&ROOT);
            let closes = token == Token::Close;
            match token {
                Token::Word(word) => statement.push(word),
                Token::Open => {
                    let Some(name) = statement.first().cloned() else {
                        return Err(ConfigError::ParseError(
                            "section opened without a name".to_string(),
                        ));
                    };
                    statement.clear();
                    let id = config.add_section(&name, current);
                    stack.push(id);
                }
                Token::Close | Token::Newline => {
                    if !statement.is_empty() {
                        let key = statement.remove(0);
                        let value = statement.join(" ");
                        config.sections[current].properties.push(key, value);
                        statement.clear();
                    }
                    if closes {
                        if stack.len() == 1 {
                            return Err(ConfigError::ParseError(
                                "unbalanced closing brace".to_string(),
                            ));
                        }
                        stack.pop();
                    }
                }
            }
        }

        if stack.len() > 1 {
            let open = &config.sections[stack[stack.len() - 1]].name;
            return Err(ConfigError::ParseError(format!(
                "section '{open}' is not closed"
            )));
        }
        Ok(config)
    }

    /// Load and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Write the configuration atomically via a temp file in the same directory.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut temp_file = NamedTempFile::new_in(dir)?;
        temp_file.write_all(self.to_string().as_bytes())?;
        temp_file.persist(path).map_err(|e| ConfigError::Io(e.error))?;
        debug!(path = %path.display(), "Saved multipath configuration");
        Ok(())
    }

    pub fn root(&self) -> SectionId {
        ROOT
    }

    pub fn section(&self, id: SectionId) -> &Section {
        &self.sections[id]
    }

    pub fn properties_mut(&mut self, id: SectionId) -> &mut Properties {
        &mut self.sections[id].properties
    }

    /// First section called `name` in depth-first order, optionally below `parent`.
    pub fn find_section(&self, name: &str, parent: Option<SectionId>) -> Option<SectionId> {
        let mut pending = vec![parent.unwrap_or(ROOT)];
        while let Some(id) = pending.pop() {
            let section = &self.sections[id];
            if id != ROOT && section.name == name && parent != Some(id) {
                return Some(id);
            }
            pending.extend(section.children.iter().rev());
        }
        None
    }

    /// The `device` section whose `vendor` property matches `vendor`.
    pub fn device_section(&self, vendor: &str) -> Option<SectionId> {
        let devices = self.find_section("devices", None)?;
        self.sections[devices]
            .children
            .iter()
            .copied()
            .find(|&id| {
                let section = &self.sections[id];
                section.name == "device"
                    && section
                        .properties
                        .get("vendor")
                        .is_some_and(|v| unquote(v) == vendor)
            })
    }

    /// Append a new child section.
    pub fn add_section(&mut self, name: &str, parent: SectionId) -> SectionId {
        let id = self.sections.len();
        self.sections.push(Section {
            name: name.to_string(),
            ..Default::default()
        });
        self.sections[parent].children.push(id);
        id
    }

    /// Existing direct child `name` of `parent`, or a newly added one.
    pub fn get_or_add_section(&mut self, name: &str, parent: SectionId) -> SectionId {
        let existing = self.sections[parent]
            .children
            .iter()
            .copied()
            .find(|&id| self.sections[id].name == name);
        existing.unwrap_or_else(|| self.add_section(name, parent))
    }

    fn render(&self, id: SectionId, level: usize, out: &mut String) -> fmt::Result {
        let section = &self.sections[id];
        let ind = indent(level);
        for (key, value) in section.properties.iter() {
            if value.is_empty() {
                writeln!(out, "{ind}{key}")?;
            } else {
                writeln!(out, "{ind}{key} {}", quote_if_needed(value))?;
            }
        }
        for &child in &section.children {
            writeln!(out, "{ind}{} {{", self.sections[child].name)?;
            self.render(child, level + 1, out)?;
            writeln!(out, "{ind}}}")?;
        }
        Ok(())
    }
}

impl Display for MultipathConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(ROOT, 0, &mut out)?;
        f.write_str(&out)
    }
}
