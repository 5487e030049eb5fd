//! Top-level declarations of a `.proto` file.
//!
//! `protofish` resolves and decodes types but does not report which
//! services a file declares or which files it imports. Those are read here
//! from the token stream: `package`, `import` and `service { rpc ... }` at
//! the outermost levels. Everything else is left to `protofish`.

/// Package, imports and services declared by one file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(super) struct Declarations {
    pub package: String,
    pub imports: Vec<String>,
    /// Service names (unqualified) with their method names.
    pub services: Vec<(String, Vec<String>)>,
}

impl Declarations {
    /// Fully qualified name of a service declared in this file.
    pub(super) fn qualify(&self, name: &str) -> String {
        if self.package.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{name}", self.package)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Str(&'a str),
    Punct(char),
}

/// Scan `source` for its top-level declarations.
pub(super) fn scan(source: &str) -> Declarations {
    let tokens = tokenize(source);
    let mut found = Declarations::default();
    let mut depth = 0usize;
    let mut service: Option<(String, Vec<String>)> = None;
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        match token {
            Token::Punct('{') => depth += 1,
            Token::Punct('}') => {
                depth = depth.saturating_sub(1);
                if depth == 0
                    && let Some(done) = service.take()
                {
                    found.services.push(done);
                }
            }
            Token::Word("package") if depth == 0 => {
                if let Some(Token::Word(name)) = iter.next() {
                    found.package = (*name).to_owned();
                }
            }
            Token::Word("import") if depth == 0 => {
                if matches!(iter.peek(), Some(Token::Word("public" | "weak"))) {
                    iter.next();
                }
                if let Some(Token::Str(path)) = iter.next() {
                    found.imports.push((*path).to_owned());
                }
            }
            Token::Word("service") if depth == 0 => {
                if let Some(Token::Word(name)) = iter.next() {
                    service = Some(((*name).to_owned(), Vec::new()));
                }
            }
            Token::Word("rpc") if depth == 1 => {
                if let Some((_, methods)) = service.as_mut()
                    && let Some(Token::Word(name)) = iter.peek()
                {
                    methods.push((*name).to_owned());
                }
            }
            _ => {}
        }
    }
    found
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while let Some(&byte) = bytes.get(pos) {
        match byte {
            b'/' if bytes.get(pos + 1) == Some(&b'/') => {
                pos = source[pos..].find('\n').map_or(bytes.len(), |end| pos + end);
            }
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                pos = source[pos + 2..].find("*/").map_or(bytes.len(), |end| pos + end + 4);
            }
            b'"' | b'\'' => {
                let body = pos + 1;
                let end = source[body..]
                    .find(char::from(byte))
                    .map_or(bytes.len(), |end| body + end);
                tokens.push(Token::Str(&source[body..end]));
                pos = end + 1;
            }
            b if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' => {
                let end = source[pos..]
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                    .map_or(bytes.len(), |end| pos + end);
                tokens.push(Token::Word(&source[pos..end]));
                pos = end;
            }
            b if b.is_ascii_whitespace() => pos += 1,
            b if b.is_ascii() => {
                tokens.push(Token::Punct(char::from(b)));
                pos += 1;
            }
            _ => pos += source[pos..].chars().next().map_or(1, char::len_utf8),
        }
    }
    tokens
}
