/// Heuristic statement classification for read/write splitting
///
/// This is pattern matching, not parsing. It looks at the leading verb and,
/// for read-looking statements, scans the body for write clauses hidden
/// inside (`insert ... select`, data-modifying CTEs, locking reads). Anything
/// it cannot place is sent to the primary.
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use lazy_static::lazy_static;
use std::fmt;

/// Broad kind of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementRole {
    Write,
    Read,
    Unknown,
}

impl fmt::Display for StatementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementRole::Write => write!(f, "write"),
            StatementRole::Read => write!(f, "read"),
            StatementRole::Unknown => write!(f, "unknown"),
        }
    }
}

/// Why a statement was classified the way it was
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationReason {
    /// Leading write / DDL / DCL / session verb
    WriteVerb(String),
    /// Read-looking statement with a write clause in its body
    NestedWrite(String),
    /// Plain select / show / explain
    ReadVerb(String),
    /// More than one statement in the text
    MultiStatement,
    /// Empty or whitespace-only text
    Empty,
    /// Leading verb not recognised
    Unrecognized(String),
}

impl fmt::Display for ClassificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationReason::WriteVerb(verb) => write!(f, "write verb '{}'", verb),
            ClassificationReason::NestedWrite(clause) => write!(f, "nested write clause '{}'", clause),
            ClassificationReason::ReadVerb(verb) => write!(f, "read verb '{}'", verb),
            ClassificationReason::MultiStatement => write!(f, "multi-statement batch"),
            ClassificationReason::Empty => write!(f, "empty statement"),
            ClassificationReason::Unrecognized(verb) => write!(f, "unrecognized verb '{}'", verb),
        }
    }
}

/// Outcome of classifying one statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementClassification {
    pub role: StatementRole,
    /// Must run on the primary regardless of stickiness or replica health
    pub forces_master: bool,
    pub reason: ClassificationReason,
}

impl StatementClassification {
    fn write(reason: ClassificationReason) -> Self {
        Self {
            role: StatementRole::Write,
            forces_master: true,
            reason,
        }
    }

    fn read(reason: ClassificationReason) -> Self {
        Self {
            role: StatementRole::Read,
            forces_master: false,
            reason,
        }
    }

    fn unknown(reason: ClassificationReason) -> Self {
        Self {
            role: StatementRole::Unknown,
            forces_master: true,
            reason,
        }
    }

    pub fn is_read(&self) -> bool {
        self.role == StatementRole::Read
    }
}

/// Verbs that modify data, schema, privileges or session state
const WRITE_VERBS: &[&str] = &[
    "insert", "update", "delete", "create", "alter", "drop", "grant", "revoke", "truncate",
    "replace", "lock", "unlock", "set", "reset", "rename", "merge", "upsert", "comment",
    "analyze", "vacuum", "reindex", "cluster", "begin", "start", "commit", "rollback",
    "savepoint", "release", "load", "copy", "use", "flush", "optimize", "repair", "discard",
    "checkpoint", "refresh", "notify", "listen", "unlisten", "import", "handler",
];

/// Verbs that only read
const READ_VERBS: &[&str] = &["select", "with", "show", "explain", "describe", "desc"];

/// Clauses that turn a read-looking statement into a write
const NESTED_WRITE_PATTERNS: &[&str] = &[
    "insert",
    "update",
    "delete",
    "replace",
    "merge",
    "into",
    "for update",
    "for share",
    "for no key update",
    "for key share",
    "lock in share mode",
    "nextval",
    "setval",
    "get_lock",
    "release_lock",
    "pg_advisory_lock",
    "pg_advisory_xact_lock",
];

lazy_static! {
    static ref NESTED_WRITE_FINDER: AhoCorasick = AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::LeftmostLongest)
        .build(NESTED_WRITE_PATTERNS)
        .expect("Failed to create nested write pattern finder");
}

/// Stateless classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementClassifier;

impl StatementClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one statement, first matching rule wins
    pub fn classify(&self, sql: &str) -> StatementClassification {
        let scan = scan(sql);
        let body = scan.text.trim_start_matches(|c: char| c == ' ' || c == '(');
        let verb = leading_word(body).to_ascii_lowercase();

        if verb.is_empty() {
            return if body.trim().is_empty() {
                StatementClassification::unknown(ClassificationReason::Empty)
            } else {
                StatementClassification::unknown(ClassificationReason::Unrecognized(
                    body.trim().chars().take(16).collect(),
                ))
            };
        }

        if WRITE_VERBS.contains(&verb.as_str()) {
            return StatementClassification::write(ClassificationReason::WriteVerb(verb));
        }

        if READ_VERBS.contains(&verb.as_str()) {
            if let Some(clause) = find_nested_write(body) {
                return StatementClassification::write(ClassificationReason::NestedWrite(clause));
            }
            if scan.multi_statement {
                return StatementClassification::unknown(ClassificationReason::MultiStatement);
            }
            return StatementClassification::read(ClassificationReason::ReadVerb(verb));
        }

        StatementClassification::unknown(ClassificationReason::Unrecognized(verb))
    }
}

/// Classify with the default classifier
pub fn classify(sql: &str) -> StatementClassification {
    StatementClassifier.classify(sql)
}

/// Statement text with literals and comments blanked out
struct Scan {
    /// Whitespace collapsed to single spaces; literals and comments replaced by a space
    text: String,
    /// A `;` is followed by more statement text
    multi_statement: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Normal,
    Quoted(char),
    LineComment,
    BlockComment,
}

fn scan(sql: &str) -> Scan {
    let mut text = String::with_capacity(sql.len());
    let mut state = ScanState::Normal;
    let mut saw_terminator = false;
    let mut multi_statement = false;
    let mut chars = sql.chars().peekable();

    let push_space = |text: &mut String| {
        if !text.ends_with(' ') {
            text.push(' ');
        }
    };

    while let Some(c) = chars.next() {
        match state {
            ScanState::Normal => match c {
                '\'' | '"' | '`' => {
                    state = ScanState::Quoted(c);
                    push_space(&mut text);
                }
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = ScanState::LineComment;
                    push_space(&mut text);
                }
                '#' => {
                    state = ScanState::LineComment;
                    push_space(&mut text);
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = ScanState::BlockComment;
                    push_space(&mut text);
                }
                ';' => {
                    saw_terminator = true;
                    push_space(&mut text);
                }
                c if c.is_whitespace() => push_space(&mut text),
                c => {
                    if saw_terminator {
                        multi_statement = true;
                    }
                    text.push(c);
                }
            },
            ScanState::Quoted(quote) => {
                if c == '\\' && quote == '\'' {
                    chars.next();
                } else if c == quote {
                    state = ScanState::Normal;
                }
            }
            ScanState::LineComment => {
                if c == '\n' {
                    state = ScanState::Normal;
                }
            }
            ScanState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = ScanState::Normal;
                }
            }
        }
    }

    Scan {
        text,
        multi_statement,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn leading_word(text: &str) -> &str {
    let end = text.find(|c: char| !is_word_char(c)).unwrap_or(text.len());
    &text[..end]
}

/// First write clause found on word boundaries
fn find_nested_write(body: &str) -> Option<String> {
    let bytes = body.as_bytes();
    NESTED_WRITE_FINDER.find_iter(body).find_map(|mat| {
        let before_ok = mat.start() == 0 || !is_word_char(bytes[mat.start() - 1] as char);
        let after_ok = mat.end() == bytes.len() || !is_word_char(bytes[mat.end()] as char);
        if before_ok && after_ok {
            Some(body[mat.start()..mat.end()].to_ascii_lowercase())
        } else {
            None
        }
    })
}
