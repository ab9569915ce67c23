//! Closing truncated JSON documents.
//!
//! [`fix_json`] scans the input once, left to right, keeping a stack of
//! parser states. It remembers the end of the last position where the prefix
//! was unambiguously valid, cuts the text there, and then unwinds the stack to
//! close whatever is still open.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Root,
    Finish,
    InsideString,
    InsideStringEscape,
    InsideLiteral,
    InsideNumber,
    InsideObjectStart,
    InsideObjectKey,
    InsideObjectAfterKey,
    InsideObjectBeforeValue,
    InsideObjectAfterValue,
    InsideObjectAfterComma,
    InsideArrayStart,
    InsideArrayAfterValue,
    InsideArrayAfterComma,
}

const LITERALS: [&str; 3] = ["true", "false", "null"];

struct Scanner<'a> {
    input: &'a str,
    stack: Vec<State>,
    /// Byte offset just past the last valid character.
    valid_end: usize,
    literal_start: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            stack: vec![State::Root],
            valid_end: 0,
            literal_start: 0,
        }
    }

    fn top(&self) -> Option<State> {
        self.stack.last().copied()
    }

    fn swap(&mut self, next: State) {
        self.stack.pop();
        self.stack.push(next);
    }

    fn mark_valid(&mut self, i: usize, c: char) {
        self.valid_end = i + c.len_utf8();
    }

    fn value_start(&mut self, c: char, i: usize, after: State) {
        let inner = match c {
            '"' => State::InsideString,
            't' | 'f' | 'n' => {
                self.literal_start = i;
                State::InsideLiteral
            }
            '-' => {
                self.swap(after);
                self.stack.push(State::InsideNumber);
                return;
            }
            '0'..='9' => State::InsideNumber,
            '{' => State::InsideObjectStart,
            '[' => State::InsideArrayStart,
            _ => return,
        };
        self.mark_valid(i, c);
        self.swap(after);
        self.stack.push(inner);
    }

    fn after_object_value(&mut self, c: char, i: usize) {
        match c {
            ',' => self.swap(State::InsideObjectAfterComma),
            '}' => {
                self.mark_valid(i, c);
                self.stack.pop();
            }
            _ => {}
        }
    }

    fn after_array_value(&mut self, c: char, i: usize) {
        match c {
            ',' => self.swap(State::InsideArrayAfterComma),
            ']' => {
                self.mark_valid(i, c);
                self.stack.pop();
            }
            _ => {}
        }
    }

    fn step(&mut self, i: usize, c: char) {
        let Some(state) = self.top() else {
            return;
        };

        match state {
            State::Root => self.value_start(c, i, State::Finish),
            State::Finish => {}
            State::InsideObjectStart => match c {
                '"' => self.swap(State::InsideObjectKey),
                '}' => {
                    self.mark_valid(i, c);
                    self.stack.pop();
                }
                _ => {}
            },
            State::InsideObjectAfterComma => {
                if c == '"' {
                    self.swap(State::InsideObjectKey);
                }
            }
            State::InsideObjectKey => {
                if c == '"' {
                    self.swap(State::InsideObjectAfterKey);
                }
            }
            State::InsideObjectAfterKey => {
                if c == ':' {
                    self.swap(State::InsideObjectBeforeValue);
                }
            }
            State::InsideObjectBeforeValue => {
                self.value_start(c, i, State::InsideObjectAfterValue)
            }
            State::InsideObjectAfterValue => self.after_object_value(c, i),
            State::InsideString => match c {
                '"' => {
                    self.stack.pop();
                    self.mark_valid(i, c);
                }
                '\\' => self.stack.push(State::InsideStringEscape),
                _ => self.mark_valid(i, c),
            },
            State::InsideStringEscape => {
                self.stack.pop();
                self.mark_valid(i, c);
            }
            State::InsideArrayStart => match c {
                ']' => {
                    self.mark_valid(i, c);
                    self.stack.pop();
                }
                _ => {
                    self.mark_valid(i, c);
                    self.value_start(c, i, State::InsideArrayAfterValue);
                }
            },
            State::InsideArrayAfterValue => match c {
                ',' => self.swap(State::InsideArrayAfterComma),
                ']' => {
                    self.mark_valid(i, c);
                    self.stack.pop();
                }
                _ => self.mark_valid(i, c),
            },
            State::InsideArrayAfterComma => {
                self.value_start(c, i, State::InsideArrayAfterValue)
            }
            State::InsideNumber => match c {
                '0'..='9' => self.mark_valid(i, c),
                'e' | 'E' | '-' | '.' => {}
                ',' => {
                    self.stack.pop();
                    if self.top() == Some(State::InsideArrayAfterValue) {
                        self.after_array_value(c, i);
                    }
                    if self.top() == Some(State::InsideObjectAfterValue) {
                        self.after_object_value(c, i);
                    }
                }
                '}' => {
                    self.stack.pop();
                    if self.top() == Some(State::InsideObjectAfterValue) {
                        self.after_object_value(c, i);
                    }
                }
                ']' => {
                    self.stack.pop();
                    if self.top() == Some(State::InsideArrayAfterValue) {
                        self.after_array_value(c, i);
                    }
                }
                _ => {
                    self.stack.pop();
                }
            },
            State::InsideLiteral => {
                let partial = &self.input[self.literal_start..i + c.len_utf8()];
                if LITERALS.iter().any(|literal| literal.starts_with(partial)) {
                    self.mark_valid(i, c);
                } else {
                    self.stack.pop();
                    match self.top() {
                        Some(State::InsideObjectAfterValue) => self.after_object_value(c, i),
                        Some(State::InsideArrayAfterValue) => self.after_array_value(c, i),
                        _ => {}
                    }
                }
            }
        }
    }

    fn finish(self) -> String {
        let mut result = self.input[..self.valid_end].to_string();

        for state in self.stack.iter().rev() {
            match state {
                State::InsideString => result.push('"'),
                State::InsideObjectKey
                | State::InsideObjectAfterKey
                | State::InsideObjectAfterComma
                | State::InsideObjectStart
                | State::InsideObjectBeforeValue
                | State::InsideObjectAfterValue => result.push('}'),
                State::InsideArrayStart
                | State::InsideArrayAfterComma
                | State::InsideArrayAfterValue => result.push(']'),
                State::InsideLiteral => {
                    let partial = &self.input[self.literal_start..];
                    if let Some(literal) = LITERALS.iter().find(|l| l.starts_with(partial)) {
                        result.push_str(&literal[partial.len()..]);
                    }
                }
                _ => {}
            }
        }

        result
    }
}

/// Close an incomplete JSON document so it can be parsed.
///
/// Pure and total. Complete documents are returned unchanged.
pub fn fix_json(input: &str) -> String {
    let mut scanner = Scanner::new(input);
    for (i, c) in input.char_indices() {
        scanner.step(i, c);
    }
    scanner.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(fix_json(""), "");
    }

    #[test]
    fn closes_truncated_string_inside_object() {
        assert_eq!(fix_json(r#"{"a": 1, "b": "x"#), r#"{"a": 1, "b": "x"}"#);
    }

    #[test]
    fn drops_dangling_key() {
        assert_eq!(fix_json(r#"{"a": 1, "b"#), r#"{"a": 1}"#);
        assert_eq!(fix_json(r#"{"a": 1, "#), r#"{"a": 1}"#);
    }

    #[test]
    fn completes_partial_literals() {
        assert_eq!(fix_json("[t"), "[true]");
        assert_eq!(fix_json(r#"{"ok": fa"#), r#"{"ok": false}"#);
        assert_eq!(fix_json("n"), "null");
    }

    #[test]
    fn keeps_numbers_at_digit_boundaries() {
        assert_eq!(fix_json("[1, 2.5"), "[1, 2.5]");
        assert_eq!(fix_json("[1, 2."), "[1, 2]");
        assert_eq!(fix_json(r#"{"n": 12e"#), r#"{"n": 12}"#);
    }

    #[test]
    fn closes_nested_containers_inner_first() {
        assert_eq!(
            fix_json(r#"{"list": [{"name": "ab"#),
            r#"{"list": [{"name": "ab"}]}"#
        );
    }

    #[test]
    fn drops_dangling_escape() {
        assert_eq!(fix_json(r#""line\"#), r#""line""#);
    }

    #[test]
    fn handles_multibyte_characters() {
        assert_eq!(fix_json(r#"{"name": "zoë"#), r#"{"name": "zoë"}"#);
    }

    #[test]
    fn complete_documents_are_unchanged() {
        for doc in [
            r#"{"a": [1, 2, {"b": null}], "c": "d\"e", "f": -1.5e3}"#,
            "[]",
            "{}",
            "true",
            r#""text""#,
            "42",
        ] {
            assert_eq!(fix_json(doc), doc);
        }
    }

    #[test]
    fn every_prefix_of_a_document_repairs_to_valid_json() {
        let doc = r#"{"title": "Trip \"plan\"", "days": [1, 22, -3.5], "done": false, "meta": {"tags": ["a", "b"], "owner": null}}"#;

        for (end, _) in doc.char_indices().skip(1) {
            let prefix = &doc[..end];
            let repaired = fix_json(prefix);
            assert!(
                serde_json::from_str::<serde_json::Value>(&repaired).is_ok(),
                "prefix {prefix:?} repaired to invalid {repaired:?}"
            );
        }
    }
}
