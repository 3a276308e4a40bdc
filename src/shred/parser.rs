//! Incremental JSON tokenizer.
//!
//! Consumes a JSON document as arbitrarily chunked byte slices and emits
//! structural events in document order. Chunk boundaries are transparent:
//! strings, escapes, numbers and literals may be split at any byte and the
//! resulting event sequence is identical. The document root must be an
//! object or an array.

use crate::shred::error::ShredError;

/// One structural event of the document scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    /// An object member key; always followed by the member's value events
    Key(String),
    String(String),
    /// A number as its raw lexeme, e.g. `-0.5e10`
    Number(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the root value; only `{` or `[` is accepted
    Start,
    /// Inside `{`, before anything: a key or `}`
    ObjectFirstKey,
    /// After `,` in an object: a key
    ObjectKey,
    /// After a key: `:`
    ObjectColon,
    /// After `:`: a value
    ObjectValue,
    /// Inside `[`, before anything: a value or `]`
    ArrayFirst,
    /// After `,` in an array: a value
    ArrayValue,
    /// After a value: `,` or the matching close bracket
    AfterValue,
    /// Root value complete; only whitespace may follow
    End,
}

#[derive(Debug, Clone, Copy)]
enum Escape {
    /// Just consumed a backslash
    Start,
    /// Collecting the four hex digits of `\uXXXX`
    Unicode {
        digits: u8,
        acc: u16,
        high: Option<u16>,
    },
    /// After a high surrogate: the `\` of the required low surrogate
    SurrogateBackslash { high: u16 },
    /// After a high surrogate: the `u` of the required low surrogate
    SurrogateU { high: u16 },
}

#[derive(Debug, Clone, Copy)]
enum Token {
    None,
    Str { is_key: bool, escape: Option<Escape> },
    Number,
    Literal { text: &'static [u8], matched: usize },
}

/// Push parser: feed byte chunks in, collect events out.
///
/// `feed` returns the events completed by the chunk; `finish` validates
/// that the document ended cleanly.
pub struct JsonParser {
    state: State,
    stack: Vec<Ctx>,
    token: Token,
    /// Bytes of the string or number token currently being collected
    scratch: Vec<u8>,
    /// Bytes consumed by previous `feed` calls
    offset: u64,
}

impl Default for JsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonParser {
    pub fn new() -> Self {
        JsonParser {
            state: State::Start,
            stack: Vec::new(),
            token: Token::None,
            scratch: Vec::new(),
            offset: 0,
        }
    }

    /// Consume one chunk of the document, returning the events it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Event>, ShredError> {
        let mut events = Vec::new();
        let mut i = 0;
        while i < chunk.len() {
            let byte = chunk[i];
            let pos = self.offset + i as u64;
            match self.token {
                Token::Str { is_key, escape } => {
                    self.string_byte(byte, is_key, escape, pos, &mut events)?;
                    i += 1;
                }
                Token::Number => {
                    if is_number_byte(byte) {
                        self.scratch.push(byte);
                        i += 1;
                    } else {
                        // The delimiter is reprocessed structurally below
                        self.finish_number(pos, &mut events)?;
                    }
                }
                Token::Literal { text, matched } => {
                    if text.get(matched) == Some(&byte) {
                        i += 1;
                        if matched + 1 == text.len() {
                            self.token = Token::None;
                            events.push(literal_event(text));
                            self.state = self.after_value();
                        } else {
                            self.token = Token::Literal {
                                text,
                                matched: matched + 1,
                            };
                        }
                    } else {
                        return Err(parse_error(pos, "invalid literal"));
                    }
                }
                Token::None => {
                    self.structural(byte, pos, &mut events)?;
                    i += 1;
                }
            }
        }
        self.offset += chunk.len() as u64;
        Ok(events)
    }

    /// Signal end of input; fails unless the document is complete
    pub fn finish(&mut self) -> Result<Vec<Event>, ShredError> {
        match self.token {
            Token::None => {}
            Token::Str { .. } => {
                return Err(parse_error(self.offset, "unterminated string"));
            }
            Token::Number | Token::Literal { .. } => {
                return Err(parse_error(self.offset, "truncated value at end of input"));
            }
        }
        if self.state != State::End || !self.stack.is_empty() {
            return Err(parse_error(self.offset, "unexpected end of document"));
        }
        Ok(Vec::new())
    }

    fn structural(
        &mut self,
        byte: u8,
        pos: u64,
        events: &mut Vec<Event>,
    ) -> Result<(), ShredError> {
        if matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
            return Ok(());
        }
        match self.state {
            State::Start => match byte {
                b'{' => self.open_object(events),
                b'[' => self.open_array(events),
                _ => Err(parse_error(
                    pos,
                    "document root must be an object or array",
                )),
            },
            State::ObjectFirstKey => match byte {
                b'"' => {
                    self.begin_string(true);
                    Ok(())
                }
                b'}' => self.close_object(events),
                _ => Err(parse_error(pos, "expected object key or '}'")),
            },
            State::ObjectKey => match byte {
                b'"' => {
                    self.begin_string(true);
                    Ok(())
                }
                _ => Err(parse_error(pos, "expected object key")),
            },
            State::ObjectColon => match byte {
                b':' => {
                    self.state = State::ObjectValue;
                    Ok(())
                }
                _ => Err(parse_error(pos, "expected ':'")),
            },
            State::ObjectValue | State::ArrayFirst | State::ArrayValue => {
                if byte == b']' && self.state == State::ArrayFirst {
                    return self.close_array(events);
                }
                self.begin_value(byte, pos, events)
            }
            State::AfterValue => match (byte, self.stack.last()) {
                (b',', Some(Ctx::Object)) => {
                    self.state = State::ObjectKey;
                    Ok(())
                }
                (b',', Some(Ctx::Array)) => {
                    self.state = State::ArrayValue;
                    Ok(())
                }
                (b'}', Some(Ctx::Object)) => self.close_object(events),
                (b']', Some(Ctx::Array)) => self.close_array(events),
                _ => Err(parse_error(pos, "expected ',' or a closing bracket")),
            },
            State::End => Err(parse_error(pos, "trailing characters after document end")),
        }
    }

    fn begin_value(&mut self, byte: u8, pos: u64, events: &mut Vec<Event>) -> Result<(), ShredError> {
        match byte {
            b'"' => {
                self.begin_string(false);
                Ok(())
            }
            b'{' => self.open_object(events),
            b'[' => self.open_array(events),
            b'-' | b'0'..=b'9' => {
                self.scratch.clear();
                self.scratch.push(byte);
                self.token = Token::Number;
                Ok(())
            }
            b't' => {
                self.token = Token::Literal {
                    text: b"true",
                    matched: 1,
                };
                Ok(())
            }
            b'f' => {
                self.token = Token::Literal {
                    text: b"false",
                    matched: 1,
                };
                Ok(())
            }
            b'n' => {
                self.token = Token::Literal {
                    text: b"null",
                    matched: 1,
                };
                Ok(())
            }
            _ => Err(parse_error(pos, "expected a value")),
        }
    }

    fn begin_string(&mut self, is_key: bool) {
        self.scratch.clear();
        self.token = Token::Str {
            is_key,
            escape: None,
        };
    }

    fn string_byte(
        &mut self,
        byte: u8,
        is_key: bool,
        escape: Option<Escape>,
        pos: u64,
        events: &mut Vec<Event>,
    ) -> Result<(), ShredError> {
        match escape {
            None => match byte {
                b'"' => {
                    let text = self.take_scratch_utf8(pos)?;
                    self.token = Token::None;
                    if is_key {
                        events.push(Event::Key(text));
                        self.state = State::ObjectColon;
                    } else {
                        events.push(Event::String(text));
                        self.state = self.after_value();
                    }
                }
                b'\\' => {
                    self.token = Token::Str {
                        is_key,
                        escape: Some(Escape::Start),
                    };
                }
                0x00..=0x1F => {
                    return Err(parse_error(pos, "unescaped control character in string"));
                }
                _ => self.scratch.push(byte),
            },
            Some(Escape::Start) => {
                let next = match byte {
                    b'"' => Some(b'"'),
                    b'\\' => Some(b'\\'),
                    b'/' => Some(b'/'),
                    b'b' => Some(0x08),
                    b'f' => Some(0x0C),
                    b'n' => Some(b'\n'),
                    b'r' => Some(b'\r'),
                    b't' => Some(b'\t'),
                    b'u' => None,
                    _ => return Err(parse_error(pos, "invalid escape sequence")),
                };
                match next {
                    Some(decoded) => {
                        self.scratch.push(decoded);
                        self.token = Token::Str {
                            is_key,
                            escape: None,
                        };
                    }
                    None => {
                        self.token = Token::Str {
                            is_key,
                            escape: Some(Escape::Unicode {
                                digits: 0,
                                acc: 0,
                                high: None,
                            }),
                        };
                    }
                }
            }
            Some(Escape::Unicode { digits, acc, high }) => {
                let value = hex_digit(byte)
                    .ok_or_else(|| parse_error(pos, "invalid hex digit in unicode escape"))?;
                let acc = (acc << 4) | u16::from(value);
                if digits + 1 < 4 {
                    self.token = Token::Str {
                        is_key,
                        escape: Some(Escape::Unicode {
                            digits: digits + 1,
                            acc,
                            high,
                        }),
                    };
                    return Ok(());
                }
                match high {
                    None if (0xD800..=0xDBFF).contains(&acc) => {
                        self.token = Token::Str {
                            is_key,
                            escape: Some(Escape::SurrogateBackslash { high: acc }),
                        };
                    }
                    None if (0xDC00..=0xDFFF).contains(&acc) => {
                        return Err(parse_error(pos, "unexpected low surrogate"));
                    }
                    None => {
                        self.push_code_point(u32::from(acc), pos)?;
                        self.token = Token::Str {
                            is_key,
                            escape: None,
                        };
                    }
                    Some(high) => {
                        if !(0xDC00..=0xDFFF).contains(&acc) {
                            return Err(parse_error(pos, "invalid low surrogate"));
                        }
                        let code = 0x10000
                            + ((u32::from(high) - 0xD800) << 10)
                            + (u32::from(acc) - 0xDC00);
                        self.push_code_point(code, pos)?;
                        self.token = Token::Str {
                            is_key,
                            escape: None,
                        };
                    }
                }
            }
            Some(Escape::SurrogateBackslash { high }) => {
                if byte != b'\\' {
                    return Err(parse_error(pos, "unpaired high surrogate"));
                }
                self.token = Token::Str {
                    is_key,
                    escape: Some(Escape::SurrogateU { high }),
                };
            }
            Some(Escape::SurrogateU { high }) => {
                if byte != b'u' {
                    return Err(parse_error(pos, "unpaired high surrogate"));
                }
                self.token = Token::Str {
                    is_key,
                    escape: Some(Escape::Unicode {
                        digits: 0,
                        acc: 0,
                        high: Some(high),
                    }),
                };
            }
        }
        Ok(())
    }

    fn push_code_point(&mut self, code: u32, pos: u64) -> Result<(), ShredError> {
        let c = char::from_u32(code)
            .ok_or_else(|| parse_error(pos, "invalid unicode escape"))?;
        let mut buf = [0u8; 4];
        self.scratch
            .extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }

    fn take_scratch_utf8(&mut self, pos: u64) -> Result<String, ShredError> {
        String::from_utf8(std::mem::take(&mut self.scratch))
            .map_err(|_| parse_error(pos, "invalid UTF-8 in input"))
    }

    fn finish_number(&mut self, pos: u64, events: &mut Vec<Event>) -> Result<(), ShredError> {
        if !valid_number(&self.scratch) {
            return Err(parse_error(pos, "invalid number"));
        }
        let lexeme = self.take_scratch_utf8(pos)?;
        self.token = Token::None;
        events.push(Event::Number(lexeme));
        self.state = self.after_value();
        Ok(())
    }

    fn open_object(&mut self, events: &mut Vec<Event>) -> Result<(), ShredError> {
        self.stack.push(Ctx::Object);
        events.push(Event::StartObject);
        self.state = State::ObjectFirstKey;
        Ok(())
    }

    fn close_object(&mut self, events: &mut Vec<Event>) -> Result<(), ShredError> {
        self.stack.pop();
        events.push(Event::EndObject);
        self.state = self.after_value();
        Ok(())
    }

    fn open_array(&mut self, events: &mut Vec<Event>) -> Result<(), ShredError> {
        self.stack.push(Ctx::Array);
        events.push(Event::StartArray);
        self.state = State::ArrayFirst;
        Ok(())
    }

    fn close_array(&mut self, events: &mut Vec<Event>) -> Result<(), ShredError> {
        self.stack.pop();
        events.push(Event::EndArray);
        self.state = self.after_value();
        Ok(())
    }

    fn after_value(&self) -> State {
        if self.stack.is_empty() {
            State::End
        } else {
            State::AfterValue
        }
    }
}

fn parse_error(offset: u64, message: &str) -> ShredError {
    ShredError::Parse {
        offset,
        message: message.to_string(),
    }
}

fn literal_event(text: &'static [u8]) -> Event {
    match text {
        b"true" => Event::Bool(true),
        b"false" => Event::Bool(false),
        _ => Event::Null,
    }
}

fn is_number_byte(byte: u8) -> bool {
    matches!(byte, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Validate a complete number lexeme against the JSON grammar
fn valid_number(lexeme: &[u8]) -> bool {
    let at = |i: usize| lexeme.get(i).copied();
    let mut i = 0;
    if at(i) == Some(b'-') {
        i += 1;
    }
    match at(i) {
        Some(b'0') => i += 1,
        Some(b'1'..=b'9') => {
            i += 1;
            while matches!(at(i), Some(b'0'..=b'9')) {
                i += 1;
            }
        }
        _ => return false,
    }
    if at(i) == Some(b'.') {
        i += 1;
        let start = i;
        while matches!(at(i), Some(b'0'..=b'9')) {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    if matches!(at(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(at(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let start = i;
        while matches!(at(i), Some(b'0'..=b'9')) {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    i == lexeme.len()
}
