//! Locates `<script>` and `<style>` blocks in component source.
//!
//! HTML comments are skipped, tag names match case-insensitively, and
//! self-closing tags are recognised. Attribute values containing `>` are
//! not supported, matching the compiler's own block scanner.

use crate::step::{AttrValue, Attributes};
use std::ops::Range;

/// Which kind of block to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Script,
    Style,
}

impl BlockKind {
    pub fn tag(&self) -> &'static str {
        match self {
            BlockKind::Script => "script",
            BlockKind::Style => "style",
        }
    }
}

/// A located block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The whole element, opening tag to closing tag.
    pub range: Range<usize>,
    /// Raw attribute text between the tag name and `>`, leading whitespace
    /// included.
    pub attributes_text: Range<usize>,
    /// The element's inner text. Empty for self-closing tags.
    pub content: Range<usize>,
    pub attributes: Attributes,
}

/// Finds every block of `kind` outside HTML comments.
pub fn find_blocks(source: &str, kind: BlockKind) -> Vec<Block> {
    let bytes = source.as_bytes();
    let tag = kind.tag().as_bytes();
    let mut blocks = Vec::new();
    let mut pos = 0;

    while let Some(offset) = source[pos..].find('<') {
        let start = pos + offset;
        let rest = &bytes[start..];

        if rest.starts_with(b"<!--") {
            match source[start + 4..].find("-->") {
                Some(end) => {
                    pos = start + 4 + end + 3;
                    continue;
                }
                None => break,
            }
        }

        let name_end = start + 1 + tag.len();
        let is_tag = bytes.len() >= name_end
            && bytes[start + 1..name_end].eq_ignore_ascii_case(tag)
            && matches!(
                bytes.get(name_end),
                Some(b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r' | b'\x0c')
            );

        if !is_tag {
            pos = start + 1;
            continue;
        }

        match parse_element(source, start, name_end, tag) {
            Some(block) => {
                pos = block.range.end;
                blocks.push(block);
            }
            None => pos = name_end,
        }
    }

    blocks
}

fn parse_element(source: &str, start: usize, name_end: usize, tag: &[u8]) -> Option<Block> {
    let bytes = source.as_bytes();
    let mut i = name_end;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                let attributes_text = name_end..i;
                return Some(Block {
                    range: start..i + 2,
                    attributes: parse_attributes(&source[attributes_text.clone()]),
                    attributes_text,
                    content: i + 2..i + 2,
                });
            }
            b'>' => {
                let content_start = i + 1;
                let close = find_closing_tag(bytes, content_start, tag)?;
                let attributes_text = name_end..i;
                return Some(Block {
                    range: start..close.end,
                    attributes: parse_attributes(&source[attributes_text.clone()]),
                    attributes_text,
                    content: content_start..close.start,
                });
            }
            _ => i += 1,
        }
    }

    None
}

/// Finds `</tag>` (any case) at or after `from`.
fn find_closing_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<Range<usize>> {
    let len = tag.len() + 3;
    let mut i = from;
    while i + len <= bytes.len() {
        if bytes[i] == b'<'
            && bytes[i + 1] == b'/'
            && bytes[i + 2..i + 2 + tag.len()].eq_ignore_ascii_case(tag)
            && bytes[i + len - 1] == b'>'
        {
            return Some(i..i + len);
        }
        i += 1;
    }
    None
}

/// Parses attribute text such as ` lang="ts" context=module defer`.
pub(crate) fn parse_attributes(text: &str) -> Attributes {
    let mut attributes = Attributes::new();
    let mut chars = text.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let Some(&(name_start, _)) = chars.peek() else {
            break;
        };

        let mut name_end = text.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == '=' {
                name_end = i;
                break;
            }
            chars.next();
        }
        let name = &text[name_start..name_end];

        if chars.next_if(|(_, c)| *c == '=').is_none() {
            attributes.insert(name, AttrValue::Flag);
            continue;
        }

        let value = match chars.peek().copied() {
            Some((i, quote @ ('"' | '\''))) => {
                chars.next();
                let value_start = i + 1;
                let mut value_end = text.len();
                for (j, c) in chars.by_ref() {
                    if c == quote {
                        value_end = j;
                        break;
                    }
                }
                &text[value_start..value_end]
            }
            Some((i, _)) => {
                let mut value_end = text.len();
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_whitespace() {
                        value_end = j;
                        break;
                    }
                    chars.next();
                }
                &text[i..value_end]
            }
            None => "",
        };
        attributes.insert(name, AttrValue::Text(value.to_string()));
    }

    attributes
}
