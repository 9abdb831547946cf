//! YAML front-matter extraction for vault notes.
//!
//! Notes carry metadata between leading `---` fences. The payload goes
//! through serde_yaml; absent or malformed front matter degrades to an empty
//! metadata set rather than failing the scan.

use serde_yaml::Value;

/// Parsed front-matter fields the index cares about, plus the full key list.
#[derive(Debug, Clone, Default)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub aliases: Vec<String>,
    pub created: Option<String>,
    pub keys: Vec<String>,
}

/// Split a note into front matter and body. Returns `(None, content)` when
/// there is no leading fence; a fence that never closes is treated the same
/// way.
pub fn parse(content: &str) -> (Option<FrontMatter>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (None, content);
    };
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"));
    let Some(rest) = rest else {
        return (None, content);
    };

    let Some(close) = find_closing_fence(rest) else {
        return (None, content);
    };
    let yaml = &rest[..close.fence_start];
    let body = &rest[close.body_start..];

    (Some(parse_yaml(yaml)), body)
}

struct FenceSplit {
    fence_start: usize,
    body_start: usize,
}

fn find_closing_fence(text: &str) -> Option<FenceSplit> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(FenceSplit {
                fence_start: offset,
                body_start: offset + line.len(),
            });
        }
        offset += line.len();
    }
    None
}

fn parse_yaml(yaml: &str) -> FrontMatter {
    let value: Value = match serde_yaml::from_str(yaml) {
        Ok(v) => v,
        Err(_) => return FrontMatter::default(),
    };
    let Value::Mapping(map) = value else {
        return FrontMatter::default();
    };

    let mut fm = FrontMatter::default();
    for (key, val) in &map {
        let Some(key) = key.as_str() else { continue };
        fm.keys.push(key.to_string());
        match key {
            "title" => fm.title = scalar_string(val),
            "tags" => fm.tags = string_list(val),
            "aliases" => fm.aliases = string_list(val),
            "created" => fm.created = scalar_string(val),
            _ => {}
        }
    }
    fm
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accept both a YAML list and a single scalar for list-shaped fields.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(seq) => seq.iter().filter_map(scalar_string).collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}
