//! Placeholder substitution for node config.
//!
//! A placeholder is `{name}` where `name` is a dotted path of
//! `[A-Za-z0-9_.-]` characters. Anything else between braces is left alone,
//! so JSON-looking text inside a config string survives untouched.
//!
//! Lookup order for `{a.b.c}`:
//! 1. `a` names a predecessor: `b.c` inside that predecessor's output
//!    (`{a}` alone is the whole output)
//! 2. `a.b.c` inside each predecessor output, in edge order
//! 3. `a.b.c` inside the instance input
//!
//! A string that is exactly one placeholder takes the resolved value with its
//! JSON type. Placeholders embedded in longer text are replaced by the
//! value's text: strings verbatim, everything else as compact JSON.

use serde_json::{Map, Value};

/// Values a placeholder may resolve against.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
  /// Predecessor outputs in edge order.
  pub predecessors: &'a [(String, Value)],
  pub globals: &'a Value,
}

/// A placeholder that matched nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
  pub name: String,
  /// Location in the config, e.g. `$.message` or `$.rows[0].title`.
  pub path: String,
}

impl Unresolved {
  pub fn warning(&self) -> String {
    format!(
      "warning: unresolved placeholder {{{}}} at {}",
      self.name, self.path
    )
  }
}

/// Resolved config plus the placeholders that stayed verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
  pub value: Map<String, Value>,
  pub unresolved: Vec<Unresolved>,
}

impl<'a> Scope<'a> {
  pub fn new(predecessors: &'a [(String, Value)], globals: &'a Value) -> Self {
    Self {
      predecessors,
      globals,
    }
  }

  /// Look up a placeholder name.
  pub fn lookup(&self, name: &str) -> Option<&'a Value> {
    let (head, rest) = match name.split_once('.') {
      Some((head, rest)) => (head, Some(rest)),
      None => (name, None),
    };

    if let Some((_, output)) = self.predecessors.iter().find(|(id, _)| id == head) {
      let found = match rest {
        None => Some(output),
        Some(rest) => lookup_path(output, rest),
      };
      if found.is_some() {
        return found;
      }
    }

    self
      .predecessors
      .iter()
      .find_map(|(_, output)| lookup_path(output, name))
      .or_else(|| lookup_path(self.globals, name))
  }

  /// Substitute every string value in a config object.
  pub fn resolve(&self, config: &Map<String, Value>) -> Resolved {
    let mut unresolved = Vec::new();
    let value = config
      .iter()
      .map(|(key, value)| {
        let path = format!("$.{}", key);
        (key.clone(), self.resolve_value(value, &path, &mut unresolved))
      })
      .collect();
    Resolved { value, unresolved }
  }

  fn resolve_value(&self, value: &Value, path: &str, unresolved: &mut Vec<Unresolved>) -> Value {
    match value {
      Value::String(text) => self.resolve_string(text, path, unresolved),
      Value::Array(items) => Value::Array(
        items
          .iter()
          .enumerate()
          .map(|(i, item)| self.resolve_value(item, &format!("{}[{}]", path, i), unresolved))
          .collect(),
      ),
      Value::Object(map) => Value::Object(
        map
          .iter()
          .map(|(key, item)| {
            let child = format!("{}.{}", path, key);
            (key.clone(), self.resolve_value(item, &child, unresolved))
          })
          .collect(),
      ),
      other => other.clone(),
    }
  }

  fn resolve_string(&self, text: &str, path: &str, unresolved: &mut Vec<Unresolved>) -> Value {
    let tokens = tokenize(text);

    if let [Token::Placeholder(name)] = tokens.as_slice() {
      return match self.lookup(name) {
        Some(found) => found.clone(),
        None => {
          unresolved.push(Unresolved {
            name: name.to_string(),
            path: path.to_string(),
          });
          Value::String(text.to_string())
        }
      };
    }

    let mut out = String::with_capacity(text.len());
    for token in tokens {
      match token {
        Token::Text(literal) => out.push_str(literal),
        Token::Placeholder(name) => match self.lookup(name) {
          Some(Value::String(s)) => out.push_str(s),
          Some(other) => out.push_str(&other.to_string()),
          None => {
            unresolved.push(Unresolved {
              name: name.to_string(),
              path: path.to_string(),
            });
            out.push('{');
            out.push_str(name);
            out.push('}');
          }
        },
      }
    }
    Value::String(out)
  }
}

fn lookup_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
  path.split('.').try_fold(root, |current, segment| match current {
    Value::Object(map) => map.get(segment),
    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

#[derive(Debug, PartialEq)]
enum Token<'t> {
  Text(&'t str),
  Placeholder(&'t str),
}

fn is_name_byte(b: u8) -> bool {
  b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
  let bytes = text.as_bytes();
  let mut tokens = Vec::new();
  let mut literal_start = 0;
  let mut i = 0;

  while i < bytes.len() {
    if bytes[i] != b'{' {
      i += 1;
      continue;
    }
    let name_start = i + 1;
    let mut end = name_start;
    while end < bytes.len() && is_name_byte(bytes[end]) {
      end += 1;
    }
    if end > name_start && end < bytes.len() && bytes[end] == b'}' {
      if literal_start < i {
        tokens.push(Token::Text(&text[literal_start..i]));
      }
      tokens.push(Token::Placeholder(&text[name_start..end]));
      i = end + 1;
      literal_start = i;
    } else {
      i += 1;
    }
  }

  if literal_start < bytes.len() {
    tokens.push(Token::Text(&text[literal_start..]));
  }
  tokens
}
