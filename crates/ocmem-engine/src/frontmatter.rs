//! Minimal YAML-ish frontmatter handling for memory Markdown files.
//!
//! Only flat `key: value` pairs are supported, which is all the memory
//! format uses. Key order is preserved so hand-edited files survive a
//! rewrite without churn.

/// Parsed frontmatter block: ordered `key: value` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    entries: Vec<(String, String)>,
}

impl Frontmatter {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key)?.parse().ok()
    }

    /// Set a key, replacing an existing entry or appending a new one.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    /// Render back to a `---` delimited block, trailing newline included.
    pub fn render(&self) -> String {
        let mut out = String::from("---\n");
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
            out.push('\n');
        }
        out.push_str("---\n");
        out
    }
}

/// A Markdown document split into frontmatter and body.
#[derive(Debug, Clone)]
pub struct Document {
    pub meta: Frontmatter,
    pub body: String,
    /// 1-based line number of the first body line in the source file.
    pub body_start_line: usize,
}

impl Document {
    /// Split `text` into frontmatter and body. A frontmatter block is a
    /// leading `---` line closed by another `---` line; anything else means
    /// the whole text is body.
    pub fn parse(text: &str) -> Document {
        let mut lines = text.lines();
        if lines.next().map(str::trim) != Some("---") {
            return Document {
                meta: Frontmatter::default(),
                body: text.to_string(),
                body_start_line: 1,
            };
        }

        let mut meta = Frontmatter::default();
        let mut consumed = 1usize;
        let mut closed = false;
        for line in lines {
            consumed += 1;
            if line.trim() == "---" {
                closed = true;
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                meta.set(key, unquote(value.trim()));
            }
        }

        if !closed {
            // Unterminated block: treat everything as body.
            return Document {
                meta: Frontmatter::default(),
                body: text.to_string(),
                body_start_line: 1,
            };
        }

        let body = text
            .lines()
            .skip(consumed)
            .collect::<Vec<_>>()
            .join("\n");
        Document {
            meta,
            body,
            body_start_line: consumed + 1,
        }
    }

    /// Render the document back to file form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.meta.is_empty() {
            out.push_str(&self.meta.render());
        }
        out.push_str(&self.body);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    if v.len() >= 2
        && ((v.starts_with('\'') && v.ends_with('\'')) || (v.starts_with('"') && v.ends_with('"')))
    {
        v[1..v.len() - 1].to_string()
    } else {
        v.to_string()
    }
}
