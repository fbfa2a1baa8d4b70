//! INI documents that can be edited without disturbing unrelated lines

/// What a line of an INI file holds
#[derive(Clone, Debug, PartialEq, Eq)]
enum Kind {
    /// `[name]`
    Section(String),
    /// `key=value`
    Entry {
        /// Key, trimmed
        key: String,
        /// Value, trimmed
        value: String,
    },
    /// Comments, blank lines and anything else
    Other,
}

/// One line of an INI file, kept verbatim until it is edited
#[derive(Clone, Debug, PartialEq, Eq)]
struct Line {
    /// Text as written
    raw: String,
    /// Parsed meaning
    kind: Kind,
}

impl Line {
    /// Classifies a raw line
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let kind = if trimmed.starts_with(';') || trimmed.starts_with('#') {
            Kind::Other
        } else if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            Kind::Section(name.trim().to_owned())
        } else {
            match trimmed.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => Kind::Entry {
                    key: key.trim().to_owned(),
                    value: value.trim().to_owned(),
                },
                _ => Kind::Other,
            }
        };
        Self {
            raw: raw.to_owned(),
            kind,
        }
    }

    /// A freshly written `key=value`
    fn entry(key: &str, value: &str) -> Self {
        Self {
            raw: format!("{key}={value}"),
            kind: Kind::Entry {
                key: key.to_owned(),
                value: value.to_owned(),
            },
        }
    }

    /// A freshly written `[name]`
    fn section(name: &str) -> Self {
        Self {
            raw: format!("[{name}]"),
            kind: Kind::Section(name.to_owned()),
        }
    }

    /// Whether this is an entry for `key`
    fn is_entry(&self, key: &str) -> bool {
        matches!(&self.kind, Kind::Entry { key: k, .. } if k.eq_ignore_ascii_case(key))
    }
}

/// A parsed INI file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    /// Lines in file order
    lines: Vec<Line>,
    /// Line terminator to write back with
    newline: &'static str,
}

impl Document {
    /// Parses `text`, remembering whether it used CRLF line endings
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(Line::parse).collect(),
            newline: if text.contains("\r\n") || text.is_empty() {
                "\r\n"
            } else {
                "\n"
            },
        }
    }

    /// Value of `key` in `section`, both case-insensitive; the first occurrence wins
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let (start, end) = self.section_bounds(section)?;
        self.lines[start..end].iter().find_map(|line| match &line.kind {
            Kind::Entry { key: k, value } if k.eq_ignore_ascii_case(key) => Some(value.as_str()),
            _ => None,
        })
    }

    /// Sets `key` in `section`, replacing an existing entry in place, adding it at the end of the section, or
    /// appending the section when the document lacks it
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let Some((start, end)) = self.section_bounds(section) else {
            if self.lines.last().is_some_and(|line| !line.raw.trim().is_empty()) {
                self.lines.push(Line::parse(""));
            }
            self.lines.push(Line::section(section));
            self.lines.push(Line::entry(key, value));
            return;
        };

        match (start..end).find(|&index| self.lines[index].is_entry(key)) {
            Some(index) => {
                // keep the spelling already in the file
                let spelling = match &self.lines[index].kind {
                    Kind::Entry { key, .. } => key.clone(),
                    _ => key.to_owned(),
                };
                self.lines[index] = Line::entry(&spelling, value);
            }
            None => {
                let after = (start..end)
                    .rev()
                    .find(|&index| matches!(self.lines[index].kind, Kind::Entry { .. }))
                    .map_or(start, |index| index + 1);
                self.lines.insert(after, Line::entry(key, value));
            }
        }
    }

    /// Range of line indices holding the entries of `section`, after its header
    fn section_bounds(&self, section: &str) -> Option<(usize, usize)> {
        let header = self
            .lines
            .iter()
            .position(|line| matches!(&line.kind, Kind::Section(name) if name.eq_ignore_ascii_case(section)))?;
        let start = header + 1;
        let end = self.lines[start..]
            .iter()
            .position(|line| matches!(line.kind, Kind::Section(_)))
            .map_or(self.lines.len(), |offset| start + offset);
        Some((start, end))
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::parse("")
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            f.write_str(&line.raw)?;
            f.write_str(self.newline)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "; Juiced settings\n[Acclaim]\nUnlockDemoContent = 1\nDriverName=Speedy\n\n[Registry]\n# resolution\nWidth=1280\n";

    #[test]
    fn test_get() {
        let doc = Document::parse(TEXT);
        assert_eq!(doc.get("Acclaim", "UnlockDemoContent"), Some("1"));
        assert_eq!(doc.get("acclaim", "drivername"), Some("Speedy"));
        assert_eq!(doc.get("REGISTRY", "width"), Some("1280"));
        // keys do not leak across sections
        assert_eq!(doc.get("Registry", "DriverName"), None);
        assert_eq!(doc.get("THQ", "DriverName"), None);
    }

    #[test]
    fn test_comments_are_not_entries() {
        let doc = Document::parse("[A]\n;Key=1\n#Other=2\nKey=3\n");
        assert_eq!(doc.get("A", "Key"), Some("3"));
        assert_eq!(doc.get("A", "#Other"), None);
    }

    #[test]
    fn test_set_existing_preserves_rest() {
        let mut doc = Document::parse(TEXT);
        doc.set("registry", "WIDTH", "1920");

        let text = doc.to_string();
        assert_eq!(
            text,
            "; Juiced settings\n[Acclaim]\nUnlockDemoContent = 1\nDriverName=Speedy\n\n[Registry]\n# resolution\nWidth=1920\n"
        );
    }

    #[test]
    fn test_set_new_key_goes_to_its_section() {
        let mut doc = Document::parse(TEXT);
        doc.set("Acclaim", "UnlockAllMenus", "1");

        let reparsed = Document::parse(&doc.to_string());
        assert_eq!(reparsed.get("Acclaim", "UnlockAllMenus"), Some("1"));
        assert!(doc
            .to_string()
            .contains("DriverName=Speedy\nUnlockAllMenus=1\n\n[Registry]"));
    }

    #[test]
    fn test_set_new_section() {
        let mut doc = Document::parse(TEXT);
        doc.set("THQ", "EndlessDemo", "1");
        assert!(doc.to_string().ends_with("Width=1280\n\n[THQ]\nEndlessDemo=1\n"));

        let mut empty = Document::default();
        empty.set("Registry", "Adapter", "{00000000-0000-0000-0000-000000000000}");
        assert_eq!(empty.get("Registry", "Adapter"), Some("{00000000-0000-0000-0000-000000000000}"));
    }

    #[test]
    fn test_crlf_kept() {
        let mut doc = Document::parse("[A]\r\nKey=1\r\n");
        doc.set("A", "Key", "2");
        assert_eq!(doc.to_string(), "[A]\r\nKey=2\r\n");
    }
}
