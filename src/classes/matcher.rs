/// Glob over canonical class names: `*` matches within one package segment,
/// `**` matches across segments. Everything else is literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassPattern {
    raw: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(char),
    Star,
    DoubleStar,
}

impl ClassPattern {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim();
        let mut parts = Vec::new();
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Runs of three or more stars collapse into one `**`.
                    while chars.peek() == Some(&'*') {
                        chars.next();
                    }
                    parts.push(Part::DoubleStar);
                } else {
                    parts.push(Part::Star);
                }
            } else {
                parts.push(Part::Literal(c));
            }
        }
        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn has_wildcard(&self) -> bool {
        self.parts.iter().any(|p| !matches!(p, Part::Literal(_)))
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.parts.is_empty() {
            return false;
        }
        let name: Vec<char> = name.chars().collect();
        // reachable[j]: the pattern prefix consumed so far can end at name[..j].
        let mut reachable = vec![false; name.len() + 1];
        reachable[0] = true;
        for part in &self.parts {
            let mut next = vec![false; name.len() + 1];
            match part {
                Part::Literal(c) => {
                    for j in 0..name.len() {
                        if reachable[j] && name[j] == *c {
                            next[j + 1] = true;
                        }
                    }
                }
                Part::Star => {
                    for j in 0..=name.len() {
                        if reachable[j] || (j > 0 && next[j - 1] && name[j - 1] != '.') {
                            next[j] = true;
                        }
                    }
                }
                Part::DoubleStar => {
                    for j in 0..=name.len() {
                        if reachable[j] || (j > 0 && next[j - 1]) {
                            next[j] = true;
                        }
                    }
                }
            }
            reachable = next;
        }
        reachable[name.len()]
    }
}

/// Splits a comma-separated delete list, dropping blank entries.
pub fn parse_patterns(raw: &str) -> Vec<ClassPattern> {
    raw.split(',')
        .map(ClassPattern::new)
        .filter(|p| !p.is_empty())
        .collect()
}
